//! Memory pressure sampling for the health score

use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

/// Source of the host's memory pressure
pub trait MemorySampler: Send + Sync {
    /// Fraction of memory in use, `0.0..=1.0`
    fn pressure(&self) -> f64;
}

/// Reads used/total memory of the host through `sysinfo`
pub struct SystemMemory {
    system: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemory").finish_non_exhaustive()
    }
}

impl MemorySampler for SystemMemory {
    fn pressure(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            debug!("Total memory reported as 0, assuming no pressure");
            return 0.0;
        }
        clamp_pressure(system.used_memory() as f64 / total as f64)
    }
}

/// A constant pressure, for tests and hosts without memory accounting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FixedMemory(pub f64);

impl MemorySampler for FixedMemory {
    fn pressure(&self) -> f64 {
        clamp_pressure(self.0)
    }
}

fn clamp_pressure(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
