//! Schema definitions for warden
//!
//! This crate contains the data structures shared across the workspace:
//! worker specifications and state, supervision configuration, the
//! supervisor/worker wire protocol, health reports and events. All types
//! implement JSON Schema generation for external consumption.

use std::time::SystemTime;

pub mod events;
pub mod health;
pub mod protocol;
pub mod supervision;
pub mod worker;

pub use events::*;
pub use health::*;
pub use protocol::*;
pub use supervision::*;
pub use worker::*;

/// Current wall-clock time as an RFC3339 string with millisecond precision
#[must_use]
pub fn current_timestamp() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_format() {
        let ts = current_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert!(humantime::parse_rfc3339(&ts).is_ok());
    }
}
