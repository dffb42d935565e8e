//! Restart policy logic and backoff calculation
//!
//! Every exit of a worker is appended to a sliding-window history. The
//! history, pruned to `restart_window` on each exit, is the only input to the
//! restart decision:
//!
//! - restart while the number of exits in the window is `<= max_restarts`
//! - the delay before restart `k` (1-based within the window) is
//!   `min(base_delay * backoff_multiplier^(k-1), max_backoff)`
//! - an exit after an uptime of at least `min_uptime` collapses the history to
//!   that single exit, starting a fresh counting window

use schema::SupervisionConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// One recorded worker exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRecord {
    /// When the exit was observed
    pub at: Instant,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// How long the process ran before exiting
    pub uptime: Duration,
}

/// Action to take when a worker exits
#[derive(Debug, Clone, PartialEq)]
pub enum RestartAction {
    /// Restart the worker after the specified delay
    Restart { delay: Duration, attempt: u32 },
    /// The restart budget is exhausted
    GiveUp { restarts_in_window: u32 },
}

/// Compute the backoff delay for the `attempt`-th restart in the window
///
/// `attempt` is 1-based; 0 is treated as 1.
pub fn backoff_delay(config: &SupervisionConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let base_ms = config.base_delay_ms as f64;
    let max_ms = config.max_backoff_ms as f64;
    let delay_ms = base_ms * config.backoff_multiplier.powf(f64::from(exponent));
    let capped_ms = if delay_ms.is_finite() {
        delay_ms.clamp(0.0, max_ms)
    } else {
        max_ms
    };
    Duration::from_millis(capped_ms as u64)
}

/// Restart decision engine owned by a single worker supervisor
#[derive(Debug)]
pub struct RestartPolicyEngine {
    config: Arc<SupervisionConfig>,
    history: Vec<RestartRecord>,
    total_restarts: u32,
}

impl RestartPolicyEngine {
    pub fn new(config: Arc<SupervisionConfig>) -> Self {
        Self {
            config,
            history: Vec::new(),
            total_restarts: 0,
        }
    }

    /// Record an exit and decide what to do about it
    pub fn record_exit(&mut self, record: RestartRecord) -> RestartAction {
        let now = record.at;
        let long_run = record.uptime >= self.config.min_uptime();
        self.history.push(record);
        self.prune(now);

        if long_run && self.history.len() > 1 {
            debug!(
                "Exit after {:?} uptime, collapsing {} restart records",
                self.history.last().map(|r| r.uptime).unwrap_or_default(),
                self.history.len()
            );
            let start = self.history.len() - 1;
            self.history.drain(..start);
        }

        let count = u32::try_from(self.history.len()).unwrap_or(u32::MAX);
        if count <= self.config.max_restarts {
            self.total_restarts = self.total_restarts.saturating_add(1);
            let delay = backoff_delay(&self.config, count);
            debug!("Restart {} in window allowed after {:?}", count, delay);
            RestartAction::Restart {
                delay,
                attempt: count,
            }
        } else {
            debug!(
                "Restart budget exhausted: {} exits within {:?}",
                count,
                self.config.restart_window()
            );
            RestartAction::GiveUp {
                restarts_in_window: count,
            }
        }
    }

    /// Exits recorded within the window ending at `now`
    pub fn restarts_in_window(&self, now: Instant) -> usize {
        let window = self.config.restart_window();
        self.history
            .iter()
            .filter(|r| now.saturating_duration_since(r.at) <= window)
            .count()
    }

    /// Restarts granted over the engine's lifetime
    pub fn total_restarts(&self) -> u32 {
        self.total_restarts
    }

    /// Current window contents, oldest first
    pub fn history(&self) -> &[RestartRecord] {
        &self.history
    }

    /// Forget the window (operator start from `Failed`)
    pub fn reset(&mut self) {
        debug!("Resetting restart history, had {} records", self.history.len());
        self.history.clear();
    }

    fn prune(&mut self, now: Instant) {
        let window = self.config.restart_window();
        self.history
            .retain(|r| now.saturating_duration_since(r.at) <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupervisionConfig {
        SupervisionConfig {
            max_restarts: 2,
            restart_window_ms: 60_000,
            min_uptime_ms: 1_000,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            ..SupervisionConfig::default()
        }
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let config = config();
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay >= previous, "attempt {attempt}");
            assert!(delay <= config.max_backoff(), "attempt {attempt}");
            previous = delay;
        }
        assert_eq!(backoff_delay(&config, u32::MAX), config.max_backoff());
    }

    #[test]
    fn test_attempt_zero_uses_base_delay() {
        assert_eq!(backoff_delay(&config(), 0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_window_pruning() {
        let mut engine = RestartPolicyEngine::new(Arc::new(config()));
        let base = Instant::now();
        let short = Duration::from_millis(10);
        let exit = |at| RestartRecord {
            at,
            exit_code: Some(1),
            signal: None,
            uptime: short,
        };

        engine.record_exit(exit(base));
        engine.record_exit(exit(base + Duration::from_secs(1)));
        // Both earlier exits fall out of the 60s window
        let action = engine.record_exit(exit(base + Duration::from_secs(62)));
        assert_eq!(
            action,
            RestartAction::Restart {
                delay: Duration::from_millis(1_000),
                attempt: 1
            }
        );
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.restarts_in_window(base + Duration::from_secs(200)), 0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut engine = RestartPolicyEngine::new(Arc::new(config()));
        let now = Instant::now();
        for _ in 0..3 {
            engine.record_exit(RestartRecord {
                at: now,
                exit_code: None,
                signal: Some(9),
                uptime: Duration::ZERO,
            });
        }
        assert_eq!(engine.restarts_in_window(now), 3);
        assert_eq!(engine.total_restarts(), 2);
        engine.reset();
        assert!(engine.history().is_empty());
    }
}
