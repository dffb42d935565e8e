//! Table-driven tests for restart decisions
//!
//! Each case feeds a sequence of exits (offset from a common base instant,
//! with the uptime that preceded them) and checks the action for each.

use crate::supervisor::restart_policy::{RestartAction, RestartPolicyEngine, RestartRecord};
use schema::SupervisionConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct RestartPolicyTestCase {
    name: &'static str,
    config: SupervisionConfig,
    exits: Vec<TestExit>,
    expected_actions: Vec<ExpectedAction>,
}

struct TestExit {
    at_ms: u64,
    uptime_ms: u64,
    exit_code: Option<i32>,
    signal: Option<i32>,
}

#[derive(Debug, PartialEq)]
enum ExpectedAction {
    Restart { delay_ms: u64, attempt: u32 },
    GiveUp,
}

impl TestExit {
    fn crash(at_ms: u64, uptime_ms: u64) -> Self {
        Self {
            at_ms,
            uptime_ms,
            exit_code: Some(1),
            signal: None,
        }
    }

    fn killed(at_ms: u64, uptime_ms: u64) -> Self {
        Self {
            at_ms,
            uptime_ms,
            exit_code: None,
            signal: Some(9),
        }
    }

    fn to_record(&self, base: Instant) -> RestartRecord {
        RestartRecord {
            at: base + Duration::from_millis(self.at_ms),
            exit_code: self.exit_code,
            signal: self.signal,
            uptime: Duration::from_millis(self.uptime_ms),
        }
    }
}

impl ExpectedAction {
    fn restart(delay_ms: u64, attempt: u32) -> Self {
        Self::Restart { delay_ms, attempt }
    }
}

fn config(max_restarts: u32, multiplier: f64, max_backoff_ms: u64) -> SupervisionConfig {
    SupervisionConfig {
        max_restarts,
        restart_window_ms: 60_000,
        min_uptime_ms: 1_000,
        base_delay_ms: 1_000,
        backoff_multiplier: multiplier,
        max_backoff_ms,
        ..SupervisionConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cases() -> Vec<RestartPolicyTestCase> {
        vec![
            RestartPolicyTestCase {
                name: "three quick crashes with a budget of two",
                config: config(2, 2.0, 10_000),
                exits: vec![
                    TestExit::crash(100, 100),
                    TestExit::crash(1_300, 100),
                    TestExit::crash(3_500, 100),
                ],
                expected_actions: vec![
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(2_000, 2),
                    ExpectedAction::GiveUp,
                ],
            },
            RestartPolicyTestCase {
                name: "exponential backoff capped at max",
                config: config(6, 2.0, 8_000),
                exits: vec![
                    TestExit::crash(0, 10),
                    TestExit::crash(10, 10),
                    TestExit::killed(20, 10),
                    TestExit::crash(30, 10),
                    TestExit::killed(40, 10),
                ],
                expected_actions: vec![
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(2_000, 2),
                    ExpectedAction::restart(4_000, 3),
                    ExpectedAction::restart(8_000, 4),
                    ExpectedAction::restart(8_000, 5),
                ],
            },
            RestartPolicyTestCase {
                name: "fractional multiplier",
                config: config(5, 1.5, 30_000),
                exits: vec![
                    TestExit::crash(0, 10),
                    TestExit::crash(10, 10),
                    TestExit::crash(20, 10),
                ],
                expected_actions: vec![
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(1_500, 2),
                    ExpectedAction::restart(2_250, 3),
                ],
            },
            RestartPolicyTestCase {
                name: "long uptime collapses history and restores the budget",
                config: config(2, 2.0, 10_000),
                exits: vec![
                    TestExit::crash(0, 10),
                    TestExit::crash(10, 10),
                    // Ran for 5s: history collapses to this exit alone
                    TestExit::crash(5_000, 5_000),
                    TestExit::crash(5_100, 10),
                    TestExit::crash(5_200, 10),
                ],
                expected_actions: vec![
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(2_000, 2),
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(2_000, 2),
                    ExpectedAction::GiveUp,
                ],
            },
            RestartPolicyTestCase {
                name: "exits spaced wider than the window never exhaust the budget",
                config: config(1, 2.0, 10_000),
                exits: vec![
                    TestExit::crash(0, 10),
                    TestExit::crash(61_000, 10),
                    TestExit::crash(122_000, 10),
                ],
                expected_actions: vec![
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(1_000, 1),
                    ExpectedAction::restart(1_000, 1),
                ],
            },
            RestartPolicyTestCase {
                name: "zero budget fails on the first exit",
                config: config(0, 2.0, 10_000),
                exits: vec![TestExit::crash(0, 10)],
                expected_actions: vec![ExpectedAction::GiveUp],
            },
        ]
    }

    #[test]
    fn test_restart_policy_table_driven() {
        for test_case in create_test_cases() {
            println!("Running test case: {}", test_case.name);

            let mut engine = RestartPolicyEngine::new(Arc::new(test_case.config));
            let base = Instant::now();
            assert_eq!(test_case.exits.len(), test_case.expected_actions.len());

            for (i, (exit, expected)) in test_case
                .exits
                .iter()
                .zip(&test_case.expected_actions)
                .enumerate()
            {
                let actual = match engine.record_exit(exit.to_record(base)) {
                    RestartAction::Restart { delay, attempt } => ExpectedAction::Restart {
                        delay_ms: delay.as_millis() as u64,
                        attempt,
                    },
                    RestartAction::GiveUp { .. } => ExpectedAction::GiveUp,
                };
                assert_eq!(&actual, expected, "{} (exit {})", test_case.name, i + 1);
            }
        }
    }

    #[test]
    fn test_budget_never_grants_extra_restart_in_window() {
        for max_restarts in 0..6u32 {
            let mut engine = RestartPolicyEngine::new(Arc::new(config(max_restarts, 2.0, 10_000)));
            let base = Instant::now();
            let mut granted = 0;
            for i in 0..(max_restarts + 3) {
                let exit = TestExit::crash(u64::from(i) * 10, 10);
                if let RestartAction::Restart { .. } = engine.record_exit(exit.to_record(base)) {
                    granted += 1;
                }
            }
            assert_eq!(granted, max_restarts, "max_restarts {max_restarts}");
        }
    }

    #[test]
    fn test_uptime_reset_collapses_to_latest_exit() {
        let mut engine = RestartPolicyEngine::new(Arc::new(config(3, 2.0, 10_000)));
        let base = Instant::now();
        for exit in [
            TestExit::crash(0, 10),
            TestExit::crash(10, 10),
            TestExit::killed(20, 10),
        ] {
            engine.record_exit(exit.to_record(base));
        }
        assert_eq!(engine.history().len(), 3);

        let long_run = TestExit::crash(10_000, 9_000);
        engine.record_exit(long_run.to_record(base));
        assert_eq!(engine.history(), &[long_run.to_record(base)]);
    }
}
