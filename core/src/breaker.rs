//! Circuit breaker guarding calls to an external dependency
//!
//! ```text
//!            failures >= failure_threshold
//!   Closed ─────────────────────────────────▶ Open
//!     ▲                                        │  open_timeout elapsed,
//!     │ successes >= success_threshold         │  next call is a trial
//!     │                                        ▼
//!     └──────────────────────────────────── HalfOpen
//!                 any failure ──▶ Open
//! ```
//!
//! Counters live behind an internal lock so a breaker can be shared between
//! the owning supervisor, recovery probes and the aggregator. The lock is
//! never held across the guarded call. Transitions are appended to a bounded
//! audit trail and published on a broadcast channel; publishing never blocks.

use schema::{CircuitBreakerConfig, CircuitState, StateTransition};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::history::BoundedHistory;

/// Number of transitions retained per breaker
pub const STATE_HISTORY_CAPACITY: usize = 64;

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// Outcome of a call refused or failed through a breaker
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked
    #[error("circuit '{0}' is open")]
    Open(String),

    /// The operation ran and failed with its own error
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the call was rejected without running
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// The operation's error, if it ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

/// Point-in-time counters of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    history: BoundedHistory<StateTransition>,
}

/// A named circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: parking_lot::Mutex<BreakerInner>,
    transitions: broadcast::Sender<StateTransition>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            config,
            inner: parking_lot::Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                history: BoundedHistory::new(STATE_HISTORY_CAPACITY),
            }),
            transitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current state and counters
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    /// Retained transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock().history.snapshot()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// How long until an open breaker admits a trial call
    ///
    /// `None` when the breaker is not open.
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner.last_failure_at.map(|at| at.elapsed()).unwrap_or_default();
        Some(self.config.open_timeout().saturating_sub(elapsed))
    }

    /// Run `operation` through the breaker
    ///
    /// An open breaker rejects the call without invoking `operation` unless
    /// the open timeout has elapsed, in which case the call becomes a
    /// half-open trial. The operation's error is returned unchanged inside
    /// [`BreakerError::Inner`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admit or reject a call, moving Open to HalfOpen once the timeout has elapsed
    fn acquire<E>(&self) -> Result<(), BreakerError<E>> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != CircuitState::Open {
                return Ok(());
            }
            let cooled_down = inner
                .last_failure_at
                .map_or(true, |at| at.elapsed() > self.config.open_timeout());
            if !cooled_down {
                debug!("Breaker '{}' rejected call while open", self.name);
                return Err(BreakerError::Open(self.name.clone()));
            }
            self.transition(&mut inner, CircuitState::HalfOpen)
        };
        self.publish(transition);
        Ok(())
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        Some(self.transition(&mut inner, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                // Completion of a call admitted before the breaker tripped
                CircuitState::Open => None,
            }
        };
        if let Some(transition) = transition {
            self.publish(transition);
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    inner.success_count = 0;
                    if inner.failure_count >= self.config.failure_threshold {
                        inner.last_failure_at = Some(now);
                        Some(self.transition(&mut inner, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.last_failure_at = Some(now);
                    Some(self.transition(&mut inner, CircuitState::Open))
                }
                CircuitState::Open => {
                    inner.last_failure_at = Some(now);
                    None
                }
            }
        };
        if let Some(transition) = transition {
            self.publish(transition);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) -> StateTransition {
        let record = StateTransition {
            breaker: self.name.clone(),
            from: inner.state,
            to,
            timestamp: schema::current_timestamp(),
        };
        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.history.push(record.clone());
        record
    }

    fn publish(&self, transition: StateTransition) {
        match transition.to {
            CircuitState::Open => warn!(
                "Breaker '{}' opened (from {:?})",
                self.name, transition.from
            ),
            CircuitState::HalfOpen => info!("Breaker '{}' half-open, admitting trial", self.name),
            CircuitState::Closed => info!("Breaker '{}' closed", self.name),
        }
        // No subscribers is fine
        let _ = self.transitions.send(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(failures: u32, successes: u32, open_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            open_timeout_ms: open_ms,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_trips_at_exact_threshold() {
        for threshold in 1..=6 {
            let breaker = CircuitBreaker::new("db", config(threshold, 1, 1000));
            for _ in 0..threshold - 1 {
                let _ = fail(&breaker).await;
            }
            assert_eq!(breaker.state(), CircuitState::Closed, "threshold {threshold}");
            let _ = fail(&breaker).await;
            assert_eq!(breaker.state(), CircuitState::Open, "threshold {threshold}");
        }
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("db", config(3, 1, 1000));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().failure_count, 0);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_inner_error_is_returned_unchanged() {
        let breaker = CircuitBreaker::new("db", config(3, 1, 1000));
        match fail(&breaker).await {
            Err(BreakerError::Inner(e)) => assert_eq!(e, "boom"),
            other => panic!("expected inner error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_failure_reverts() {
        let breaker = CircuitBreaker::new("db", config(1, 3, 100));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_millis(101)).await;

        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().success_count, 2);

        let _ = fail(&breaker).await;
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.success_count, 0);
        assert_eq!(snapshot.failure_count, 0);
        assert!(fail(&breaker).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_and_recovery_scenario() {
        let breaker = CircuitBreaker::new("api", config(3, 2, 100));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(50)).await;
        let rejected = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;
        assert!(matches!(rejected, Err(BreakerError::Open(ref name)) if name == "api"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(60)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);

        let states: Vec<_> = breaker.history().iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            states,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_published() {
        let breaker = CircuitBreaker::new("cache", config(1, 1, 100));
        let mut rx = breaker.subscribe();

        let _ = fail(&breaker).await;
        let opened = rx.recv().await.unwrap();
        assert_eq!(opened.breaker, "cache");
        assert_eq!(opened.to, CircuitState::Open);

        assert_eq!(
            breaker.time_until_half_open(),
            Some(Duration::from_millis(100))
        );
        tokio::time::advance(Duration::from_millis(101)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().to, CircuitState::HalfOpen);
        assert_eq!(rx.recv().await.unwrap().to, CircuitState::Closed);
        assert_eq!(breaker.time_until_half_open(), None);
    }
}
