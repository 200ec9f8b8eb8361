use crate::error::CircuitOpenError;
use crate::pipeline::PipelineHealth;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through normally.
    #[default]
    Closed,
    /// Calls are rejected without reaching the pipeline.
    Open,
    /// Probing whether the pipeline recovered, one call at a time.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    /// Consecutive probe successes needed to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Observer notified after every state transition.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, pipeline: &str, transition: StateTransition);
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
    pub last_duration: Option<Duration>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_duration: Option<Duration>,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Per-pipeline failure isolation state machine.
pub struct CircuitBreaker {
    pipeline: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl CircuitBreaker {
    pub fn new(pipeline: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            pipeline: pipeline.into(),
            config,
            state: Mutex::new(BreakerState::default()),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Health as seen by selection. An open circuit whose recovery window has
    /// elapsed reports `Degraded` so the next call can probe it.
    pub fn health(&self) -> PipelineHealth {
        let state = self.state.lock();
        match state.state {
            CircuitState::Closed => PipelineHealth::Healthy,
            CircuitState::HalfOpen => PipelineHealth::Degraded,
            CircuitState::Open if self.recovery_elapsed(&state) => PipelineHealth::Degraded,
            CircuitState::Open => PipelineHealth::CircuitOpen,
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock();
        CircuitBreakerSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
            last_duration: state.last_duration,
            total_calls: state.total_calls,
            total_failures: state.total_failures,
            rejected_calls: state.rejected_calls,
        }
    }

    /// Admits or rejects a call. Every admitted call must be followed by
    /// `record_success`, `record_failure` or `abandon`.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        let transition = match state.state {
            CircuitState::Closed => None,
            CircuitState::Open if self.recovery_elapsed(&state) => {
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                Some(StateTransition {
                    from: CircuitState::Open,
                    to: CircuitState::HalfOpen,
                })
            }
            CircuitState::HalfOpen if !state.probe_in_flight => None,
            CircuitState::Open | CircuitState::HalfOpen => {
                state.rejected_calls += 1;
                debug!(pipeline = %self.pipeline, state = %state.state, "Call rejected by circuit breaker");
                return Err(CircuitOpenError {
                    pipeline: self.pipeline.clone(),
                });
            }
        };

        if state.state == CircuitState::HalfOpen {
            state.probe_in_flight = true;
        }
        state.total_calls += 1;
        drop(state);

        self.notify(transition);
        Ok(())
    }

    pub fn record_success(&self, duration: Duration) -> Option<StateTransition> {
        let mut state = self.state.lock();
        state.last_duration = Some(duration);

        let transition = match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                state.probe_in_flight = false;
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    Self::close(&mut state);
                    Some(StateTransition {
                        from: CircuitState::HalfOpen,
                        to: CircuitState::Closed,
                    })
                } else {
                    None
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => None,
        };
        drop(state);

        self.notify(transition)
    }

    pub fn record_failure(&self, duration: Duration) -> Option<StateTransition> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.last_duration = Some(duration);
        state.last_failure_time = Some(now);
        state.total_failures += 1;

        let transition = match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    Self::trip(&mut state, now);
                    Some(StateTransition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                state.failure_count += 1;
                Self::trip(&mut state, now);
                Some(StateTransition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Open => None,
        };
        drop(state);

        self.notify(transition)
    }

    /// Releases an admitted call that never completed (its future was dropped).
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.probe_in_flight = false;
        }
    }

    /// Runs `operation` through the breaker, timing it.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.try_acquire().map_err(CallError::Open)?;
        let guard = CallGuard::new(self);
        match operation.await {
            Ok(value) => {
                guard.success();
                Ok(value)
            }
            Err(error) => {
                guard.failure();
                Err(CallError::Inner(error))
            }
        }
    }

    fn recovery_elapsed(&self, state: &BreakerState) -> bool {
        state
            .opened_at
            .map_or(true, |opened| opened.elapsed() >= self.config.recovery_timeout())
    }

    fn trip(state: &mut BreakerState, now: Instant) {
        state.state = CircuitState::Open;
        state.opened_at = Some(now);
        state.success_count = 0;
        state.probe_in_flight = false;
    }

    fn close(state: &mut BreakerState) {
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    fn notify(&self, transition: Option<StateTransition>) -> Option<StateTransition> {
        let transition = transition?;
        match transition.to {
            CircuitState::Open => warn!(
                pipeline = %self.pipeline,
                from = %transition.from,
                recovery_timeout_ms = self.config.recovery_timeout_ms,
                "Circuit opened"
            ),
            _ => info!(
                pipeline = %self.pipeline,
                from = %transition.from,
                to = %transition.to,
                "Circuit state changed"
            ),
        }
        if let Some(listener) = &self.listener {
            listener.on_transition(&self.pipeline, transition);
        }
        Some(transition)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug)]
pub enum CallError<E> {
    Open(CircuitOpenError),
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open(open) => write!(f, "{}", open),
            CallError::Inner(inner) => write!(f, "{}", inner),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Open(open) => Some(open),
            CallError::Inner(inner) => Some(inner),
        }
    }
}

/// Times an admitted call and reports its outcome; releases the probe slot
/// if dropped before an outcome is recorded.
pub(crate) struct CallGuard<B: Deref<Target = CircuitBreaker>> {
    breaker: B,
    started: Instant,
    finished: bool,
}

impl<B: Deref<Target = CircuitBreaker>> CallGuard<B> {
    pub(crate) fn new(breaker: B) -> Self {
        Self {
            breaker,
            started: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn success(mut self) {
        self.finished = true;
        self.breaker.record_success(self.started.elapsed());
    }

    pub(crate) fn failure(mut self) {
        self.finished = true;
        self.breaker.record_failure(self.started.elapsed());
    }
}

impl<B: Deref<Target = CircuitBreaker>> Drop for CallGuard<B> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn breaker(failure_threshold: u32, recovery_timeout_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "face",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout_ms,
                success_threshold,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        breaker.call(async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        breaker.call(async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, 1_000, 2);
        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(CallError::Inner("boom"))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut invoked = false;
        let result = breaker
            .call(async {
                invoked = true;
                Ok::<(), &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(CallError::Open(_))));
        assert!(!invoked);
        assert_eq!(breaker.snapshot().rejected_calls, 1);
        assert_eq!(breaker.health(), PipelineHealth::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failures() {
        let breaker = breaker(3, 1_000, 1);
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_probe_at_a_time() {
        let breaker = breaker(1, 1_000, 2);
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(breaker.health(), PipelineHealth::Degraded);

        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_err());

        breaker.record_success(Duration::from_millis(5));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_and_restarts_timer() {
        let breaker = breaker(1, 1_000, 1);
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        assert!(matches!(fail(&breaker).await, Err(CallError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(succeed(&breaker).await, Err(CallError::Open(_))));

        tokio::time::advance(Duration::from_millis(500)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_releases_slot() {
        let breaker = breaker(1, 10, 1);
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_millis(10)).await;

        breaker.try_acquire().unwrap();
        drop(CallGuard::new(&breaker));
        assert!(breaker.try_acquire().is_ok());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, StateTransition)>>);

    impl TransitionListener for Recorder {
        fn on_transition(&self, pipeline: &str, transition: StateTransition) {
            self.0.lock().push((pipeline.to_string(), transition));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn listener_sees_every_transition() {
        let recorder = Arc::new(Recorder::default());
        let breaker = breaker(1, 10, 1).with_listener(recorder.clone());

        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_millis(10)).await;
        succeed(&breaker).await.unwrap();

        let seen: Vec<CircuitState> = recorder.0.lock().iter().map(|(_, t)| t.to).collect();
        assert_eq!(
            seen,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    proptest! {
        #[test]
        fn failure_count_is_zero_whenever_closed_after_recovery(outcomes in proptest::collection::vec(any::<bool>(), 1..60)) {
            let breaker = breaker(3, 0, 2);
            for success in outcomes {
                if breaker.try_acquire().is_err() {
                    continue;
                }
                let before = breaker.state();
                if success {
                    breaker.record_success(Duration::from_millis(1));
                } else {
                    breaker.record_failure(Duration::from_millis(1));
                }
                let after = breaker.snapshot();
                if before != CircuitState::Closed && after.state == CircuitState::Closed {
                    prop_assert_eq!(after.failure_count, 0);
                    prop_assert_eq!(after.success_count, 0);
                }
                prop_assert!(after.failure_count <= 3 || after.state != CircuitState::Closed);
            }
        }
    }
}
