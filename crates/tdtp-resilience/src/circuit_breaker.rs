//! Per-resource circuit breaker (§4.6): `Closed -> Open -> HalfOpen -> Closed`,
//! an orthogonal in-flight admission gate, and an async state-change callback
//! that never blocks the state transition itself.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tdtp_core::error::{Result, TdtpError};

const SUBSYSTEM: &str = "circuit_breaker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Failure/success bookkeeping visible to a custom [`ShouldTrip`] predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_requests += 1;
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn reset(&mut self) {
        *self = Counts::default();
    }
}

pub type ShouldTrip = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;
pub type OnStateChange = Arc<dyn Fn(State, State) + Send + Sync>;

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub timeout: Duration,
    pub success_threshold: u32,
    pub max_concurrent_calls: u32,
    pub should_trip: Option<ShouldTrip>,
    pub on_state_change: Option<OnStateChange>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
            max_concurrent_calls: u32::MAX,
            should_trip: None,
            on_state_change: None,
        }
    }
}

struct Inner {
    state: State,
    counts: Counts,
    expiry: Option<Instant>,
    generation: u64,
    in_flight: u32,
}

/// Thread-safe; state transitions are atomic under a single mutex and a
/// generation counter invalidates stale in-flight result bookkeeping after a
/// transition (§4.6).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                counts: Counts::default(),
                expiry: None,
                generation: 0,
                in_flight: 0,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().expect("circuit breaker lock poisoned").state
    }

    fn transition(&self, inner: &mut Inner, to: State) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;
        inner.counts.reset();
        if to == State::Open {
            inner.expiry = Some(Instant::now() + self.config.timeout);
        } else {
            inner.expiry = None;
        }
        if let Some(cb) = self.config.on_state_change.clone() {
            // Fires off the hot path so the transition itself never blocks.
            tokio::spawn(async move {
                cb(from, to);
            });
        }
    }

    /// Admission check. Returns the generation the call was admitted under,
    /// or the error to fail fast with.
    fn admit(&self) -> Result<u64> {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");

        if inner.in_flight >= self.config.max_concurrent_calls {
            return Err(TdtpError::resource(SUBSYSTEM, "too many concurrent calls"));
        }

        match inner.state {
            State::Closed => {}
            State::Open => {
                let expiry = inner.expiry.expect("Open state always carries an expiry");
                if Instant::now() >= expiry {
                    self.transition(&mut inner, State::HalfOpen);
                } else {
                    return Err(TdtpError::transient(SUBSYSTEM, "circuit breaker is open"));
                }
            }
            State::HalfOpen => {}
        }

        inner.in_flight += 1;
        Ok(inner.generation)
    }

    fn record(&self, generation: u64, succeeded: bool) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if generation != inner.generation {
            // A transition happened while this call was in flight; its
            // outcome no longer applies to the current generation's counts.
            return;
        }

        if succeeded {
            inner.counts.on_success();
        } else {
            inner.counts.on_failure();
        }

        match inner.state {
            State::Closed => {
                let tripped = match &self.config.should_trip {
                    Some(predicate) => predicate(&inner.counts),
                    None => inner.counts.consecutive_failures >= self.config.max_failures,
                };
                if tripped {
                    self.transition(&mut inner, State::Open);
                }
            }
            State::HalfOpen => {
                if !succeeded {
                    self.transition(&mut inner, State::Open);
                } else if inner.counts.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, State::Closed);
                }
            }
            State::Open => {}
        }
    }

    /// Runs `f` under the breaker's admission gate, recording the outcome. A
    /// panic inside `f` counts as a failure before propagating, per §9.
    /// `Box::pin` makes the boxed future `Unpin` regardless of `Fut`, which
    /// is what lets a plain `catch_unwind` wrap its `poll` calls below.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = self.admit()?;
        let mut boxed = Box::pin(f());
        let outcome: std::thread::Result<Result<T>> = std::future::poll_fn(move |cx| {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| boxed.as_mut().poll(cx))) {
                Ok(std::task::Poll::Ready(v)) => std::task::Poll::Ready(Ok(v)),
                Ok(std::task::Poll::Pending) => std::task::Poll::Pending,
                Err(payload) => std::task::Poll::Ready(Err(payload)),
            }
        })
        .await;

        match outcome {
            Ok(Ok(value)) => {
                self.record(generation, true);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(generation, false);
                Err(err)
            }
            Err(panic) => {
                self.record(generation, false);
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_failures: u32, timeout: Duration, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig { max_failures, timeout, success_threshold, ..CircuitBreakerConfig::default() }
    }

    #[tokio::test]
    async fn trips_open_after_max_consecutive_failures() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50), 2));
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>(TdtpError::transient("t", "boom")) }).await;
        }
        assert_eq!(breaker.state(), State::Open);
        let result = breaker.call(|| async { Ok::<_, TdtpError>(()) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn half_open_then_closed_after_success_threshold() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(20), 2));
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>(TdtpError::transient("t", "boom")) }).await;
        }
        assert_eq!(breaker.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker.call(|| async { Ok::<_, TdtpError>(()) }).await.unwrap();
        assert_eq!(breaker.state(), State::HalfOpen);

        breaker.call(|| async { Ok::<_, TdtpError>(()) }).await.unwrap();
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(10), 2));
        let _ = breaker.call(|| async { Err::<(), _>(TdtpError::transient("t", "boom")) }).await;
        assert_eq!(breaker.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(15)).await;
        let _ = breaker.call(|| async { Err::<(), _>(TdtpError::transient("t", "boom again")) }).await;
        assert_eq!(breaker.state(), State::Open);
    }

    #[tokio::test]
    async fn max_concurrent_calls_rejects_without_touching_counts() {
        let mut cfg = config(5, Duration::from_secs(1), 1);
        cfg.max_concurrent_calls = 0;
        let breaker = CircuitBreaker::new(cfg);
        let result = breaker.call(|| async { Ok::<_, TdtpError>(()) }).await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), State::Closed);
    }
}
