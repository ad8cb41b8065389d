use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::resilience::CircuitBreaker;

/// Upper bound on the jitter added to each backoff step, as a fraction of the exponential term.
pub const JITTER_FRACTION: f64 = 0.3;

/// Largest exponent applied to the base delay; beyond this the max delay always wins anyway.
const MAX_BACKOFF_SHIFT: u32 = 20;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`:
    /// `min(base * 2^attempt + jitter(0..30% of that), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        self.delay_with_jitter(attempt, jitter)
    }

    fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT));
        let with_jitter = exp.saturating_add(exp.mul_f64(jitter.clamp(0.0, JITTER_FRACTION)));
        with_jitter.min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: cfg.base_delay,
            max_delay: cfg.max_delay,
            attempt_timeout: cfg.attempt_timeout,
        }
    }
}

/// Runs an async operation with bounded retries and backoff, gated by and reporting to
/// the circuit breaker. Holds no state of its own beyond the breaker handle.
#[derive(Clone)]
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute `op` against the dependency named `circuit`.
    ///
    /// Returns `CircuitOpen` without calling `op` when the circuit rejects. Otherwise returns
    /// the first success, or the error of the final attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        circuit: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if self.breaker.is_open(circuit) {
            debug!(circuit, "Call rejected: circuit open");
            return Err(FetchError::CircuitOpen(circuit.to_string()));
        }

        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(policy.attempt_timeout.as_millis() as u64)),
            };

            let err = match outcome {
                Ok(value) => {
                    self.breaker.record_success(circuit);
                    if attempt > 0 {
                        debug!(circuit, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !err.is_provider_fault() {
                // Not a fault, but a half-open trial still has to settle the circuit.
                match err {
                    FetchError::NotFound(_) => self.breaker.record_success(circuit),
                    _ => self.breaker.release_trial(circuit),
                }
                debug!(circuit, error = %err, "Non-provider error, not retrying");
                return Err(err);
            }

            let tripped = self.breaker.record_failure(circuit);
            warn!(
                circuit,
                attempt = attempt + 1,
                max_attempts = policy.max_retries + 1,
                error = %err,
                "Attempt {} failed: {err}",
                attempt + 1,
            );

            if tripped {
                // Fail fast rather than keep hammering a dependency that just tripped.
                return Err(err);
            }
            if !err.is_retryable() || attempt >= policy.max_retries {
                return Err(err);
            }

            let delay = policy.delay_for(attempt);
            debug!(circuit, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
            attempt += 1;

            // Another task may have tripped the circuit while we slept.
            if self.breaker.is_open(circuit) {
                return Err(FetchError::CircuitOpen(circuit.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitConfig;
    use crate::resilience::circuit_breaker::CircuitPhase;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(threshold: u32) -> RetryExecutor {
        RetryExecutor::new(Arc::new(CircuitBreaker::new(&CircuitConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(60),
        })))
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn delay_is_bounded_by_max_for_every_attempt() {
        let p = policy(3);
        for attempt in 0..64 {
            assert!(p.delay_for(attempt) <= p.max_delay, "attempt {attempt}");
            assert!(p.delay_with_jitter(attempt, JITTER_FRACTION) <= p.max_delay);
        }
    }

    #[test]
    fn delay_grows_exponentially_until_capped() {
        let p = policy(3);
        assert_eq!(p.delay_with_jitter(0, 0.0), Duration::from_millis(100));
        assert_eq!(p.delay_with_jitter(1, 0.0), Duration::from_millis(200));
        assert_eq!(p.delay_with_jitter(2, 0.0), Duration::from_millis(400));
        assert_eq!(p.delay_with_jitter(3, 0.0), Duration::from_millis(800));
        assert_eq!(p.delay_with_jitter(4, 0.0), Duration::from_millis(1_000));
        let jittered = p.delay_with_jitter(1, 0.3);
        assert!(jittered > Duration::from_millis(259) && jittered < Duration::from_millis(261));

        // Jittered lower bounds never decrease.
        let mut prev = Duration::ZERO;
        for attempt in 0..10 {
            let lower = p.delay_with_jitter(attempt, 0.0);
            assert!(lower >= prev);
            assert!(p.delay_for(attempt) >= lower);
            prev = lower;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let exec = executor(10);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = exec
            .execute("dex", &policy(3), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::Transient("502".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(exec.breaker().status("dex").failures, 0, "success resets failures");
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_last_error_after_exhausting_retries() {
        let exec = executor(10);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = exec
            .execute("dex", &policy(2), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Transient(format!("attempt {n}")))
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match result {
            Err(FetchError::Transient(msg)) => assert_eq!(msg, "attempt 2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_open_circuit_and_fourth_call_is_not_attempted() {
        let exec = executor(3);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let failing = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FetchError::Transient("down".into()))
        };

        for _ in 0..3 {
            let _ = exec.execute("X", &policy(0), failing).await;
        }
        assert!(exec.breaker().is_open("X"));

        let fourth = exec.execute("X", &policy(0), failing).await;
        assert!(matches!(fourth, Err(FetchError::CircuitOpen(ref n)) if n == "X"));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "wrapped op must not run");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_as_soon_as_circuit_trips() {
        let exec = executor(2);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = exec
            .execute("dex", &policy(5), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::RateLimited("429".into()))
            })
            .await;

        assert!(matches!(result, Err(FetchError::RateLimited(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let exec = executor(1);
        let mut p = policy(0);
        p.attempt_timeout = Duration::from_millis(50);

        let result: Result<(), _> = exec
            .execute("slow", &p, move || async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(FetchError::Timeout(50))));
        assert!(exec.breaker().is_open("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn data_quality_errors_are_not_retried() {
        let exec = executor(10);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let _: Result<(), _> = exec
            .execute("dex", &policy(3), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::DataQuality("no pairs field".into()))
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(exec.breaker().status("dex").failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_does_not_count_against_circuit() {
        let exec = executor(1);

        let result: Result<(), _> = exec
            .execute("dex", &policy(3), move || async move {
                Err(FetchError::NotFound("pool".into()))
            })
            .await;

        assert!(matches!(result, Err(FetchError::NotFound(_))));
        assert!(!exec.breaker().is_open("dex"));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_from_half_open_trial_closes_the_circuit() {
        let exec = executor(1);
        let _: Result<(), _> = exec
            .execute("dex", &policy(0), || async { Err(FetchError::Transient("502".into())) })
            .await;
        assert!(exec.breaker().is_open("dex"));

        tokio::time::advance(Duration::from_secs(61)).await;
        let trial: Result<(), _> = exec
            .execute("dex", &policy(0), || async { Err(FetchError::NotFound("pool".into())) })
            .await;
        assert!(matches!(trial, Err(FetchError::NotFound(_))));
        assert_eq!(exec.breaker().status("dex").phase, CircuitPhase::Closed);

        tokio::time::advance(Duration::from_secs(3_600)).await;
        let later = exec.execute("dex", &policy(0), || async { Ok(7) }).await;
        assert_eq!(later.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_trial_hands_the_trial_to_the_next_call() {
        let exec = executor(1);
        let _: Result<(), _> = exec
            .execute("dex", &policy(0), || async { Err(FetchError::Transient("502".into())) })
            .await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let trial: Result<(), _> = exec
            .execute("dex", &policy(0), || async {
                Err(FetchError::Unsupported { provider: "dex".into(), operation: "pool history" })
            })
            .await;
        assert!(matches!(trial, Err(FetchError::Unsupported { .. })));
        assert_eq!(exec.breaker().status("dex").phase, CircuitPhase::Open);

        let next = exec.execute("dex", &policy(0), || async { Ok(7) }).await;
        assert_eq!(next.unwrap(), 7);
        assert_eq!(exec.breaker().status("dex").phase, CircuitPhase::Closed);
    }
}
