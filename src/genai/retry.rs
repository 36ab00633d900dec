use std::{future::Future, time::Duration};

use tracing::{info, warn};

use super::{notify, GenAiError, StatusSink, StepStatus};

/// Per-call-site timeout and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            ..Self::default()
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }

    /// Upper bound on wall-clock time spent inside [`with_timeout_and_retry`].
    pub fn worst_case(&self) -> Duration {
        (0..=self.max_retries).fold(Duration::ZERO, |acc, attempt| {
            let backoff = if attempt == 0 {
                Duration::ZERO
            } else {
                self.backoff_for(attempt)
            };
            acc.saturating_add(self.timeout).saturating_add(backoff)
        })
    }
}

/// Runs `operation` under `policy.timeout`, retrying any failure (timeouts
/// included) up to `policy.max_retries` times with exponential backoff.
///
/// At most `max_retries + 1` attempts are made. `on_status` receives
/// [`StepStatus::Retrying`] once per retry, never for the first attempt. A
/// timed-out attempt is abandoned, not cancelled on the remote side.
pub async fn with_timeout_and_retry<T, F, Fut>(
    policy: &RetryPolicy,
    on_status: Option<&StatusSink>,
    mut operation: F,
) -> Result<T, GenAiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenAiError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            notify(on_status, StepStatus::Retrying);
            let delay = policy.backoff_for(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(res) => res,
            Err(_) => Err(GenAiError::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                warn!(attempt, max_retries = policy.max_retries, error = %e, "attempt failed");
                if attempt > policy.max_retries {
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use tokio::time::Instant;

    fn failing_then_ok(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, GenAiError>> + Send>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(GenAiError::InvalidResponse(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            })
        }
    }

    fn counting_sink(counter: Arc<AtomicU32>) -> impl Fn(StepStatus) + Send + Sync {
        move |s| {
            assert_eq!(s, StepStatus::Retrying);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_policy_and_backoff_schedule() {
        let p = RetryPolicy::default();
        assert_eq!(p.timeout, Duration::from_secs(30));
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.backoff_for(1), Duration::from_secs(2));
        assert_eq!(p.backoff_for(2), Duration::from_secs(4));
        assert_eq!(p.backoff_for(3), Duration::from_secs(8));
        // 4 attempts * 30s + 2 + 4 + 8
        assert_eq!(p.worst_case(), Duration::from_secs(134));
        // saturates instead of overflowing
        assert_eq!(p.backoff_for(200), Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_n_failures_and_notifies_n_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let sink = counting_sink(retries.clone());
        let policy = RetryPolicy::new(Duration::from_secs(60), 3);

        let start = Instant::now();
        let res = with_timeout_and_retry(&policy, Some(&sink), failing_then_ok(2, calls.clone())).await;

        assert_eq!(res.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        // backoff 2s + 4s, operations themselves are instant
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_never_notifies() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let sink = counting_sink(retries.clone());
        let res = with_timeout_and_retry(
            &RetryPolicy::default(),
            Some(&sink),
            failing_then_ok(0, calls.clone()),
        )
        .await;
        assert_eq!(res.unwrap(), 1);
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let sink = counting_sink(retries.clone());
        let policy = RetryPolicy::new(Duration::from_secs(60), 1);

        let err = with_timeout_and_retry(&policy, Some(&sink), failing_then_ok(5, calls.clone()))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "Invalid response: attempt 2");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(Duration::from_secs(60), 0);
        let err = with_timeout_and_retry(&policy, None, failing_then_ok(1, calls.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, GenAiError::InvalidResponse(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(Duration::from_secs(60), 1);
        let counter = calls.clone();

        let start = Instant::now();
        let res = with_timeout_and_retry(&policy, None, || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                }
                Ok::<_, GenAiError>(n)
            }
        })
        .await;

        assert_eq!(res.unwrap(), 2);
        // 60s timeout + 2s backoff
        assert_eq!(start.elapsed(), Duration::from_secs(62));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_when_every_attempt_hangs() {
        let policy = RetryPolicy::new(Duration::from_secs(30), 0);
        let err = with_timeout_and_retry(&policy, None, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), GenAiError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GenAiError::Timeout(d) if d == Duration::from_secs(30)));
        assert_eq!(err.to_string(), "Timeout after 30000ms");
    }
}
