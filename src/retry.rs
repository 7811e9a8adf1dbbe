//! Bounded retry with exponential backoff around one query's fetch+extract.
//!
//! An attempt ends in one of three ways: candidates (success), no candidates
//! (empty) or a [`FetchError`] (fault). Empty and fault both retry until
//! `max_retries` extra attempts have been made; after that the controller
//! gives up with an empty result. Giving up is a warning, never an error: one
//! product without a price must not stop the batch.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::extract::RawCandidate;

/// Retry limits and backoff timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Calculate exponential backoff delay for a given attempt: `base * 2^attempt`,
/// capped at `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Something that can wait. Production code sleeps on the tokio timer;
/// tests record the requested durations instead.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How one attempt ended.
#[derive(Debug)]
enum AttemptOutcome {
    Success(Vec<RawCandidate>),
    Empty,
    Fault(FetchError),
}

impl From<Result<Vec<RawCandidate>, FetchError>> for AttemptOutcome {
    fn from(result: Result<Vec<RawCandidate>, FetchError>) -> Self {
        match result {
            Ok(candidates) if candidates.is_empty() => AttemptOutcome::Empty,
            Ok(candidates) => AttemptOutcome::Success(candidates),
            Err(e) => AttemptOutcome::Fault(e),
        }
    }
}

/// Runs an operation under a [`RetryPolicy`].
pub struct RetryController<'a> {
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a> RetryController<'a> {
    pub fn new(policy: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self { policy, sleeper }
    }

    /// Run `operation` until it yields candidates or retries are exhausted.
    ///
    /// The operation receives the zero-based attempt index.
    pub async fn run<F, Fut>(&self, label: &str, mut operation: F) -> Vec<RawCandidate>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Vec<RawCandidate>, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match AttemptOutcome::from(operation(attempt).await) {
                AttemptOutcome::Success(candidates) => {
                    if attempt > 0 {
                        debug!("{}: succeeded on attempt {}", label, attempt + 1);
                    }
                    return candidates;
                }
                AttemptOutcome::Empty => {
                    debug!("{}: attempt {} found no prices", label, attempt + 1);
                }
                AttemptOutcome::Fault(e) => {
                    debug!("{}: attempt {} failed: {}", label, attempt + 1, e);
                }
            }

            if attempt >= self.policy.max_retries {
                warn!(
                    "{}: no prices after {} attempts, giving up",
                    label,
                    attempt + 1
                );
                return Vec::new();
            }

            let wait = backoff_delay(attempt, self.policy.backoff_base, self.policy.max_backoff);
            warn!(
                "{}: retrying (attempt {}/{}) in {:?}",
                label,
                attempt + 2,
                self.policy.max_retries + 1,
                wait
            );
            self.sleeper.sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records sleeps instead of waiting.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub waits: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn waits(&self) -> Vec<Duration> {
            self.waits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::testing::RecordingSleeper;
    use super::*;
    use crate::extract::CandidateSource;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
        }
    }

    fn candidate(amount: i64) -> RawCandidate {
        RawCandidate::new(amount, CandidateSource::Dom)
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_millis(1000);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, base, cap), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_millis(4000));
        assert_eq!(backoff_delay(6, base, cap), cap);
        assert_eq!(backoff_delay(40, base, cap), cap);
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let sleeper = RecordingSleeper::default();
        let controller = RetryController::new(policy(3), &sleeper);
        let calls = AtomicU32::new(0);

        let result = controller
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        0 => Err(FetchError::NavigationTimeout {
                            url: "https://example.com".to_string(),
                            timeout: Duration::from_secs(1),
                        }),
                        1 => Ok(Vec::new()),
                        _ => Ok(vec![candidate(12000), candidate(13000)]),
                    }
                }
            })
            .await;

        assert_eq!(result, vec![candidate(12000), candidate(13000)]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_always_empty_exhausts_retries() {
        let sleeper = RecordingSleeper::default();
        let controller = RetryController::new(policy(3), &sleeper);
        let calls = AtomicU32::new(0);

        let result = controller
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Vec::new()) }
            })
            .await;

        assert!(result.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            sleeper.waits(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test]
    async fn test_immediate_success_never_sleeps() {
        let sleeper = RecordingSleeper::default();
        let controller = RetryController::new(policy(3), &sleeper);

        let result = controller
            .run("test", |_| async { Ok(vec![candidate(1)]) })
            .await;

        assert_eq!(result, vec![candidate(1)]);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let sleeper = RecordingSleeper::default();
        let controller = RetryController::new(policy(0), &sleeper);
        let calls = AtomicU32::new(0);

        let result = controller
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Navigation("connection reset".to_string())) }
            })
            .await;

        assert!(result.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.waits().is_empty());
    }
}
