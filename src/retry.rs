//! Bounded retry with exponential backoff for outbound provider calls.
//!
//! A [`RetryPolicy`] wraps an async call, classifies each failure through an
//! [`ErrorClassifier`], and retries only the kinds configured as retryable.
//! Fatal kinds (credit exhaustion, invalid requests) return immediately even
//! when attempts remain. The backoff wait suspends only the current task, so
//! one policy value can serve many concurrent calls, each with its own
//! attempt counter.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::{ApiError, ErrorClassifier, ErrorKind, RawFailure};

/// Default number of attempts before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default backoff multiplier applied per attempt.
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default cap on any single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Per-attempt outcome derived from the policy. Recomputed every attempt,
/// never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    /// Backoff delay to wait before the next attempt, if retrying.
    pub delay: Duration,
    /// Whether another attempt should be made.
    pub retry: bool,
}

/// Configuration for retrying transiently-failing provider calls.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Clamped to >= 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay per attempt. Clamped to >= 1.
    pub backoff_multiplier: f64,
    /// Cap on any single backoff delay.
    pub max_delay: Duration,
    /// Kinds worth retrying. Unknown is excluded by default; callers that
    /// prefer optimism can insert it.
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            retryable_kinds: [ErrorKind::RateLimited, ErrorKind::Transient]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of attempts (minimum 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay before the first retry.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the per-attempt backoff multiplier (minimum 1).
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = if multiplier < 1.0 { 1.0 } else { multiplier };
        self
    }

    /// Sets the cap on any single backoff delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Marks an additional kind as retryable.
    pub fn with_retryable(mut self, kind: ErrorKind) -> Self {
        self.retryable_kinds.insert(kind);
        self
    }

    /// Whether the given kind is configured as retryable.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Backoff delay for a given attempt: `base_delay * multiplier^(attempt - 1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Computes the decision for an attempt that failed with the given kind.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        RetryDecision {
            attempt,
            delay: self.delay_for(attempt),
            retry: self.is_retryable(kind) && attempt < self.max_attempts.max(1),
        }
    }

    /// Runs `call` with bounded retry.
    ///
    /// Each failure is classified; retryable kinds are retried after backoff
    /// until attempts run out, at which point the last classified error is
    /// returned with its details annotated with the total attempt count.
    /// Non-retryable kinds return immediately. Both the in-flight call and
    /// the backoff sleep abort promptly when `cancel` flips to `true`.
    pub async fn run<T, F, Fut>(
        &self,
        classifier: &ErrorClassifier,
        mut cancel: watch::Receiver<bool>,
        mut call: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            if *cancel.borrow() {
                return Err(cancelled_error(attempt));
            }

            let outcome = tokio::select! {
                result = call(attempt) => Some(result),
                _ = cancelled(&mut cancel) => None,
            };

            let failure = match outcome {
                None => return Err(cancelled_error(attempt)),
                Some(Ok(value)) => return Ok(value),
                Some(Err(failure)) => failure,
            };

            let err = classifier.classify(&failure);
            let decision = self.decide(attempt, err.kind);

            if !decision.retry {
                if self.is_retryable(err.kind) && attempt >= max_attempts {
                    error!(
                        kind = %err.kind,
                        attempts = attempt,
                        "provider call failed, attempts exhausted: {err}"
                    );
                    return Err(err.with_detail("attempts", attempt));
                }
                error!(kind = %err.kind, attempt, "provider call failed fatally: {err}");
                return Err(err);
            }

            warn!(
                kind = %err.kind,
                attempt,
                delay_ms = decision.delay.as_millis() as u64,
                "retrying provider call after failure: {err}"
            );

            tokio::select! {
                _ = sleep(decision.delay) => {}
                _ = cancelled(&mut cancel) => return Err(cancelled_error(attempt)),
            }
            attempt += 1;
        }
    }
}

/// Resolves once the cancel flag turns true. Pends forever when the sender
/// is dropped without cancelling, so a vanished controller never aborts an
/// in-flight call.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn cancelled_error(attempt: u32) -> ApiError {
    ApiError::generic("provider call cancelled").with_detail("attempt", attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
    }

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new("Anthropic")
    }

    fn no_cancel() -> watch::Receiver<bool> {
        // Dropping the sender is fine: a vanished controller never cancels.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert!(policy.is_retryable(ErrorKind::RateLimited));
        assert!(policy.is_retryable(ErrorKind::Transient));
        assert!(!policy.is_retryable(ErrorKind::Unknown));
        assert!(!policy.is_retryable(ErrorKind::CreditBalanceExhausted));
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new().with_base_delay(Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(15));
        assert_eq!(policy.delay_for(5), Duration::from_secs(15));
    }

    #[test]
    fn test_multiplier_clamped_to_one() {
        let policy = RetryPolicy::new()
            .with_backoff_multiplier(0.1)
            .with_base_delay(Duration::from_millis(50));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
    }

    #[test]
    fn test_decide_fatal_kind_never_retries() {
        let policy = fast_policy(5);
        let decision = policy.decide(1, ErrorKind::CreditBalanceExhausted);
        assert!(!decision.retry);
        assert!(!policy.decide(1, ErrorKind::InvalidRequest).retry);
    }

    #[test]
    fn test_decide_respects_attempt_bound() {
        let policy = fast_policy(3);
        assert!(policy.decide(1, ErrorKind::RateLimited).retry);
        assert!(policy.decide(2, ErrorKind::RateLimited).retry);
        assert!(!policy.decide(3, ErrorKind::RateLimited).retry);
    }

    #[test]
    fn test_unknown_retryable_when_opted_in() {
        let policy = fast_policy(3).with_retryable(ErrorKind::Unknown);
        assert!(policy.decide(1, ErrorKind::Unknown).retry);
    }

    #[tokio::test]
    async fn test_run_returns_success_untouched() {
        let policy = fast_policy(3);
        let result: Result<u32, _> = policy
            .run(&classifier(), no_cancel(), |_| async { Ok(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_run_recovers_after_transient_failure() {
        let policy = fast_policy(3);
        let calls = AtomicU32::new(0);
        let result = policy
            .run(&classifier(), no_cancel(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(RawFailure::new("connection reset by peer"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_annotates_attempts_on_exhaustion() {
        let policy = fast_policy(4);
        let calls = AtomicU32::new(0);
        let err = policy
            .run(&classifier(), no_cancel(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RawFailure::new("rate limit exceeded")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.detail("attempts"), Some(&serde_json::Value::from(4)));
    }

    #[tokio::test]
    async fn test_run_fatal_error_short_circuits() {
        let policy = fast_policy(5);
        let calls = AtomicU32::new(0);
        let err = policy
            .run(&classifier(), no_cancel(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RawFailure::new("Credit balance is too low")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind, ErrorKind::CreditBalanceExhausted);
        assert_eq!(err.detail("attempts"), None);
    }

    #[tokio::test]
    async fn test_run_aborts_in_flight_call_on_cancel() {
        let policy = fast_policy(3);
        let clf = classifier();
        let (tx, rx) = watch::channel(false);

        let run = policy.run(&clf, rx, |_| async {
            std::future::pending::<Result<(), RawFailure>>().await
        });
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("call should still be pending"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
        tx.send(true).unwrap();

        let err = run.await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generic);
        assert!(err.message.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_run_aborts_backoff_on_cancel() {
        // Long backoff so cancellation must interrupt the sleep, not the call.
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_secs(60));
        let clf = classifier();
        let (tx, rx) = watch::channel(false);

        let run = policy.run(&clf, rx, |_| async {
            Err::<(), _>(RawFailure::new("rate limit exceeded"))
        });
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("should be waiting out the backoff"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
        tx.send(true).unwrap();

        let err = run.await.unwrap_err();
        assert!(err.message.contains("cancelled"));
    }
}
