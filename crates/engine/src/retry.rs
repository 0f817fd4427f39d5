//! Bounded retry with a fixed backoff for calls to external systems.
//!
//! Every failure is classified through [`Classify`]; only kinds listed in the
//! configured retry table are attempted again. The delay is an awaited
//! `tokio::time::sleep`, so the calling task waits while other tasks run.

use std::fmt::Display;
use std::future::Future;

use recruit_common::config::RetrySettings;
use recruit_common::error::Classify;

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    settings: RetrySettings,
}

impl RetryExecutor {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        self.settings.retryable.contains(&err.kind())
    }

    /// Run `op` until it succeeds, fails permanently, or `max_attempts` is reached.
    ///
    /// The final error is returned unchanged; the caller decides whether to
    /// abort or skip.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "External call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = self.is_retryable(&err);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        kind = %err.kind(),
                        retryable,
                        error = %err,
                        "External call failed"
                    );

                    if !retryable || attempt >= max_attempts {
                        return Err(err);
                    }

                    tokio::time::sleep(self.settings.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use recruit_common::error::ExternalErrorKind;

    use super::*;

    #[derive(Debug)]
    struct TestError(ExternalErrorKind);

    impl Classify for TestError {
        fn kind(&self) -> ExternalErrorKind {
            self.0
        }
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error ({})", self.0)
        }
    }

    fn make_executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetrySettings {
            max_attempts,
            backoff: Duration::from_millis(500),
            retryable: HashSet::from([ExternalErrorKind::Connection, ExternalErrorKind::Server]),
        })
    }

    /// Fails `failures` times with `kind`, then returns 42.
    async fn run_flaky(
        executor: &RetryExecutor,
        failures: u32,
        kind: ExternalErrorKind,
    ) -> (Result<u32, TestError>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = executor
            .execute("flaky", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        Err(TestError(kind))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let executor = make_executor(5);
        let started = tokio::time::Instant::now();

        let (result, calls) = run_flaky(&executor, 3, ExternalErrorKind::Connection).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 4);
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let executor = make_executor(3);
        let started = tokio::time::Instant::now();

        let (result, calls) = run_flaky(&executor, 10, ExternalErrorKind::Server).await;

        assert_eq!(result.unwrap_err().0, ExternalErrorKind::Server);
        assert_eq!(calls, 3);
        // Two delays between three attempts.
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let executor = make_executor(5);
        let started = tokio::time::Instant::now();

        let (result, calls) = run_flaky(&executor, 1, ExternalErrorKind::Client).await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_no_failure_baseline() {
        let executor = make_executor(5);
        let (result, calls) = run_flaky(&executor, 0, ExternalErrorKind::Server).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_still_runs_once() {
        let executor = make_executor(0);
        let (result, calls) = run_flaky(&executor, 1, ExternalErrorKind::Server).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
