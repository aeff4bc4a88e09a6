//! Timeout and exponential-backoff retry around any [`RemoteStore`].
//!
//! # Retry Strategy
//!
//! - Every attempt is bounded by `timeout`; expiry counts as a transient failure
//! - Only transient failures are retried (see [`Error::is_transient`])
//! - Delay doubles from `base_delay`, capped at `max_delay`
//! - Random jitter (0-250ms) added to keep concurrent callers apart
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use super::RemoteStore;
use crate::error::{Error, Result};
use rand::{Rng, rng};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

pub struct RetryStore<T> {
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    /// Ceiling for a single attempt.
    timeout: Duration,
}

impl<T> RetryStore<T>
where
    T: RemoteStore,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(10),
            timeout,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }

    async fn run<R, F, Fut>(&self, op: &str, path: &str, call: F) -> Result<R>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let outcome = match timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    what: format!("{op} {path}"),
                    secs: self.timeout.as_secs(),
                }),
            };

            let e = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            attempt += 1;
            if !e.is_transient() || attempt > self.max_retries {
                error!(
                    op,
                    path,
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %e,
                    "Remote store call failed"
                );
                return Err(e);
            }

            let delay = self.backoff(attempt);
            warn!(
                op,
                path,
                attempt,
                max = self.max_retries,
                ?delay,
                error = %e,
                "Remote store call failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

impl<T> fmt::Debug for RetryStore<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStore")
            .field("inner", &self.inner)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> RemoteStore for RetryStore<T>
where
    T: RemoteStore,
{
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.run("GET", path, || self.inner.get(path)).await
    }

    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        self.run("PUT", path, || self.inner.set(path, value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers `status` for the first `failures` calls, then succeeds.
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
        status: u16,
        stall: Option<Duration>,
    }

    impl Flaky {
        fn new(failures: usize, status: u16) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                status,
                stall: None,
            }
        }
    }

    impl RemoteStore for Flaky {
        async fn get(&self, path: &str) -> Result<Option<Value>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                sleep(stall).await;
            }
            if n < self.failures {
                return Err(Error::Remote {
                    path: path.to_string(),
                    status: self.status,
                    body: String::new(),
                });
            }
            Ok(Some(json!("ok")))
        }

        async fn set(&self, path: &str, _value: &Value) -> Result<()> {
            self.get(path).await.map(|_| ())
        }
    }

    fn quick<T: RemoteStore>(inner: T, retries: usize) -> RetryStore<T> {
        RetryStore::new(inner, retries, Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let store = quick(Flaky::new(2, 503), 3);
        assert_eq!(store.get("x").await.unwrap(), Some(json!("ok")));
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let store = quick(Flaky::new(10, 500), 2);
        assert!(store.set("x", &json!(1)).await.is_err());
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let store = quick(Flaky::new(1, 401), 5);
        let err = store.get("x").await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: 401, .. }));
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_times_out_slow_calls() {
        let mut inner = Flaky::new(0, 200);
        inner.stall = Some(Duration::from_millis(500));
        let store = RetryStore::new(inner, 0, Duration::from_millis(1), Duration::from_millis(20));
        let err = store.get("articles/usa").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let store = RetryStore::new(
            Flaky::new(0, 200),
            50,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let delay = store.backoff(40);
        assert!(delay <= Duration::from_millis(10_250));
        assert!(delay >= Duration::from_secs(10));
    }
}
