use std::{future::Future, time::Duration};

use cluster_turndown_core::error::ErrorKind;
use tokio::time::sleep;
use tracing::warn;

use crate::metrics::Metrics;

const INITIAL_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Classifies a crate-local error so the retry helper below can decide whether another attempt
/// is worthwhile without knowing which crate raised it.
pub trait Classifiable {
    fn kind(&self) -> ErrorKind;
}

impl Classifiable for cluster_turndown_providers::Error {
    fn kind(&self) -> ErrorKind {
        cluster_turndown_providers::Error::kind(self)
    }
}

impl Classifiable for cluster_turndown_store::Error {
    fn kind(&self) -> ErrorKind {
        cluster_turndown_store::Error::kind(self)
    }
}

/// Runs `op` up to `max_attempts` times, doubling the delay between attempts from 2s up to a
/// 60s cap. Only errors whose [`ErrorKind::is_retryable`] is true are retried; anything else, or
/// the final attempt, is returned as-is. Every retry increments the `cloud_api_retries_total`
/// counter exactly once.
pub async fn retry_with_backoff<F, Fut, T, E>(
    metrics: &Metrics,
    max_attempts: u32,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classifiable,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts.max(1) && error.kind().is_retryable() => {
                metrics.cloud_api_retries_total.inc();
                warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying after a transient provider error"
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FakeError(ErrorKind);

    impl Classifiable for FakeError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let metrics = Metrics::new().unwrap();
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(&metrics, 5, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FakeError(ErrorKind::ProviderUnavailable))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.cloud_api_retries_total.get(), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let metrics = Metrics::new().unwrap();
        let attempts = AtomicU32::new(0);

        let result: Result<(), FakeError> = retry_with_backoff(&metrics, 5, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError(ErrorKind::Configuration)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.cloud_api_retries_total.get(), 0);
    }
}
