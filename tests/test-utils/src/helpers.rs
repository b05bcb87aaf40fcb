//! Test helper functions and utilities

use anyhow::Result;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

/// Initialize test logging with environment-based configuration.
///
/// Writes through the test writer so output is captured per test. Safe to call
/// multiple times; subsequent calls are ignored.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for a condition to become true with timeout and polling.
///
/// # Examples
///
/// ```ignore
/// wait_for(
///     || async { engine.get_stats().ticks_processed == 3 },
///     Duration::from_secs(2),
///     Duration::from_millis(10),
/// ).await?;
/// ```
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(timeout_duration, async {
        loop {
            if condition().await {
                return;
            }
            sleep(poll_interval).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("Timeout waiting for condition"))
}

/// Synchronous-condition variant of [`wait_for`] with test defaults (2s, 10ms)
pub async fn wait_until<F>(condition: F) -> Result<()>
where
    F: Fn() -> bool,
{
    wait_for(
        || {
            let ready = condition();
            async move { ready }
        },
        Duration::from_secs(2),
        Duration::from_millis(10),
    )
    .await
}

/// Wrap a future with a timeout so a test cannot hang
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl std::future::Future<Output = T>,
) -> Result<T> {
    timeout(duration, future)
        .await
        .map_err(|_| anyhow::anyhow!("Test timeout after {:?}", duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let result = wait_for(
            || async { false },
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_until_observes_progress() {
        let counter = Arc::new(AtomicUsize::new(0));
        let bump = Arc::clone(&counter);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            bump.store(3, Ordering::SeqCst);
        });

        wait_until(|| counter.load(Ordering::SeqCst) == 3).await.unwrap();
    }
}
