//! Exponential backoff bounded by a total elapsed-time budget

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::error;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub multiplier: u32,
    pub max_interval: Duration,
    /// No new attempt is scheduled once this much time would have passed
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Duration::from_secs(10),
        }
    }
}

/// Delay sequence for one retried operation
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current: config.initial_interval,
            config,
            started: Instant::now(),
        }
    }

    /// Next delay, or `None` when waiting it would overrun the elapsed budget
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current;
        if self.started.elapsed() + delay > self.config.max_elapsed_time {
            return None;
        }

        self.current = (self.current * self.config.multiplier).min(self.config.max_interval);
        Some(delay)
    }
}

/// Run `operation` until it succeeds or the backoff gives up, logging each failure with the
/// delay before the next attempt. Returns the last error on give-up.
pub async fn retry_notify<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = ExponentialBackoff::new(config);

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_backoff() {
                Some(delay) => {
                    error!("{} ({:?})", err, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}
