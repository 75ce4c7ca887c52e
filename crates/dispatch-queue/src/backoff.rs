use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::QueueError;

/// Exponential backoff for reaching the broker at process startup, when it
/// may still be booting next to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            attempts: 10,
        }
    }
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Every delay slept between attempts; one fewer than `attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.attempts.max(1)).map(|attempt| self.delay_after(attempt))
    }
}

/// Runs `connect` until it succeeds, sleeping per `backoff` between
/// failures. Gives up with [`QueueError::Connect`] once attempts run out and
/// with [`QueueError::Cancelled`] if shutdown arrives while waiting.
pub async fn retry_connect<T, E, F, Fut>(
    backoff: &Backoff,
    shutdown: &CancellationToken,
    target: &str,
    mut connect: F,
) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = backoff.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("connected after retry: target={target}, attempt={attempt}");
                }
                return Ok(value);
            }
            Err(err) => {
                warn!(
                    "connect attempt failed: target={}, attempt={}/{}, error={}",
                    target, attempt, attempts, err
                );
                last_error = err.to_string();
            }
        }

        if attempt == attempts {
            break;
        }

        let delay = backoff.delay_after(attempt);
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("connect retry aborted by shutdown: target={target}");
                return Err(QueueError::Cancelled);
            }
            _ = sleep(delay) => {}
        }
    }

    error!(
        "ERROR_CODE=BROKER_CONNECT_EXHAUSTED giving up: target={}, attempts={}",
        target, attempts
    );
    Err(QueueError::Connect(format!(
        "{target}: gave up after {attempts} attempts: {last_error}"
    )))
}
