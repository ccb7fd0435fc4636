use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

const DEFAULT_BASE: Duration = Duration::from_secs(1);
const DEFAULT_MULTIPLIER: u32 = 2;

/// Exponential backoff budget. With the defaults and three attempts the
/// waits are 1s then 2s; nothing is slept after the final attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base: Duration,
    multiplier: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Result<Self> {
        Self::with_backoff(attempts, DEFAULT_BASE, DEFAULT_MULTIPLIER)
    }

    pub fn with_backoff(attempts: u32, base: Duration, multiplier: u32) -> Result<Self> {
        if attempts < 1 {
            return Err(Error::InvalidRetry(attempts));
        }
        Ok(Self {
            attempts,
            base,
            multiplier: multiplier.max(1),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor)
    }
}

/// Runs `op` until it succeeds or the policy is exhausted, returning the last
/// error in the latter case. Errors that cannot succeed on a later attempt are
/// returned immediately.
pub async fn retry_with_backoff<T, F>(policy: &RetryPolicy, name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= policy.attempts || is_permanent(&e) => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(%e, attempt, ?delay, "{name} failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn is_permanent(e: &Error) -> bool {
    matches!(e, Error::UnsupportedAddress(_))
}
