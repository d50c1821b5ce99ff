//! Backoff for transient transport signals.
//!
//! A transport that reports "would block" (or an interrupted call) has not
//! failed; the frame operation sleeps for an exponentially growing delay and
//! tries again. The number of retries is not capped here: the caller wraps
//! the whole operation in its I/O deadline.

use rand::Rng;
use std::io;
use std::time::Duration;
use tracing::trace;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for retry delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Jitter factor (0.0 = none). The sleep is `delay * (1 + r * jitter)`
    /// with `r` in `[0, 1)`, clamped to `max_delay`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            jitter: 0.1,
        }
    }
}

/// Delay sequence for one operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

// ---------------------------------------------------------------------------
// Backoff computation
// ---------------------------------------------------------------------------

/// Delay for a given attempt (0-indexed), before jitter.
///
/// `min(min_delay * 2^attempt, max_delay)`
pub fn base_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    config
        .min_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Next delay, advancing the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = base_delay(&self.config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.config.jitter <= 0.0 {
            return base;
        }
        let frac: f64 = rand::thread_rng().gen_range(0.0..1.0);
        base.mul_f64(1.0 + frac * self.config.jitter)
            .min(self.config.max_delay)
    }

    /// Start over from `min_delay`, e.g. after the transport made progress.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Sleep for the next delay.
    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        trace!(attempt = self.attempt, ?delay, "transport not ready, backing off");
        tokio::time::sleep(delay).await;
    }
}

/// Whether an I/O error is a "not ready yet" signal rather than a failure.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
