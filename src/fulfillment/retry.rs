//! Retry policies for the payment and persistence compensation paths.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff with base and max.
    Exponential {
        base: Duration,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0 = first retry), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Exponential { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt);
                std::cmp::min(base.saturating_mul(multiplier), *max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Randomize each delay into `[delay / 2, delay]`.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff: BackoffStrategy::default(), jitter: true }
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = (delay - half).as_millis() as u64;
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F, is_retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(operation, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Serialized form of a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_jitter() -> bool { true }

impl RetrySettings {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { max_attempts, base_delay_ms, max_delay_ms, jitter: true }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        let backoff = if s.base_delay_ms == 0 {
            BackoffStrategy::None
        } else {
            BackoffStrategy::Exponential { base: Duration::from_millis(s.base_delay_ms), max: Duration::from_millis(s.max_delay_ms.max(s.base_delay_ms)) }
        };
        Self { max_attempts: s.max_attempts.max(1), backoff, jitter: s.jitter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_capped() {
        let b = BackoffStrategy::Exponential { base: Duration::from_millis(50), max: Duration::from_millis(300) };
        assert_eq!(b.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(b.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(b.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(b.delay_for_attempt(40), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let p = RetryPolicy::new(5).with_backoff(BackoffStrategy::Fixed(Duration::from_millis(100)));
        for _ in 0..50 {
            let d = p.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(4).with_backoff(BackoffStrategy::None);
        let result: Result<u32, String> = policy
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("busy".to_string()) } else { Ok(n) }
            }, |_| true)
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(4).with_backoff(BackoffStrategy::None);
        let result: Result<(), String> = policy
            .run("declined", move || async move { calls.fetch_add(1, Ordering::SeqCst); Err("card declined".to_string()) }, |e| e != "card declined")
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3).with_backoff(BackoffStrategy::None);
        let result: Result<(), String> = policy
            .run("down", move || async move { calls.fetch_add(1, Ordering::SeqCst); Err("down".to_string()) }, |_| true)
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_settings_conversion() {
        let p = RetryPolicy::from(&RetrySettings::new(0, 0, 0));
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.backoff, BackoffStrategy::None);
    }
}
