//! Module dedicated to retries.
//!
//! The [`Retry`] helper drives the bounded retry loop of the session
//! pool: it bounds the duration of each attempt, counts attempts and
//! computes the exponential backoff between them.

use std::{future::IntoFuture, result, time::Duration};

use tokio::time::{timeout, Timeout};

/// The retry configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct RetryConfig {
    /// The number of retries after the first attempt.
    pub attempts: u8,

    /// The delay before the first retry, in milliseconds. Doubles
    /// after each retry.
    pub backoff_ms: u64,

    /// The maximum delay between two attempts, in milliseconds.
    pub max_backoff_ms: u64,

    /// The maximum duration of one attempt, in seconds.
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug)]
pub enum RetryState<T, E> {
    /// The attempt succeeded.
    Ok(T),

    /// The attempt failed with a transient error and should be
    /// retried after the given delay.
    Retry(E, Duration),

    /// The attempt failed with a permanent error, or no retry is
    /// left.
    Err(E),
}

#[derive(Debug, Default)]
pub struct Retry {
    pub attempts: u8,
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            attempts: 0,
            config,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn timeout<F: IntoFuture>(&self, f: F) -> Timeout<F::IntoFuture> {
        timeout(Duration::from_secs(self.config.timeout_secs), f)
    }

    /// Computes the delay before the next attempt, or `None` if all
    /// attempts have been consumed.
    pub fn backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.attempts {
            return None;
        }

        let factor = 1u64.checked_shl(self.attempts as u32).unwrap_or(u64::MAX);
        let delay = self
            .config
            .backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);

        self.attempts += 1;
        Some(Duration::from_millis(delay))
    }

    pub fn next<T, E>(
        &mut self,
        res: result::Result<T, E>,
        is_transient: impl FnOnce(&E) -> bool,
    ) -> RetryState<T, E> {
        match res {
            Ok(res) => RetryState::Ok(res),
            Err(err) if is_transient(&err) => match self.backoff() {
                Some(delay) => RetryState::Retry(err, delay),
                None => RetryState::Err(err),
            },
            Err(err) => RetryState::Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Retry, RetryConfig, RetryState};

    #[test]
    fn backoff_doubles_until_exhausted() {
        let mut retry = Retry::new(RetryConfig {
            attempts: 4,
            backoff_ms: 100,
            max_backoff_ms: 300,
            timeout_secs: 1,
        });

        assert_eq!(retry.backoff(), Some(Duration::from_millis(100)));
        assert_eq!(retry.backoff(), Some(Duration::from_millis(200)));
        assert_eq!(retry.backoff(), Some(Duration::from_millis(300)));
        assert_eq!(retry.backoff(), Some(Duration::from_millis(300)));
        assert_eq!(retry.backoff(), None);

        retry.reset();
        assert_eq!(retry.backoff(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut retry = Retry::new(RetryConfig::default());
        let res: Result<(), &str> = Err("denied");

        assert!(matches!(
            retry.next(res, |_| false),
            RetryState::Err("denied")
        ));
        assert_eq!(retry.attempts, 0);
    }
}
