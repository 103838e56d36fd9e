//! Retry logic with exponential backoff for package manager lock contention.
//!
//! apt, dpkg and yum all refuse to run while another process holds their
//! lock. Freshly booted machines often run unattended upgrades, so package
//! commands are retried for a while before giving up.

use crate::error::is_lock_contention;
use log::debug;
use plan::{ApplyContext, RunError, Runner};
use std::thread;
use std::time::Duration;

/// Backoff schedule for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Delay before retrying after `attempt` (0-indexed) failed
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Notified before each retry
pub trait RetryCallback {
    /// `attempt` is 1-indexed and names the attempt that just failed
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &RunError, delay: Duration);
}

/// Logs retries at debug level
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &RunError, delay: Duration) {
        debug!("attempt {attempt}/{max_attempts} failed: {error}; retrying in {delay:?}");
    }
}

/// Run `operation` until it succeeds, fails for a reason other than lock
/// contention, runs out of attempts, or `ctx` is cancelled.
pub fn with_retry<T, F>(
    ctx: &ApplyContext,
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, RunError>
where
    F: FnMut() -> Result<T, RunError>,
{
    let mut attempt = 0;
    loop {
        let err = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        if !is_lock_contention(&err) || attempt + 1 >= config.max_attempts {
            return Err(err);
        }
        if ctx.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let delay = config.delay_for_attempt(attempt);
        if let Some(cb) = callback {
            cb.on_retry(attempt + 1, config.max_attempts, &err, delay);
        }
        thread::sleep(delay);
        attempt += 1;
    }
}

/// Runner that retries commands failing on lock contention.
pub struct RetryingRunner<'a> {
    inner: &'a dyn Runner,
    config: RetryConfig,
}

impl<'a> RetryingRunner<'a> {
    pub fn new(inner: &'a dyn Runner) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    pub fn with_config(inner: &'a dyn Runner, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

impl Runner for RetryingRunner<'_> {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        with_retry(ctx, &self.config, Some(&LogCallback), || {
            self.inner.run_command(ctx, cmd, stdin)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan::CancelToken;
    use plan::runner::MockRunner;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }

    fn locked() -> RunError {
        RunError::Exit {
            code: 100,
            output: "E: Could not get lock /var/lib/dpkg/lock".into(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 30);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(750));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn test_non_retryable_error_fails_fast() {
        let attempts = Rc::new(Cell::new(0));
        let seen = attempts.clone();
        let result: Result<(), _> = with_retry(&ApplyContext::new(), &fast(5), None, || {
            seen.set(seen.get() + 1);
            Err(RunError::Exit {
                code: 1,
                output: "No package docker available.".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_eventual_success() {
        let attempts = Rc::new(Cell::new(0));
        let seen = attempts.clone();
        let result = with_retry(&ApplyContext::new(), &fast(5), None, || {
            let current = seen.get();
            seen.set(current + 1);
            if current < 2 { Err(locked()) } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let attempts = Rc::new(Cell::new(0));
        let seen = attempts.clone();
        let result: Result<(), _> = with_retry(&ApplyContext::new(), &fast(3), None, || {
            seen.set(seen.get() + 1);
            Err(locked())
        });
        assert!(is_lock_contention(&result.unwrap_err()));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_cancellation_stops_retrying() {
        let token = CancelToken::new();
        let ctx = ApplyContext::with_cancel(token.clone());
        let attempts = Rc::new(Cell::new(0));
        let seen = attempts.clone();
        let result: Result<(), _> = with_retry(&ctx, &fast(10), None, || {
            seen.set(seen.get() + 1);
            token.cancel();
            Err(locked())
        });
        assert!(matches!(result, Err(RunError::Cancelled)));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(Cell<u32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: u32, _: u32, _: &RunError, _: Duration) {
                self.0.set(self.0.get() + 1);
            }
        }

        let callback = Counting(Cell::new(0));
        let _: Result<(), _> =
            with_retry(&ApplyContext::new(), &fast(3), Some(&callback), || Err(locked()));
        assert_eq!(callback.0.get(), 2);
    }

    #[test]
    fn test_retrying_runner() {
        let mock = MockRunner::new();
        mock.fail_once("apt-get", 100, "E: Could not get lock /var/lib/dpkg/lock");
        mock.on("apt-get", "ok");

        let runner = RetryingRunner::with_config(&mock, fast(5));
        let out = runner
            .run_command(&ApplyContext::new(), "apt-get update", None)
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(mock.count("apt-get"), 2);
    }
}
