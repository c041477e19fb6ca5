//! Bounded retry around fallible operations.
//!
//! # Responsibility
//! - Re-run an operation while it fails with a transient error.
//! - Stop after a fixed number of attempts with a fixed pause in between.
//!
//! # Invariants
//! - Non-transient errors are returned after the first failing attempt.
//! - Total sleep time never exceeds `(max_attempts - 1) * delay`.

use log::debug;
use retry::delay::Fixed;
use retry::{retry_with_index, OperationResult};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default attempt bound for lock acquisition.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Classifies errors that are worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error; `last` is the final one.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with a non-transient error.
    Fatal(E),
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            Self::Fatal(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal(err) => Some(err),
        }
    }
}

/// Attempt bound plus fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` below one is raised to one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Longest time `run` can spend sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        self.delay.saturating_mul(self.max_attempts - 1)
    }

    /// Runs `operation` until it succeeds, fails fatally, or attempts run out.
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Transient + Display,
        F: FnMut() -> Result<T, E>,
    {
        let delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
        let retries = usize::try_from(self.max_attempts - 1).unwrap_or(usize::MAX);
        let max_attempts = self.max_attempts;

        let result = retry_with_index(Fixed::from_millis(delay_ms).take(retries), |attempt| {
            match operation() {
                Ok(value) => OperationResult::Ok(value),
                Err(err) if err.is_transient() => {
                    debug!(
                        "event=retry_attempt module=retry status=transient attempt={attempt} max_attempts={max_attempts} error={err}"
                    );
                    OperationResult::Retry(err)
                }
                Err(err) => OperationResult::Err(err),
            }
        });

        result.map_err(|err| {
            if err.error.is_transient() {
                RetryError::Exhausted {
                    attempts: u32::try_from(err.tries).unwrap_or(u32::MAX),
                    last: err.error,
                }
            } else {
                RetryError::Fatal(err.error)
            }
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY)
    }
}
