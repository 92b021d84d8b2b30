//! Bounded retry for transient read and write failures
//!
//! Reads may be attempted at most [`MAX_READ_ATTEMPTS`] times and mutations
//! at most [`MAX_MUTATION_ATTEMPTS`] times. There is no unbounded loop: the
//! attempt count is clamped when the policy is built.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempt ceiling for read paths
pub const MAX_READ_ATTEMPTS: u32 = 3;

/// Attempt ceiling for write paths and invalidation
pub const MAX_MUTATION_ATTEMPTS: u32 = 2;

/// How many times to attempt an operation and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy for read paths, clamped to `1..=MAX_READ_ATTEMPTS`
    pub fn for_reads(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_READ_ATTEMPTS),
            delay,
        }
    }

    /// Policy for write paths, clamped to `1..=MAX_MUTATION_ATTEMPTS`
    pub fn for_mutations(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_MUTATION_ATTEMPTS),
            delay,
        }
    }

    /// A single attempt, no retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Why a retried operation gave up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error that is not retried
    #[error("non-retryable failure on attempt {attempt}: {error}")]
    NonRetryable { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// The error reported by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetryable { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempt, .. } => *attempt,
        }
    }
}

/// Run `producer` until it succeeds, fails with a non-retryable error, or
/// the policy's attempt budget is spent.
pub async fn with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut producer: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match producer().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(error) if !is_retryable(&error) => {
                debug!("Attempt {}/{} failed permanently: {}", attempt, max_attempts, error);
                return Err(RetryError::NonRetryable { attempt, error });
            }
            Err(error) if attempt >= max_attempts => {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(error) => {
                warn!(
                    "Attempt {}/{} failed, retrying after {:?}: {}",
                    attempt, max_attempts, policy.delay, error
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}
