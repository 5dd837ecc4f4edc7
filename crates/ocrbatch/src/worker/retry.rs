//! Transport-level retry of whole task executions.
//!
//! Independent of the catalog: the retried operation decides what an
//! attempt means, this layer only decides whether and when to run it again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::RetrySettings;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff doubles from `base_delay` and is capped at ten times it.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: base_delay.saturating_mul(10),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_retries, settings.base_delay)
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Outcome of [`run_with_retry`].
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, the first one included.
    pub attempts: u32,
}

/// Runs `op` until it succeeds, the retry budget is spent, `shutdown` is
/// raised, or `retryable` rejects the last error. `op` receives the 1-based
/// attempt number. A rejected error is returned without sleeping.
pub fn run_with_retry<T, E, F, R>(
    policy: &RetryPolicy,
    shutdown: &AtomicBool,
    mut op: F,
    mut retryable: R,
) -> Retried<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    R: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        let result = op(attempt);
        let err = match result {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };

        let retry = attempt;
        if retry > policy.max_retries || shutdown.load(Ordering::Relaxed) {
            return Retried {
                result: Err(err),
                attempts: attempt,
            };
        }
        if !retryable(&err) {
            log::warn!("Attempt {} failed: {}; not retryable", attempt, err);
            return Retried {
                result: Err(err),
                attempts: attempt,
            };
        }

        let delay = policy.delay_for(retry);
        log::warn!(
            "Attempt {} failed: {}; retrying in {}s ({}/{})",
            attempt,
            err,
            delay.as_secs_f32(),
            retry,
            policy.max_retries
        );
        if !sleep_unless_shutdown(delay, shutdown) {
            return Retried {
                result: Err(err),
                attempts: attempt,
            };
        }
        attempt += 1;
    }
}

/// Sleeps for `total`, waking early if `shutdown` is raised. Returns
/// `false` when interrupted.
fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
    !shutdown.load(Ordering::Relaxed)
}
