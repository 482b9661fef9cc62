//! Bounded polling used to wait for asynchronous state transitions.

use crate::error::{DriverError, Result};
use crate::settings::RetryBudget;

/// Outcome of a single polled attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not there yet; try again after the budget's delay.
    Retry(DriverError),
    /// Give up immediately and propagate the error.
    Fatal(DriverError),
}

/// Run `action` until it is ready, fails fatally, or `budget` runs out.
///
/// The action runs at most `budget.attempts` times with `budget.delay` slept
/// between consecutive attempts. Blocks the calling thread.
///
/// # Errors
/// - The error of a [`Attempt::Fatal`] outcome, unchanged.
/// - [`DriverError::AttemptsExceeded`] wrapping the last retriable cause once
///   every attempt has been used.
pub fn retry<T, F>(budget: RetryBudget, mut action: F) -> Result<T>
where
    F: FnMut() -> Attempt<T>,
{
    let mut last = DriverError::NeverAttempted;

    for attempt in 1..=budget.attempts {
        if attempt > 1 {
            std::thread::sleep(budget.delay);
        }

        match action() {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(err) => {
                tracing::debug!(attempt, max = budget.attempts, error = %err, "will retry");
                last = err;
            }
        }
    }

    Err(DriverError::AttemptsExceeded {
        attempts: budget.attempts,
        last: Box::new(last),
    })
}
