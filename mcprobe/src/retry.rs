//! Repeating a round trip on failure.

use std::time::Duration;

use crate::Error;

/// Runs `op` up to `tries` times, returning the first success or the last error.
///
/// Every error kind is retried, including [`Error::Validation`]: a server that
/// sent an incomplete response once is asked again like any other failure.
/// `tries` of zero behaves like one. `wait` is slept between attempts.
///
/// # Errors
/// The error of the final attempt.
pub fn retry<T, F>(tries: usize, wait: Option<Duration>, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Result<T, Error>,
{
    let tries = tries.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if attempt < tries => {
                warn!(attempt, tries, %error, "attempt failed, retrying");
                if let Some(wait) = wait {
                    std::thread::sleep(wait);
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
