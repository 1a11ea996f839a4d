//! Bounded retry for readiness probes.

use std::time::Duration;

use localnet_core::error::{LocalnetError, Result};

/// Run `op` up to `attempts` times, sleeping `delay` after each failure.
///
/// Returns the first success, or the error from the last attempt.
pub fn retry<T>(attempts: u32, delay: Duration, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    if attempts == 0 {
        return Err(LocalnetError::Config(
            "retry needs at least one attempt".to_string(),
        ));
    }

    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::trace!(attempt, attempts, error = %e, "Attempt failed, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_first_success() {
        let mut calls = 0;
        let value = retry(3, Duration::ZERO, || {
            calls += 1;
            Ok(42)
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_eventual_success() {
        let mut calls = 0;
        let value = retry(5, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(LocalnetError::Resource(format!("attempt {}", calls)))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_retry_surfaces_last_error() {
        let mut calls = 0;
        let err = retry(3, Duration::ZERO, || -> Result<()> {
            calls += 1;
            Err(LocalnetError::Resource(format!("attempt {}", calls)))
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert_eq!(err.to_string(), "Resource error: attempt 3");
    }

    #[test]
    fn test_retry_zero_attempts() {
        let mut called = false;
        let err = retry(0, Duration::ZERO, || {
            called = true;
            Ok(())
        })
        .unwrap_err();
        assert!(!called);
        assert!(matches!(err, LocalnetError::Config(_)));
    }
}
