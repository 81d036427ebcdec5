use crate::error::{GreenlightError, Result};
use std::thread;
use std::time::Duration;

/// Whether a failure is worth retrying.
fn is_transient(err: &GreenlightError) -> bool {
    matches!(
        err,
        GreenlightError::Store(_) | GreenlightError::Notify(_) | GreenlightError::Io(_)
    )
}

/// Runs `op`, retrying transient failures with doubling delays.
///
/// `max_attempts` counts the initial call; zero is treated as one.
/// Non-transient errors surface immediately without a retry.
pub fn with_backoff<T>(
    max_attempts: u32,
    base_ms: u64,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = max_attempts.max(1);
    let mut delay_ms = base_ms;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts || !is_transient(&err) {
                    return Err(err);
                }
                tracing::debug!(attempt, delay_ms, error = %err, "transient failure; retrying");
                thread::sleep(Duration::from_millis(delay_ms));
                delay_ms = delay_ms.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_backoff(3, 1, || {
            calls += 1;
            if calls < 3 {
                Err(GreenlightError::Notify("transport down".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_backoff(3, 1, || {
            calls += 1;
            Err(GreenlightError::Store("disk full".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_transient_surfaces_immediately() {
        let mut calls = 0;
        let result: Result<()> = with_backoff(3, 1, || {
            calls += 1;
            Err(GreenlightError::InvalidItem {
                field: "summary".into(),
                reason: "empty".into(),
            })
        });
        assert!(matches!(result, Err(GreenlightError::InvalidItem { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let result = with_backoff(0, 1, || {
            calls += 1;
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }
}
