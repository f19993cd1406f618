//! Test assertions for task outcomes.

use crate::cancellation::CancelReason;
use crate::core::TaskStatus;
use crate::errors::{TaskError, TaskOutcome};
use std::fmt::Debug;

/// Asserts that the outcome is a value and returns it.
pub fn assert_outcome_ok<T: Debug>(outcome: TaskOutcome<T>) -> T {
    match outcome {
        Ok(value) => value,
        Err(err) => panic!("Expected success, got error: {err:?}"),
    }
}

/// Asserts that the outcome is a cancellation with the given reason.
pub fn assert_outcome_cancelled<T: Debug>(outcome: &TaskOutcome<T>, reason: CancelReason) {
    assert_eq!(
        outcome.as_ref().err(),
        Some(&TaskError::Cancelled { reason }),
        "Expected cancellation ({reason}), got {outcome:?}"
    );
}

/// Asserts that the outcome is a timeout.
pub fn assert_outcome_timed_out<T: Debug>(outcome: &TaskOutcome<T>) {
    assert!(
        matches!(outcome, Err(TaskError::TimedOut { .. })),
        "Expected timeout, got {outcome:?}"
    );
}

/// Asserts that the outcome is a failure whose message contains `needle`.
pub fn assert_outcome_failed<T: Debug>(outcome: &TaskOutcome<T>, needle: &str) {
    match outcome {
        Err(TaskError::Failed { message }) => assert!(
            message.contains(needle),
            "Expected failure containing '{needle}', got '{message}'"
        ),
        other => panic!("Expected failure, got {other:?}"),
    }
}

/// Asserts that a status matches.
pub fn assert_status(actual: TaskStatus, expected: TaskStatus) {
    assert_eq!(
        actual, expected,
        "Expected status {expected:?}, got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_assert_outcome_ok() {
        assert_eq!(assert_outcome_ok::<u8>(Ok(3)), 3);
    }

    #[test]
    #[should_panic(expected = "Expected success")]
    fn test_assert_outcome_ok_fails() {
        assert_outcome_ok::<u8>(Err(TaskError::failed("nope")));
    }

    #[test]
    fn test_assert_outcome_variants() {
        assert_outcome_cancelled::<()>(
            &Err(TaskError::cancelled(CancelReason::Group)),
            CancelReason::Group,
        );
        assert_outcome_timed_out::<()>(&Err(TaskError::TimedOut {
            timeout: Duration::from_millis(1),
        }));
        assert_outcome_failed::<()>(&Err(TaskError::failed("disk full")), "disk");
        assert_status(TaskStatus::Done, TaskStatus::Done);
    }

    #[test]
    #[should_panic(expected = "Expected failure")]
    fn test_assert_outcome_failed_rejects_success() {
        assert_outcome_failed::<u8>(&Ok(1), "x");
    }
}
