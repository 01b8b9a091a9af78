//! Action status transitions

use crate::error::TransitionError;
use crate::types::ActionStatus;

/// Validate a status transition
///
/// `Pending -> Succeeded` is only taken when resuming from a checkpoint that
/// already records the action, and `Running -> Ready` when a retry is scheduled.
///
/// # Errors
/// Returns [`TransitionError`] when the transition is not allowed
pub fn validate_transition(from: ActionStatus, to: ActionStatus) -> Result<(), TransitionError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ActionStatus) -> &'static [ActionStatus] {
    use ActionStatus::{Failed, Pending, Ready, Running, SkippedBlocked, Succeeded};
    match from {
        Pending => &[Ready, Succeeded, SkippedBlocked],
        Ready => &[Running, SkippedBlocked],
        Running => &[Succeeded, Failed, Ready],
        Succeeded | Failed | SkippedBlocked => &[],
    }
}

fn allowed(from: ActionStatus, to: ActionStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActionStatus::*;

    #[test]
    fn happy_path() {
        assert!(validate_transition(Pending, Ready).is_ok());
        assert!(validate_transition(Ready, Running).is_ok());
        assert!(validate_transition(Running, Succeeded).is_ok());
    }

    #[test]
    fn retry_returns_to_ready() {
        assert!(validate_transition(Running, Ready).is_ok());
        assert!(validate_transition(Running, Failed).is_ok());
    }

    #[test]
    fn terminal_statuses_are_final() {
        for from in [Succeeded, Failed, SkippedBlocked] {
            for to in [Pending, Ready, Running, Succeeded, Failed, SkippedBlocked] {
                assert!(validate_transition(from, to).is_err());
            }
        }
    }

    #[test]
    fn running_cannot_be_skipped() {
        let err = validate_transition(Running, SkippedBlocked).unwrap_err();
        assert_eq!(err.from, Running);
        assert_eq!(err.to, SkippedBlocked);
    }
}
