//! Error types for queue operations.
//!
//! Every engine operation returns [`QueueError`]. Store failures are surfaced
//! verbatim and never retried here; retry policy belongs to the caller or to
//! the [`WorkerPool`](crate::WorkerPool).

use uuid::Uuid;

use crate::state::{MessageState, Transition};

/// Result alias used throughout the crate.
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Claim found no eligible message. Expected and frequent; callers poll.
    #[error("no message available in topic {topic:?}")]
    NoMessage { topic: String },

    /// Lookup by id found no row.
    #[error("message {0} not found")]
    NotFound(Uuid),

    /// The row no longer matches the state observed by the caller.
    ///
    /// Returned when a transition is attempted with a stale lease token, e.g.
    /// after the lease was reclaimed or another holder already transitioned it.
    #[error("message {id} was modified concurrently (expected {expected}, found {actual})")]
    Conflict {
        id: Uuid,
        expected: MessageState,
        actual: MessageState,
    },

    /// The transition is not defined for the message's current state.
    #[error("cannot {transition} message {id} in state {from}")]
    InvalidTransition {
        id: Uuid,
        from: MessageState,
        transition: Transition,
    },

    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// True when a claim simply found nothing to do.
    pub fn is_no_message(&self) -> bool {
        matches!(self, QueueError::NoMessage { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_no_message_is_not_a_failure_variant() {
        let err = QueueError::NoMessage {
            topic: "widgets".to_string(),
        };
        assert!(err.is_no_message());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "no message available in topic \"widgets\"");
    }

    #[test]
    fn test_conflict_display() {
        let id = Uuid::new_v4();
        let err = QueueError::Conflict {
            id,
            expected: MessageState::Pending,
            actual: MessageState::Ready,
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            format!("message {} was modified concurrently (expected pending, found ready)", id)
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let id = Uuid::new_v4();
        let err = QueueError::InvalidTransition {
            id,
            from: MessageState::Completed,
            transition: Transition::Defer(Duration::from_secs(1)),
        };
        assert_eq!(
            err.to_string(),
            format!("cannot defer message {} in state completed", id)
        );
    }

    #[test]
    fn test_serialization_error_converts() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: QueueError = json_err.into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
