//! Message state machine.
//!
//! ```text
//!            push                claim
//!   (new) ─────────► READY ─────────────► PENDING ──┬─ complete ─► COMPLETED
//!                      ▲                   │   ▲    │
//!                      │  defer / reclaim  │   │    └─ discard ──► DISCARDED
//!                      └───────────────────┘   │
//!                                              └── extend (lease refresh)
//! ```
//!
//! COMPLETED and DISCARDED are terminal. Every caller-driven transition starts
//! from PENDING, so [`Transition::check`] is the single place that decides
//! whether a transition is legal.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Persisted state of a message (ordinal-encoded as `smallint`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Enqueued; claimable once `state_time` has passed.
    #[default]
    Ready = 0,
    /// Claimed; `state_time` is the lease deadline.
    Pending = 1,
    /// Processed successfully. Safe to delete.
    Completed = 2,
    /// Given up on. Safe to delete.
    Discarded = 3,
}

impl MessageState {
    pub const ALL: [MessageState; 4] = [
        MessageState::Ready,
        MessageState::Pending,
        MessageState::Completed,
        MessageState::Discarded,
    ];

    /// Ordinal stored in the `state` column.
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(MessageState::Ready),
            1 => Some(MessageState::Pending),
            2 => Some(MessageState::Completed),
            3 => Some(MessageState::Discarded),
            _ => None,
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Completed | MessageState::Discarded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageState::Ready => "ready",
            MessageState::Pending => "pending",
            MessageState::Completed => "completed",
            MessageState::Discarded => "discarded",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-driven transition of a claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// All work was performed.
    Complete,
    /// The work was not performed and the message has no further value.
    Discard,
    /// Return to the ready pool, claimable again after the delay.
    Defer(Duration),
    /// Keep ownership and push the lease deadline out by the delay.
    Extend(Duration),
}

impl Transition {
    /// State the message is in after the transition.
    pub fn target_state(&self) -> MessageState {
        match self {
            Transition::Complete => MessageState::Completed,
            Transition::Discard => MessageState::Discarded,
            Transition::Defer(_) => MessageState::Ready,
            Transition::Extend(_) => MessageState::Pending,
        }
    }

    /// Offset from the store's `now()` for the new `state_time`.
    pub fn delay(&self) -> Duration {
        match self {
            Transition::Complete | Transition::Discard => Duration::ZERO,
            Transition::Defer(delay) | Transition::Extend(delay) => *delay,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Complete => "complete",
            Transition::Discard => "discard",
            Transition::Defer(_) => "defer",
            Transition::Extend(_) => "extend",
        }
    }

    /// Reject transitions that are not defined for `from`.
    pub fn check(&self, id: Uuid, from: MessageState) -> Result<()> {
        if from == MessageState::Pending {
            return Ok(());
        }
        Err(QueueError::InvalidTransition {
            id,
            from,
            transition: *self,
        })
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Longest delay or lease the store is asked for. Longer durations are
/// clamped to it; Postgres rejects intervals anywhere near `i64::MAX` ms.
pub const MAX_DELAY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Delay in whole milliseconds, as bound into interval arithmetic.
pub(crate) fn delay_millis(delay: Duration) -> i64 {
    // Fits in i64 once clamped
    delay.min(MAX_DELAY).as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_match_schema() {
        assert_eq!(MessageState::Ready.as_i16(), 0);
        assert_eq!(MessageState::Pending.as_i16(), 1);
        assert_eq!(MessageState::Completed.as_i16(), 2);
        assert_eq!(MessageState::Discarded.as_i16(), 3);

        for state in MessageState::ALL {
            assert_eq!(MessageState::from_i16(state.as_i16()), Some(state));
        }
        assert_eq!(MessageState::from_i16(4), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MessageState::Ready.is_terminal());
        assert!(!MessageState::Pending.is_terminal());
        assert!(MessageState::Completed.is_terminal());
        assert!(MessageState::Discarded.is_terminal());
    }

    #[test]
    fn test_transition_targets() {
        let d = Duration::from_secs(30);
        assert_eq!(Transition::Complete.target_state(), MessageState::Completed);
        assert_eq!(Transition::Discard.target_state(), MessageState::Discarded);
        assert_eq!(Transition::Defer(d).target_state(), MessageState::Ready);
        assert_eq!(Transition::Extend(d).target_state(), MessageState::Pending);

        assert_eq!(Transition::Complete.delay(), Duration::ZERO);
        assert_eq!(Transition::Discard.delay(), Duration::ZERO);
        assert_eq!(Transition::Defer(d).delay(), d);
        assert_eq!(Transition::Extend(d).delay(), d);
    }

    #[test]
    fn test_only_pending_messages_transition() {
        let id = Uuid::new_v4();
        let transitions = [
            Transition::Complete,
            Transition::Discard,
            Transition::Defer(Duration::from_secs(1)),
            Transition::Extend(Duration::from_secs(1)),
        ];

        for transition in transitions {
            assert!(transition.check(id, MessageState::Pending).is_ok());
            for from in [MessageState::Ready, MessageState::Completed, MessageState::Discarded] {
                let err = transition.check(id, from).unwrap_err();
                assert!(matches!(
                    err,
                    QueueError::InvalidTransition { from: f, transition: t, .. }
                        if f == from && t == transition
                ));
            }
        }
    }

    #[test]
    fn test_delay_millis_clamps_to_max_delay() {
        assert_eq!(delay_millis(Duration::from_millis(1500)), 1500);

        let max_millis = MAX_DELAY.as_millis() as i64;
        assert_eq!(delay_millis(MAX_DELAY), max_millis);
        assert_eq!(delay_millis(Duration::from_secs(u64::MAX / 4)), max_millis);
        assert_eq!(delay_millis(Duration::MAX), max_millis);
    }
}
