//! Message lifecycle engine.
//!
//! All coordination between producers and consumers happens in the store:
//! - claims lock the oldest eligible row with `FOR UPDATE SKIP LOCKED`, so two
//!   claimants never see the same row and never queue behind each other
//! - transitions compare-and-swap on the `(state, state_time)` pair the caller
//!   observed, so a stale holder cannot overwrite newer state
//! - every timestamp is computed by the store and read back with `RETURNING`
//!
//! Nothing here retries. A failed statement leaves the row untouched and the
//! in-memory message unchanged.

use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::message::Message;
use crate::schema::{
    SQL_COUNT_BY_STATE, SQL_FIND_MESSAGE, SQL_MARK_PENDING, SQL_PUSH_MESSAGE,
    SQL_RECLAIM_EXPIRED, SQL_SELECT_NEXT_READY, SQL_TRANSITION_MESSAGE,
};
use crate::state::{MessageState, Transition, delay_millis};

/// Number of messages per state within one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub ready: i64,
    pub pending: i64,
    pub completed: i64,
    pub discarded: i64,
}

impl StateCounts {
    pub fn get(&self, state: MessageState) -> i64 {
        match state {
            MessageState::Ready => self.ready,
            MessageState::Pending => self.pending,
            MessageState::Completed => self.completed,
            MessageState::Discarded => self.discarded,
        }
    }

    pub fn total(&self) -> i64 {
        self.ready + self.pending + self.completed + self.discarded
    }
}

/// Insert `message` as READY with `state_time = now() + delay`.
pub(crate) async fn push(pool: &PgPool, message: &mut Message, delay: Duration) -> Result<()> {
    if message.topic.is_empty() {
        return Err(QueueError::EmptyTopic);
    }

    let id = if message.id.is_nil() {
        Uuid::new_v4()
    } else {
        message.id
    };

    let persisted = sqlx::query_as::<_, Message>(SQL_PUSH_MESSAGE)
        .bind(id)
        .bind(&message.topic)
        .bind(delay_millis(delay).to_string())
        .bind(&message.payload)
        .fetch_one(pool)
        .await?;

    trace!(message_id = %id, topic = %persisted.topic, ready_at = %persisted.state_time, "pushed message");
    message.apply(persisted);
    Ok(())
}

/// Claim the oldest eligible READY message in `topic` for `lease`.
///
/// Runs as select-and-lock then update inside one transaction. The transaction
/// is rolled back (dropped) on every early return, leaving the store unchanged.
pub(crate) async fn claim(pool: &PgPool, topic: &str, lease: Duration) -> Result<Message> {
    if topic.is_empty() {
        return Err(QueueError::EmptyTopic);
    }

    let mut tx = pool.begin().await?;

    let next: Option<Uuid> = sqlx::query_scalar(SQL_SELECT_NEXT_READY)
        .bind(topic)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(id) = next else {
        tx.rollback().await?;
        trace!(topic = %topic, "no message available");
        return Err(QueueError::NoMessage {
            topic: topic.to_string(),
        });
    };

    let claimed = sqlx::query_as::<_, Message>(SQL_MARK_PENDING)
        .bind(id)
        .bind(delay_millis(lease).to_string())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    debug!(message_id = %id, topic = %topic, lease_deadline = %claimed.state_time, "claimed message");
    Ok(claimed)
}

/// Apply `transition` to a message the caller holds.
///
/// The update only matches if the row still carries the `(state, state_time)`
/// recorded in `message`; otherwise the row is re-read to report either
/// [`QueueError::NotFound`] or [`QueueError::Conflict`].
pub(crate) async fn apply_transition(
    pool: &PgPool,
    message: &mut Message,
    transition: Transition,
) -> Result<()> {
    transition.check(message.id, message.state)?;
    let token = message.lease_token();

    let updated = sqlx::query_as::<_, Message>(SQL_TRANSITION_MESSAGE)
        .bind(message.id)
        .bind(transition.target_state())
        .bind(delay_millis(transition.delay()).to_string())
        .bind(token.state)
        .bind(token.state_time)
        .fetch_optional(pool)
        .await?;

    let Some(updated) = updated else {
        let current = find(pool, message.id).await?;
        warn!(
            message_id = %message.id,
            transition = %transition,
            expected = %token.state,
            actual = %current.state,
            "transition rejected, message changed since it was observed"
        );
        return Err(QueueError::Conflict {
            id: message.id,
            expected: token.state,
            actual: current.state,
        });
    };

    debug!(
        message_id = %message.id,
        transition = %transition,
        state = %updated.state,
        state_time = %updated.state_time,
        "transitioned message"
    );
    message.apply(updated);
    Ok(())
}

/// Point lookup by id, any state.
pub(crate) async fn find(pool: &PgPool, id: Uuid) -> Result<Message> {
    sqlx::query_as::<_, Message>(SQL_FIND_MESSAGE)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(QueueError::NotFound(id))
}

/// Return up to `limit` PENDING messages whose lease has expired to READY.
///
/// Uses the same skip-locked discipline as claim, so concurrent sweepers
/// split the expired set instead of contending on it.
pub(crate) async fn reclaim_expired(pool: &PgPool, limit: i64) -> Result<Vec<Message>> {
    let reclaimed = sqlx::query_as::<_, Message>(SQL_RECLAIM_EXPIRED)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    for message in &reclaimed {
        debug!(message_id = %message.id, topic = %message.topic, "reclaimed expired lease");
    }
    Ok(reclaimed)
}

pub(crate) async fn counts(pool: &PgPool, topic: &str) -> Result<StateCounts> {
    let rows: Vec<(MessageState, i64)> = sqlx::query_as(SQL_COUNT_BY_STATE)
        .bind(topic)
        .fetch_all(pool)
        .await?;

    let mut counts = StateCounts::default();
    for (state, count) in rows {
        match state {
            MessageState::Ready => counts.ready = count,
            MessageState::Pending => counts.pending = count,
            MessageState::Completed => counts.completed = count,
            MessageState::Discarded => counts.discarded = count,
        }
    }
    Ok(counts)
}
