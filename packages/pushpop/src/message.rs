//! Message model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::FromRow;
use uuid::Uuid;

use crate::client::Client;
use crate::error::Result;
use crate::state::{MessageState, Transition};

/// A single message, as last observed in the store.
///
/// A `Message` is a snapshot: it does not hold a connection and is never kept
/// in sync with its row. The `(state, state_time)` pair doubles as the lease
/// token for transitions, so a snapshot that went stale (lease reclaimed,
/// transitioned elsewhere) is rejected with
/// [`QueueError::Conflict`](crate::QueueError::Conflict) rather than silently
/// overwriting newer state.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Message {
    /// Random 128-bit identifier; assigned on creation, or on push if nil.
    pub id: Uuid,

    /// Topic the message has been or will be queued in.
    pub topic: String,

    pub state: MessageState,

    /// Meaning depends on `state`:
    /// - `Ready`: earliest time the message can be claimed.
    /// - `Pending`: lease deadline by which the holder must check in.
    /// - `Completed` / `Discarded`: time of the terminal transition.
    pub state_time: DateTime<Utc>,

    /// Opaque payload, never inspected by the queue.
    pub payload: Vec<u8>,
}

/// The `(state, state_time)` pair a transition must still match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseToken {
    pub state: MessageState,
    pub state_time: DateTime<Utc>,
}

impl Message {
    /// Build an unsaved message. Prefer [`Client::new_message`].
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            state: MessageState::Ready,
            state_time: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn lease_token(&self) -> LeaseToken {
        LeaseToken {
            state: self.state,
            state_time: self.state_time,
        }
    }

    /// Adopt the row returned by the store after a confirmed write.
    pub(crate) fn apply(&mut self, persisted: Message) {
        *self = persisted;
    }

    /// Lease deadline, if the message is currently claimed.
    pub fn lease_deadline(&self) -> Option<DateTime<Utc>> {
        (self.state == MessageState::Pending).then_some(self.state_time)
    }

    /// True if the message is pending and its lease deadline has passed.
    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_deadline().is_some_and(|deadline| deadline < now)
    }

    // ------------------------------------------------------------------
    // Payload helpers
    // ------------------------------------------------------------------

    /// Serialize `value` as JSON into the payload.
    pub fn encode_payload<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.payload = serde_json::to_vec(value)?;
        Ok(())
    }

    /// Deserialize the JSON payload.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    // ------------------------------------------------------------------
    // Lifecycle (delegates to the client)
    // ------------------------------------------------------------------

    /// Enqueue, claimable immediately.
    pub async fn push(&mut self, client: &Client) -> Result<()> {
        client.push(self).await
    }

    /// Enqueue, claimable once `delay` has elapsed.
    pub async fn push_delay(&mut self, client: &Client, delay: Duration) -> Result<()> {
        client.push_delay(self, delay).await
    }

    pub async fn complete(&mut self, client: &Client) -> Result<()> {
        client.transition(self, Transition::Complete).await
    }

    pub async fn discard(&mut self, client: &Client) -> Result<()> {
        client.transition(self, Transition::Discard).await
    }

    /// Return to the ready pool to be retried after `delay`.
    pub async fn defer(&mut self, client: &Client, delay: Duration) -> Result<()> {
        client.transition(self, Transition::Defer(delay)).await
    }

    /// Push the lease deadline out to `now + delay`.
    pub async fn extend(&mut self, client: &Client, delay: Duration) -> Result<()> {
        client.transition(self, Transition::Extend(delay)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[test]
    fn test_new_message_has_id_and_payload() {
        let a = Message::new("widgets", b"1".to_vec());
        let b = Message::new("widgets", "");

        assert_ne!(a.id, b.id);
        assert!(!a.id.is_nil());
        assert_eq!(a.topic, "widgets");
        assert_eq!(a.payload, b"1");
        assert!(b.payload.is_empty());
    }

    #[test]
    fn test_payload_json_helpers() {
        let mut msg = Message::new("widgets", "");
        let widget = Widget {
            name: "sprocket".to_string(),
            count: 3,
        };

        msg.encode_payload(&widget).unwrap();
        assert_eq!(msg.payload, br#"{"name":"sprocket","count":3}"#);

        let decoded: Widget = msg.decode_payload().unwrap();
        assert_eq!(decoded, widget);
    }

    #[test]
    fn test_decode_garbage_payload_is_serialization_error() {
        let msg = Message::new("widgets", b"\xff not json".to_vec());
        let err = msg.decode_payload::<Widget>().unwrap_err();
        assert!(matches!(err, crate::QueueError::Serialization(_)));
    }

    #[test]
    fn test_lease_expiry_only_applies_to_pending() {
        let now = Utc::now();
        let mut msg = Message::new("widgets", "");
        msg.state_time = now - ChronoDuration::seconds(10);

        assert_eq!(msg.lease_deadline(), None);
        assert!(!msg.is_lease_expired(now));

        msg.state = MessageState::Pending;
        assert!(msg.is_lease_expired(now));

        msg.state_time = now + ChronoDuration::seconds(10);
        assert!(!msg.is_lease_expired(now));
    }

    #[test]
    fn test_lease_token_tracks_snapshot() {
        let mut msg = Message::new("widgets", "");
        let before = msg.lease_token();

        msg.state = MessageState::Pending;
        let after = msg.lease_token();

        assert_ne!(before, after);
        assert_eq!(after.state, MessageState::Pending);
        assert_eq!(after.state_time, msg.state_time);
    }
}
