//! Queue client.
//!
//! The client binds a connection pool and a [`ClientConfig`] to the lifecycle
//! engine. It is cheap to clone: clones share the pool.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::engine::{self, StateCounts};
use crate::error::Result;
use crate::message::Message;
use crate::schema;
use crate::state::Transition;
use crate::worker::{MessageHandler, WorkerConfig, WorkerPool};

#[derive(Clone)]
pub struct Client {
    pool: PgPool,
    lease_duration: Duration,
}

impl Client {
    /// Connect with default settings and provision the schema if missing.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(ClientConfig::new(database_url)).await
    }

    /// Connect using `config` and provision the schema if missing.
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;

        match Self::from_pool(pool.clone(), &config).await {
            Ok(client) => {
                info!(
                    max_connections = config.max_connections,
                    lease_secs = config.lease_duration.as_secs(),
                    "pushpop client connected"
                );
                Ok(client)
            }
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    /// Wrap an existing pool. Provisions the schema if missing.
    pub async fn from_pool(pool: PgPool, config: &ClientConfig) -> Result<Self> {
        schema::ensure_schema(&pool).await?;
        Ok(Self {
            pool,
            lease_duration: config.lease_duration,
        })
    }

    /// Close pooled connections. The client is unusable afterwards.
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lease granted by [`Client::pop`].
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Create (but do not enqueue) a message for `topic`.
    pub fn new_message(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Message {
        Message::new(topic, payload)
    }

    /// Find a message by id, in any state.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Message> {
        engine::find(&self.pool, id).await
    }

    /// Enqueue `message`, claimable immediately.
    pub async fn push(&self, message: &mut Message) -> Result<()> {
        engine::push(&self.pool, message, Duration::ZERO).await
    }

    /// Enqueue `message`, claimable once `delay` has elapsed.
    pub async fn push_delay(&self, message: &mut Message, delay: Duration) -> Result<()> {
        engine::push(&self.pool, message, delay).await
    }

    /// Claim the next available message in `topic`.
    ///
    /// The message moves to pending and the caller becomes responsible for
    /// completing, discarding, deferring or extending it before the lease
    /// runs out. Returns [`QueueError::NoMessage`](crate::QueueError::NoMessage)
    /// when nothing is eligible.
    pub async fn pop(&self, topic: &str) -> Result<Message> {
        engine::claim(&self.pool, topic, self.lease_duration).await
    }

    /// Apply `transition` to a message previously returned by [`Client::pop`].
    pub async fn transition(&self, message: &mut Message, transition: Transition) -> Result<()> {
        engine::apply_transition(&self.pool, message, transition).await
    }

    pub async fn complete(&self, message: &mut Message) -> Result<()> {
        self.transition(message, Transition::Complete).await
    }

    pub async fn discard(&self, message: &mut Message) -> Result<()> {
        self.transition(message, Transition::Discard).await
    }

    pub async fn defer(&self, message: &mut Message, delay: Duration) -> Result<()> {
        self.transition(message, Transition::Defer(delay)).await
    }

    pub async fn extend(&self, message: &mut Message, delay: Duration) -> Result<()> {
        self.transition(message, Transition::Extend(delay)).await
    }

    /// Return up to `limit` pending messages with expired leases to ready.
    pub async fn reclaim_expired(&self, limit: i64) -> Result<Vec<Message>> {
        engine::reclaim_expired(&self.pool, limit).await
    }

    /// Count messages per state in `topic`.
    pub async fn counts(&self, topic: &str) -> Result<StateCounts> {
        engine::counts(&self.pool, topic).await
    }

    /// Run `concurrency` workers on `topic` until `shutdown` is cancelled.
    pub async fn work(
        &self,
        topic: impl Into<String>,
        concurrency: usize,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let config = WorkerConfig {
            concurrency,
            ..WorkerConfig::default()
        };
        WorkerPool::new(self.clone(), topic, handler, config)
            .run(shutdown)
            .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("lease_duration", &self.lease_duration)
            .finish_non_exhaustive()
    }
}
