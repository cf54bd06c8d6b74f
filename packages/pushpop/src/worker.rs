//! Worker supervisor and lease sweeper.
//!
//! [`WorkerPool`] runs a fixed number of claim loops on one topic:
//!
//! ```text
//! worker loop
//!     │
//!     ├─► Client::pop(topic)            (NoMessage → sleep poll_interval)
//!     ├─► MessageHandler::handle(&msg)  (lease extended every heartbeat_interval)
//!     └─► Ok            → complete
//!         Unrecoverable → discard
//!         other error   → defer(retry_delay)
//! ```
//!
//! [`LeaseSweeper`] periodically returns pending messages whose lease expired
//! (their holder crashed or stalled) to the ready pool.
//!
//! Both are [`Service`]s and stop when their `CancellationToken` is cancelled.
//! In-flight handlers are allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::Client;
use crate::error::QueueError;
use crate::message::Message;

/// Shortest heartbeat or sweep period; `tokio::time::interval` rejects zero.
pub const MIN_TICK: Duration = Duration::from_millis(10);

/// Handler invoked for each claimed message.
///
/// Return `Ok(())` to complete the message. Any error defers it for another
/// attempt, except [`Unrecoverable`] (and payload decode failures), which
/// discard it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// Handler error that discards the message instead of retrying it.
#[derive(Debug, thiserror::Error)]
#[error("unrecoverable: {0}")]
pub struct Unrecoverable(pub String);

/// Whether a handler failure should discard the message.
pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<Unrecoverable>().is_some() {
        return true;
    }
    matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::Serialization(_))
    )
}

/// A long-running background service.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent claim loops
    pub concurrency: usize,
    /// How long to wait when the topic is empty
    pub poll_interval: Duration,
    /// How often to extend the lease of a message being handled
    pub heartbeat_interval: Duration,
    /// Delay before a failed message becomes claimable again
    pub retry_delay: Duration,
    /// Identifier used in logs
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            retry_delay: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }
}

/// Runs `concurrency` claim loops against one topic.
pub struct WorkerPool {
    client: Client,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        client: Client,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            client,
            topic: topic.into(),
            handler,
            config,
        }
    }

    /// Run until `shutdown` is cancelled and every in-flight message is settled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);

        if self.config.heartbeat_interval >= self.client.lease_duration() {
            warn!(
                heartbeat_secs = self.config.heartbeat_interval.as_secs(),
                lease_secs = self.client.lease_duration().as_secs(),
                "heartbeat interval is not shorter than the lease, leases may expire mid-handler"
            );
        }

        info!(
            worker_id = %self.config.worker_id,
            topic = %self.topic,
            concurrency,
            "worker pool starting"
        );

        let shared = Arc::new(self);
        let mut handles = Vec::with_capacity(concurrency);
        for index in 0..concurrency {
            let worker = Arc::clone(&shared);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.worker_loop(index, shutdown).await;
            }));
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
            }
        }

        info!(worker_id = %shared.config.worker_id, "worker pool stopped");
        Ok(())
    }

    async fn worker_loop(&self, index: usize, shutdown: CancellationToken) {
        debug!(worker_id = %self.config.worker_id, index, "worker loop started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let idle = match self.client.pop(&self.topic).await {
                Ok(message) => {
                    self.process(message).await;
                    continue;
                }
                Err(e) if e.is_no_message() => self.config.poll_interval,
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "failed to claim message");
                    Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }
    }

    /// Handle one claimed message and settle it.
    async fn process(&self, message: Message) {
        let message_id = message.id;
        let snapshot = message.clone();
        let held = Arc::new(Mutex::new(message));

        let stop_heartbeat = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            self.client.clone(),
            Arc::clone(&held),
            self.config.heartbeat_interval,
            stop_heartbeat.clone(),
        ));

        let result = self.handler.handle(&snapshot).await;

        stop_heartbeat.cancel();
        if let Err(e) = heartbeat.await {
            error!(message_id = %message_id, error = %e, "heartbeat task panicked");
        }

        let mut message = held.lock().await;
        let settled = match result {
            Ok(()) => {
                debug!(message_id = %message_id, "message handled");
                self.client.complete(&mut message).await
            }
            Err(e) if is_unrecoverable(&e) => {
                warn!(message_id = %message_id, error = %e, "discarding message");
                self.client.discard(&mut message).await
            }
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    retry_in_secs = self.config.retry_delay.as_secs(),
                    "message failed, deferring"
                );
                self.client.defer(&mut message, self.config.retry_delay).await
            }
        };

        if let Err(e) = settled {
            error!(message_id = %message_id, error = %e, "failed to settle message");
        }
    }
}

#[async_trait]
impl Service for WorkerPool {
    fn name(&self) -> &'static str {
        "pushpop-worker-pool"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        WorkerPool::run(*self, shutdown).await
    }
}

/// Extend the lease of `held` every `interval` until `stop` is cancelled.
///
/// Stops early if the lease was lost; the settle step then reports the conflict.
async fn heartbeat(
    client: Client,
    held: Arc<Mutex<Message>>,
    interval: Duration,
    stop: CancellationToken,
) {
    let lease = client.lease_duration();
    let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
    ticker.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let mut message = held.lock().await;
                match client.extend(&mut message, lease).await {
                    Ok(()) => debug!(message_id = %message.id, deadline = %message.state_time, "lease extended"),
                    Err(e @ QueueError::Conflict { .. }) | Err(e @ QueueError::NotFound(_)) => {
                        warn!(message_id = %message.id, error = %e, "lease lost");
                        break;
                    }
                    Err(e) => warn!(message_id = %message.id, error = %e, "heartbeat failed"),
                }
            }
        }
    }
}

/// Periodically returns expired leases to the ready pool.
pub struct LeaseSweeper {
    client: Client,
    interval: Duration,
    batch_size: i64,
}

impl LeaseSweeper {
    pub fn new(client: Client, interval: Duration) -> Self {
        Self {
            client,
            interval: interval.max(MIN_TICK),
            batch_size: 100,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reclaim every currently expired lease, one batch at a time.
    pub async fn sweep_once(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let reclaimed = self.client.reclaim_expired(self.batch_size).await?;
            total += reclaimed.len();
            if (reclaimed.len() as i64) < self.batch_size {
                break;
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl Service for LeaseSweeper {
    fn name(&self) -> &'static str {
        "pushpop-lease-sweeper"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "lease sweeper starting");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(count) => info!(count, "reclaimed expired leases"),
                        Err(e) => error!(error = %e, "lease sweep failed"),
                    }
                }
            }
        }

        info!("lease sweeper stopped");
        Ok(())
    }
}
