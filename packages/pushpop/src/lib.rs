//! # pushpop
//!
//! A durable, topic-partitioned message queue stored in PostgreSQL.
//!
//! All coordination happens through transactional row locking; clients share
//! no in-memory state, so any number of processes may push and pop on the same
//! topic concurrently.
//!
//! ## Guarantees
//!
//! - **Exclusive claims**: a popped message is held by exactly one consumer
//!   until it is completed, discarded, deferred, or its lease is reclaimed.
//! - **At-least-once delivery**: a message whose holder disappears becomes
//!   claimable again once [`Client::reclaim_expired`] (or a running
//!   [`LeaseSweeper`]) returns its expired lease to the ready pool.
//! - **FIFO by readiness**: within a topic, the eligible message with the
//!   earliest ready time is claimed first.
//!
//! ## Lifecycle
//!
//! ```text
//! push ─► READY ─pop─► PENDING ─┬─ complete ─► COMPLETED
//!           ▲             │  ▲  └─ discard ──► DISCARDED
//!           └── defer ────┘  └── extend
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use pushpop::Client;
//!
//! let client = Client::connect("postgres://localhost/app").await?;
//!
//! let mut msg = client.new_message("widgets", "");
//! msg.encode_payload(&Widget { id: 7 })?;
//! msg.push(&client).await?;
//!
//! match client.pop("widgets").await {
//!     Ok(mut msg) => {
//!         let widget: Widget = msg.decode_payload()?;
//!         if build(widget).await.is_ok() {
//!             msg.complete(&client).await?;
//!         } else {
//!             msg.defer(&client, Duration::from_secs(30)).await?;
//!         }
//!     }
//!     Err(e) if e.is_no_message() => { /* nothing to do, back off */ }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod schema;
pub mod state;
pub mod worker;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_LEASE_DURATION};
pub use engine::StateCounts;
pub use error::{QueueError, Result};
pub use message::{LeaseToken, Message};
pub use state::{MAX_DELAY, MessageState, Transition};
pub use worker::{
    LeaseSweeper, MessageHandler, MIN_TICK, Service, Unrecoverable, WorkerConfig, WorkerPool,
};
