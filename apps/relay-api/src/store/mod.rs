//! Persistence gateway for chat messages.
//!
//! `MessageStore` is the only path to durable storage. The broadcast engine
//! treats a successful `save` as the commit point for a message: nothing is
//! fanned out before it returns `Ok`.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::message::Message;

pub use memory::MemoryMessageStore;
pub use pg::PgMessageStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store cannot be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single read or write failed.
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably record a message. Fails if the id already exists.
    async fn save(&self, message: &Message) -> Result<(), StoreError>;

    /// Messages in `room`, oldest first.
    ///
    /// With `since`, returns up to `limit` messages created strictly after
    /// it. Without, returns the newest `limit` messages.
    async fn query_room_history(
        &self,
        room: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Message>, StoreError>;

    /// Cheap liveness probe used by the store health monitor.
    async fn ping(&self) -> Result<(), StoreError>;
}
