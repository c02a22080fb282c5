use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{MessageStore, StoreError};
use crate::models::message::Message;

// ---------------------------------------------------------------------------
// In-memory implementation (for development / tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    /// Per-room messages kept sorted by `(created_at, id)`.
    rooms: HashMap<String, Vec<Message>>,
    /// Message id -> room.
    index: HashMap<i64, String>,
}

/// Process-local message store. Contents are lost on restart.
pub struct MemoryMessageStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate losing (or regaining) the storage backend. While offline every
    /// call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total number of stored messages.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored messages whose text equals `text`.
    pub fn find_by_text(&self, text: &str) -> Vec<Message> {
        let inner = self.inner.lock();
        inner
            .rooms
            .values()
            .flatten()
            .filter(|m| m.text == text)
            .cloned()
            .collect()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, message: &Message) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        if inner.index.contains_key(&message.id) {
            return Err(StoreError::Query(format!(
                "duplicate message id {}",
                message.id
            )));
        }
        inner.index.insert(message.id, message.room.clone());

        let room = inner.rooms.entry(message.room.clone()).or_default();
        let key = (message.created_at, message.id);
        let pos = room.partition_point(|m| (m.created_at, m.id) < key);
        room.insert(pos, message.clone());
        Ok(())
    }

    async fn query_room_history(
        &self,
        room: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock();
        let Some(messages) = inner.rooms.get(room) else {
            return Ok(Vec::new());
        };

        let result = match since {
            Some(since) => messages
                .iter()
                .filter(|m| m.created_at > since)
                .take(limit)
                .cloned()
                .collect(),
            None => {
                let start = messages.len().saturating_sub(limit);
                messages[start..].to_vec()
            }
        };
        Ok(result)
    }

    async fn get(&self, id: i64) -> Result<Option<Message>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock();
        let found = inner
            .index
            .get(&id)
            .and_then(|room| inner.rooms.get(room))
            .and_then(|messages| messages.iter().find(|m| m.id == id))
            .cloned();
        Ok(found)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(id: i64, room: &str, text: &str, at: DateTime<Utc>) -> Message {
        Message::room(id, room, "usr_a", text, at)
    }

    #[tokio::test]
    async fn save_and_get() {
        let store = MemoryMessageStore::new();
        let m = msg(1, "lobby", "hi", Utc::now());
        store.save(&m).await.unwrap();

        assert_eq!(store.get(1).await.unwrap(), Some(m));
        assert_eq!(store.get(2).await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = MemoryMessageStore::new();
        let now = Utc::now();
        store.save(&msg(7, "lobby", "one", now)).await.unwrap();
        let err = store.save(&msg(7, "lobby", "two", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn history_is_ordered_and_limited() {
        let store = MemoryMessageStore::new();
        let base = Utc::now();
        // Saved out of order on purpose.
        for (id, offset) in [(3, 3), (1, 1), (2, 2), (4, 4)] {
            let m = msg(id, "lobby", &format!("m{id}"), base + Duration::seconds(offset));
            store.save(&m).await.unwrap();
        }
        store.save(&msg(99, "other", "x", base)).await.unwrap();

        let all = store.query_room_history("lobby", None, 50).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        // Newest two, still oldest first.
        let latest = store.query_room_history("lobby", None, 2).await.unwrap();
        let ids: Vec<i64> = latest.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);

        // Strictly after the second message.
        let since = store
            .query_room_history("lobby", Some(base + Duration::seconds(2)), 1)
            .await
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, 3);
    }

    #[tokio::test]
    async fn unknown_room_has_empty_history() {
        let store = MemoryMessageStore::new();
        let history = store.query_room_history("nowhere", None, 10).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryMessageStore::new();
        store.set_offline(true);

        let err = store.save(&msg(1, "lobby", "hi", Utc::now())).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.ping().await.is_err());
        assert!(store.is_empty());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
