//! Room message broadcast: persist first, then fan out.
//!
//! A message is committed once `MessageStore::save` returns. Only then is a
//! membership snapshot taken and the message pushed to every member's sink.
//! A failed save delivers nothing. A failed delivery to one member is logged
//! and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_common::SnowflakeGenerator;
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::ChatError;
use crate::models::message::{direct_participants, Message};
use crate::store::MessageStore;

use super::events::{EventName, OutboundEvent};
use super::sessions::SessionManager;

/// Longest accepted message text, in characters.
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Default and maximum page sizes for history reads.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 100;

pub struct BroadcastEngine {
    store: Arc<dyn MessageStore>,
    sessions: Arc<SessionManager>,
    ids: SnowflakeGenerator,
    /// Cleared while the store is unreachable; new sends are refused.
    accepting: AtomicBool,
}

impl BroadcastEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        sessions: Arc<SessionManager>,
        ids: SnowflakeGenerator,
    ) -> Self {
        Self {
            store,
            sessions,
            ids,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Send `text` from a session to a room it is a member of.
    pub async fn send(&self, session_id: &str, room: &str, text: &str) -> Result<Message, ChatError> {
        self.ensure_accepting()?;
        let text = validate_text(text)?;
        let sender = self.sessions.identity_of(session_id)?;

        // One send at a time per session keeps each sender's messages in
        // persistence order for every recipient.
        let lock = self
            .sessions
            .send_lock(session_id)
            .ok_or(ChatError::SessionClosed)?;
        let _guard = lock.lock().await;

        let rooms = self.sessions.rooms();
        if !rooms.is_member(room, session_id) {
            return Err(ChatError::NotAMember(room.to_string()));
        }

        let message = Message::room(self.ids.generate(), room, &sender, text, Utc::now());
        self.persist(&message).await?;

        // The room can empty out between the commit and the snapshot.
        let members = rooms.members_of(room).unwrap_or_default();
        let event = OutboundEvent::new(EventName::MESSAGE_CREATE, serde_json::json!(message));
        let delivered = self.sessions.deliver_all(&members, &event);

        tracing::info!(
            message_id = message.id,
            %room,
            sender = %sender,
            members = members.len(),
            delivered,
            "message broadcast"
        );
        Ok(message)
    }

    /// Tell the other members of a room that this session is typing.
    /// Nothing is persisted.
    pub fn typing(&self, session_id: &str, room: &str) -> Result<usize, ChatError> {
        let identity = self.sessions.identity_of(session_id)?;
        let rooms = self.sessions.rooms();
        if !rooms.is_member(room, session_id) {
            return Err(ChatError::NotAMember(room.to_string()));
        }

        let members = rooms.members_of(room).unwrap_or_default();
        let event = OutboundEvent::new(
            EventName::TYPING_START,
            serde_json::json!({
                "room": room,
                "user_id": identity,
                "timestamp": Utc::now(),
            }),
        );
        let others = members.iter().filter(|id| id.as_str() != session_id);
        Ok(self.sessions.deliver_all(others, &event))
    }

    /// Read a room's history. Only members may read a room; only the two
    /// participants may read a direct conversation.
    pub async fn history(
        &self,
        session_id: &str,
        room: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ChatError> {
        let identity = self.sessions.identity_of(session_id)?;

        let allowed = match direct_participants(room) {
            Some((a, b)) => identity == a || identity == b,
            None => self.sessions.rooms().is_member(room, session_id),
        };
        if !allowed {
            return Err(ChatError::NotAMember(room.to_string()));
        }

        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        match self.store.query_room_history(room, since, limit).await {
            Ok(messages) => Ok(messages),
            Err(err) => {
                tracing::error!(%room, error = %err, "history query failed");
                Err(ChatError::Storage(err))
            }
        }
    }

    /// Allocate a new message id.
    pub(crate) fn next_id(&self) -> i64 {
        self.ids.generate()
    }

    /// Save a message, halting sends if the store has gone away.
    pub(crate) async fn persist(&self, message: &Message) -> Result<(), ChatError> {
        match self.store.save(message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(
                    message_id = message.id,
                    room = %message.room,
                    error = %err,
                    "message persistence failed; not broadcasting"
                );
                if err.is_unavailable() {
                    self.halt_sends();
                }
                Err(ChatError::Storage(err))
            }
        }
    }

    pub(crate) fn ensure_accepting(&self) -> Result<(), ChatError> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(ChatError::StorageUnavailable)
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn halt_sends(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::error!("message store lost; new sends are paused");
        }
    }

    pub fn resume_sends(&self) {
        if !self.accepting.swap(true, Ordering::SeqCst) {
            tracing::info!("message store reachable again; sends resumed");
        }
    }

    /// Probe the store every `interval`, pausing sends while it is down and
    /// resuming them once it answers again.
    pub fn spawn_store_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match engine.store.ping().await {
                    Ok(()) => engine.resume_sends(),
                    Err(err) if err.is_unavailable() => {
                        tracing::warn!(error = %err, "store health probe failed");
                        engine.halt_sends();
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "store health probe returned an error");
                    }
                }
            }
        })
    }
}

/// Trim and bound message text.
pub fn validate_text(text: &str) -> Result<&str, ChatError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::InvalidPayload(
            "message text is required".to_string(),
        ));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(ChatError::InvalidPayload(format!(
            "message text must be {MAX_MESSAGE_LEN} characters or fewer"
        )));
    }
    Ok(text)
}
