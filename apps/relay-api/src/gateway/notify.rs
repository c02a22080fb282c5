//! Targeted delivery to every live session of one identity.
//!
//! Notifications are fire-and-forget: nothing is stored, and an identity
//! with no live sessions simply receives nothing. Direct messages reuse the
//! broadcast engine's durability rule (persist first, then deliver) but only
//! reach the recipient's sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_common::id::{has_prefix, prefix};
use serde::Serialize;
use serde_json::Value;

use crate::error::ChatError;
use crate::models::message::Message;

use super::broadcast::{validate_text, BroadcastEngine};
use super::events::{EventName, OutboundEvent};
use super::sessions::SessionManager;

/// Notification kind sent to a message's author when someone reads it.
pub const KIND_MESSAGE_READ: &str = "MESSAGE_READ";

/// An ephemeral event addressed to one identity.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

pub struct NotificationDispatcher {
    sessions: Arc<SessionManager>,
    broadcast: Arc<BroadcastEngine>,
}

impl NotificationDispatcher {
    pub fn new(sessions: Arc<SessionManager>, broadcast: Arc<BroadcastEngine>) -> Self {
        Self { sessions, broadcast }
    }

    /// Deliver a notification to all of `recipient`'s live sessions.
    /// Returns how many sessions received it.
    pub fn notify(&self, recipient: &str, kind: &str, payload: Value) -> usize {
        let targets = self.sessions.sessions_for_identity(recipient);
        if targets.is_empty() {
            tracing::debug!(%recipient, kind, "no live sessions; notification dropped");
            return 0;
        }

        let notification = Notification {
            recipient: recipient.to_string(),
            kind: kind.to_string(),
            payload,
            created_at: Utc::now(),
        };
        let event = OutboundEvent::new(EventName::NOTIFICATION, serde_json::json!(notification));
        let delivered = self.sessions.deliver_all(&targets, &event);

        tracing::debug!(%recipient, kind, sessions = targets.len(), delivered, "notification sent");
        delivered
    }

    /// Persist a point-to-point message, then deliver it to the recipient's
    /// sessions.
    pub async fn send_direct(
        &self,
        session_id: &str,
        recipient: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        self.broadcast.ensure_accepting()?;
        let text = validate_text(text)?;
        let sender = self.sessions.identity_of(session_id)?;

        if !has_prefix(recipient, prefix::USER) {
            return Err(ChatError::InvalidPayload("invalid recipient".to_string()));
        }
        if recipient == sender {
            return Err(ChatError::InvalidPayload(
                "cannot send a direct message to yourself".to_string(),
            ));
        }

        let lock = self
            .sessions
            .send_lock(session_id)
            .ok_or(ChatError::SessionClosed)?;
        let _guard = lock.lock().await;

        let message = Message::direct(self.broadcast.next_id(), &sender, recipient, text, Utc::now());
        self.broadcast.persist(&message).await?;

        let targets = self.sessions.sessions_for_identity(recipient);
        let event = OutboundEvent::new(EventName::DIRECT_MESSAGE_CREATE, serde_json::json!(message));
        let delivered = self.sessions.deliver_all(&targets, &event);

        tracing::info!(
            message_id = message.id,
            sender = %sender,
            %recipient,
            delivered,
            "direct message sent"
        );
        Ok(message)
    }

    /// Tell a message's author that this session's identity has read it.
    /// Reading your own message notifies nobody.
    pub async fn mark_read(&self, session_id: &str, message_id: i64) -> Result<usize, ChatError> {
        let reader = self.sessions.identity_of(session_id)?;

        let message = self
            .broadcast
            .store()
            .get(message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))?;

        if message.sender == reader {
            return Ok(0);
        }
        let allowed = match &message.recipient {
            Some(recipient) => *recipient == reader,
            None => self.sessions.rooms().is_member(&message.room, session_id),
        };
        if !allowed {
            return Err(ChatError::NotAMember(message.room.clone()));
        }

        Ok(self.notify(
            &message.sender,
            KIND_MESSAGE_READ,
            serde_json::json!({
                "message_id": message.id,
                "room": message.room,
                "reader": reader,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::TestHub;
    use relay_common::id::prefixed_ulid;

    fn user() -> String {
        prefixed_ulid(prefix::USER)
    }

    #[tokio::test]
    async fn notify_reaches_every_session_of_the_identity() {
        let t = TestHub::new();
        let (_s1, sink1) = t.session("usr_u1");
        let (_s2, sink2) = t.session("usr_u1");
        let (_other, sink_other) = t.session("usr_u2");

        let delivered = t.hub.notifications.notify(
            "usr_u1",
            "PING",
            serde_json::json!({ "hello": "world" }),
        );
        assert_eq!(delivered, 2);

        for sink in [&sink1, &sink2] {
            let events = sink.named(EventName::NOTIFICATION);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].data["type"], "PING");
            assert_eq!(events[0].data["payload"]["hello"], "world");
            assert_eq!(events[0].data["recipient"], "usr_u1");
        }
        assert!(sink_other.events().is_empty());
    }

    #[tokio::test]
    async fn notify_without_sessions_delivers_nothing() {
        let t = TestHub::new();
        let delivered = t
            .hub
            .notifications
            .notify("usr_offline", "PING", serde_json::json!({}));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn direct_message_is_stored_and_only_reaches_the_recipient() {
        let t = TestHub::new();
        let (alice, bob, carol) = (user(), user(), user());
        let (a, sink_a) = t.session(&alice);
        let (_b1, sink_b1) = t.session(&bob);
        let (_b2, sink_b2) = t.session(&bob);
        let (_c, sink_c) = t.session(&carol);

        let message = t
            .hub
            .notifications
            .send_direct(&a, &bob, "psst")
            .await
            .unwrap();
        assert_eq!(message.recipient.as_deref(), Some(bob.as_str()));
        assert_eq!(t.store.find_by_text("psst").len(), 1);

        for sink in [&sink_b1, &sink_b2] {
            let events = sink.named(EventName::DIRECT_MESSAGE_CREATE);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].data["sender"], alice.as_str());
        }
        assert!(sink_a.events().is_empty());
        assert!(sink_c.events().is_empty());
    }

    #[tokio::test]
    async fn direct_message_to_offline_identity_is_still_stored() {
        let t = TestHub::new();
        let (a, _) = t.session(&user());
        t.hub
            .notifications
            .send_direct(&a, &user(), "later")
            .await
            .unwrap();
        assert_eq!(t.store.len(), 1);
    }

    #[tokio::test]
    async fn direct_message_to_a_non_user_id_is_rejected() {
        let t = TestHub::new();
        let (a, _) = t.session(&user());

        for bad in ["", "nobody", "usr_not-a-ulid", "dm:usr_a:usr_b"] {
            let err = t
                .hub
                .notifications
                .send_direct(&a, bad, "hello?")
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::InvalidPayload(_)), "{bad}");
        }
        let session_id = prefixed_ulid(prefix::SESSION);
        let err = t
            .hub
            .notifications
            .send_direct(&a, &session_id, "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidPayload(_)));
        assert!(t.store.is_empty());
    }

    #[tokio::test]
    async fn direct_message_storage_failure_delivers_nothing() {
        let t = TestHub::new();
        let bob = user();
        let (a, _) = t.session(&user());
        let (_b, sink_b) = t.session(&bob);

        t.store.set_offline(true);
        let err = t
            .hub
            .notifications
            .send_direct(&a, &bob, "lost")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(sink_b.events().is_empty());
    }

    #[tokio::test]
    async fn direct_message_to_self_is_rejected() {
        let t = TestHub::new();
        let alice = user();
        let (a, _) = t.session(&alice);
        let err = t
            .hub
            .notifications
            .send_direct(&a, &alice, "me")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn reading_your_own_direct_message_is_silent() {
        let t = TestHub::new();
        let (alice, bob) = (user(), user());
        let (a, _) = t.session(&alice);
        let (_b, sink_b) = t.session(&bob);

        let message = t
            .hub
            .notifications
            .send_direct(&a, &bob, "note to bob")
            .await
            .unwrap();
        assert_eq!(t.hub.notifications.mark_read(&a, message.id).await.unwrap(), 0);
        assert!(sink_b.named(EventName::NOTIFICATION).is_empty());
    }

    #[tokio::test]
    async fn read_receipt_reaches_the_author() {
        let t = TestHub::new();
        let (a, sink_a) = t.session("usr_a");
        let (b, _) = t.session("usr_b");
        t.hub.sessions.join_room(&a, "lobby").unwrap();
        t.hub.sessions.join_room(&b, "lobby").unwrap();

        let message = t.hub.broadcast.send(&a, "lobby", "read me").await.unwrap();
        let delivered = t.hub.notifications.mark_read(&b, message.id).await.unwrap();
        assert_eq!(delivered, 1);

        let receipts = sink_a.named(EventName::NOTIFICATION);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].data["type"], KIND_MESSAGE_READ);
        assert_eq!(receipts[0].data["payload"]["message_id"], message.id);
        assert_eq!(receipts[0].data["payload"]["reader"], "usr_b");

        // Reading your own message is silent.
        assert_eq!(t.hub.notifications.mark_read(&a, message.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_receipt_checks_access() {
        let t = TestHub::new();
        let (a, _) = t.session("usr_a");
        let (outsider, _) = t.session("usr_x");
        t.hub.sessions.join_room(&a, "lobby").unwrap();
        let message = t.hub.broadcast.send(&a, "lobby", "members only").await.unwrap();

        let err = t
            .hub
            .notifications
            .mark_read(&outsider, message.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAMember(_)));

        let err = t.hub.notifications.mark_read(&a, 424242).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageNotFound(424242)));
    }
}
