//! Inbound event dispatch.
//!
//! `handle_event` applies one client event to the hub and returns the frames
//! owed to the calling session. Room and direct deliveries to other sessions
//! happen through their sinks as a side effect. No transport is involved, so
//! every event type can be driven directly in tests.

use std::sync::Arc;

use serde_json::json;

use crate::error::ChatError;

use super::events::{ClientEvent, EventName, OutboundEvent};
use super::hub::Hub;

/// Process one event for `session_id`. Failures come back as a single ERROR
/// frame; the session stays open.
pub async fn handle_event(hub: Arc<Hub>, session_id: String, event: ClientEvent) -> Vec<OutboundEvent> {
    let op = event.op();
    match apply(&hub, &session_id, event).await {
        Ok(replies) => replies,
        Err(err) => {
            tracing::debug!(%session_id, op, code = err.code(), error = %err, "client operation failed");
            vec![OutboundEvent::error(err.code(), &err.client_message(), op)]
        }
    }
}

async fn apply(hub: &Hub, session_id: &str, event: ClientEvent) -> Result<Vec<OutboundEvent>, ChatError> {
    let replies = match event {
        ClientEvent::Identify(p) => {
            let identity = hub.identify(session_id, &p.name, &p.secret).await?;
            vec![OutboundEvent::new(
                EventName::IDENTIFIED,
                json!({
                    "session_id": session_id,
                    "user": { "id": identity.user_id, "name": identity.name },
                }),
            )]
        }
        ClientEvent::Join(p) => {
            hub.sessions.join_room(session_id, &p.room)?;
            let members = hub
                .rooms
                .members_of(&p.room)
                .map(|m| m.len())
                .unwrap_or(0);
            vec![OutboundEvent::new(
                EventName::ROOM_JOINED,
                json!({ "room": p.room, "members": members }),
            )]
        }
        ClientEvent::Leave(p) => {
            hub.sessions.leave_room(session_id, &p.room)?;
            vec![OutboundEvent::new(EventName::ROOM_LEFT, json!({ "room": p.room }))]
        }
        ClientEvent::Send(p) => {
            let message = hub.broadcast.send(session_id, &p.room, &p.text).await?;
            vec![OutboundEvent::new(EventName::MESSAGE_ACK, json!(message))]
        }
        ClientEvent::Direct(p) => {
            let message = hub
                .notifications
                .send_direct(session_id, &p.to, &p.text)
                .await?;
            vec![OutboundEvent::new(EventName::MESSAGE_ACK, json!(message))]
        }
        ClientEvent::Typing(p) => {
            hub.broadcast.typing(session_id, &p.room)?;
            Vec::new()
        }
        ClientEvent::Read(p) => {
            hub.notifications.mark_read(session_id, p.message_id).await?;
            Vec::new()
        }
        ClientEvent::History(p) => {
            let messages = hub
                .broadcast
                .history(session_id, &p.room, p.since, p.limit)
                .await?;
            vec![OutboundEvent::new(
                EventName::HISTORY,
                json!({ "room": p.room, "messages": messages }),
            )]
        }
    };
    Ok(replies)
}
