//! Per-connection session state and the outbound delivery boundary.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;

use super::events::OutboundEvent;

/// Where events for one session go. Delivery never blocks: a sink either
/// accepts the event immediately or reports why it could not.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: OutboundEvent) -> Result<(), DeliveryError>;
}

/// Sink backed by a bounded mpsc queue drained by the connection task.
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundEvent>,
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: OutboundEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Create a channel sink and the receiver its connection task reads from.
pub fn channel_sink(capacity: usize) -> (Arc<ChannelSink>, mpsc::Receiver<OutboundEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Arc::new(ChannelSink { tx }), rx)
}

/// Lifecycle position of a live session. A disconnected session is simply
/// absent from the session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Authenticated and a member of this many rooms.
    Joined(usize),
}

/// State for a single client connection.
pub struct Session {
    /// Unique session identifier (`ses_` prefixed ULID). Never reused.
    pub session_id: String,
    /// Authenticated user ID, set once by IDENTIFY.
    pub identity: Option<String>,
    /// Display name resolved at IDENTIFY time.
    pub name: Option<String>,
    /// Rooms this session has joined.
    pub joined_rooms: HashSet<String>,
    pub connected_at: DateTime<Utc>,
    pub(crate) sink: Arc<dyn EventSink>,
    /// Serializes persist-then-fan-out for messages sent by this session.
    pub(crate) send_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    pub fn new(session_id: String, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session_id,
            identity: None,
            name: None,
            joined_rooms: HashSet::new(),
            connected_at: Utc::now(),
            sink,
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.identity, self.joined_rooms.len()) {
            (None, _) => SessionState::Unauthenticated,
            (Some(_), 0) => SessionState::Authenticated,
            (Some(_), n) => SessionState::Joined(n),
        }
    }
}
