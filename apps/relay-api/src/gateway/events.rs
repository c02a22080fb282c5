//! Gateway opcodes, event types, and wire-format messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_JOIN: u8 = 10;
pub const OP_LEAVE: u8 = 11;
pub const OP_SEND: u8 = 12;
pub const OP_DIRECT: u8 = 13;
pub const OP_TYPING: u8 = 14;
pub const OP_READ: u8 = 15;
pub const OP_HISTORY: u8 = 16;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

/// An event queued for delivery to one session. The payload is shared
/// between every recipient of a fan-out.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub name: &'static str,
    pub data: Arc<Value>,
}

impl OutboundEvent {
    pub fn new(name: &'static str, data: Value) -> Self {
        Self {
            name,
            data: Arc::new(data),
        }
    }

    /// ERROR dispatch describing a failed client operation.
    pub fn error(code: &str, message: &str, op: u8) -> Self {
        Self::new(
            EventName::ERROR,
            serde_json::json!({ "code": code, "message": message, "op": op }),
        )
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct RoomPayload {
    pub room: String,
}

#[derive(Debug, Deserialize)]
pub struct SendPayload {
    pub room: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectPayload {
    pub to: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadPayload {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryPayload {
    pub room: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// A parsed inbound client event (everything except HEARTBEAT, which the
/// transport answers itself).
#[derive(Debug)]
pub enum ClientEvent {
    Identify(IdentifyPayload),
    Join(RoomPayload),
    Leave(RoomPayload),
    Send(SendPayload),
    Direct(DirectPayload),
    Typing(RoomPayload),
    Read(ReadPayload),
    History(HistoryPayload),
}

/// Why a client frame could not be turned into a `ClientEvent`.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    UnknownOp(u8),
    InvalidPayload(u8, String),
}

impl ClientEvent {
    pub fn parse(msg: ClientMessage) -> Result<Self, ParseError> {
        let op = msg.op;
        let d = msg.d;
        let invalid = |e: serde_json::Error| ParseError::InvalidPayload(op, e.to_string());

        let event = match op {
            OP_IDENTIFY => ClientEvent::Identify(serde_json::from_value(d).map_err(invalid)?),
            OP_JOIN => ClientEvent::Join(serde_json::from_value(d).map_err(invalid)?),
            OP_LEAVE => ClientEvent::Leave(serde_json::from_value(d).map_err(invalid)?),
            OP_SEND => ClientEvent::Send(serde_json::from_value(d).map_err(invalid)?),
            OP_DIRECT => ClientEvent::Direct(serde_json::from_value(d).map_err(invalid)?),
            OP_TYPING => ClientEvent::Typing(serde_json::from_value(d).map_err(invalid)?),
            OP_READ => ClientEvent::Read(serde_json::from_value(d).map_err(invalid)?),
            OP_HISTORY => ClientEvent::History(serde_json::from_value(d).map_err(invalid)?),
            other => return Err(ParseError::UnknownOp(other)),
        };
        Ok(event)
    }

    /// The opcode this event arrived with.
    pub fn op(&self) -> u8 {
        match self {
            ClientEvent::Identify(_) => OP_IDENTIFY,
            ClientEvent::Join(_) => OP_JOIN,
            ClientEvent::Leave(_) => OP_LEAVE,
            ClientEvent::Send(_) => OP_SEND,
            ClientEvent::Direct(_) => OP_DIRECT,
            ClientEvent::Typing(_) => OP_TYPING,
            ClientEvent::Read(_) => OP_READ,
            ClientEvent::History(_) => OP_HISTORY,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const IDENTIFIED: &'static str = "IDENTIFIED";
    pub const ROOM_JOINED: &'static str = "ROOM_JOINED";
    pub const ROOM_LEFT: &'static str = "ROOM_LEFT";
    pub const MESSAGE_CREATE: &'static str = "MESSAGE_CREATE";
    pub const MESSAGE_ACK: &'static str = "MESSAGE_ACK";
    pub const DIRECT_MESSAGE_CREATE: &'static str = "DIRECT_MESSAGE_CREATE";
    pub const TYPING_START: &'static str = "TYPING_START";
    pub const NOTIFICATION: &'static str = "NOTIFICATION";
    pub const HISTORY: &'static str = "HISTORY";
    pub const ERROR: &'static str = "ERROR";
}
