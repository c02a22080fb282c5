use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::schema::messages;

/// Prefix reserved for direct-message conversation keys.
pub const DIRECT_ROOM_PREFIX: &str = "dm:";

/// A persisted chat message. Never mutated after it is saved.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i64,
    pub room: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a room message.
    pub fn room(id: i64, room: &str, sender: &str, text: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            room: room.to_string(),
            sender: sender.to_string(),
            recipient: None,
            text: text.to_string(),
            created_at,
        }
    }

    /// Build a point-to-point message between two identities.
    pub fn direct(
        id: i64,
        sender: &str,
        recipient: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            room: direct_room_id(sender, recipient),
            sender: sender.to_string(),
            recipient: Some(recipient.to_string()),
            text: text.to_string(),
            created_at,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.recipient.is_some()
    }
}

/// History key shared by both participants of a direct conversation.
pub fn direct_room_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{DIRECT_ROOM_PREFIX}{lo}:{hi}")
}

/// Returns the two participants of a direct room key, if it is one.
pub fn direct_participants(room: &str) -> Option<(&str, &str)> {
    room.strip_prefix(DIRECT_ROOM_PREFIX)?.split_once(':')
}
