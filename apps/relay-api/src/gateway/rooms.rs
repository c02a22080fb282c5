//! Room registry: which sessions are in which room.
//!
//! Each room's member set lives in its own `DashMap` slot, so membership
//! changes and snapshots for one room are serialized while other rooms
//! proceed on other shards. Rooms exist only while they have members.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::ChatError;

pub struct RoomRegistry {
    rooms: DashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add a session to a room, creating the room if needed.
    /// Returns false if the session was already a member.
    pub fn join(&self, room_id: &str, session_id: &str) -> bool {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id.to_string())
    }

    /// Remove a session from a room. The room is dropped once empty.
    /// Returns false if the session was not a member.
    pub fn leave(&self, room_id: &str, session_id: &str) -> bool {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(session_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of a room's members. Later joins and leaves do not affect
    /// the returned set.
    pub fn members_of(&self, room_id: &str) -> Result<HashSet<String>, ChatError> {
        self.rooms
            .get(room_id)
            .map(|members| members.value().clone())
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))
    }

    pub fn is_member(&self, room_id: &str, session_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains(session_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
