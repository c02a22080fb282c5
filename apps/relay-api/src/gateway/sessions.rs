//! Live session table with an identity index.
//!
//! Membership is kept consistent in both directions: a session's
//! `joined_rooms` matches the rooms that list it in the [`RoomRegistry`].
//! Join and leave hold the session's lock across both updates; the lock
//! order is always session entry, then room shard. Unregister removes the
//! session entry first, so it waits out any join or leave in progress.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use relay_common::id::{prefix, prefixed_ulid};

use crate::error::{ChatError, DeliveryError};
use crate::models::message::DIRECT_ROOM_PREFIX;

use super::events::OutboundEvent;
use super::rooms::RoomRegistry;
use super::session::{EventSink, Session, SessionState};

/// Longest accepted room id.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Shared table of every connected session.
///
/// Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
/// entry for non-poisoning, fast locking.
pub struct SessionManager {
    sessions: DashMap<String, Mutex<Session>>,
    by_identity: DashMap<String, HashSet<String>>,
    rooms: Arc<RoomRegistry>,
}

impl SessionManager {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            by_identity: DashMap::new(),
            rooms,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Register a new, unauthenticated session with no rooms.
    pub fn register(&self, sink: Arc<dyn EventSink>) -> String {
        let session_id = prefixed_ulid(prefix::SESSION);
        self.sessions
            .insert(session_id.clone(), Mutex::new(Session::new(session_id.clone(), sink)));
        tracing::debug!(%session_id, "session registered");
        session_id
    }

    /// Attach an identity to a session. Re-authenticating with the same
    /// identity is a no-op; a different identity is rejected.
    pub fn authenticate(&self, session_id: &str, identity: &str, name: &str) -> Result<(), ChatError> {
        let entry = self.sessions.get(session_id).ok_or(ChatError::SessionClosed)?;
        let mut session = entry.lock();

        match session.identity.as_deref() {
            Some(existing) if existing == identity => return Ok(()),
            Some(_) => return Err(ChatError::Unauthenticated),
            None => {}
        }

        session.identity = Some(identity.to_string());
        session.name = Some(name.to_string());

        // Indexed while the session entry is held so a racing unregister
        // always observes it.
        self.by_identity
            .entry(identity.to_string())
            .or_default()
            .insert(session_id.to_string());

        tracing::info!(%session_id, %identity, "session authenticated");
        Ok(())
    }

    /// Remove a session and evict it from every room. Safe to call more than
    /// once; returns true only for the call that removed it.
    pub fn unregister(&self, session_id: &str) -> bool {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return false;
        };
        let session = entry.into_inner();

        for room in &session.joined_rooms {
            self.rooms.leave(room, session_id);
        }

        if let Some(identity) = &session.identity {
            if let Some(mut ids) = self.by_identity.get_mut(identity) {
                ids.remove(session_id);
            }
            self.by_identity.remove_if(identity, |_, ids| ids.is_empty());
        }

        tracing::debug!(
            %session_id,
            rooms = session.joined_rooms.len(),
            "session unregistered"
        );
        true
    }

    /// All live sessions of an identity (one per device/connection).
    pub fn sessions_for_identity(&self, identity: &str) -> HashSet<String> {
        self.by_identity
            .get(identity)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    /// The authenticated identity of a session.
    pub fn identity_of(&self, session_id: &str) -> Result<String, ChatError> {
        let entry = self.sessions.get(session_id).ok_or(ChatError::SessionClosed)?;
        let session = entry.lock();
        session.identity.clone().ok_or(ChatError::Unauthenticated)
    }

    pub fn state_of(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|entry| entry.lock().state())
    }

    pub fn joined_rooms(&self, session_id: &str) -> Option<HashSet<String>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.lock().joined_rooms.clone())
    }

    /// Join a room. Returns false if the session was already in it.
    pub fn join_room(&self, session_id: &str, room: &str) -> Result<bool, ChatError> {
        validate_room_id(room)?;

        // Session entry first, then the room shard. Held across both updates.
        let entry = self.sessions.get(session_id).ok_or(ChatError::SessionClosed)?;
        let mut session = entry.lock();
        if session.identity.is_none() {
            return Err(ChatError::Unauthenticated);
        }

        let newly_joined = self.rooms.join(room, session_id);
        session.joined_rooms.insert(room.to_string());

        if newly_joined {
            tracing::debug!(%session_id, %room, "joined room");
        }
        Ok(newly_joined)
    }

    /// Leave a room the session previously joined.
    pub fn leave_room(&self, session_id: &str, room: &str) -> Result<(), ChatError> {
        let entry = self.sessions.get(session_id).ok_or(ChatError::SessionClosed)?;
        let mut session = entry.lock();
        if !session.joined_rooms.remove(room) {
            return Err(ChatError::NotAMember(room.to_string()));
        }

        self.rooms.leave(room, session_id);
        tracing::debug!(%session_id, %room, "left room");
        Ok(())
    }

    /// The send lock for a session, held across persist-then-fan-out.
    pub(crate) fn send_lock(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.lock().send_lock.clone())
    }

    /// Deliver one event to one session. A session that is gone counts as a
    /// closed channel.
    pub fn deliver(&self, session_id: &str, event: OutboundEvent) -> Result<(), DeliveryError> {
        let sink = self
            .sessions
            .get(session_id)
            .map(|entry| entry.lock().sink.clone())
            .ok_or(DeliveryError::Closed)?;
        sink.deliver(event)
    }

    /// Deliver an event to every session in `targets`, skipping failures.
    /// Returns how many deliveries succeeded.
    pub fn deliver_all<'a, I>(&self, targets: I, event: &OutboundEvent) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut delivered = 0;
        for session_id in targets {
            match self.deliver(session_id, event.clone()) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Closed) => {
                    tracing::debug!(%session_id, event = event.name, "recipient gone; skipped");
                }
                Err(DeliveryError::Full) => {
                    tracing::warn!(%session_id, event = event.name, "recipient queue full; dropped");
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Room ids are 1-64 chars of `[A-Za-z0-9_.-]`; the direct-message prefix is
/// reserved.
pub fn validate_room_id(room: &str) -> Result<(), ChatError> {
    if room.is_empty() || room.len() > MAX_ROOM_ID_LEN {
        return Err(ChatError::InvalidPayload(format!(
            "room id must be 1-{MAX_ROOM_ID_LEN} characters"
        )));
    }
    if room.starts_with(DIRECT_ROOM_PREFIX) {
        return Err(ChatError::InvalidPayload("room id prefix is reserved".to_string()));
    }
    if !room
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ChatError::InvalidPayload(
            "room id may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::RecordingSink;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(RoomRegistry::new()))
    }

    fn authed(manager: &SessionManager, identity: &str) -> String {
        let id = manager.register(RecordingSink::new());
        manager.authenticate(&id, identity, identity).unwrap();
        id
    }

    #[test]
    fn register_creates_unauthenticated_session() {
        let manager = manager();
        let id = manager.register(RecordingSink::new());
        assert!(id.starts_with("ses_"));
        assert_eq!(manager.state_of(&id), Some(SessionState::Unauthenticated));
        assert!(manager.joined_rooms(&id).unwrap().is_empty());
        assert!(matches!(manager.identity_of(&id), Err(ChatError::Unauthenticated)));
    }

    #[test]
    fn session_ids_are_never_reused() {
        let manager = manager();
        let a = manager.register(RecordingSink::new());
        manager.unregister(&a);
        let b = manager.register(RecordingSink::new());
        assert_ne!(a, b);
    }

    #[test]
    fn authenticate_twice_with_conflicting_identity_fails() {
        let manager = manager();
        let id = manager.register(RecordingSink::new());
        manager.authenticate(&id, "usr_1", "alice").unwrap();
        manager.authenticate(&id, "usr_1", "alice").unwrap();

        let err = manager.authenticate(&id, "usr_2", "bob").unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));
        assert_eq!(manager.identity_of(&id).unwrap(), "usr_1");
    }

    #[test]
    fn authenticate_unknown_session_is_closed() {
        let manager = manager();
        assert!(matches!(
            manager.authenticate("ses_gone", "usr_1", "alice"),
            Err(ChatError::SessionClosed)
        ));
    }

    #[test]
    fn join_requires_authentication() {
        let manager = manager();
        let id = manager.register(RecordingSink::new());
        assert!(matches!(
            manager.join_room(&id, "lobby"),
            Err(ChatError::Unauthenticated)
        ));
        assert_eq!(manager.rooms().room_count(), 0);
    }

    #[test]
    fn join_rejects_bad_room_ids() {
        let manager = manager();
        let id = authed(&manager, "usr_1");
        for bad in ["", "dm:usr_1:usr_2", "has space", "x".repeat(65).as_str()] {
            assert!(matches!(
                manager.join_room(&id, bad),
                Err(ChatError::InvalidPayload(_))
            ));
        }
    }

    #[test]
    fn join_and_leave_keep_both_sides_consistent() {
        let manager = manager();
        let id = authed(&manager, "usr_1");

        assert!(manager.join_room(&id, "lobby").unwrap());
        assert!(!manager.join_room(&id, "lobby").unwrap());
        assert!(manager.rooms().is_member("lobby", &id));
        assert_eq!(manager.state_of(&id), Some(SessionState::Joined(1)));

        manager.leave_room(&id, "lobby").unwrap();
        assert!(!manager.rooms().is_member("lobby", &id));
        assert!(manager.joined_rooms(&id).unwrap().is_empty());
    }

    #[test]
    fn leaving_a_room_never_joined_is_not_a_member() {
        let manager = manager();
        let id = authed(&manager, "usr_1");
        let other = authed(&manager, "usr_2");
        manager.join_room(&other, "lobby").unwrap();

        let err = manager.leave_room(&id, "lobby").unwrap_err();
        assert!(matches!(err, ChatError::NotAMember(room) if room == "lobby"));
        // No state change.
        assert!(manager.rooms().is_member("lobby", &other));
    }

    #[test]
    fn unregister_evicts_from_rooms_and_is_idempotent() {
        let manager = manager();
        let a = authed(&manager, "usr_1");
        let b = authed(&manager, "usr_2");
        manager.join_room(&a, "lobby").unwrap();
        manager.join_room(&a, "games").unwrap();
        manager.join_room(&b, "lobby").unwrap();

        assert!(manager.unregister(&a));
        assert!(!manager.unregister(&a));

        let lobby = manager.rooms().members_of("lobby").unwrap();
        assert!(!lobby.contains(&a));
        assert!(lobby.contains(&b));
        // `games` emptied and was removed.
        assert!(manager.rooms().members_of("games").is_err());
        assert!(manager.sessions_for_identity("usr_1").is_empty());
        assert!(manager.state_of(&a).is_none());
    }

    #[test]
    fn identity_may_have_several_sessions() {
        let manager = manager();
        let s1 = authed(&manager, "usr_1");
        let s2 = authed(&manager, "usr_1");
        let _other = authed(&manager, "usr_2");

        let sessions = manager.sessions_for_identity("usr_1");
        assert_eq!(sessions, HashSet::from([s1.clone(), s2.clone()]));

        manager.unregister(&s1);
        assert_eq!(manager.sessions_for_identity("usr_1"), HashSet::from([s2]));
    }

    #[test]
    fn racing_join_and_leave_stay_consistent() {
        let manager = Arc::new(manager());
        let id = authed(&manager, "usr_1");

        for _ in 0..2_000 {
            manager.join_room(&id, "lobby").unwrap();

            let leaver = {
                let (manager, id) = (manager.clone(), id.clone());
                std::thread::spawn(move || {
                    let _ = manager.leave_room(&id, "lobby");
                })
            };
            let joiner = {
                let (manager, id) = (manager.clone(), id.clone());
                std::thread::spawn(move || {
                    manager.join_room(&id, "lobby").unwrap();
                })
            };
            leaver.join().unwrap();
            joiner.join().unwrap();

            let listed = manager.joined_rooms(&id).unwrap().contains("lobby");
            assert_eq!(listed, manager.rooms().is_member("lobby", &id));
        }
    }

    #[test]
    fn concurrent_unregister_leaves_no_membership_behind() {
        let manager = Arc::new(manager());

        for _ in 0..500 {
            let id = authed(&manager, "usr_1");
            let joiner = {
                let (manager, id) = (manager.clone(), id.clone());
                std::thread::spawn(move || {
                    let _ = manager.join_room(&id, "lobby");
                })
            };
            let closer = {
                let (manager, id) = (manager.clone(), id.clone());
                std::thread::spawn(move || {
                    manager.unregister(&id);
                })
            };
            joiner.join().unwrap();
            closer.join().unwrap();

            assert!(!manager.rooms().is_member("lobby", &id));
        }
        assert_eq!(manager.rooms().room_count(), 0);
    }

    #[test]
    fn deliver_to_gone_session_is_closed() {
        let manager = manager();
        let event = OutboundEvent::new("TEST", serde_json::json!({}));
        assert_eq!(manager.deliver("ses_gone", event), Err(DeliveryError::Closed));
    }

    #[test]
    fn deliver_all_skips_failures() {
        let manager = manager();
        let ok = RecordingSink::new();
        let a = manager.register(ok.clone());
        let b = manager.register(RecordingSink::broken());
        let targets = vec![a, b, "ses_gone".to_string()];

        let event = OutboundEvent::new("TEST", serde_json::json!({ "n": 1 }));
        assert_eq!(manager.deliver_all(&targets, &event), 1);
        assert_eq!(ok.names(), vec!["TEST"]);
    }
}
