//! The set of shared gateway components, wired together once at startup.

use std::sync::Arc;

use relay_common::SnowflakeGenerator;

use crate::error::ChatError;
use crate::identity::{Identity, IdentityProvider};
use crate::store::MessageStore;

use super::broadcast::BroadcastEngine;
use super::notify::NotificationDispatcher;
use super::rooms::RoomRegistry;
use super::session::EventSink;
use super::sessions::SessionManager;

pub struct Hub {
    pub rooms: Arc<RoomRegistry>,
    pub sessions: Arc<SessionManager>,
    pub broadcast: Arc<BroadcastEngine>,
    pub notifications: NotificationDispatcher,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Hub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityProvider>,
        ids: SnowflakeGenerator,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let sessions = Arc::new(SessionManager::new(rooms.clone()));
        let broadcast = Arc::new(BroadcastEngine::new(store, sessions.clone(), ids));
        let notifications = NotificationDispatcher::new(sessions.clone(), broadcast.clone());
        Self {
            rooms,
            sessions,
            broadcast,
            notifications,
            identity,
        }
    }

    /// A new connection: returns its session id.
    pub fn connect(&self, sink: Arc<dyn EventSink>) -> String {
        self.sessions.register(sink)
    }

    /// Resolve credentials and attach the identity to the session.
    pub async fn identify(
        &self,
        session_id: &str,
        name: &str,
        secret: &str,
    ) -> Result<Identity, ChatError> {
        let identity = self.identity.verify_credentials(name, secret).await?;
        self.sessions
            .authenticate(session_id, &identity.user_id, &identity.name)?;
        Ok(identity)
    }

    /// The connection is gone. Safe to call more than once.
    pub fn disconnect(&self, session_id: &str) {
        if self.sessions.unregister(session_id) {
            tracing::info!(%session_id, "session disconnected");
        }
    }
}
