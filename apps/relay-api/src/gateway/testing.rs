//! Sinks and fixtures for exercising the gateway without a socket.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_common::SnowflakeGenerator;

use crate::error::DeliveryError;
use crate::identity::MemoryIdentityProvider;
use crate::store::{MemoryMessageStore, MessageStore};

use super::events::OutboundEvent;
use super::hub::Hub;
use super::session::EventSink;

/// Records every delivered event. A broken sink rejects everything.
pub struct RecordingSink {
    events: Mutex<Vec<OutboundEvent>>,
    broken: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            broken: false,
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            broken: true,
        })
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name).collect()
    }

    /// Events with the given name, in delivery order.
    pub fn named(&self, name: &str) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, event: OutboundEvent) -> Result<(), DeliveryError> {
        if self.broken {
            return Err(DeliveryError::Closed);
        }
        self.events.lock().push(event);
        Ok(())
    }
}

/// A hub over an in-memory store, plus handles to inspect it.
pub struct TestHub {
    pub hub: Arc<Hub>,
    pub store: Arc<MemoryMessageStore>,
    pub identity: Arc<MemoryIdentityProvider>,
}

impl TestHub {
    pub fn new() -> Self {
        let store = Arc::new(MemoryMessageStore::new());
        let identity = Arc::new(MemoryIdentityProvider::new());
        let ids = SnowflakeGenerator::new(0).expect("worker id 0 is valid");
        let hub = Arc::new(Hub::new(
            store.clone() as Arc<dyn MessageStore>,
            identity.clone(),
            ids,
        ));
        Self {
            hub,
            store,
            identity,
        }
    }

    /// Register a session already authenticated as `identity`.
    pub fn session(&self, identity: &str) -> (String, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let id = self.hub.sessions.register(sink.clone());
        self.hub
            .sessions
            .authenticate(&id, identity, identity)
            .expect("fresh session authenticates");
        (id, sink)
    }

    /// Register an authenticated session whose sink rejects every event.
    pub fn broken_session(&self, identity: &str) -> String {
        let id = self.hub.sessions.register(RecordingSink::broken());
        self.hub
            .sessions
            .authenticate(&id, identity, identity)
            .expect("fresh session authenticates");
        id
    }
}
