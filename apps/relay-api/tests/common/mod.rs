#![allow(dead_code)]

use std::sync::Arc;

use relay_api::config::Config;
use relay_api::gateway::hub::Hub;
use relay_api::identity::MemoryIdentityProvider;
use relay_api::store::MemoryMessageStore;
use relay_api::AppState;
use relay_common::SnowflakeGenerator;

/// Accounts every test state starts with, as `(name, secret)`.
pub const ACCOUNTS: &[(&str, &str)] = &[("alice", "alice-pw"), ("bob", "bob-pw"), ("carol", "carol-pw")];

/// Handles kept alongside the state so tests can poke the backends.
pub struct TestBackends {
    pub store: Arc<MemoryMessageStore>,
    pub identity: Arc<MemoryIdentityProvider>,
}

/// Build an in-memory application state with the default configuration.
pub async fn test_state() -> (AppState, TestBackends) {
    test_state_with(Config::default()).await
}

/// Build an in-memory application state with a custom configuration.
pub async fn test_state_with(mut config: Config) -> (AppState, TestBackends) {
    config.seed_accounts = ACCOUNTS
        .iter()
        .map(|(name, secret)| (name.to_string(), secret.to_string()))
        .collect();

    let store = Arc::new(MemoryMessageStore::new());
    let identity = Arc::new(MemoryIdentityProvider::new());
    identity
        .seed(&config.seed_accounts)
        .await
        .expect("seed accounts");

    let ids = SnowflakeGenerator::new(config.worker_id).expect("valid worker id");
    let hub = Arc::new(Hub::new(store.clone(), identity.clone(), ids));

    let state = AppState {
        hub,
        config: Arc::new(config),
    };
    (state, TestBackends { store, identity })
}
