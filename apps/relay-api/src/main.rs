use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::Config;
use relay_api::gateway::hub::Hub;
use relay_api::identity::MemoryIdentityProvider;
use relay_api::store::{MemoryMessageStore, MessageStore, PgMessageStore};
use relay_api::AppState;
use relay_common::SnowflakeGenerator;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => {
            let db = relay_api::db::pool::connect(url, config.database_pool_size)
                .expect("failed to create database pool");
            Arc::new(PgMessageStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; messages are kept in memory and lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };

    let identity = Arc::new(MemoryIdentityProvider::new());
    let seeded = identity
        .seed(&config.seed_accounts)
        .await
        .expect("failed to seed accounts");
    tracing::info!(accounts = seeded, "identity provider ready");

    let ids = SnowflakeGenerator::new(config.worker_id).expect("WORKER_ID must be between 0 and 1023");

    let hub = Arc::new(Hub::new(store, identity, ids));
    hub.broadcast
        .spawn_store_monitor(Duration::from_secs(config.store_probe_interval_secs));

    let state = AppState {
        hub,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(relay_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(?e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
