use crate::identity::parse_seed_accounts;

/// Relay API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. Without one, messages are kept in memory.
    pub database_url: Option<String>,
    /// Maximum pooled database connections.
    pub database_pool_size: usize,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Heartbeat interval sent to clients in READY (ms).
    pub heartbeat_interval_ms: u64,
    /// Seconds a connection may stay unauthenticated before it is closed.
    pub identify_timeout_secs: u64,
    /// Per-session outbound queue capacity.
    pub outbound_buffer: usize,
    /// Seconds between message store health probes.
    pub store_probe_interval_secs: u64,
    /// Snowflake worker id for message ids (0-1023).
    pub worker_id: u16,
    /// Accounts created at startup in the bundled identity provider.
    pub seed_accounts: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_pool_size: 20,
            port: 4100,
            heartbeat_interval_ms: 41250,
            identify_timeout_secs: 30,
            outbound_buffer: 256,
            store_probe_interval_secs: 10,
            worker_id: 0,
            seed_accounts: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Unset or unparsable
    /// values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_pool_size: parsed_var("DATABASE_POOL_SIZE", defaults.database_pool_size),
            port: parsed_var("PORT", defaults.port),
            heartbeat_interval_ms: parsed_var("HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval_ms),
            identify_timeout_secs: parsed_var("IDENTIFY_TIMEOUT_SECS", defaults.identify_timeout_secs),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER", defaults.outbound_buffer),
            store_probe_interval_secs: parsed_var(
                "STORE_PROBE_INTERVAL_SECS",
                defaults.store_probe_interval_secs,
            ),
            worker_id: parsed_var("WORKER_ID", defaults.worker_id),
            seed_accounts: std::env::var("SEED_ACCOUNTS")
                .map(|raw| parse_seed_accounts(&raw))
                .unwrap_or_default(),
        };
        config.clamped()
    }

    /// Raise intervals and capacities that must be non-zero to at least 1.
    /// Zero-period timers and zero-capacity channels panic in tokio.
    pub fn clamped(mut self) -> Self {
        self.heartbeat_interval_ms = self.heartbeat_interval_ms.max(1);
        self.store_probe_interval_secs = self.store_probe_interval_secs.max(1);
        self.outbound_buffer = self.outbound_buffer.max(1);
        self.database_pool_size = self.database_pool_size.max(1);
        self
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
