//! Applies the message table migrations to the configured database.
//!
//! Usage:
//!   cargo run -p relay-api --bin relay-migrate
//!   cargo run -p relay-api --bin relay-migrate -- --revert
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy).

use std::error::Error;
use std::path::Path;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL is required; the relay runs without one only in memory")?;
    let revert = std::env::args().any(|arg| arg == "--revert");

    println!("Connecting to database...");
    let mut conn = PgConnection::establish(&database_url)?;

    if revert {
        let reverted = conn.revert_last_migration(MIGRATIONS)?;
        println!("Reverted: {reverted}");
        return Ok(());
    }

    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if applied.is_empty() {
        println!("No pending migrations.");
    } else {
        for migration in &applied {
            println!("  Applied: {migration}");
        }
        println!("{} migration(s) applied.", applied.len());
    }
    Ok(())
}
