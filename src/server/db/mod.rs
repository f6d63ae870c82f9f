//! PostgreSQL access for accounts, complaints and call analytics
//!
//! Plain async functions over a shared `PgPool`; each submodule owns the
//! queries for one table.

pub mod users;
pub mod complaints;
pub mod inquiries;
pub mod stats;

use sqlx::{PgPool, postgres::{PgConnectOptions, PgPoolOptions}};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn init_pool(options: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;
    tracing::info!("Database pool ready ({} connections max)", MAX_CONNECTIONS);
    Ok(pool)
}

/// Apply `migrations/*.sql`
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
