//! Connection pool construction for the Postgres/pgvector backend.

use crate::config::Config;
use crate::error::Result;
use sqlx::postgres::{PgPoolOptions, PgConnectOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;

/// Build a bounded Postgres connection pool: requests acquire and release
/// a connection per operation, not per request.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let connect_opts = PgConnectOptions::from_str(&config.database_url)?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_opts)
        .await?;
    tracing::info!(
        max_connections = config.database_max_connections,
        "connected to postgres"
    );
    Ok(pool)
}
