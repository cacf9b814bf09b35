//! Connection pool and schema bootstrap.
//!
//! SYSTEM CONTEXT
//! ==============
//! One pool is built at startup and handed to the persistence gateway. The
//! rooms-table migration runs before the first websocket upgrade, so every
//! store call can assume the schema is in place.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Build the shared pool and bring the rooms schema up to date. Pool size
/// comes from `DB_MAX_CONNECTIONS` (default 5).
///
/// # Errors
///
/// Fails when the database is unreachable or a migration cannot apply.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(5);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
