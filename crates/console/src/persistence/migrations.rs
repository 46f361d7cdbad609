use std::str::FromStr;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::Db;
use crate::Result;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Opens the connection pool, creating the database file when missing.
pub async fn init_pool(database_url: &str) -> Result<Db> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    // In-memory databases are per-connection; a single connection keeps the
    // schema visible to every query.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Applies pending migrations.
pub async fn run_migrations(pool: &Db) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Fresh in-memory database for tests.
#[cfg(test)]
pub async fn test_pool() -> Db {
    let pool = init_pool("sqlite::memory:").await.expect("pool init");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_cleanly() {
        let pool = init_pool("sqlite::memory:").await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        // Re-running is a no-op.
        run_migrations(&pool).await.expect("idempotent migrations");
    }
}
