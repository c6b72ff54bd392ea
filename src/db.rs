//! Database connection pools and migration management.
//!
//! This module provides utilities for:
//! - Creating the service database pool (API keys) and running its migrations
//! - Creating the warehouse pool that backs the dataset endpoints

use std::time::Duration;

use sqlx::{
    Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// Type alias for PostgreSQL connection pool.
///
/// Instead of writing `Pool<Postgres>` everywhere, we can use `DbPool`.
pub type DbPool = Pool<Postgres>;

/// Create the service database pool.
///
/// Holds the `api_keys` table. Connections are created lazily and reused
/// across requests.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection string is invalid
/// - Cannot connect to PostgreSQL server
/// - Database authentication fails
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        // Limit concurrent connections
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Create the warehouse pool.
///
/// Every dataset query borrows a connection from this pool and returns it on
/// drop, so a failed query can never leak a connection.
///
/// # Timeouts
///
/// - `acquire_timeout`: how long a request waits for a connection
/// - `statement_timeout`: server-side cap on each statement
///
/// Both use `timeout_secs` (30 by default).
pub async fn create_warehouse_pool(
    warehouse_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let statement_timeout = (timeout_secs * 1000).to_string();

    let options: PgConnectOptions = warehouse_url.parse()?;
    let options = options
        .application_name("dataset-access-api")
        .options([("statement_timeout", statement_timeout.as_str())]);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs))
        .connect_with(options)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each migration runs only once.
/// Only the service database is migrated; the warehouse is external and never altered.
///
/// # Errors
///
/// Returns an error if:
/// - Migration files cannot be read
/// - SQL syntax errors in migration files
/// - Database errors during migration execution
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // The macro reads migrations at compile time from ./migrations directory
    sqlx::migrate!("./migrations").run(pool).await
}
