//! Connection pool and schema for the Postgres loan mirror

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;

/// Tables the mirror reads and writes
pub const MIRROR_TABLES: [&str; 6] = [
    "users",
    "loans",
    "loan_events",
    "loan_donations",
    "system_settings",
    "indexer_state",
];

/// Periodic sync and the event indexer each hold a connection while they run
const BACKGROUND_TASKS: u32 = 2;

/// Database connection error
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),

    #[error("Failed to run migrations: {0}")]
    MigrationError(String),

    #[error("Mirror schema is missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),

    #[error("Database health check failed: {0}")]
    HealthCheckError(String),
}

/// Configured pool size, raised so HTTP requests never wait on the background tasks
pub fn mirror_pool_size(configured: u32) -> u32 {
    configured.max(BACKGROUND_TASKS + 1)
}

/// Mirror tables absent from `present`
pub fn missing_tables(present: &[String]) -> Vec<String> {
    MIRROR_TABLES
        .iter()
        .filter(|table| !present.iter().any(|p| p == *table))
        .map(|table| table.to_string())
        .collect()
}

/// Create the mirror's connection pool
pub async fn create_pool(config: &Config) -> Result<PgPool, DbError> {
    let max_connections = mirror_pool_size(config.db_max_connections);
    tracing::info!(
        max_connections,
        "Connecting to database at {}",
        config.database_url_masked()
    );

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(BACKGROUND_TASKS)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.database_url)
        .await
        .map_err(|e| DbError::ConnectionError(e.to_string()))?;

    tracing::info!("Database connection pool created successfully");

    Ok(pool)
}

/// Apply the mirror migrations and check the resulting schema
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Running loan mirror migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::MigrationError(e.to_string()))?;

    verify_schema(pool).await?;

    tracing::info!("Loan mirror schema is up to date");

    Ok(())
}

/// Fail unless every mirror table exists in the current schema
pub async fn verify_schema(pool: &PgPool) -> Result<(), DbError> {
    let wanted: Vec<String> = MIRROR_TABLES.iter().map(|t| t.to_string()).collect();

    let present: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = current_schema() AND table_name = ANY($1)
        "#,
    )
    .bind(&wanted)
    .fetch_all(pool)
    .await
    .map_err(|e| DbError::MigrationError(e.to_string()))?;

    let present: Vec<String> = present.into_iter().map(|(name,)| name).collect();
    let missing = missing_tables(&present);
    if !missing.is_empty() {
        return Err(DbError::MissingTables(missing));
    }
    Ok(())
}

/// Check that the mirror's loan table is reachable (for health checks)
pub async fn check_health(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1 FROM loans LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| DbError::HealthCheckError(e.to_string()))?;

    Ok(())
}
