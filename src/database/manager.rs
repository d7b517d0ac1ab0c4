use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<crate::filter::error::FilterError> for DatabaseError {
    fn from(err: crate::filter::error::FilterError) -> Self {
        DatabaseError::QueryError(err.to_string())
    }
}

/// Builds the shared connection pool and runs maintenance against it
pub struct DatabaseManager;

impl DatabaseManager {
    /// Create the pool without connecting, so the server can start (and
    /// report itself degraded) while the database is unreachable.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        if config.url.trim().is_empty() {
            return Err(DatabaseError::ConfigMissing("DATABASE_URL"));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_lazy(&config.url)?;

        info!(
            "Database pool configured (max_connections={}, acquire_timeout={}s)",
            config.max_connections, config.connection_timeout
        );
        Ok(pool)
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    /// Apply the embedded migrations under `migrations/`
    pub async fn migrate(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            max_connections: 2,
            connection_timeout: 1,
            run_migrations_on_start: false,
        }
    }

    #[tokio::test]
    async fn empty_url_is_a_config_error() {
        let err = DatabaseManager::connect_lazy(&config("  ")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConfigMissing("DATABASE_URL")));
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        assert!(DatabaseManager::connect_lazy(&config("not a url")).is_err());
    }

    #[tokio::test]
    async fn lazy_pool_does_not_connect() {
        let pool = DatabaseManager::connect_lazy(&config("postgres://nobody@127.0.0.1:1/none")).unwrap();
        assert_eq!(pool.size(), 0);
        assert!(DatabaseManager::health_check(&pool).await.is_err());
    }
}
