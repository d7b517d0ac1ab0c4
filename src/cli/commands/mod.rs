pub mod admin;
pub mod migrate;
pub mod serve;

use sqlx::PgPool;

use crate::config::config;
use crate::database::DatabaseManager;

/// Connect eagerly; maintenance commands are useless without the database
pub(crate) async fn connect() -> anyhow::Result<PgPool> {
    let pool = DatabaseManager::connect_lazy(&config().database)?;
    DatabaseManager::health_check(&pool).await?;
    Ok(pool)
}
