use crate::app::app;
use crate::config::config;
use crate::database::DatabaseManager;
use crate::AppState;

pub async fn handle(migrate: bool) -> anyhow::Result<()> {
    let config = config();
    tracing::info!("Starting Helpdesk API in {:?} mode", config.environment);

    let pool = DatabaseManager::connect_lazy(&config.database)?;
    if migrate || config.database.run_migrations_on_start {
        // A failed migration is fatal only when explicitly requested
        match DatabaseManager::migrate(&pool).await {
            Ok(()) => {}
            Err(e) if migrate => return Err(e.into()),
            Err(e) => tracing::warn!("Skipping migrations, database unavailable: {}", e),
        }
    }

    let bind_addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;

    tracing::info!("Helpdesk API listening on http://{}", bind_addr);
    axum::serve(listener, app(AppState::new(pool)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Helpdesk API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
