pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ledger;
pub mod models;
pub mod posting;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use http::build_router;
pub use state::AppState;

use tracing::info;

/// Serves the API on `config.bind_addr` until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<(), AppError> {
    let bind_addr = config.bind_addr.clone();
    let database_path = config.database_path.clone();
    let state = tokio::task::spawn_blocking(move || AppState::new(config))
        .await
        .map_err(|e| AppError::Internal(format!("startup task failed: {e}")))??;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        database = %database_path.display(),
        "warehouse ledger listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received, draining connections");
}
