//! Delver web server

use crate::{create_app, AppState, WebError, WebResult};
use delver_core::AppConfig;
use tokio::net::TcpListener;
use tracing::info;

/// Main delver web server
pub struct DelverServer {
    state: AppState,
}

impl DelverServer {
    /// Create a server from configuration
    pub async fn new(config: AppConfig) -> WebResult<Self> {
        let state = AppState::new(config).await?;
        Ok(Self { state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until interrupted
    pub async fn start(self) -> WebResult<()> {
        let address = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        let app = create_app(self.state.clone());

        let listener = TcpListener::bind(&address).await.map_err(WebError::Server)?;
        info!(address = address.as_str(), "Server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(WebError::Server)?;

        info!("Server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
