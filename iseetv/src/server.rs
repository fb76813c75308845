//! Server lifecycle management
//!
//! Serves the HTTP API until a shutdown signal arrives, then stops every
//! stream session so no transcoder outlives the server.

use std::sync::Arc;
use tracing::{error, info};

use iseetv_api::{create_router, AppState};
use iseetv_core::Config;
use iseetv_stream::StreamSessionRegistry;

pub struct IseeTvServer {
    config: Config,
    state: AppState,
    registry: Arc<StreamSessionRegistry>,
}

impl IseeTvServer {
    pub const fn new(config: Config, state: AppState, registry: Arc<StreamSessionRegistry>) -> Self {
        Self {
            config,
            state,
            registry,
        }
    }

    /// Serve until SIGINT/SIGTERM, then shut down gracefully.
    pub async fn start(self) -> anyhow::Result<()> {
        let Self {
            config,
            state,
            registry,
        } = self;
        let http_address = config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = create_router(state, &config.server.cors_origins);

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("HTTP server error: {}", e);
        }
        info!("HTTP server shut down gracefully");

        info!("Shutting down iSeeTV server...");
        registry.shutdown_all().await;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
