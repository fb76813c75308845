mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use iseetv_api::AppState;
use iseetv_core::{bootstrap::load_config, logging, InMemoryChannelRepository};
use iseetv_stream::{CommandCapabilityProbe, FfprobeProber, StreamSessionRegistry, SystemClock};

use server::IseeTvServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("iSeeTV server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Channel repository
    let channels = InMemoryChannelRepository::from_config(&config.channels)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load channels: {e}"))?;
    info!("Loaded {} channel(s)", channels.len());

    // 4. Stream session registry
    tokio::fs::create_dir_all(&config.streaming.segments_root)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to create segments root {}: {e}",
                config.streaming.segments_root.display()
            )
        })?;
    let registry = Arc::new(StreamSessionRegistry::new(
        &config.streaming,
        config.tools.clone(),
        Arc::new(FfprobeProber::new(config.tools.ffprobe.clone())),
        Arc::new(CommandCapabilityProbe::new(config.tools.hwaccel_detect.clone())),
        Arc::new(SystemClock),
    ));

    // 5. HTTP state
    let state = AppState::new(&config, Arc::new(channels), Arc::clone(&registry))
        .map_err(|e| anyhow::anyhow!("Failed to initialize HTTP state: {e}"))?;

    IseeTvServer::new(config, state, registry).start().await
}
