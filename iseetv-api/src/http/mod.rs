// Module: http
// Streaming HTTP surface

pub mod error;
pub mod health;
pub mod proxy;
pub mod stream;

use axum::{http::HeaderValue, routing::get, Router};
use iseetv_core::config::Config;
use iseetv_core::ChannelRepository;
use iseetv_proxy::{ProxyError, RelaySettings, UpstreamClient};
use iseetv_stream::StreamSessionRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<dyn ChannelRepository>,
    pub registry: Arc<StreamSessionRegistry>,
    pub upstream: UpstreamClient,
    pub relay: RelaySettings,
    pub passthrough_chunk_size: usize,
    /// Prefix clients see in front of every route, e.g. "/api"
    pub public_prefix: String,
    /// Base URL for `/hls/{path}`; empty when not configured
    pub hls_upstream: String,
}

impl AppState {
    pub fn new(
        config: &Config,
        channels: Arc<dyn ChannelRepository>,
        registry: Arc<StreamSessionRegistry>,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            channels,
            registry,
            upstream: UpstreamClient::new(&config.proxy)?,
            relay: RelaySettings::from_config(&config.relay),
            passthrough_chunk_size: config.streaming.passthrough_chunk_size,
            public_prefix: config.streaming.public_prefix.clone(),
            hls_upstream: config.proxy.hls_upstream.clone(),
        })
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let router = Router::new()
        .route("/stream/{channel_id}", get(stream::get_stream))
        .route("/stream/{channel_id}/cleanup", get(stream::cleanup_stream))
        .route("/segments/{channel_id}/{file}", get(stream::get_segment_file))
        .route("/sessions", get(stream::list_sessions))
        .route("/hls/{*path}", get(proxy::proxy_hls))
        .route("/segment/{channel_id}", get(proxy::proxy_segment))
        .route("/relay/{channel_id}", get(proxy::relay_channel))
        .merge(health::create_health_router());

    router
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}
