//! Upstream proxy endpoints
//!
//! - `GET /hls/{*path}`: passthrough to the configured upstream host
//! - `GET /segment/{channel_id}?url=...`: fetch an arbitrary upstream segment
//! - `GET /relay/{channel_id}`: time-boxed relay of the origin playlist

use axum::{
    body::Body,
    extract::{Path, Query, RawQuery, State},
    http::{header, StatusCode},
    response::Response,
};
use iseetv_core::ChannelId;
use iseetv_proxy::{join_upstream, relay_manifest, UpstreamBody};
use serde::Deserialize;
use tracing::{debug, info};

use crate::http::stream::{HLS_CONTENT_TYPE, TS_CONTENT_TYPE};
use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    pub url: Option<String>,
}

/// GET /hls/{*path}
pub async fn proxy_hls(
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    State(state): State<AppState>,
) -> AppResult<Response> {
    if state.hls_upstream.is_empty() {
        return Err(AppError::not_found("HLS upstream is not configured"));
    }

    let url = join_upstream(&state.hls_upstream, &path, query.as_deref());
    debug!(url = %url, "Proxying HLS request");

    let upstream = state.upstream.proxy_segment(&url).await?;
    stream_response(upstream, TS_CONTENT_TYPE)
}

/// GET /segment/{channel_id}?url=...
pub async fn proxy_segment(
    Path(channel_id): Path<String>,
    Query(query): Query<SegmentQuery>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let channel_id = ChannelId::parse(channel_id)?;
    let url = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::bad_request("url query parameter is required"))?;
    debug!(channel_id = %channel_id, url = %url, "Proxying segment");

    let upstream = state.upstream.proxy_segment(&url).await?;
    stream_response(upstream, TS_CONTENT_TYPE)
}

/// GET /relay/{channel_id}
pub async fn relay_channel(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let channel_id = ChannelId::parse(channel_id)?;
    let channel = state.channels.lookup(&channel_id).await?;
    info!(channel_id = %channel_id, url = %channel.url, "Starting manifest relay");

    let proxy_base = format!("{}/segment/{}", state.public_prefix, channel_id);
    let stream = relay_manifest(state.upstream.clone(), channel.url, proxy_base, state.relay);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HLS_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}

fn stream_response(upstream: UpstreamBody, default_content_type: &str) -> AppResult<Response> {
    let content_type = upstream
        .content_type
        .unwrap_or_else(|| default_content_type.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(upstream.body))
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}
