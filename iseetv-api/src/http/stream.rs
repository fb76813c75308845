//! Channel stream endpoints
//!
//! - `GET /stream/{channel_id}`: start (or reuse) the channel's session and
//!   return its playlist, or the raw origin bytes for passthrough
//! - `GET /stream/{channel_id}/cleanup`: tear the session down
//! - `GET /segments/{channel_id}/{file}`: files written by the transcoder

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use iseetv_core::ChannelId;
use iseetv_proxy::rewrite_base_url;
use iseetv_stream::{ChannelStreamSession, SessionInfo, TranscodeMode, SEGMENT_URL_PREFIX};
use serde::Serialize;
use std::io::ErrorKind;
use tracing::{debug, info, warn};

use crate::http::{AppError, AppResult, AppState};

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const TS_CONTENT_TYPE: &str = "video/mp2t";

/// GET /stream/{channel_id}
pub async fn get_stream(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let channel_id = ChannelId::parse(channel_id)?;
    let channel = state.channels.lookup(&channel_id).await?;
    info!(channel_id = %channel_id, url = %channel.url, "Stream request");

    let session = state.registry.acquire(&channel_id, &channel.url).await?;
    session.mark_streaming();

    match session.mode() {
        TranscodeMode::PassthroughOriginal => passthrough_response(&state, &session).await,
        _ => manifest_response(&state, &session).await,
    }
}

async fn passthrough_response(state: &AppState, session: &ChannelStreamSession) -> AppResult<Response> {
    let upstream = state
        .upstream
        .stream_passthrough(session.origin_url(), state.passthrough_chunk_size)
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HLS_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(upstream.body))
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}

async fn manifest_response(state: &AppState, session: &ChannelStreamSession) -> AppResult<Response> {
    let manifest_path = session
        .manifest_path()
        .ok_or_else(|| AppError::internal_server_error("Session has no manifest"))?;

    let manifest = match tokio::fs::read_to_string(manifest_path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(channel_id = %session.channel_id(), "Manifest disappeared, transcoder likely exited");
            return Err(AppError::bad_gateway("Stream is no longer available"));
        }
        Err(e) => {
            tracing::error!(channel_id = %session.channel_id(), "Failed to read manifest: {e}");
            return Err(AppError::internal_server_error("Failed to read manifest"));
        }
    };

    let body = if session.mode().needs_base_url_rewrite() {
        let mount = format!("{}/segments/{}", state.public_prefix, session.channel_id());
        rewrite_base_url(&manifest, SEGMENT_URL_PREFIX, &mount)
    } else {
        manifest
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HLS_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub channel_id: ChannelId,
    pub released: bool,
}

/// GET /stream/{channel_id}/cleanup
pub async fn cleanup_stream(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<CleanupResponse>> {
    let channel_id = ChannelId::parse(channel_id)?;
    let released = state.registry.release(&channel_id).await;
    info!(channel_id = %channel_id, released, "Stream cleanup");

    Ok(Json(CleanupResponse {
        channel_id,
        released,
    }))
}

/// GET /segments/{channel_id}/{file}
pub async fn get_segment_file(
    Path((channel_id, file)): Path<(String, String)>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let channel_id = ChannelId::parse(channel_id)?;
    if !is_safe_file_name(&file) {
        return Err(AppError::bad_request("Invalid segment file name"));
    }

    let path = state
        .registry
        .segments_root()
        .join(channel_id.as_str())
        .join(&file);

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(channel_id = %channel_id, file = %file, "Segment not found");
            return Err(AppError::not_found("Segment not found"));
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "Failed to read segment: {e}");
            return Err(AppError::internal_server_error("Failed to read segment"));
        }
    };

    let (content_type, cache_control) = if file.ends_with(".m3u8") {
        (HLS_CONTENT_TYPE, "no-cache")
    } else if file.ends_with(".ts") {
        (TS_CONTENT_TYPE, "public, max-age=90")
    } else {
        ("application/octet-stream", "no-cache")
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .body(Body::from(data))
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}

/// One path component, no traversal.
fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.')
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json::<Vec<SessionInfo>>(state.registry.list())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_names() {
        assert!(is_safe_file_name("segment001.ts"));
        assert!(is_safe_file_name("output.m3u8"));
        assert!(!is_safe_file_name(""));
        assert!(!is_safe_file_name(".."));
        assert!(!is_safe_file_name("../etc"));
        assert!(!is_safe_file_name("a/b.ts"));
        assert!(!is_safe_file_name("a\\b.ts"));
        assert!(!is_safe_file_name(".hidden"));
    }
}
