// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use iseetv_proxy::ProxyError;
use iseetv_stream::StreamError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<iseetv_core::Error> for AppError {
    fn from(err: iseetv_core::Error) -> Self {
        use iseetv_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            other => {
                tracing::error!("Internal error: {}", other);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::ChannelNotFound(msg) => Self::not_found(msg),
            StreamError::UnsupportedCodec(codec) => {
                Self::unsupported_media_type(format!("Unsupported codec: {codec}"))
            }
            StreamError::ProbeFailure(msg) => {
                tracing::error!("Codec probe failed: {}", msg);
                Self::internal_server_error("Failed to analyze video codec")
            }
            StreamError::ManifestTimeout { channel_id, waited } => {
                tracing::error!(channel_id = %channel_id, waited = ?waited, "Manifest generation timed out");
                Self::internal_server_error("Manifest generation failed")
            }
            StreamError::TranscoderExited { channel_id, code } => {
                tracing::error!(channel_id = %channel_id, code = ?code, "Transcoder exited");
                Self::bad_gateway("Transcoder exited unexpectedly")
            }
            StreamError::NoOutput(channel_id) => {
                tracing::error!(channel_id = %channel_id, "Transcoder produced no output");
                Self::bad_gateway("Transcoder produced no output")
            }
            StreamError::SpawnFailed(msg) => {
                tracing::error!("Failed to spawn transcoder: {}", msg);
                Self::internal_server_error("Failed to start transcoder")
            }
            other => {
                tracing::error!("Stream error: {}", other);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        if let Some(status) = err
            .upstream_status()
            .and_then(|s| StatusCode::from_u16(s.as_u16()).ok())
        {
            return Self::new(status, format!("Upstream returned {status}"));
        }

        match err {
            ProxyError::InvalidUrl(msg) => Self::bad_request(msg),
            ProxyError::Request(e) => {
                tracing::warn!("Upstream request failed: {}", e);
                Self::bad_gateway("Upstream request failed")
            }
            other => {
                tracing::error!("Proxy error: {}", other);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}
