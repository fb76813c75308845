use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Probe tool failed or printed something that is not a codec name
    #[error("Codec probe failed: {0}")]
    ProbeFailure(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Transcoder did not produce a manifest and a segment in time
    #[error("Manifest for channel {channel_id} not ready after {waited:?}")]
    ManifestTimeout { channel_id: String, waited: Duration },

    #[error("Failed to spawn transcoder: {0}")]
    SpawnFailed(String),

    #[error("Transcoder for channel {channel_id} exited with code {code:?}")]
    TranscoderExited { channel_id: String, code: Option<i32> },

    /// Transcoder finished cleanly without writing a manifest and a segment
    #[error("Transcoder for channel {0} produced no output")]
    NoOutput(String),

    /// The requester went away before the session was ready
    #[error("Session setup for channel {0} was cancelled")]
    Cancelled(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

impl From<iseetv_core::Error> for StreamError {
    fn from(err: iseetv_core::Error) -> Self {
        match err {
            iseetv_core::Error::NotFound(msg) => Self::ChannelNotFound(msg),
            iseetv_core::Error::Io(e) => Self::Io(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
