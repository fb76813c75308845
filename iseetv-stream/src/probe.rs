//! Codec detection for origin streams.

use async_trait::async_trait;
use iseetv_core::config::CodecCachePolicy;
use iseetv_core::ChannelId;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::cache::ChannelCache;
use crate::error::{StreamError, StreamResult};

/// Runs the stream-analysis tool against an origin URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamProber: Send + Sync {
    /// Video codec name of the first video stream, e.g. `h264`.
    async fn probe_codec(&self, origin_url: &str) -> StreamResult<String>;
}

/// [`StreamProber`] backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: String,
}

impl FfprobeProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(origin_url: &str) -> Vec<&str> {
        vec![
            "-i",
            origin_url,
            "-show_streams",
            "-select_streams",
            "v",
            "-show_entries",
            "stream=codec_name",
            "-of",
            "csv=p=0",
            "-loglevel",
            "error",
        ]
    }
}

#[async_trait]
impl StreamProber for FfprobeProber {
    async fn probe_codec(&self, origin_url: &str) -> StreamResult<String> {
        info!(url = %origin_url, "Probing video codec");

        let output = Command::new(&self.program)
            .args(Self::args(origin_url))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StreamError::ProbeFailure(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(url = %origin_url, status = ?output.status.code(), "ffprobe failed: {}", stderr.trim());
            return Err(StreamError::ProbeFailure(format!(
                "ffprobe exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        parse_codec_name(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the single codec-name token from probe output.
///
/// The first non-empty line must be one token of `[a-z0-9_]`; a trailing
/// csv separator is tolerated.
pub fn parse_codec_name(stdout: &str) -> StreamResult<String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| StreamError::ProbeFailure("no video stream reported".to_string()))?;

    let token = line.trim_end_matches(',');
    let valid = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');

    if valid {
        Ok(token.to_ascii_lowercase())
    } else {
        Err(StreamError::ProbeFailure(format!("malformed probe output: {line}")))
    }
}

/// Probes codecs and memoizes the result per channel.
pub struct CodecInspector {
    prober: Arc<dyn StreamProber>,
    cache: ChannelCache<String>,
    policy: CodecCachePolicy,
}

impl CodecInspector {
    pub fn new(prober: Arc<dyn StreamProber>, policy: CodecCachePolicy) -> Self {
        Self {
            prober,
            cache: ChannelCache::new(),
            policy,
        }
    }

    /// Cached codec for `channel_id`, probing on a miss.
    ///
    /// With [`CodecCachePolicy::ClearAllOnMiss`] a miss evicts every other
    /// channel's entry. Probe errors are returned as-is and nothing is cached.
    pub async fn probe(&self, channel_id: &ChannelId, origin_url: &str) -> StreamResult<String> {
        if let Some(codec) = self.cache.get(channel_id) {
            debug!(channel_id = %channel_id, codec = %codec, "Codec cache hit");
            return Ok(codec);
        }

        let codec = self.prober.probe_codec(origin_url).await?;
        info!(channel_id = %channel_id, codec = %codec, "Detected video codec");

        match self.policy {
            CodecCachePolicy::ClearAllOnMiss => {
                self.cache.replace_all_with(channel_id.clone(), codec.clone());
            }
            CodecCachePolicy::PerKey => self.cache.put(channel_id.clone(), codec.clone()),
        }
        Ok(codec)
    }

    pub fn invalidate(&self, channel_id: &ChannelId) {
        self.cache.invalidate(channel_id);
    }

    #[must_use]
    pub fn cached(&self, channel_id: &ChannelId) -> Option<String> {
        self.cache.get(channel_id)
    }
}
