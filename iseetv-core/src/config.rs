use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub streaming: StreamingConfig,
    pub tools: ToolsConfig,
    pub relay: RelayConfig,
    pub proxy: ProxyConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// How the codec cache behaves on a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecCachePolicy {
    /// Every miss wipes the whole cache before storing the new entry.
    #[default]
    ClearAllOnMiss,
    /// A miss only touches its own key.
    PerKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Root directory holding one working directory per channel
    pub segments_root: PathBuf,
    pub manifest_poll_interval_ms: u64,
    pub manifest_timeout_secs: u64,
    pub termination_grace_secs: u64,
    pub passthrough_chunk_size: usize,
    /// Path prefix clients see in front of this service's routes (e.g. "/api")
    pub public_prefix: String,
    pub target_codec: String,
    pub transcodable_codecs: Vec<String>,
    pub prefer_audio_remux: bool,
    pub codec_cache_policy: CodecCachePolicy,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            segments_root: PathBuf::from("segments"),
            manifest_poll_interval_ms: 500,
            manifest_timeout_secs: 10,
            termination_grace_secs: 5,
            passthrough_chunk_size: 1024 * 1024,
            public_prefix: String::new(),
            target_codec: "h264".to_string(),
            transcodable_codecs: [
                "hevc",
                "h265",
                "mpeg2video",
                "mpeg4",
                "vc1",
                "vp8",
                "vp9",
                "av1",
                "mjpeg",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            prefer_audio_remux: false,
            codec_cache_policy: CodecCachePolicy::default(),
        }
    }
}

impl StreamingConfig {
    #[must_use]
    pub const fn manifest_poll_interval(&self) -> Duration {
        Duration::from_millis(self.manifest_poll_interval_ms)
    }

    #[must_use]
    pub const fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    #[must_use]
    pub const fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

/// External tools invoked by the stream core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffprobe: String,
    pub ffmpeg: String,
    /// argv of the hardware detection command; exit code 0 means available
    pub hwaccel_detect: Vec<String>,
    pub hwaccel_device: String,
    pub hls_time_secs: u32,
    pub hls_list_size: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let device = "/dev/dri/renderD128".to_string();
        Self {
            ffprobe: "ffprobe".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            hwaccel_detect: vec![
                "ffmpeg".to_string(),
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-init_hw_device".to_string(),
                format!("vaapi=va:{device}"),
                "-f".to_string(),
                "lavfi".to_string(),
                "-i".to_string(),
                "nullsrc=s=64x64".to_string(),
                "-frames:v".to_string(),
                "1".to_string(),
                "-vf".to_string(),
                "format=nv12,hwupload".to_string(),
                "-c:v".to_string(),
                "h264_vaapi".to_string(),
                "-f".to_string(),
                "null".to_string(),
                "-".to_string(),
            ],
            hwaccel_device: device,
            hls_time_secs: 4,
            hls_list_size: 6,
        }
    }
}

/// Time-boxed manifest relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub interval_secs: u64,
    pub duration_secs: u64,
    pub retry_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            duration_secs: 30,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream host serving `/hls/{path}` requests
    pub hls_upstream: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hls_upstream: String::new(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// M3U playlist loaded into the channel repository at startup
    pub playlist_path: Option<PathBuf>,
    pub entries: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub group: Option<String>,
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ISEETV_SERVER__HTTP_PORT, ISEETV_STREAMING__SEGMENTS_ROOT, ...
        builder = builder.add_source(
            Environment::with_prefix("ISEETV")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check for misconfigurations, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.streaming.segments_root.as_os_str().is_empty() {
            errors.push("streaming.segments_root must not be empty".to_string());
        }
        if self.streaming.manifest_poll_interval_ms == 0 {
            errors.push("streaming.manifest_poll_interval_ms must be non-zero".to_string());
        }
        if self.streaming.manifest_timeout_secs == 0 {
            errors.push("streaming.manifest_timeout_secs must be non-zero".to_string());
        }
        if self.streaming.passthrough_chunk_size == 0 {
            errors.push("streaming.passthrough_chunk_size must be non-zero".to_string());
        }
        if self.streaming.public_prefix.ends_with('/') {
            errors.push("streaming.public_prefix must not end with '/'".to_string());
        }
        if self.streaming.target_codec.is_empty() {
            errors.push("streaming.target_codec must not be empty".to_string());
        }
        if self.tools.ffprobe.is_empty() || self.tools.ffmpeg.is_empty() {
            errors.push("tools.ffprobe and tools.ffmpeg must be set".to_string());
        }
        if self.relay.interval_secs == 0 {
            errors.push("relay.interval_secs must be non-zero".to_string());
        }
        if self.relay.duration_secs < self.relay.interval_secs {
            errors.push("relay.duration_secs must be at least relay.interval_secs".to_string());
        }
        if !self.proxy.hls_upstream.is_empty()
            && !(self.proxy.hls_upstream.starts_with("http://")
                || self.proxy.hls_upstream.starts_with("https://"))
        {
            errors.push("proxy.hls_upstream must be an http(s) URL".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
