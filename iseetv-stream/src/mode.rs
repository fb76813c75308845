use iseetv_core::config::StreamingConfig;
use serde::Serialize;

use crate::error::{StreamError, StreamResult};

/// How a session turns the origin stream into something a player can use.
/// Chosen once when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeMode {
    /// Origin already uses the target codec; relay its bytes untouched
    PassthroughOriginal,
    SoftwareTranscode,
    HardwareTranscode,
    /// Copy video, re-encode audio only
    AudioOnlyRemux,
}

impl TranscodeMode {
    /// Whether a transcoder process and working directory are needed.
    #[must_use]
    pub const fn spawns_process(self) -> bool {
        !matches!(self, Self::PassthroughOriginal)
    }

    /// Software and hardware outputs reference segments under the generic
    /// `/segments` prefix, which delivery rewrites per channel.
    #[must_use]
    pub const fn needs_base_url_rewrite(self) -> bool {
        matches!(self, Self::SoftwareTranscode | Self::HardwareTranscode)
    }
}

impl std::fmt::Display for TranscodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PassthroughOriginal => "passthrough_original",
            Self::SoftwareTranscode => "software_transcode",
            Self::HardwareTranscode => "hardware_transcode",
            Self::AudioOnlyRemux => "audio_only_remux",
        };
        f.write_str(name)
    }
}

/// Maps a detected codec (plus hardware availability) to a mode.
#[derive(Debug, Clone)]
pub struct ModePolicy {
    target_codec: String,
    transcodable: Vec<String>,
    prefer_audio_remux: bool,
}

impl ModePolicy {
    #[must_use]
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            target_codec: config.target_codec.to_ascii_lowercase(),
            transcodable: config
                .transcodable_codecs
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
            prefer_audio_remux: config.prefer_audio_remux,
        }
    }

    /// Whether `codec` goes through without video re-encoding.
    #[must_use]
    pub fn is_target(&self, codec: &str) -> bool {
        codec == self.target_codec
    }

    pub fn select(&self, codec: &str, hardware_available: bool) -> StreamResult<TranscodeMode> {
        if self.is_target(codec) {
            return Ok(if self.prefer_audio_remux {
                TranscodeMode::AudioOnlyRemux
            } else {
                TranscodeMode::PassthroughOriginal
            });
        }

        if self.transcodable.iter().any(|c| c == codec) {
            return Ok(if hardware_available {
                TranscodeMode::HardwareTranscode
            } else {
                TranscodeMode::SoftwareTranscode
            });
        }

        Err(StreamError::UnsupportedCodec(codec.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(prefer_audio_remux: bool) -> ModePolicy {
        ModePolicy::from_config(&StreamingConfig {
            prefer_audio_remux,
            ..StreamingConfig::default()
        })
    }

    #[test]
    fn test_target_codec_passes_through() {
        assert_eq!(policy(false).select("h264", true).unwrap(), TranscodeMode::PassthroughOriginal);
        assert_eq!(policy(true).select("h264", false).unwrap(), TranscodeMode::AudioOnlyRemux);
    }

    #[test]
    fn test_transcodable_codec_uses_hardware_when_available() {
        assert_eq!(policy(false).select("hevc", true).unwrap(), TranscodeMode::HardwareTranscode);
        assert_eq!(policy(false).select("hevc", false).unwrap(), TranscodeMode::SoftwareTranscode);
    }

    #[test]
    fn test_unknown_codec_rejected() {
        assert!(matches!(
            policy(false).select("theora", true),
            Err(StreamError::UnsupportedCodec(c)) if c == "theora"
        ));
    }

    #[test]
    fn test_mode_flags() {
        assert!(!TranscodeMode::PassthroughOriginal.spawns_process());
        assert!(TranscodeMode::AudioOnlyRemux.spawns_process());
        assert!(TranscodeMode::SoftwareTranscode.needs_base_url_rewrite());
        assert!(!TranscodeMode::AudioOnlyRemux.needs_base_url_rewrite());
        assert_eq!(TranscodeMode::HardwareTranscode.to_string(), "hardware_transcode");
    }
}
