//! Transcoder launch and readiness.

use iseetv_core::config::{StreamingConfig, ToolsConfig};
use iseetv_core::ChannelId;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{poll_until, Clock, PollOutcome};
use crate::error::{StreamError, StreamResult};
use crate::mode::TranscodeMode;
use crate::process::TranscoderProcess;

pub const MANIFEST_FILE_NAME: &str = "output.m3u8";
pub const SEGMENT_FILE_PATTERN: &str = "segment%03d.ts";
/// Segment prefix written by software/hardware transcodes, rewritten on delivery
pub const SEGMENT_URL_PREFIX: &str = "/segments";

/// Result of starting a transcoder and waiting for its first output.
#[derive(Debug)]
pub enum ProcessOutcome {
    Spawned(TranscoderProcess),
    TimedOut,
    /// Process failed before producing output (`-1` when killed by a signal)
    ExitedNonZero(i32),
    /// Process exited with status 0 before producing output
    NoOutput,
    SpawnFailed(String),
    /// The caller gave up while waiting; the process is already stopped
    Cancelled,
}

/// A launched stream: either a running transcoder with its manifest, or
/// nothing at all for passthrough.
#[derive(Debug)]
pub struct LaunchedStream {
    pub process: Option<TranscoderProcess>,
    pub manifest_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub manifest_timeout: Duration,
    pub termination_grace: Duration,
    pub public_prefix: String,
}

impl SupervisorSettings {
    #[must_use]
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            poll_interval: config.manifest_poll_interval(),
            manifest_timeout: config.manifest_timeout(),
            termination_grace: config.termination_grace(),
            public_prefix: config.public_prefix.clone(),
        }
    }
}

/// Spawns, watches and stops transcoders on behalf of the session registry.
pub struct TranscoderSupervisor {
    tools: ToolsConfig,
    settings: SupervisorSettings,
    clock: Arc<dyn Clock>,
}

impl TranscoderSupervisor {
    pub fn new(tools: ToolsConfig, settings: SupervisorSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            tools,
            settings,
            clock,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Start the stream for `mode`.
    ///
    /// Passthrough spawns nothing. Otherwise the transcoder writes into
    /// `working_dir` and this returns once the manifest and a first segment
    /// exist. On timeout or early exit the process is terminated and
    /// `working_dir` removed before the error is returned. Cancelling
    /// `cancel` during the wait does the same.
    pub async fn launch(
        &self,
        channel_id: &ChannelId,
        origin_url: &str,
        mode: TranscodeMode,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> StreamResult<LaunchedStream> {
        if !mode.spawns_process() {
            return Ok(LaunchedStream {
                process: None,
                manifest_path: None,
            });
        }

        match self.start(channel_id, origin_url, mode, working_dir, cancel).await {
            ProcessOutcome::Spawned(process) => Ok(LaunchedStream {
                process: Some(process),
                manifest_path: Some(working_dir.join(MANIFEST_FILE_NAME)),
            }),
            ProcessOutcome::TimedOut => Err(StreamError::ManifestTimeout {
                channel_id: channel_id.to_string(),
                waited: self.settings.manifest_timeout,
            }),
            ProcessOutcome::ExitedNonZero(code) => Err(StreamError::TranscoderExited {
                channel_id: channel_id.to_string(),
                code: Some(code),
            }),
            ProcessOutcome::NoOutput => Err(StreamError::NoOutput(channel_id.to_string())),
            ProcessOutcome::SpawnFailed(reason) => Err(StreamError::SpawnFailed(reason)),
            ProcessOutcome::Cancelled => Err(StreamError::Cancelled(channel_id.to_string())),
        }
    }

    /// Spawn the transcoder and wait for readiness, cleaning up on failure.
    pub async fn start(
        &self,
        channel_id: &ChannelId,
        origin_url: &str,
        mode: TranscodeMode,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        if cancel.is_cancelled() {
            return ProcessOutcome::Cancelled;
        }

        let args = build_transcode_args(
            mode,
            &self.tools,
            origin_url,
            working_dir,
            &self.segment_base_url(channel_id, mode),
        );

        info!(channel_id = %channel_id, mode = %mode, url = %origin_url, "Launching transcoder");
        debug!(channel_id = %channel_id, "Transcoder arguments: {:?}", args);

        let mut command = Command::new(&self.tools.ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let process =
            match TranscoderProcess::spawn(channel_id.clone(), command, self.settings.termination_grace) {
                Ok(process) => process,
                Err(e) => {
                    error!(channel_id = %channel_id, "Failed to spawn transcoder: {e}");
                    remove_dir_best_effort(working_dir).await;
                    return ProcessOutcome::SpawnFailed(format!("{}: {e}", self.tools.ffmpeg));
                }
            };

        let manifest_path = working_dir.join(MANIFEST_FILE_NAME);
        let readiness = tokio::select! {
            outcome = poll_until(
                self.clock.as_ref(),
                self.settings.poll_interval,
                self.settings.manifest_timeout,
                || check_readiness(&process, &manifest_path, working_dir),
            ) => Some(outcome),
            () = cancel.cancelled() => None,
        };

        // stop the process before its directory goes away
        let Some(readiness) = readiness else {
            info!(channel_id = %channel_id, "Transcoder launch cancelled");
            process.terminate().await;
            remove_dir_best_effort(working_dir).await;
            return ProcessOutcome::Cancelled;
        };

        match readiness {
            PollOutcome::Done(Readiness::Ready) => {
                info!(channel_id = %channel_id, pid = ?process.pid(), "Transcoder output ready");
                ProcessOutcome::Spawned(process)
            }
            PollOutcome::Done(Readiness::Exited(0)) => {
                error!(channel_id = %channel_id, "Transcoder finished without producing output");
                process.terminate().await;
                remove_dir_best_effort(working_dir).await;
                ProcessOutcome::NoOutput
            }
            PollOutcome::Done(Readiness::Exited(code)) => {
                error!(channel_id = %channel_id, code, "Transcoder exited before producing output");
                process.terminate().await;
                remove_dir_best_effort(working_dir).await;
                ProcessOutcome::ExitedNonZero(code)
            }
            PollOutcome::TimedOut => {
                warn!(
                    channel_id = %channel_id,
                    timeout = ?self.settings.manifest_timeout,
                    "Manifest generation timed out"
                );
                process.terminate().await;
                remove_dir_best_effort(working_dir).await;
                ProcessOutcome::TimedOut
            }
        }
    }

    /// `-hls_base_url` handed to the transcoder for `mode`.
    fn segment_base_url(&self, channel_id: &ChannelId, mode: TranscodeMode) -> String {
        match mode {
            TranscodeMode::AudioOnlyRemux => {
                format!("{}/segments/{channel_id}/", self.settings.public_prefix)
            }
            _ => format!("{SEGMENT_URL_PREFIX}/"),
        }
    }
}

enum Readiness {
    Ready,
    Exited(i32),
}

async fn check_readiness(
    process: &TranscoderProcess,
    manifest_path: &Path,
    working_dir: &Path,
) -> Option<Readiness> {
    if tokio::fs::try_exists(manifest_path).await.unwrap_or(false)
        && has_segment(working_dir).await
    {
        return Some(Readiness::Ready);
    }
    process
        .exit_status()
        .map(|exit| Readiness::Exited(exit.code.unwrap_or(-1)))
}

async fn has_segment(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if is_segment_file_name(&entry.file_name().to_string_lossy()) {
            return true;
        }
    }
    false
}

/// `segmentNNN.ts`
#[must_use]
pub fn is_segment_file_name(name: &str) -> bool {
    name.strip_prefix("segment")
        .and_then(|rest| rest.strip_suffix(".ts"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Remove a directory tree; a missing path is not an error.
pub async fn remove_dir_best_effort(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Removed working directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), "Failed to remove working directory: {e}"),
    }
}

/// Transcoder argv (without the program) for a file-writing HLS output.
#[must_use]
pub fn build_transcode_args(
    mode: TranscodeMode,
    tools: &ToolsConfig,
    origin_url: &str,
    working_dir: &Path,
    segment_base_url: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    if mode == TranscodeMode::HardwareTranscode {
        args.extend(["-vaapi_device".into(), tools.hwaccel_device.clone()]);
    }

    args.extend(["-i".into(), origin_url.to_string()]);

    match mode {
        TranscodeMode::SoftwareTranscode => {
            args.extend(["-c:v", "libx264", "-preset", "veryfast", "-c:a", "aac"].map(String::from));
        }
        TranscodeMode::HardwareTranscode => {
            args.extend(
                ["-vf", "format=nv12,hwupload", "-c:v", "h264_vaapi", "-c:a", "aac"].map(String::from),
            );
        }
        TranscodeMode::AudioOnlyRemux => {
            args.extend(["-c:v", "copy", "-c:a", "aac"].map(String::from));
        }
        TranscodeMode::PassthroughOriginal => {}
    }

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        tools.hls_time_secs.to_string(),
        "-hls_list_size".into(),
        tools.hls_list_size.to_string(),
        "-hls_flags".into(),
        "delete_segments".into(),
        "-hls_base_url".into(),
        segment_base_url.to_string(),
        "-hls_segment_filename".into(),
        working_dir.join(SEGMENT_FILE_PATTERN).to_string_lossy().into_owned(),
        working_dir.join(MANIFEST_FILE_NAME).to_string_lossy().into_owned(),
    ]);

    args
}
