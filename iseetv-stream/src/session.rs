//! Per-channel streaming session owned by the registry.

use chrono::{DateTime, Utc};
use iseetv_core::ChannelId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::{debug, info, warn};

use crate::mode::TranscodeMode;
use crate::process::TranscoderProcess;
use crate::supervisor::remove_dir_best_effort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, nothing served yet
    Ready,
    /// Manifest or bytes have been handed to a viewer
    Streaming,
    /// Being torn down
    Stopping,
}

impl SessionState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Streaming => 1,
            Self::Stopping => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Streaming,
            _ => Self::Stopping,
        }
    }
}

/// A channel's working directory. Removed when dropped unless already
/// removed explicitly.
#[derive(Debug)]
pub struct WorkingDir {
    path: PathBuf,
    removed: AtomicBool,
}

impl WorkingDir {
    /// Create a fresh directory at `path`, wiping leftovers from an
    /// earlier run.
    pub async fn create(path: PathBuf) -> std::io::Result<Self> {
        remove_dir_best_effort(&path).await;
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Created working directory");
        Ok(Self {
            path,
            removed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(&self) {
        if !self.removed.swap(true, Ordering::SeqCst) {
            remove_dir_best_effort(&self.path).await;
        }
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_dir_on_drop(&path));
            }
            Err(_) => remove_dir_on_drop(&path),
        }
    }
}

fn remove_dir_on_drop(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "Removed working directory on drop"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove working directory: {e}"),
    }
}

/// Transcoder output owned by a session: the directory and the process
/// writing into it exist together or not at all.
#[derive(Debug)]
pub struct SessionResources {
    pub working_dir: WorkingDir,
    pub process: TranscoderProcess,
    pub manifest_path: PathBuf,
}

#[derive(Debug)]
pub struct ChannelStreamSession {
    channel_id: ChannelId,
    mode: TranscodeMode,
    origin_url: String,
    resources: Option<SessionResources>,
    state: AtomicU8,
    stop_lock: tokio::sync::Mutex<()>,
    created_at: DateTime<Utc>,
}

impl ChannelStreamSession {
    pub fn new(
        channel_id: ChannelId,
        mode: TranscodeMode,
        origin_url: String,
        resources: Option<SessionResources>,
    ) -> Self {
        Self {
            channel_id,
            mode,
            origin_url,
            resources,
            state: AtomicU8::new(SessionState::Ready.to_u8()),
            stop_lock: tokio::sync::Mutex::new(()),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    #[must_use]
    pub const fn mode(&self) -> TranscodeMode {
        self.mode
    }

    #[must_use]
    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `None` for passthrough sessions.
    #[must_use]
    pub fn manifest_path(&self) -> Option<&Path> {
        self.resources.as_ref().map(|r| r.manifest_path.as_path())
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.resources.as_ref().map(|r| r.working_dir.path())
    }

    #[must_use]
    pub fn process(&self) -> Option<&TranscoderProcess> {
        self.resources.as_ref().map(|r| &r.process)
    }

    /// Ready -> Streaming; no-op in any other state.
    pub fn mark_streaming(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Ready.to_u8(),
            SessionState::Streaming.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Usable for new viewers: not stopping, and its transcoder (if any)
    /// has not exited.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state() != SessionState::Stopping
            && self.process().is_none_or(TranscoderProcess::is_running)
    }

    /// Terminate the transcoder, then delete the working directory.
    /// Safe to call more than once and from several tasks; every caller
    /// returns only after the directory is gone.
    pub async fn stop(&self) {
        let _stopping = self.stop_lock.lock().await;
        let previous = self.state.swap(SessionState::Stopping.to_u8(), Ordering::SeqCst);
        if SessionState::from_u8(previous) != SessionState::Stopping {
            info!(channel_id = %self.channel_id, mode = %self.mode, "Stopping stream session");
        }

        if let Some(resources) = &self.resources {
            let exit = resources.process.terminate().await;
            debug!(channel_id = %self.channel_id, code = ?exit.code, forced = exit.forced, "Transcoder stopped");
            resources.working_dir.remove().await;
        }
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            channel_id: self.channel_id.clone(),
            mode: self.mode,
            state: self.state(),
            pid: self.process().and_then(TranscoderProcess::pid),
            working_dir: self.working_dir().map(Path::to_path_buf),
            created_at: self.created_at,
        }
    }
}

/// Snapshot of a session for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub channel_id: ChannelId,
    pub mode: TranscodeMode,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub working_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}
