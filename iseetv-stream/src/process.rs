//! Handle to a running transcoder process.
//!
//! Each process is owned by a watcher task. The task reports an unexpected
//! exit as soon as it happens and runs the termination protocol when asked
//! to, or when the handle is dropped. The child is always reaped.

use iseetv_core::ChannelId;
use parking_lot::Mutex;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn, Instrument};

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when ended by a signal or when unknown
    pub code: Option<i32>,
    /// Whether it had to be force-killed
    pub forced: bool,
}

impl ProcessExit {
    fn from_status(status: ExitStatus, forced: bool) -> Self {
        Self {
            code: status.code(),
            forced,
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

pub struct TranscoderProcess {
    channel_id: ChannelId,
    pid: Option<u32>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl TranscoderProcess {
    /// Spawn `command` and hand the child to a watcher task.
    ///
    /// `grace` bounds how long a graceful stop may take before force-kill.
    pub fn spawn(channel_id: ChannelId, mut command: Command, grace: Duration) -> std::io::Result<Self> {
        // last resort if the watcher task itself is torn down with the runtime
        command.kill_on_drop(true);
        let child = command.spawn()?;
        let pid = child.id();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let span = tracing::info_span!("transcoder", channel_id = %channel_id, pid = ?pid);
        tokio::spawn(
            watch_process(child, shutdown_rx, exit_tx, grace).instrument(span),
        );

        info!(channel_id = %channel_id, pid = ?pid, "Transcoder spawned");

        Ok(Self {
            channel_id,
            pid,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            exit_rx,
        })
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub const fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Exit information once the process has ended.
    #[must_use]
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Stop the process: graceful signal, bounded grace period, then
    /// force-kill. Idempotent; an already-exited process is left alone and
    /// its recorded exit is returned.
    pub async fn terminate(&self) -> ProcessExit {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            // the watcher may have already finished on its own
            let _ = tx.send(());
        }

        let mut exit_rx = self.exit_rx.clone();
        let exit = match exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit.unwrap_or(ProcessExit {
            code: None,
            forced: true,
        })
    }
}

impl std::fmt::Debug for TranscoderProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscoderProcess")
            .field("channel_id", &self.channel_id)
            .field("pid", &self.pid)
            .field("exit", &self.exit_status())
            .finish()
    }
}

enum WatchEvent {
    Exited(std::io::Result<ExitStatus>),
    Shutdown,
}

async fn watch_process(
    mut child: Child,
    shutdown_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    grace: Duration,
) {
    // shutdown_rx also resolves when the handle is dropped
    let event = tokio::select! {
        status = child.wait() => WatchEvent::Exited(status),
        _ = shutdown_rx => WatchEvent::Shutdown,
    };

    let exit = match event {
        WatchEvent::Exited(Ok(status)) => {
            let exit = ProcessExit::from_status(status, false);
            if exit.success() {
                info!("Transcoder exited");
            } else {
                error!(code = ?exit.code, "Transcoder exited unexpectedly");
            }
            exit
        }
        WatchEvent::Exited(Err(e)) => {
            error!("Failed to wait for transcoder: {e}");
            terminate_child(&mut child, grace).await
        }
        WatchEvent::Shutdown => terminate_child(&mut child, grace).await,
    };

    let _ = exit_tx.send(Some(exit));
}

/// Termination protocol for a child owned by the caller.
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) -> ProcessExit {
    match child.try_wait() {
        Ok(Some(status)) => return ProcessExit::from_status(status, false),
        Ok(None) => {}
        Err(e) => warn!("Failed to query transcoder state: {e}"),
    }

    if let Err(e) = send_graceful_signal(child) {
        warn!("Failed to send graceful stop signal: {e}");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(code = ?status.code(), "Transcoder stopped gracefully");
            return ProcessExit::from_status(status, false);
        }
        Ok(Err(e)) => warn!("Failed to wait for transcoder after stop signal: {e}"),
        Err(_) => warn!(grace = ?grace, "Transcoder ignored stop signal, force-killing"),
    }

    // kill() also reaps
    if let Err(e) = child.kill().await {
        error!("Failed to force-kill transcoder: {e}");
    }
    let code = child.try_wait().ok().flatten().and_then(|s| s.code());
    ProcessExit { code, forced: true }
}

#[cfg(unix)]
fn send_graceful_signal(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|_| std::io::Error::other("pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_graceful_terminate() {
        let process =
            TranscoderProcess::spawn(ChannelId::from(1), sh("exec sleep 30"), Duration::from_secs(5))
                .unwrap();
        assert!(process.is_running());
        assert!(process.pid().is_some());

        let exit = process.terminate().await;
        assert!(!exit.forced);
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_ignored_signal_is_force_killed_after_grace() {
        let process = TranscoderProcess::spawn(
            ChannelId::from(1),
            sh("trap '' TERM; while true; do sleep 0.05; done"),
            Duration::from_millis(300),
        )
        .unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let exit = process.terminate().await;

        assert!(exit.forced);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!process.is_running());

        let pid = nix::unistd::Pid::from_raw(process.pid().unwrap() as i32);
        // reaped: the pid no longer refers to our child
        assert!(nix::sys::wait::waitpid(pid, Some(nix::sys::wait::WaitPidFlag::WNOHANG)).is_err());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let process =
            TranscoderProcess::spawn(ChannelId::from(1), sh("exit 0"), Duration::from_secs(1)).unwrap();

        let first = process.terminate().await;
        let second = process.terminate().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_observed() {
        let process =
            TranscoderProcess::spawn(ChannelId::from(1), sh("exit 3"), Duration::from_secs(1)).unwrap();

        let mut exit_rx = process.exit_rx.clone();
        let exit = exit_rx.wait_for(Option::is_some).await.unwrap().unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.forced);
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_drop_terminates_process() {
        let process =
            TranscoderProcess::spawn(ChannelId::from(1), sh("exec sleep 30"), Duration::from_secs(5))
                .unwrap();
        let mut exit_rx = process.exit_rx.clone();
        drop(process);

        let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx.wait_for(Option::is_some))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!exit.forced);
    }
}
