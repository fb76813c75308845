//! Single-active-session registry.
//!
//! Sessions live in a `DashMap` keyed by channel. Creation follows the
//! double-checked pattern: a lock-free fast path for an existing healthy
//! session, then a per-channel creation lock, then a second check before
//! anything is spawned. Registering a new session and picking the sessions
//! to evict happen under one switch lock so two concurrent channel switches
//! cannot evict each other.
//!
//! A session taken out of the map stays in `retiring` until its stop has
//! finished. Creating or releasing that channel again waits for it, so a
//! new transcoder never shares a directory with a dying one.

use dashmap::DashMap;
use iseetv_core::config::{StreamingConfig, ToolsConfig};
use iseetv_core::ChannelId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::capability::{CapabilityProbe, HardwareCapabilityDetector};
use crate::clock::Clock;
use crate::error::{StreamError, StreamResult};
use crate::mode::{ModePolicy, TranscodeMode};
use crate::probe::{CodecInspector, StreamProber};
use crate::session::{ChannelStreamSession, SessionInfo, SessionResources, WorkingDir};
use crate::supervisor::{remove_dir_best_effort, SupervisorSettings, TranscoderSupervisor};

type CreationLocks = DashMap<ChannelId, Arc<AsyncMutex<()>>>;

/// Held while creating or releasing a channel. Dropping it removes the
/// channel's lock entry once nobody else is waiting on it.
struct CreationGuard<'a> {
    locks: &'a CreationLocks,
    channel_id: ChannelId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // waiters hold a clone, so a count of one means the map's own entry
        self.locks
            .remove_if(&self.channel_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct StreamSessionRegistry {
    sessions: DashMap<ChannelId, Arc<ChannelStreamSession>>,
    retiring: DashMap<ChannelId, Arc<ChannelStreamSession>>,
    creation_locks: CreationLocks,
    switch_lock: parking_lot::Mutex<()>,
    segments_root: PathBuf,
    inspector: CodecInspector,
    detector: HardwareCapabilityDetector,
    policy: ModePolicy,
    supervisor: TranscoderSupervisor,
}

impl StreamSessionRegistry {
    pub fn new(
        streaming: &StreamingConfig,
        tools: ToolsConfig,
        prober: Arc<dyn StreamProber>,
        capability: Arc<dyn CapabilityProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            retiring: DashMap::new(),
            creation_locks: DashMap::new(),
            switch_lock: parking_lot::Mutex::new(()),
            segments_root: streaming.segments_root.clone(),
            inspector: CodecInspector::new(prober, streaming.codec_cache_policy),
            detector: HardwareCapabilityDetector::new(capability),
            policy: ModePolicy::from_config(streaming),
            supervisor: TranscoderSupervisor::new(
                tools,
                SupervisorSettings::from_config(streaming),
                clock,
            ),
        }
    }

    #[must_use]
    pub fn segments_root(&self) -> &Path {
        &self.segments_root
    }

    #[must_use]
    pub fn public_prefix(&self) -> &str {
        &self.supervisor.settings().public_prefix
    }

    #[must_use]
    pub const fn inspector(&self) -> &CodecInspector {
        &self.inspector
    }

    /// Return the channel's healthy session, creating it if needed.
    ///
    /// Creation runs in its own task. Dropping the returned future cancels
    /// it: a half-started transcoder is stopped and reaped, then its
    /// directory removed, all before the channel can be created again.
    /// Once a new session is registered every other session is stopped
    /// before this returns.
    pub async fn acquire(
        self: &Arc<Self>,
        channel_id: &ChannelId,
        origin_url: &str,
    ) -> StreamResult<Arc<ChannelStreamSession>> {
        if let Some(session) = self.get_existing(channel_id).await {
            return Ok(session);
        }

        let this = Arc::clone(self);
        let id = channel_id.clone();
        let url = origin_url.to_string();
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let span = tracing::info_span!("session_create", channel_id = %channel_id);
        let task = tokio::spawn(
            async move { this.create_session(&id, &url, &cancel).await }.instrument(span),
        );

        task.await
            .map_err(|e| StreamError::Internal(format!("session creation task failed: {e}")))?
    }

    /// Healthy existing session (fast path). An unhealthy entry, such as
    /// one whose transcoder crashed, is removed and stopped.
    async fn get_existing(&self, channel_id: &ChannelId) -> Option<Arc<ChannelStreamSession>> {
        let session = self.sessions.get(channel_id).map(|s| Arc::clone(s.value()))?;
        if session.is_healthy() {
            return Some(session);
        }

        // visible in `retiring` before it leaves `sessions`
        self.retiring
            .insert(channel_id.clone(), Arc::clone(&session));
        let removed = self
            .sessions
            .remove_if(channel_id, |_, current| Arc::ptr_eq(current, &session));
        if removed.is_some() {
            warn!(channel_id = %channel_id, "Discarding unhealthy stream session");
        }
        self.retire(session).await;
        None
    }

    async fn acquire_creation_lock(&self, channel_id: &ChannelId) -> CreationGuard<'_> {
        let lock = Arc::clone(
            self.creation_locks
                .entry(channel_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        );
        CreationGuard {
            locks: &self.creation_locks,
            channel_id: channel_id.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Stop a session that has left the map, then forget it.
    async fn retire(&self, session: Arc<ChannelStreamSession>) {
        session.stop().await;
        self.retiring
            .remove_if(session.channel_id(), |_, s| Arc::ptr_eq(s, &session));
    }

    /// Wait until an earlier session of this channel has fully stopped.
    async fn wait_for_retiring(&self, channel_id: &ChannelId) {
        let pending = self.retiring.get(channel_id).map(|s| Arc::clone(s.value()));
        if let Some(session) = pending {
            debug!(channel_id = %channel_id, "Waiting for previous session to stop");
            self.retire(session).await;
        }
    }

    async fn select_mode(&self, channel_id: &ChannelId, origin_url: &str) -> StreamResult<TranscodeMode> {
        let codec = self.inspector.probe(channel_id, origin_url).await?;
        let hardware = if self.policy.is_target(&codec) {
            false
        } else {
            self.detector.detect(channel_id).await
        };
        let mode = self.policy.select(&codec, hardware)?;
        info!(channel_id = %channel_id, codec = %codec, mode = %mode, "Selected transcode mode");
        Ok(mode)
    }

    async fn create_session(
        &self,
        channel_id: &ChannelId,
        origin_url: &str,
        cancel: &CancellationToken,
    ) -> StreamResult<Arc<ChannelStreamSession>> {
        let _creation_guard = self.acquire_creation_lock(channel_id).await;

        // another request may have finished creating while we waited
        if let Some(session) = self.get_existing(channel_id).await {
            return Ok(session);
        }
        self.wait_for_retiring(channel_id).await;

        let mode = tokio::select! {
            mode = self.select_mode(channel_id, origin_url) => mode?,
            () = cancel.cancelled() => return Err(StreamError::Cancelled(channel_id.to_string())),
        };

        let resources = if mode.spawns_process() {
            let working_dir = WorkingDir::create(self.segments_root.join(channel_id.as_str())).await?;
            let launched = match self
                .supervisor
                .launch(channel_id, origin_url, mode, working_dir.path(), cancel)
                .await
            {
                Ok(launched) => launched,
                Err(e) => {
                    // already cleaned up by the supervisor
                    working_dir.remove().await;
                    return Err(e);
                }
            };
            match (launched.process, launched.manifest_path) {
                (Some(process), Some(manifest_path)) => Some(SessionResources {
                    working_dir,
                    process,
                    manifest_path,
                }),
                (process, _) => {
                    if let Some(process) = process {
                        process.terminate().await;
                    }
                    working_dir.remove().await;
                    return Err(StreamError::Internal(format!(
                        "transcoder for {mode} launched without output"
                    )));
                }
            }
        } else {
            None
        };

        let session = Arc::new(ChannelStreamSession::new(
            channel_id.clone(),
            mode,
            origin_url.to_string(),
            resources,
        ));

        let evicted = self.register_and_take_others(&session);
        for old in &evicted {
            info!(
                channel_id = %old.channel_id(),
                replaced_by = %channel_id,
                "Evicting stream session"
            );
            self.retire(Arc::clone(old)).await;
        }

        info!(
            channel_id = %channel_id,
            mode = %mode,
            evicted = evicted.len(),
            "Stream session ready"
        );
        Ok(session)
    }

    fn register_and_take_others(
        &self,
        session: &Arc<ChannelStreamSession>,
    ) -> Vec<Arc<ChannelStreamSession>> {
        let _switch = self.switch_lock.lock();
        self.sessions
            .insert(session.channel_id().clone(), Arc::clone(session));

        let others: Vec<Arc<ChannelStreamSession>> = self
            .sessions
            .iter()
            .filter(|entry| entry.key() != session.channel_id())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for old in &others {
            self.retiring
                .insert(old.channel_id().clone(), Arc::clone(old));
            self.sessions
                .remove_if(old.channel_id(), |_, current| Arc::ptr_eq(current, old));
        }
        others
    }

    /// Tear down the channel's session if there is one.
    pub async fn release(&self, channel_id: &ChannelId) -> bool {
        let _creation_guard = self.acquire_creation_lock(channel_id).await;
        self.wait_for_retiring(channel_id).await;

        let removed = self.sessions.remove(channel_id).map(|(_, s)| s);
        match removed {
            Some(session) => {
                self.retiring
                    .insert(channel_id.clone(), Arc::clone(&session));
                self.retire(session).await;
                info!(channel_id = %channel_id, "Released stream session");
                true
            }
            None => {
                // leftovers from a crashed or aborted run
                remove_dir_best_effort(&self.segments_root.join(channel_id.as_str())).await;
                false
            }
        }
    }

    /// Stop every session and remove the segments root.
    pub async fn shutdown_all(&self) {
        let ids: Vec<ChannelId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        info!(sessions = ids.len(), "Shutting down all stream sessions");

        for id in &ids {
            if let Some((_, session)) = self.sessions.remove(id) {
                session.stop().await;
            }
        }
        let retiring: Vec<_> = self.retiring.iter().map(|e| Arc::clone(e.value())).collect();
        for session in retiring {
            self.retire(session).await;
        }
        self.creation_locks.clear();
        remove_dir_best_effort(&self.segments_root).await;
    }

    #[must_use]
    pub fn get(&self, channel_id: &ChannelId) -> Option<Arc<ChannelStreamSession>> {
        self.sessions.get(channel_id).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.iter().map(|e| e.value().info()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockCapabilityProbe;
    use crate::clock::SystemClock;
    use crate::probe::MockStreamProber;

    fn registry(prober: MockStreamProber, root: &Path) -> Arc<StreamSessionRegistry> {
        let mut capability = MockCapabilityProbe::new();
        capability.expect_hardware_available().returning(|| false);
        Arc::new(StreamSessionRegistry::new(
            &StreamingConfig {
                segments_root: root.to_path_buf(),
                ..StreamingConfig::default()
            },
            ToolsConfig {
                ffmpeg: "/nonexistent/ffmpeg".to_string(),
                ..ToolsConfig::default()
            },
            Arc::new(prober),
            Arc::new(capability),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test]
    async fn test_passthrough_session_registered_without_resources() {
        let root = tempfile::tempdir().unwrap();
        let mut prober = MockStreamProber::new();
        prober
            .expect_probe_codec()
            .times(1)
            .returning(|_| Ok("h264".to_string()));
        let registry = registry(prober, root.path());

        let id = ChannelId::from(7);
        let session = registry.acquire(&id, "http://src/7").await.unwrap();
        assert_eq!(session.mode(), TranscodeMode::PassthroughOriginal);
        assert!(session.working_dir().is_none());
        assert!(!root.path().join("7").exists());

        // second acquire reuses the session without probing
        let again = registry.acquire(&id, "http://src/7").await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_passthrough_switch_evicts_previous() {
        let root = tempfile::tempdir().unwrap();
        let mut prober = MockStreamProber::new();
        prober.expect_probe_codec().returning(|_| Ok("h264".to_string()));
        let registry = registry(prober, root.path());

        let first = registry.acquire(&ChannelId::from(1), "http://src/1").await.unwrap();
        registry.acquire(&ChannelId::from(2), "http://src/2").await.unwrap();

        assert!(registry.get(&ChannelId::from(1)).is_none());
        assert!(!first.is_healthy());
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_codec_registers_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut prober = MockStreamProber::new();
        prober
            .expect_probe_codec()
            .returning(|_| Ok("theora".to_string()));
        let registry = registry(prober, root.path());

        let err = registry
            .acquire(&ChannelId::from(3), "http://src/3")
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedCodec(c) if c == "theora"));
        assert!(registry.is_empty());
        assert!(!root.path().join("3").exists());
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut prober = MockStreamProber::new();
        prober.expect_probe_codec().returning(|_| Ok("hevc".to_string()));
        let registry = registry(prober, root.path());

        let err = registry
            .acquire(&ChannelId::from(5), "http://src/5")
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::SpawnFailed(_)));
        assert!(registry.is_empty());
        assert!(!root.path().join("5").exists());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut prober = MockStreamProber::new();
        prober.expect_probe_codec().returning(|_| Ok("h264".to_string()));
        let registry = registry(prober, root.path());
        let id = ChannelId::from(7);

        registry.acquire(&id, "http://src/7").await.unwrap();
        assert!(registry.release(&id).await);
        assert!(!registry.release(&id).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_creation_locks_do_not_accumulate() {
        let root = tempfile::tempdir().unwrap();
        let mut prober = MockStreamProber::new();
        prober.expect_probe_codec().returning(|_| Ok("h264".to_string()));
        let registry = registry(prober, root.path());

        for n in 0..20 {
            assert!(!registry.release(&ChannelId::from(n)).await);
        }
        registry.acquire(&ChannelId::from(1), "http://src/1").await.unwrap();
        registry.acquire(&ChannelId::from(2), "http://src/2").await.unwrap();

        assert!(registry.creation_locks.is_empty());
        assert!(registry.retiring.is_empty());
    }

    #[tokio::test]
    async fn test_creation_lock_kept_while_contended() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry(MockStreamProber::new(), root.path());
        let id = ChannelId::from(4);

        let first = registry.acquire_creation_lock(&id).await;
        let waiter = tokio::spawn({
            let registry = Arc::clone(&registry);
            let id = id.clone();
            async move {
                let _second = registry.acquire_creation_lock(&id).await;
            }
        });
        tokio::task::yield_now().await;
        drop(first);
        // the waiter still needs the same mutex
        assert_eq!(registry.creation_locks.len(), 1);
        waiter.await.unwrap();
        assert!(registry.creation_locks.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_all_removes_root() {
        let root = tempfile::tempdir().unwrap();
        let segments = root.path().join("segments");
        std::fs::create_dir_all(segments.join("old")).unwrap();

        let mut prober = MockStreamProber::new();
        prober.expect_probe_codec().returning(|_| Ok("h264".to_string()));
        let registry = registry(prober, &segments);

        registry.acquire(&ChannelId::from(7), "http://src/7").await.unwrap();
        registry.shutdown_all().await;

        assert!(registry.is_empty());
        assert!(!segments.exists());
    }
}
