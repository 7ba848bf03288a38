use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use super::conflict::{ConflictSession, Resolution};
use super::debounce::DebounceScheduler;
use super::digest;
use super::direction::{SyncDirection, resolve};
use super::paths::conflict_side_path;
use super::remote::{
    DownloadOutcome, FailureClass, RemoteError, RemoteMeta, RemoteStore, SerializedRemote,
};
use super::state::{StateError, StateStore, SyncRecord};
use super::tracked::TrackedFile;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Disabled,
    Idle,
    Syncing,
    Conflict,
    Error,
    Offline,
}

/// Notifications for whoever presents sync state to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StatusChanged(SyncStatus),
    Conflict {
        file_key: String,
        local_content: String,
        remote_content: String,
    },
    Error {
        message: String,
    },
    /// The file was replaced on disk; open editors should reload it.
    RemoteFileUpdated {
        file_key: String,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sync engine is not initialized")]
    NotInitialized,
    #[error("sync engine is already initialized")]
    AlreadyInitialized,
    #[error("unknown tracked file: {0}")]
    UnknownFile(String),
    #[error("no open conflict for {0}")]
    NoConflict(String),
    #[error("failed to resolve remote container: {0}")]
    Container(#[source] RemoteError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workspace_root: PathBuf,
    pub container_name: String,
    pub parent_container: String,
    pub poll_interval: Duration,
    pub debounce_delay: Duration,
}

impl EngineConfig {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        container_name: impl Into<String>,
        parent_container: impl Into<String>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            container_name: container_name.into(),
            parent_container: parent_container.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Upload,
    Download,
    Conflict,
    /// Recording an already-identical pair without a transfer.
    Adopt,
}

enum Operation {
    Upload,
    /// Debounced save; skipped when the file still matches its record.
    SaveUpload,
    Download(RemoteMeta),
    Conflict,
}

impl Operation {
    fn kind(&self) -> OperationKind {
        match self {
            Operation::Upload | Operation::SaveUpload => OperationKind::Upload,
            Operation::Download(_) => OperationKind::Download,
            Operation::Conflict => OperationKind::Conflict,
        }
    }
}

#[derive(Default)]
struct InFlight {
    by_key: HashMap<String, OperationKind>,
    polls: usize,
}

impl InFlight {
    fn is_empty(&self) -> bool {
        self.by_key.is_empty() && self.polls == 0
    }
}

struct StatusCell {
    current: SyncStatus,
    /// Worst failure seen since the in-flight set was last empty.
    pending_failure: Option<SyncStatus>,
}

/// Keeps the tracked files in step with their remote copies.
///
/// Cheap to clone; all clones drive the same engine.
pub struct SyncEngine<R: RemoteStore> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteStore> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<R: RemoteStore> {
    config: EngineConfig,
    order: Vec<String>,
    files: HashMap<String, TrackedFile>,
    store: StateStore,
    remote: OnceLock<SerializedRemote<R>>,
    container: OnceLock<String>,
    events: mpsc::UnboundedSender<SyncEvent>,
    status: Mutex<StatusCell>,
    in_flight: Mutex<InFlight>,
    conflicts: Mutex<HashMap<String, ConflictSession>>,
    /// Resolved conflicts whose chosen content has not been uploaded yet.
    resolved: Mutex<HashSet<String>>,
    debounce: DebounceScheduler,
    poller: Mutex<Option<JoinHandle<()>>>,
    drained: Notify,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(
        config: EngineConfig,
        files: Vec<TrackedFile>,
        store: StateStore,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        let order = files.iter().map(|file| file.key.clone()).collect();
        let files = files
            .into_iter()
            .map(|file| (file.key.clone(), file))
            .collect();
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<Inner<R>>| {
            let weak = weak.clone();
            Inner {
                config,
                order,
                files,
                store,
                remote: OnceLock::new(),
                container: OnceLock::new(),
                events,
                status: Mutex::new(StatusCell {
                    current: SyncStatus::Disabled,
                    pending_failure: None,
                }),
                in_flight: Mutex::new(InFlight::default()),
                conflicts: Mutex::new(HashMap::new()),
                resolved: Mutex::new(HashSet::new()),
                debounce: DebounceScheduler::new(move |key| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_debounce_fired(&key);
                    }
                }),
                poller: Mutex::new(None),
                drained: Notify::new(),
            }
        });
        Self { inner }
    }

    /// Binds the authenticated remote session and resolves the workspace
    /// container. On failure the engine stays disabled and one error event is
    /// emitted; nothing is retried.
    pub async fn initialize(&self, remote: R) -> Result<(), EngineError> {
        let inner = &self.inner;
        if inner.remote.get().is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        let remote = SerializedRemote::new(remote);
        let name = inner.config.container_name.as_str();
        let parent = inner.config.parent_container.as_str();

        let container = match inner.store.container_id(name, parent).await {
            Some(id) => {
                tracing::debug!(container = %id, "reusing persisted container");
                id
            }
            None => match remote.resolve_container(name, parent).await {
                Ok(id) => {
                    if let Err(err) = inner.store.set_container_id(name, parent, &id).await {
                        tracing::warn!(error = %err, "failed to persist container id");
                    }
                    id
                }
                Err(err) => {
                    tracing::error!(error = %err, "sync initialization failed");
                    inner.emit(SyncEvent::Error {
                        message: format!("sync initialization failed: {err}"),
                    });
                    return Err(EngineError::Container(err));
                }
            },
        };

        if inner.remote.set(remote).is_err() {
            return Err(EngineError::AlreadyInitialized);
        }
        let _ = inner.container.set(container.clone());
        tracing::info!(container = %container, files = inner.order.len(), "sync engine initialized");
        Ok(())
    }

    /// Moves to `Idle`, polls once right away and then every poll interval.
    pub fn start(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        if inner.remote.get().is_none() {
            return Err(EngineError::NotInitialized);
        }
        let mut poller = inner.poller.lock();
        if poller.is_some() {
            return Ok(());
        }

        inner.force_status(SyncStatus::Idle);
        // Claimed here so the first cycle is visible as soon as start returns.
        let first = PollClaim::new(inner);

        let weak = Arc::downgrade(inner);
        let interval = inner.config.poll_interval;
        *poller = Some(tokio::spawn(async move {
            first.run().await;
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.poll_once().await;
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "sync started");
        Ok(())
    }

    /// Cancels the poll timer and pending debounce timers. Transfers already
    /// running are left to finish.
    pub fn stop(&self) {
        let inner = &self.inner;
        if let Some(handle) = inner.poller.lock().take() {
            handle.abort();
        }
        inner.debounce.cancel_all();
        inner.force_status(SyncStatus::Disabled);
        tracing::info!("sync stopped");
    }

    /// Stops and waits up to `grace` for in-flight transfers. Returns whether they drained.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        let drained = self.wait_drained(grace).await;
        if !drained {
            tracing::warn!(
                grace_secs = grace.as_secs_f32(),
                "gave up waiting for in-flight transfers"
            );
        }
        drained
    }

    /// Waits until no poll or transfer is in flight.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.inner.drained()).await.is_ok()
    }

    /// Called after every local save. Only (re)arms the debounce timer.
    pub fn trigger_upload(&self, file_key: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        inner.file(file_key)?;
        if !inner.is_running() {
            tracing::debug!(file = file_key, "sync not running, ignoring save");
            return Ok(());
        }
        if inner.conflicts.lock().contains_key(file_key) {
            tracing::debug!(file = file_key, "conflict open, ignoring save");
            return Ok(());
        }
        inner.debounce.arm(file_key, inner.config.debounce_delay);
        Ok(())
    }

    /// Runs one poll cycle now, independent of the timer.
    pub async fn poll_now(&self) -> Result<(), EngineError> {
        if self.inner.remote.get().is_none() {
            return Err(EngineError::NotInitialized);
        }
        self.inner.poll_once().await;
        Ok(())
    }

    /// Writes `content` to the conflicted file, closes its session and
    /// schedules the upload that records the outcome.
    pub async fn resolve_conflict(
        &self,
        file_key: &str,
        content: impl Into<String>,
    ) -> Result<(), EngineError> {
        let content = content.into();
        self.inner.close_conflict(file_key, move |_| content).await
    }

    pub async fn resolve_conflict_with(
        &self,
        file_key: &str,
        resolution: Resolution,
    ) -> Result<(), EngineError> {
        self.inner
            .close_conflict(file_key, move |session| session.into_content(resolution))
            .await
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.lock().current
    }

    pub fn conflict(&self, file_key: &str) -> Option<ConflictSession> {
        self.inner.conflicts.lock().get(file_key).cloned()
    }

    pub fn open_conflicts(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.conflicts.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_upload_pending(&self, file_key: &str) -> bool {
        self.inner.debounce.is_pending(file_key)
    }

    pub fn in_flight(&self, file_key: &str) -> Option<OperationKind> {
        self.inner.in_flight.lock().by_key.get(file_key).copied()
    }

    pub fn tracked_keys(&self) -> &[String] {
        &self.inner.order
    }

    pub fn container_id(&self) -> Option<&str> {
        self.inner.container.get().map(String::as_str)
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// True when the local file still has the fingerprint recorded at the last sync.
    pub async fn local_matches_record(&self, file_key: &str) -> Result<bool, EngineError> {
        let file = self.inner.file(file_key)?;
        let Some(record) = self.inner.store.record(file_key).await else {
            return Ok(false);
        };
        let current = digest::fingerprint(&file.local_path).await;
        Ok(current.is_some() && current == record.local_fingerprint)
    }
}

impl<R: RemoteStore> Inner<R> {
    fn file(&self, file_key: &str) -> Result<&TrackedFile, EngineError> {
        self.files
            .get(file_key)
            .ok_or_else(|| EngineError::UnknownFile(file_key.to_string()))
    }

    fn session(&self) -> Option<(&SerializedRemote<R>, &str)> {
        Some((self.remote.get()?, self.container.get()?.as_str()))
    }

    fn is_running(&self) -> bool {
        self.poller.lock().is_some()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn set_status(&self, cell: &mut StatusCell, next: SyncStatus) {
        if cell.current != next {
            tracing::debug!(from = ?cell.current, to = ?next, "sync status changed");
            cell.current = next;
            self.emit(SyncEvent::StatusChanged(next));
        }
    }

    fn force_status(&self, next: SyncStatus) {
        let mut cell = self.status.lock();
        cell.pending_failure = None;
        self.set_status(&mut cell, next);
    }

    /// Called with the in-flight lock held once the set became non-empty.
    fn enter_syncing(&self) {
        let mut cell = self.status.lock();
        if cell.current != SyncStatus::Disabled {
            self.set_status(&mut cell, SyncStatus::Syncing);
        }
    }

    /// Picks the resting status once nothing is in flight any more.
    fn settle(&self) {
        let in_flight = self.in_flight.lock();
        if !in_flight.is_empty() {
            return;
        }
        let has_conflict = !self.conflicts.lock().is_empty();
        {
            let mut cell = self.status.lock();
            let failure = cell.pending_failure.take();
            if cell.current != SyncStatus::Disabled {
                let next = match failure {
                    Some(failure) => failure,
                    None if has_conflict => SyncStatus::Conflict,
                    None => SyncStatus::Idle,
                };
                self.set_status(&mut cell, next);
            }
        }
        drop(in_flight);
        self.drained.notify_waiters();
    }

    async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn claim(&self, file_key: &str, kind: OperationKind) -> bool {
        let mut in_flight = self.in_flight.lock();
        if let Some(running) = in_flight.by_key.get(file_key) {
            tracing::debug!(file = file_key, running = ?running, wanted = ?kind, "operation already in flight");
            return false;
        }
        in_flight.by_key.insert(file_key.to_string(), kind);
        self.enter_syncing();
        true
    }

    fn release(&self, file_key: &str) {
        self.in_flight.lock().by_key.remove(file_key);
        self.settle();
    }

    fn begin_poll(&self) {
        let mut in_flight = self.in_flight.lock();
        in_flight.polls += 1;
        self.enter_syncing();
    }

    fn end_poll(&self) {
        {
            let mut in_flight = self.in_flight.lock();
            in_flight.polls = in_flight.polls.saturating_sub(1);
        }
        self.settle();
    }

    fn is_busy(&self, file_key: &str) -> bool {
        self.in_flight.lock().by_key.contains_key(file_key)
    }

    fn has_conflict(&self, file_key: &str) -> bool {
        self.conflicts.lock().contains_key(file_key)
    }

    fn is_resolved(&self, file_key: &str) -> bool {
        self.resolved.lock().contains(file_key)
    }

    fn on_debounce_fired(self: &Arc<Self>, file_key: &str) {
        if !self.is_running() {
            return;
        }
        if self.has_conflict(file_key) {
            tracing::debug!(file = file_key, "conflict open, dropping debounced upload");
            return;
        }
        if !self.dispatch(file_key, Operation::SaveUpload) {
            tracing::debug!(file = file_key, "file busy, deferring upload");
            self.debounce.arm(file_key, self.config.debounce_delay);
        }
    }

    async fn poll_once(self: &Arc<Self>) {
        if !self.is_running() {
            return;
        }
        PollClaim::new(self).run().await;
    }

    async fn poll_cycle(self: &Arc<Self>) -> Result<(), EngineError> {
        let (remote, container) = self.session().ok_or(EngineError::NotInitialized)?;

        // One metadata snapshot per file for the whole cycle.
        let mut snapshot = Vec::with_capacity(self.order.len());
        for key in &self.order {
            if self.has_conflict(key) || self.is_busy(key) {
                tracing::debug!(file = %key, "skipping file this cycle");
                continue;
            }
            if self.is_resolved(key) {
                // The resolution already accounts for the remote version.
                self.dispatch(key, Operation::Upload);
                continue;
            }
            match remote.metadata(container, key).await {
                Ok(meta) => snapshot.push((key.as_str(), meta)),
                Err(err) if err.class() == FailureClass::Transport => return Err(err.into()),
                Err(err) => {
                    self.report_failure(Some(key.as_str()), "metadata", &EngineError::Remote(err))
                }
            }
        }

        for (key, meta) in snapshot {
            if let Err(err) = self.reconcile(key, meta).await {
                self.report_failure(Some(key), "reconcile", &err);
            }
        }
        Ok(())
    }

    async fn reconcile(
        self: &Arc<Self>,
        file_key: &str,
        meta: Option<RemoteMeta>,
    ) -> Result<(), EngineError> {
        let file = self.file(file_key)?;
        let local = digest::fingerprint(&file.local_path).await;

        if meta.is_none() && local.is_none() {
            if !self.claim(file_key, OperationKind::Adopt) {
                return Ok(());
            }
            let seeded = write_local(&file.local_path, &file.default_content()).await;
            self.release(file_key);
            seeded?;
            tracing::info!(file = file_key, "seeded missing file with default content");
            self.dispatch(file_key, Operation::Upload);
            return Ok(());
        }

        let record = self.store.record(file_key).await;
        let direction = resolve(record.as_ref(), local.as_deref(), meta.as_ref());
        tracing::debug!(file = file_key, ?direction, "resolved direction");

        match (direction, meta) {
            (SyncDirection::None, Some(meta)) if record.is_none() => {
                if let Some(local) = local {
                    self.adopt_identical(file_key, local, meta).await?;
                }
            }
            (SyncDirection::None, _) => {}
            (SyncDirection::Up, _) => {
                self.dispatch(file_key, Operation::Upload);
            }
            (SyncDirection::Down, Some(meta)) => {
                self.dispatch(file_key, Operation::Download(meta));
            }
            (SyncDirection::Down, None) => {}
            (SyncDirection::Conflict, _) => {
                self.dispatch(file_key, Operation::Conflict);
            }
        }
        Ok(())
    }

    async fn adopt_identical(
        &self,
        file_key: &str,
        local: String,
        meta: RemoteMeta,
    ) -> Result<(), EngineError> {
        if !self.claim(file_key, OperationKind::Adopt) {
            return Ok(());
        }
        let result = self
            .store
            .put_record(
                file_key,
                SyncRecord {
                    local_fingerprint: Some(local),
                    remote_fingerprint: Some(meta.fingerprint),
                    remote_modified_at: Some(meta.modified_at),
                    last_sync_at: now_unix(),
                },
            )
            .await;
        self.release(file_key);
        result?;
        tracing::info!(file = file_key, "local and remote already identical");
        Ok(())
    }

    /// Spawns `op` unless another operation holds `file_key`.
    fn dispatch(self: &Arc<Self>, file_key: &str, op: Operation) -> bool {
        let kind = op.kind();
        if !self.claim(file_key, kind) {
            return false;
        }
        let inner = Arc::clone(self);
        let key = file_key.to_string();
        tokio::spawn(async move {
            let result = match op {
                Operation::Upload => inner.run_upload(&key, false).await,
                Operation::SaveUpload => inner.run_upload(&key, true).await,
                Operation::Download(meta) => inner.run_download(&key, meta).await,
                Operation::Conflict => inner.run_conflict(&key).await,
            };
            if let Err(err) = result {
                inner.report_failure(Some(&key), operation_label(kind), &err);
            }
            inner.release(&key);
        });
        true
    }

    async fn run_upload(&self, file_key: &str, only_if_changed: bool) -> Result<(), EngineError> {
        let (remote, container) = self.session().ok_or(EngineError::NotInitialized)?;
        let file = self.file(file_key)?;
        if !tokio::fs::try_exists(&file.local_path).await.unwrap_or(false) {
            tracing::debug!(file = file_key, "local file missing, upload skipped");
            self.resolved.lock().remove(file_key);
            return Ok(());
        }
        if only_if_changed
            && !self.is_resolved(file_key)
            && let Some(record) = self.store.record(file_key).await
            && record.local_fingerprint.is_some()
            && digest::fingerprint(&file.local_path).await == record.local_fingerprint
        {
            tracing::debug!(file = file_key, "unchanged since last sync, upload skipped");
            return Ok(());
        }

        let meta = remote.upload(container, &file.local_path, file_key).await?;
        let Some(local) = digest::fingerprint(&file.local_path).await else {
            tracing::debug!(file = file_key, "local file vanished after upload");
            return Ok(());
        };
        self.store
            .put_record(
                file_key,
                SyncRecord {
                    local_fingerprint: Some(local),
                    remote_fingerprint: Some(meta.fingerprint),
                    remote_modified_at: Some(meta.modified_at),
                    last_sync_at: now_unix(),
                },
            )
            .await?;
        self.resolved.lock().remove(file_key);
        tracing::info!(file = file_key, "uploaded");
        Ok(())
    }

    async fn run_download(&self, file_key: &str, meta: RemoteMeta) -> Result<(), EngineError> {
        let (remote, container) = self.session().ok_or(EngineError::NotInitialized)?;
        let file = self.file(file_key)?;

        if remote.download(container, file_key, &file.local_path).await? == DownloadOutcome::NotFound
        {
            tracing::debug!(file = file_key, "remote object disappeared before download");
            return Ok(());
        }
        let local = digest::fingerprint(&file.local_path).await;
        self.store
            .put_record(
                file_key,
                SyncRecord {
                    local_fingerprint: local,
                    remote_fingerprint: Some(meta.fingerprint),
                    remote_modified_at: Some(meta.modified_at),
                    last_sync_at: now_unix(),
                },
            )
            .await?;
        tracing::info!(file = file_key, "downloaded");
        self.emit(SyncEvent::RemoteFileUpdated {
            file_key: file_key.to_string(),
        });
        Ok(())
    }

    async fn run_conflict(&self, file_key: &str) -> Result<(), EngineError> {
        let (remote, container) = self.session().ok_or(EngineError::NotInitialized)?;
        let file = self.file(file_key)?;
        let side = conflict_side_path(&self.config.workspace_root, file_key);

        if remote.download(container, file_key, &side).await? == DownloadOutcome::NotFound {
            tracing::debug!(file = file_key, "remote object disappeared before conflict fetch");
            return Ok(());
        }
        let remote_bytes = tokio::fs::read(&side).await;
        let _ = tokio::fs::remove_file(&side).await;
        let remote_content = String::from_utf8_lossy(&remote_bytes?).into_owned();
        let local_content = match tokio::fs::read(&file.local_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let session = ConflictSession::new(
            file_key,
            local_content.clone(),
            remote_content.clone(),
            now_unix(),
        );
        self.conflicts.lock().insert(file_key.to_string(), session);
        self.debounce.cancel(file_key);
        tracing::warn!(file = file_key, "local and remote both changed, waiting for resolution");
        self.emit(SyncEvent::Conflict {
            file_key: file_key.to_string(),
            local_content,
            remote_content,
        });
        Ok(())
    }

    async fn close_conflict(
        &self,
        file_key: &str,
        choose: impl FnOnce(ConflictSession) -> String,
    ) -> Result<(), EngineError> {
        let file = self.file(file_key)?;
        let session = self
            .conflicts
            .lock()
            .remove(file_key)
            .ok_or_else(|| EngineError::NoConflict(file_key.to_string()))?;
        let content = choose(session.clone());

        if let Err(err) = write_local(&file.local_path, &content).await {
            self.conflicts.lock().insert(file_key.to_string(), session);
            return Err(err.into());
        }

        // The record stays as it was until the upload lands.
        self.resolved.lock().insert(file_key.to_string());
        self.debounce.arm(file_key, self.config.debounce_delay);
        tracing::info!(file = file_key, "conflict resolved, upload scheduled");
        self.settle();
        Ok(())
    }

    fn report_failure(&self, file_key: Option<&str>, operation: &str, err: &EngineError) {
        let subject = file_key.unwrap_or("workspace");
        let status = match err {
            EngineError::Remote(remote) => match remote.class() {
                FailureClass::Transport => SyncStatus::Offline,
                FailureClass::Auth => SyncStatus::Error,
                FailureClass::Api => SyncStatus::Error,
                FailureClass::LocalIo => {
                    tracing::warn!(file = subject, operation, error = %remote, "local file unavailable, skipped");
                    return;
                }
            },
            EngineError::Io(io) => {
                tracing::warn!(file = subject, operation, error = %io, "local file unavailable, skipped");
                return;
            }
            _ => SyncStatus::Error,
        };

        let message = match err {
            EngineError::Remote(remote) if remote.class() == FailureClass::Auth => format!(
                "{operation} of {subject} was rejected: the session is expired or invalid, sign in again to resume sync ({remote})"
            ),
            EngineError::Remote(remote) if remote.class() == FailureClass::Transport => {
                format!("{operation} of {subject} failed, remote store is offline: {remote}")
            }
            other => format!("{operation} of {subject} failed: {other}"),
        };
        tracing::error!(file = subject, operation, ?status, "{message}");

        {
            let mut cell = self.status.lock();
            cell.pending_failure = Some(match cell.pending_failure {
                Some(SyncStatus::Error) => SyncStatus::Error,
                _ => status,
            });
        }
        self.emit(SyncEvent::Error { message });
    }
}

impl<R: RemoteStore> Drop for Inner<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

/// Counts one poll cycle as in flight until dropped, including when the
/// poll task is aborted mid-cycle.
struct PollClaim<R: RemoteStore> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteStore> PollClaim<R> {
    fn new(inner: &Arc<Inner<R>>) -> Self {
        inner.begin_poll();
        Self {
            inner: Arc::clone(inner),
        }
    }

    async fn run(self) {
        if let Err(err) = self.inner.poll_cycle().await {
            self.inner.report_failure(None, "poll", &err);
        }
    }
}

impl<R: RemoteStore> Drop for PollClaim<R> {
    fn drop(&mut self) {
        self.inner.end_poll();
    }
}

fn operation_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Upload => "upload",
        OperationKind::Download => "download",
        OperationKind::Conflict => "conflict fetch",
        OperationKind::Adopt => "adopt",
    }
}

async fn write_local(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
