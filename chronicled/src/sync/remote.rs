use std::future::Future;
use std::path::Path;

use thiserror::Error;
use tokio::sync::Mutex;

/// What the remote store reports about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub fingerprint: String,
    /// Server-assigned modification time, unix seconds.
    pub modified_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    NotFound,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store unreachable: {0}")]
    Transport(String),
    #[error("remote store rejected the session: {0}")]
    Auth(String),
    #[error("remote store request failed: {0}")]
    Api(String),
    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transport,
    Auth,
    Api,
    LocalIo,
}

impl RemoteError {
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Transport(_) => FailureClass::Transport,
            RemoteError::Auth(_) => FailureClass::Auth,
            RemoteError::Api(_) => FailureClass::Api,
            RemoteError::LocalIo(_) => FailureClass::LocalIo,
        }
    }
}

/// Blocking-style contract of the remote object store.
///
/// Implementations need not be safe for concurrent use; the engine only talks
/// to them through [`SerializedRemote`].
pub trait RemoteStore: Send + Sync + 'static {
    /// Finds or creates the folder `name` inside `parent` and returns its id.
    fn resolve_container(
        &self,
        name: &str,
        parent: &str,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;

    /// Creates or overwrites `remote_name` in `container` with the file at `local_path`.
    fn upload(
        &self,
        container: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> impl Future<Output = Result<RemoteMeta, RemoteError>> + Send;

    fn download(
        &self,
        container: &str,
        remote_name: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<DownloadOutcome, RemoteError>> + Send;

    fn metadata(
        &self,
        container: &str,
        remote_name: &str,
    ) -> impl Future<Output = Result<Option<RemoteMeta>, RemoteError>> + Send;
}

/// Serializes every request/response pair against the wrapped store.
///
/// The lock is held for the duration of one call only.
pub struct SerializedRemote<R> {
    inner: R,
    lock: Mutex<()>,
}

impl<R: RemoteStore> SerializedRemote<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub async fn resolve_container(&self, name: &str, parent: &str) -> Result<String, RemoteError> {
        let _guard = self.lock.lock().await;
        self.inner.resolve_container(name, parent).await
    }

    pub async fn upload(
        &self,
        container: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<RemoteMeta, RemoteError> {
        let _guard = self.lock.lock().await;
        self.inner.upload(container, local_path, remote_name).await
    }

    pub async fn download(
        &self,
        container: &str,
        remote_name: &str,
        dest: &Path,
    ) -> Result<DownloadOutcome, RemoteError> {
        let _guard = self.lock.lock().await;
        self.inner.download(container, remote_name, dest).await
    }

    pub async fn metadata(
        &self,
        container: &str,
        remote_name: &str,
    ) -> Result<Option<RemoteMeta>, RemoteError> {
        let _guard = self.lock.lock().await;
        self.inner.metadata(container, remote_name).await
    }
}
