use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chronicle_core::DiskClient;
use tokio::sync::mpsc;

use crate::sync::conflict::Resolution;
use crate::sync::disk_remote::DiskRemote;
use crate::sync::engine::{DEFAULT_SHUTDOWN_GRACE, EngineConfig, SyncEngine, SyncEvent};
use crate::sync::local_watcher::start_notify_watcher;
use crate::sync::paths::state_file_for;
use crate::sync::remote::RemoteStore;
use crate::sync::state::StateStore;
use crate::sync::tracked::campaign_files;

const DEFAULT_WORKSPACE_DIR_NAME: &str = "Chronicle";
const DEFAULT_CAMPAIGN: &str = "campaign";
const DEFAULT_REMOTE_ROOT: &str = "disk:/Chronicle";
const DEFAULT_POLL_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_SECS: u64 = 10;

/// What the daemon does with a conflict nobody is around to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    Manual,
    KeepLocal,
    KeepRemote,
}

impl ConflictPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "keep-local" | "local" => Some(Self::KeepLocal),
            "keep-remote" | "remote" => Some(Self::KeepRemote),
            _ => None,
        }
    }

    fn resolution(self) -> Option<Resolution> {
        match self {
            Self::Manual => None,
            Self::KeepLocal => Some(Resolution::KeepLocal),
            Self::KeepRemote => Some(Resolution::KeepRemote),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub workspace_root: PathBuf,
    pub campaign: String,
    pub remote_root: String,
    pub api_url: Option<String>,
    pub poll_interval: Duration,
    pub debounce_delay: Duration,
    pub enable_local_watcher: bool,
    pub conflict_policy: ConflictPolicy,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let workspace_root = std::env::var("CHRONICLE_WORKSPACE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_WORKSPACE_DIR_NAME));
        let campaign =
            std::env::var("CHRONICLE_CAMPAIGN").unwrap_or_else(|_| DEFAULT_CAMPAIGN.to_string());
        let remote_root = std::env::var("CHRONICLE_REMOTE_ROOT")
            .unwrap_or_else(|_| DEFAULT_REMOTE_ROOT.to_string());
        let api_url = std::env::var("CHRONICLE_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let poll_interval =
            Duration::from_secs(read_u64_env("CHRONICLE_POLL_SECS", DEFAULT_POLL_SECS));
        let debounce_delay =
            Duration::from_secs(read_u64_env("CHRONICLE_DEBOUNCE_SECS", DEFAULT_DEBOUNCE_SECS));
        let enable_local_watcher = read_bool_env("CHRONICLE_ENABLE_LOCAL_WATCHER", true);
        let conflict_policy = read_conflict_policy_env("CHRONICLE_CONFLICT_POLICY")?;

        Ok(Self {
            workspace_root,
            campaign,
            remote_root,
            api_url,
            poll_interval,
            debounce_delay,
            enable_local_watcher,
            conflict_policy,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(
            self.workspace_root.clone(),
            self.campaign.clone(),
            self.remote_root.clone(),
        );
        config.poll_interval = self.poll_interval;
        config.debounce_delay = self.debounce_delay;
        config
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: SyncEngine<DiskRemote>,
    events: mpsc::UnboundedReceiver<SyncEvent>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.workspace_root)
            .await
            .with_context(|| {
                format!(
                    "failed to create workspace at {}",
                    config.workspace_root.display()
                )
            })?;

        let token = resolve_token()?;
        let client = build_client(config.api_url.as_deref(), &token)?;
        let remote = DiskRemote::new(client).context("failed to build transfer client")?;
        let files = campaign_files(&config.workspace_root).context("invalid tracked file")?;
        let store = StateStore::open(state_file_for(&config.workspace_root)).await;
        let (events_tx, events) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(config.engine_config(), files, store, events_tx);
        engine
            .initialize(remote)
            .await
            .context("failed to initialize sync")?;

        Ok(Self {
            config,
            engine,
            events,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            engine,
            mut events,
        } = self;
        tracing::info!(
            workspace = %config.workspace_root.display(),
            remote_root = %config.remote_root,
            campaign = %config.campaign,
            local_watcher = config.enable_local_watcher,
            conflict_policy = ?config.conflict_policy,
            "chronicled started"
        );

        let engine_for_events = engine.clone();
        let policy = config.conflict_policy;
        let events_handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handle_event(&engine_for_events, policy, event).await;
            }
        });

        engine.start().context("failed to start sync")?;

        let (watcher, local_handle) = if config.enable_local_watcher {
            match start_notify_watcher(&config.workspace_root, engine.tracked_keys().to_vec()) {
                Ok((watcher, mut rx)) => {
                    let engine_for_local = engine.clone();
                    let handle = tokio::spawn(async move {
                        while let Some(file_key) = rx.recv().await {
                            handle_local_save(&engine_for_local, &file_key).await;
                        }
                    });
                    (Some(watcher), Some(handle))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to start local watcher");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        tracing::info!("shutdown requested");

        drop(watcher);
        if let Some(handle) = local_handle {
            handle.abort();
        }
        engine.shutdown(DEFAULT_SHUTDOWN_GRACE).await;
        events_handle.abort();
        Ok(())
    }
}

/// Pretty JSON of the persisted sync records, keyed by file.
pub async fn status_report(workspace_root: &Path) -> anyhow::Result<String> {
    let store = StateStore::open(state_file_for(workspace_root)).await;
    let records: BTreeMap<_, _> = store.load().await.into_iter().collect();
    serde_json::to_string_pretty(&records).context("failed to encode sync records")
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
