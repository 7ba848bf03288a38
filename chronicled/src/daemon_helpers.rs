fn resolve_token() -> anyhow::Result<String> {
    let token = std::env::var("CHRONICLE_TOKEN").context("CHRONICLE_TOKEN is not set")?;
    let token = token.trim();
    anyhow::ensure!(!token.is_empty(), "CHRONICLE_TOKEN is empty");
    Ok(token.to_string())
}

fn build_client(base_url: Option<&str>, token: &str) -> anyhow::Result<DiskClient> {
    let client = match base_url {
        Some(url) => DiskClient::with_base_url(url, token.to_string())
            .with_context(|| format!("invalid api url {url}"))?,
        None => DiskClient::new(token.to_string()).context("failed to build api client")?,
    };
    Ok(client)
}

/// Logs every engine notification and applies the configured conflict policy.
async fn handle_event<R: RemoteStore>(
    engine: &SyncEngine<R>,
    policy: ConflictPolicy,
    event: SyncEvent,
) {
    match event {
        SyncEvent::StatusChanged(status) => tracing::info!(?status, "sync status"),
        SyncEvent::Error { message } => tracing::warn!(%message, "sync reported an error"),
        SyncEvent::RemoteFileUpdated { file_key } => {
            tracing::info!(file = %file_key, "remote changes applied locally")
        }
        SyncEvent::Conflict {
            file_key,
            local_content,
            remote_content,
        } => {
            let Some(resolution) = policy.resolution() else {
                tracing::warn!(
                    file = %file_key,
                    local_bytes = local_content.len(),
                    remote_bytes = remote_content.len(),
                    "conflict needs manual resolution"
                );
                return;
            };
            tracing::info!(file = %file_key, ?policy, "resolving conflict by policy");
            if let Err(err) = engine.resolve_conflict_with(&file_key, resolution).await {
                tracing::error!(file = %file_key, error = %err, "automatic conflict resolution failed");
            }
        }
    }
}

/// Forwards a save to the engine unless the file is exactly what was last synced,
/// which is what the engine's own downloads look like to the watcher.
async fn handle_local_save<R: RemoteStore>(engine: &SyncEngine<R>, file_key: &str) {
    match engine.local_matches_record(file_key).await {
        Ok(true) => {
            tracing::debug!(file = file_key, "unchanged since last sync, ignoring");
            return;
        }
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(file = file_key, error = %err, "ignoring local change");
            return;
        }
    }
    if let Err(err) = engine.trigger_upload(file_key) {
        tracing::warn!(file = file_key, error = %err, "failed to schedule upload");
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn read_conflict_policy_env(name: &str) -> anyhow::Result<ConflictPolicy> {
    match std::env::var(name) {
        Ok(value) => ConflictPolicy::parse(&value)
            .with_context(|| format!("{name} must be manual, keep-local or keep-remote, got {value:?}")),
        Err(_) => Ok(ConflictPolicy::Manual),
    }
}
