use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Watches the workspace and reports the key of every tracked file that was
/// written. Editors that save through a rename show up as a name change on
/// the target, so those count too.
pub fn start_notify_watcher(
    root: &Path,
    keys: impl IntoIterator<Item = String>,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<String>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let keys: HashSet<String> = keys.into_iter().collect();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for key in changed_keys(&watch_root, &keys, event) {
                let _ = tx.send(key);
            }
        }
        Err(err) => tracing::warn!(error = %err, "file watcher error"),
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    tracing::debug!(root = %root.display(), "watching workspace for saves");
    Ok((watcher, rx))
}

fn changed_keys(root: &Path, keys: &HashSet<String>, event: Event) -> Vec<String> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            let mut changed: Vec<String> = event
                .paths
                .iter()
                .filter_map(|path| to_file_key(root, path))
                .filter(|key| keys.contains(key))
                .collect();
            changed.dedup();
            changed
        }
        _ => Vec::new(),
    }
}

fn to_file_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let key = PathBuf::from(relative).to_string_lossy().replace('\\', "/");
    (!key.is_empty()).then_some(key)
}
