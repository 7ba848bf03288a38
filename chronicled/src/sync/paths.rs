use std::path::{Component, Path, PathBuf};

use thiserror::Error;

pub const STATE_DIR_NAME: &str = ".chronicle";
const STATE_FILE_NAME: &str = "sync_state.json";
const CONFLICT_DIR_NAME: &str = "conflicts";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file key is empty")]
    Empty,
    #[error("file key contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Maps a tracked file key ("quest_log.html", "notes/journal.html") under
/// the workspace root.
pub fn local_path_for(workspace_root: &Path, file_key: &str) -> Result<PathBuf, PathError> {
    if file_key.trim().is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = workspace_root.to_path_buf();
    for component in Path::new(file_key).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(file_key.to_string()));
            }
        }
    }
    if out == workspace_root {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// Remote object path for `name` inside a container folder.
pub fn remote_path_in(container: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if container.ends_with('/') {
        format!("{container}{name}")
    } else {
        format!("{container}/{name}")
    }
}

pub fn state_file_for(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STATE_DIR_NAME).join(STATE_FILE_NAME)
}

/// Side location the remote copy of a conflicted file is fetched into.
pub fn conflict_side_path(workspace_root: &Path, file_key: &str) -> PathBuf {
    let flattened = file_key.replace(['/', '\\'], "__");
    workspace_root
        .join(STATE_DIR_NAME)
        .join(CONFLICT_DIR_NAME)
        .join(format!("{flattened}.remote"))
}

/// Temporary sibling used for write-then-rename updates.
pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
