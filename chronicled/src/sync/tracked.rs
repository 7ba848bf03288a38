use std::path::{Path, PathBuf};

use super::paths::{PathError, local_path_for};

/// One document the engine keeps in sync. The key doubles as the remote object name.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub key: String,
    pub local_path: PathBuf,
    default_content: fn() -> String,
}

impl TrackedFile {
    pub fn new(key: impl Into<String>, local_path: PathBuf, default_content: fn() -> String) -> Self {
        Self {
            key: key.into(),
            local_path,
            default_content,
        }
    }

    /// Places the file at `<workspace_root>/<key>`.
    pub fn in_workspace(
        workspace_root: &Path,
        key: &str,
        default_content: fn() -> String,
    ) -> Result<Self, PathError> {
        Ok(Self::new(key, local_path_for(workspace_root, key)?, default_content))
    }

    pub fn default_content(&self) -> String {
        (self.default_content)()
    }
}

fn default_journal() -> String {
    "<h1>Journal</h1>\n<p></p>\n".to_string()
}

fn default_quest_log() -> String {
    "<h1>Quest Log</h1>\n<ul></ul>\n".to_string()
}

fn default_settings() -> String {
    "{\n  \"version\": 1\n}\n".to_string()
}

/// The documents every campaign workspace carries.
pub fn campaign_files(workspace_root: &Path) -> Result<Vec<TrackedFile>, PathError> {
    Ok(vec![
        TrackedFile::in_workspace(workspace_root, "journal.html", default_journal)?,
        TrackedFile::in_workspace(workspace_root, "quest_log.html", default_quest_log)?,
        TrackedFile::in_workspace(workspace_root, "settings.json", default_settings)?,
    ])
}
