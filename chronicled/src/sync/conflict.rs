/// How the user settled a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    Merged(String),
}

/// Both versions of a file whose local and remote copies diverged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSession {
    pub file_key: String,
    pub local_content: String,
    pub remote_content: String,
    /// Unix seconds.
    pub opened_at: i64,
}

impl ConflictSession {
    pub fn new(
        file_key: impl Into<String>,
        local_content: impl Into<String>,
        remote_content: impl Into<String>,
        opened_at: i64,
    ) -> Self {
        Self {
            file_key: file_key.into(),
            local_content: local_content.into(),
            remote_content: remote_content.into(),
            opened_at,
        }
    }

    /// Consumes the session and yields the content the file should end up with.
    pub fn into_content(self, resolution: Resolution) -> String {
        match resolution {
            Resolution::KeepLocal => self.local_content,
            Resolution::KeepRemote => self.remote_content,
            Resolution::Merged(content) => content,
        }
    }
}
