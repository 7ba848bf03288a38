use super::digest::is_empty_fingerprint;
use super::remote::RemoteMeta;
use super::state::SyncRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    None,
    Up,
    Down,
    Conflict,
}

/// Decides what transfer a file needs this cycle.
///
/// `local` is the current local fingerprint (`None` when the file is missing),
/// `remote` the metadata fetched for this poll (`None` when the object does
/// not exist remotely).
pub fn resolve(
    record: Option<&SyncRecord>,
    local: Option<&str>,
    remote: Option<&RemoteMeta>,
) -> SyncDirection {
    let local_has_content = local.is_some_and(|digest| !is_empty_fingerprint(digest));

    let Some(remote) = remote else {
        // Never uploaded yet, whatever the record says.
        return if local_has_content {
            SyncDirection::Up
        } else {
            SyncDirection::None
        };
    };

    let Some(record) = record else {
        if !local_has_content {
            return SyncDirection::Down;
        }
        return if local.is_some_and(|digest| digest.eq_ignore_ascii_case(&remote.fingerprint)) {
            SyncDirection::None
        } else {
            SyncDirection::Conflict
        };
    };

    let local_changed = match record.local_fingerprint.as_deref() {
        Some(known) if !known.is_empty() => local != Some(known),
        _ => false,
    };
    let remote_changed = match record.remote_fingerprint.as_deref() {
        Some(known) if !known.is_empty() => !remote.fingerprint.eq_ignore_ascii_case(known),
        _ => false,
    };

    match (local_changed, remote_changed) {
        (true, true) => SyncDirection::Conflict,
        (false, true) => SyncDirection::Down,
        (true, false) => SyncDirection::Up,
        (false, false) => SyncDirection::None,
    }
}
