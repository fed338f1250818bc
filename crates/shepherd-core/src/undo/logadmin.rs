//! Session log administration for undo.
//!
//! Truncation discards entries past a branch point; append restores
//! previously truncated entries. These are the only write paths to a
//! session log besides the supervisor's own appends.

use crate::dirs::DirectoryLayout;
use crate::error::CoreError;
use crate::logfile;
use crate::protocol::LogEntry;

/// Truncate a session log to its first `keep` entries.
///
/// Returns the number of entries removed.
pub fn truncate_log(
    layout: &DirectoryLayout,
    project: &str,
    session_id: &str,
    keep: usize,
) -> Result<usize, CoreError> {
    let path = layout.session_log_path(project, session_id)?;
    let removed = logfile::truncate_entries(&path, keep)?;
    log::info!(
        "truncated session {} log to {} entries ({} removed)",
        session_id,
        keep,
        removed
    );
    Ok(removed)
}

/// Append entries to a session log in order.
///
/// Returns the number of entries appended.
pub fn append_log(
    layout: &DirectoryLayout,
    project: &str,
    session_id: &str,
    entries: &[LogEntry],
) -> Result<usize, CoreError> {
    let path = layout.session_log_path(project, session_id)?;
    logfile::append_entries(&path, entries)
}
