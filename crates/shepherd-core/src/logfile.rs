//! Append-only JSONL session log persistence.
//!
//! One file per session, one JSON record per line. Appends are the only
//! write path in normal operation; the explicit truncate used by undo
//! administration is the single destructive operation and rewrites through a
//! temp file + rename.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::CoreError;
use crate::protocol::LogEntry;

/// Append a single entry to the log, creating parent directories as needed.
pub fn append_entry(path: &Path, entry: &LogEntry) -> Result<(), CoreError> {
    append_entries(path, std::slice::from_ref(entry)).map(|_| ())
}

/// Append entries in order; returns the number appended.
pub fn append_entries(path: &Path, entries: &[LogEntry]) -> Result<usize, CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
    }

    Ok(entries.len())
}

/// Load all entries from a log file.
///
/// Returns an empty list if the file doesn't exist. Lines that fail to parse
/// are skipped rather than failing the whole read.
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>, CoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => log::warn!("skipping malformed log line in {}: {}", path.display(), err),
        }
    }

    Ok(entries)
}

/// Truncate the log to its first `keep` entries; returns the number removed.
///
/// Operates on raw lines so untouched entries survive byte for byte.
pub fn truncate_entries(path: &Path, keep: usize) -> Result<usize, CoreError> {
    if !path.exists() {
        return Err(CoreError::NotFound(format!(
            "log file {}",
            path.display()
        )));
    }

    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader
        .lines()
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect();

    if keep >= lines.len() {
        return Ok(0);
    }
    let removed = lines.len() - keep;

    let temp_path = path.with_extension("jsonl.tmp");
    {
        let mut temp = fs::File::create(&temp_path)?;
        for line in &lines[..keep] {
            writeln!(temp, "{line}")?;
        }
    }
    fs::rename(&temp_path, path)?;

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user_entry(text: &str) -> LogEntry {
        serde_json::from_str(&format!(
            r#"{{"type":"user","message":{{"role":"user","content":"{text}"}}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");

        append_entry(&path, &user_entry("first")).unwrap();
        append_entry(&path, &user_entry("second")).unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message_text(), Some("first".to_string()));
        assert_eq!(entries[1].message_text(), Some("second".to_string()));
    }

    #[test]
    fn append_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj").join("sess.jsonl");

        append_entry(&path, &user_entry("hello")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn read_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let entries = read_entries(&dir.path().join("missing.jsonl")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn read_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        std::fs::write(
            &path,
            "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"ok\"}}\nnot json\n",
        )
        .unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn truncate_keeps_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        for i in 0..5 {
            append_entry(&path, &user_entry(&format!("msg-{i}"))).unwrap();
        }

        let removed = truncate_entries(&path, 2).unwrap();
        assert_eq!(removed, 3);

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message_text(), Some("msg-1".to_string()));
    }

    #[test]
    fn truncate_with_keep_beyond_len_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        append_entry(&path, &user_entry("only")).unwrap();

        let removed = truncate_entries(&path, 10).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(read_entries(&path).unwrap().len(), 1);
    }

    #[test]
    fn truncate_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = truncate_entries(&dir.path().join("missing.jsonl"), 0).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
