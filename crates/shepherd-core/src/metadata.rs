//! Session Metadata Reader.
//!
//! Derives summary fields from a session log without necessarily reading the
//! whole file. Small files are read in full and yield exact counts. Large
//! files are sampled from the head, where early-session metadata lives, and
//! line/turn counts become proportional estimates. A separate backward scan
//! reads tail chunks inward for live-status classification.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::CoreError;
use crate::protocol::LogEntry;

/// Files at or below this size are read in full.
pub const FULL_READ_THRESHOLD: u64 = 256 * 1024;

/// Head window sampled from larger files.
pub const HEAD_WINDOW: u64 = 64 * 1024;

/// Chunk size for the backward tail scan.
pub const TAIL_CHUNK: u64 = 16 * 1024;

/// Safety bound on the total bytes the tail scan may read.
pub const MAX_TAIL_SCAN: u64 = 512 * 1024;

/// Summary fields derived from a session log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub branch: Option<String>,
    pub first_user_message: Option<String>,
    pub last_user_message: Option<String>,
    pub turn_count: u64,
    pub line_count: u64,
    /// When set, `turn_count` and `line_count` are proportional estimates
    /// extrapolated from the head window, and `last_user_message` is the
    /// last one seen within that window.
    pub approximate: bool,
}

/// Read a session log's summary.
///
/// Below [`FULL_READ_THRESHOLD`] the whole file is read and counts are
/// exact. Above it, only [`HEAD_WINDOW`] bytes from the start are read and
/// counts are scaled by total file size.
pub fn read_summary(path: &Path) -> Result<SessionSummary, CoreError> {
    let meta = fs::metadata(path)
        .map_err(|_| CoreError::NotFound(format!("log file {}", path.display())))?;
    let size = meta.len();

    if size <= FULL_READ_THRESHOLD {
        let content = fs::read_to_string(path)?;
        let mut summary = summarize_lines(&content);
        summary.approximate = false;
        return Ok(summary);
    }

    let file = fs::File::open(path)?;
    let mut buf = Vec::with_capacity(HEAD_WINDOW as usize);
    file.take(HEAD_WINDOW).read_to_end(&mut buf)?;
    let window = String::from_utf8_lossy(&buf);

    // Only complete lines participate; a trailing partial line would skew
    // both the parse and the ratio.
    let consumed = match window.rfind('\n') {
        Some(end) => end + 1,
        None => {
            return Err(CoreError::TooLarge(format!(
                "no complete line within the head window of {}",
                path.display()
            )))
        }
    };

    let mut summary = summarize_lines(&window[..consumed]);
    summary.line_count = scale(summary.line_count, size, consumed as u64);
    summary.turn_count = scale(summary.turn_count, size, consumed as u64);
    summary.approximate = true;
    Ok(summary)
}

/// Read up to `needed` trailing entries, scanning tail chunks inward.
///
/// Stops as soon as enough entries exist, at the start of the file, or at
/// the [`MAX_TAIL_SCAN`] safety bound. Entries are returned in file order.
pub fn read_tail_entries(path: &Path, needed: usize) -> Result<Vec<LogEntry>, CoreError> {
    let meta = fs::metadata(path)
        .map_err(|_| CoreError::NotFound(format!("log file {}", path.display())))?;
    let size = meta.len();
    let mut file = fs::File::open(path)?;

    let mut start = size;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let chunk_start = start.saturating_sub(TAIL_CHUNK);

        // Each chunk is read exactly once and prepended to the bytes kept
        // from previous iterations.
        let mut chunk = vec![0u8; (start - chunk_start) as usize];
        file.seek(SeekFrom::Start(chunk_start))?;
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
        start = chunk_start;

        let text = String::from_utf8_lossy(&buf);

        // Unless the scan reached the start of the file, the first line is
        // partial and dropped.
        let aligned = if start == 0 {
            text.as_ref()
        } else {
            match text.find('\n') {
                Some(pos) => &text[pos + 1..],
                None => "",
            }
        };

        let entries: Vec<LogEntry> = aligned
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let scanned = size - start;
        if entries.len() >= needed || start == 0 || scanned >= MAX_TAIL_SCAN {
            let skip = entries.len().saturating_sub(needed);
            return Ok(entries.into_iter().skip(skip).collect());
        }
    }
}

fn summarize_lines(text: &str) -> SessionSummary {
    let mut summary = SessionSummary::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        summary.line_count += 1;

        let Ok(entry) = serde_json::from_str::<LogEntry>(line) else {
            continue;
        };

        if summary.session_id.is_none() {
            summary.session_id = entry.session_id.clone();
        }
        if summary.model.is_none() {
            summary.model = entry.model.clone();
        }
        if summary.branch.is_none() {
            summary.branch = entry.branch.clone();
        }

        if entry.counts_as_turn() {
            summary.turn_count += 1;
            let text = entry.message_text();
            if summary.first_user_message.is_none() {
                summary.first_user_message = text.clone();
            }
            summary.last_user_message = text;
        }
    }

    summary
}

fn scale(count: u64, total: u64, sampled: u64) -> u64 {
    if sampled == 0 {
        return 0;
    }
    (count as u128 * total as u128 / sampled as u128) as u64
}
