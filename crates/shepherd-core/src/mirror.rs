//! Subagent Mirror.
//!
//! Watches a session's subagent directory and translates new subagent log
//! entries into synthesized `progress` entries appended to the parent log.
//! The wrapped runtime does not reliably forward subagent activity itself,
//! so the mirror compensates.
//!
//! Correctness comes from a cancellable polling loop; filesystem change
//! notifications only nudge the same idempotent scan earlier. The subagent
//! directory may not exist when the mirror starts, and a scan of a missing
//! directory is a no-op.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::logfile;
use crate::protocol::LogEntry;
use crate::tasks::TaskCallTracker;

/// Default poll interval; the correctness-guaranteeing fallback cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-file mirror state.
#[derive(Debug, Default)]
struct SubagentFileState {
    /// Bytes already consumed. Advanced past the last complete line before
    /// parsing, so a malformed line is consumed once and never reprocessed.
    offset: u64,
    /// The file's leading message text, kept so resolution can be retried
    /// when the subagent started before its delegation was recorded.
    lead_text: Option<String>,
    /// Resolved delegation id, cached for the watcher's lifetime.
    delegation_id: Option<String>,
}

/// Scans subagent files and appends synthesized entries to the parent log.
pub(crate) struct MirrorScanner {
    session_id: String,
    dir: PathBuf,
    parent_log: PathBuf,
    tracker: Arc<TaskCallTracker>,
    files: HashMap<PathBuf, SubagentFileState>,
    closed: Arc<AtomicBool>,
}

impl MirrorScanner {
    pub(crate) fn new(
        session_id: String,
        dir: PathBuf,
        parent_log: PathBuf,
        tracker: Arc<TaskCallTracker>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id,
            dir,
            parent_log,
            tracker,
            files: HashMap::new(),
            closed,
        }
    }

    /// One idempotent scan over every subagent log file.
    pub(crate) fn scan(&mut self) {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            self.scan_file(path);
        }
    }

    fn scan_file(&mut self, path: PathBuf) {
        let state = self.files.entry(path.clone()).or_default();

        let Ok(mut file) = fs::File::open(&path) else {
            return;
        };
        let Ok(meta) = file.metadata() else {
            return;
        };
        if meta.len() <= state.offset {
            return;
        }
        if file.seek(SeekFrom::Start(state.offset)).is_err() {
            return;
        }

        let mut bytes = Vec::new();
        if file.read_to_end(&mut bytes).is_err() {
            return;
        }

        // Consume only complete lines; a trailing partial line stays for the
        // next scan. The offset moves before parsing, in raw bytes so a line
        // with invalid UTF-8 is consumed once and dropped like any other
        // malformed line.
        let Some(end) = bytes.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let consumed = end + 1;
        state.offset += consumed as u64;

        let buf = String::from_utf8_lossy(&bytes[..consumed]);
        for line in buf.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: LogEntry = match serde_json::from_str(trimmed) {
                Ok(entry) => entry,
                // Accepted loss: the bytes are already consumed.
                Err(err) => {
                    log::warn!(
                        "dropping malformed subagent line in {}: {}",
                        path.display(),
                        err
                    );
                    continue;
                }
            };

            if state.lead_text.is_none() {
                state.lead_text = entry.message_text();
            }

            if state.delegation_id.is_none() {
                if let Some(lead) = state.lead_text.as_deref() {
                    state.delegation_id = self.tracker.resolve_by_prompt(&self.session_id, lead);
                }
            }

            // Tolerates the race where a subagent starts before its
            // delegation is recorded: unresolvable entries drop silently.
            let Some(delegation_id) = state.delegation_id.clone() else {
                continue;
            };

            // Asynchronous work may outlive close(); never append after it.
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            let original = match serde_json::to_value(&entry) {
                Ok(value) => value,
                Err(_) => continue,
            };
            let progress = LogEntry::progress(&delegation_id, original, entry.timestamp);
            if let Err(err) = logfile::append_entry(&self.parent_log, &progress) {
                log::warn!(
                    "failed to mirror subagent entry for session {}: {}",
                    self.session_id,
                    err
                );
            }
        }
    }
}

/// Handle to a running mirror for one session.
pub struct SubagentMirror {
    closed: Arc<AtomicBool>,
    poll_task: JoinHandle<()>,
    _watcher: Option<RecommendedWatcher>,
    /// Keeps the nudge channel open even when no watcher survives; a closed
    /// channel would wake the poll loop continuously instead of on ticks.
    _nudge_tx: mpsc::UnboundedSender<()>,
}

impl SubagentMirror {
    /// Start mirroring `subagents_dir` into `parent_log`.
    pub fn start(
        session_id: String,
        subagents_dir: PathBuf,
        parent_log: PathBuf,
        tracker: Arc<TaskCallTracker>,
        poll_interval: Duration,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let (nudge_tx, mut nudge_rx) = mpsc::unbounded_channel::<()>();

        // Best-effort notification layer. The directory may not exist yet;
        // a watch failure degrades latency, never correctness.
        let watcher_tx = nudge_tx.clone();
        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        let _ = watcher_tx.send(());
                    }
                }
            },
            notify::Config::default(),
        )
        .ok()
        .and_then(|mut watcher| {
            match watcher.watch(&subagents_dir, RecursiveMode::Recursive) {
                Ok(()) => Some(watcher),
                Err(err) => {
                    log::debug!(
                        "subagent dir {} not watchable yet ({}); relying on poll",
                        subagents_dir.display(),
                        err
                    );
                    None
                }
            }
        });

        let mut scanner = MirrorScanner::new(
            session_id,
            subagents_dir,
            parent_log,
            tracker,
            Arc::clone(&closed),
        );
        let closed_poll = Arc::clone(&closed);
        let poll_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = nudge_rx.recv() => {}
                }
                if closed_poll.load(Ordering::SeqCst) {
                    break;
                }
                scanner.scan();
            }
        });

        Self {
            closed,
            poll_task,
            _watcher: watcher,
            _nudge_tx: nudge_tx,
        }
    }

    /// Stop the notification listener and the poll loop.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.poll_task.abort();
    }
}

impl Drop for SubagentMirror {
    fn drop(&mut self) {
        self.close();
    }
}
