//! Session Process Supervisor.
//!
//! Owns one long-lived agent subprocess per session. Sending to a session
//! reuses the registered live subprocess when there is one, otherwise spawns
//! a new one with the session's resolved launch arguments. A classifier loop
//! over the subprocess output fulfills pending send outcomes from `result`
//! lines and records delegations from `assistant` lines.
//!
//! Pending outcomes are a FIFO of oneshot senders keyed by request id, so
//! overlapping sends complete in order instead of silently overwriting each
//! other.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::agent::{user_envelope, AgentInvocation};
use crate::dirs::DirectoryLayout;
use crate::error::CoreError;
use crate::mirror::{self, SubagentMirror};
use crate::protocol::LogEntry;
use crate::session::state::{Session, SessionId};
use crate::spawn::{AgentExit, AgentProcess, ProcessEvent};
use crate::tasks::TaskCallTracker;

/// Default wall-clock bound for a new session's backing log to materialize.
pub const NEW_SESSION_LOG_TIMEOUT: Duration = Duration::from_secs(30);

const LOG_MATERIALIZE_POLL: Duration = Duration::from_millis(50);
const STDERR_TAIL_LINES: usize = 20;

/// Outcome of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The agent produced a `result` line for this send.
    Completed { result: String },
    /// The subprocess was terminated by a signal while the send was pending.
    Cancelled,
}

/// A message delivery request.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub session_id: String,
    pub project: String,
    pub content: String,
    pub working_dir: String,
    pub binary_path: String,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    /// Runtime session id to resume when spawning for an existing session.
    pub resume_session_id: Option<String>,
    pub workspace_name: Option<String>,
}

struct PendingSend {
    request_id: String,
    tx: oneshot::Sender<Result<SendOutcome, CoreError>>,
}

type PendingQueue = Arc<Mutex<VecDeque<PendingSend>>>;

/// Registry entry for a live subprocess.
struct ProcessEntry {
    process: Arc<AgentProcess>,
    pending: PendingQueue,
    /// Closed automatically when the entry is dropped.
    _mirror: SubagentMirror,
}

/// Supervises agent subprocesses, one per session.
pub struct SessionSupervisor {
    processes: Arc<Mutex<HashMap<String, ProcessEntry>>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    tracker: Arc<TaskCallTracker>,
    layout: Arc<DirectoryLayout>,
}

impl SessionSupervisor {
    pub fn new(layout: Arc<DirectoryLayout>, tracker: Arc<TaskCallTracker>) -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            tracker,
            layout,
        }
    }

    /// Send a message to a session and await its outcome.
    ///
    /// If a live subprocess is registered for the session, the message is
    /// written to its stdin; otherwise a new subprocess is spawned with the
    /// message as the initial prompt.
    pub async fn send(&self, req: SendRequest) -> Result<SendOutcome, CoreError> {
        let (tx, rx) = oneshot::channel();
        let request_id = Uuid::new_v4().to_string();
        let pending_send = PendingSend {
            request_id: request_id.clone(),
            tx,
        };

        let existing = {
            let map = self.processes.lock().unwrap();
            map.get(&req.session_id)
                .map(|entry| (Arc::clone(&entry.process), Arc::clone(&entry.pending)))
        };

        match existing {
            Some((process, pending)) => {
                pending.lock().unwrap().push_back(pending_send);
                log::info!(
                    "sending follow-up via stdin for session {}",
                    req.session_id
                );
                if let Err(err) = process.write_stdin(&user_envelope(&req.content)).await {
                    let mut queue = pending.lock().unwrap();
                    if let Some(pos) = queue.iter().position(|p| p.request_id == request_id) {
                        queue.remove(pos);
                    }
                    return Err(err);
                }
            }
            None => {
                log::info!("spawning agent process for session {}", req.session_id);
                self.spawn_for(&req, pending_send).await?;
            }
        }

        rx.await.map_err(|_| {
            CoreError::Process("session ended before an outcome was produced".to_string())
        })?
    }

    /// Create a new session and wait for its backing log to materialize.
    ///
    /// The subprocess is spawned with `content` as the initial prompt. If the
    /// log file does not appear within `log_timeout`, the subprocess is
    /// force-terminated and a synthetic Timeout error is reported.
    pub async fn new_session(
        &self,
        mut req: SendRequest,
        log_timeout: Duration,
    ) -> Result<SessionId, CoreError> {
        let session_id = SessionId::new();
        req.session_id = session_id.to_string();
        req.resume_session_id = None;

        let (tx, rx) = oneshot::channel();
        let pending_send = PendingSend {
            request_id: Uuid::new_v4().to_string(),
            tx,
        };
        self.spawn_for(&req, pending_send).await?;

        // The initial prompt's outcome has no caller waiting on it yet.
        let log_session = req.session_id.clone();
        tokio::spawn(async move {
            match rx.await {
                Ok(Err(err)) => {
                    log::warn!("initial send for session {} failed: {}", log_session, err)
                }
                Ok(Ok(_)) | Err(_) => {}
            }
        });

        let log_path = self.layout.session_log_path(&req.project, &req.session_id)?;
        let deadline = tokio::time::Instant::now() + log_timeout;
        loop {
            if log_path.exists() {
                return Ok(session_id);
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "session {} log never materialized; terminating subprocess",
                    req.session_id
                );
                let process = {
                    let map = self.processes.lock().unwrap();
                    map.get(&req.session_id).map(|e| Arc::clone(&e.process))
                };
                if let Some(process) = process {
                    process.kill().await;
                }
                self.clear_session(&req.session_id);
                return Err(CoreError::Timeout(format!(
                    "session log {} never materialized",
                    log_path.display()
                )));
            }
            tokio::time::sleep(LOG_MATERIALIZE_POLL).await;
        }
    }

    /// Ask a session's subprocess to terminate.
    ///
    /// Cancellation is observed, not instantaneous: the exit handler
    /// synthesizes outcomes for pending sends once the exit is seen.
    pub async fn stop(&self, session_id: &str) {
        let process = {
            let map = self.processes.lock().unwrap();
            map.get(session_id).map(|e| Arc::clone(&e.process))
        };
        if let Some(process) = process {
            process.terminate().await;
        }
    }

    /// Check whether a live subprocess is registered for a session.
    pub fn is_running(&self, session_id: &str) -> bool {
        let map = self.processes.lock().unwrap();
        map.get(session_id)
            .map(|e| e.process.is_running())
            .unwrap_or(false)
    }

    /// Session ids with a live subprocess.
    pub fn list_running(&self) -> Vec<String> {
        let map = self.processes.lock().unwrap();
        map.iter()
            .filter(|(_, entry)| entry.process.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshot of a session's metadata record.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    async fn spawn_for(&self, req: &SendRequest, first: PendingSend) -> Result<(), CoreError> {
        let log_path = self.layout.session_log_path(&req.project, &req.session_id)?;
        let subagents_dir = self.layout.subagents_dir(&req.project, &req.session_id)?;

        {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions.entry(req.session_id.clone()).or_insert_with(|| {
                Session::new(SessionId(req.session_id.clone()), req.working_dir.clone())
            });
            session.alive = true;
            session.model = req.model.clone();
            session.permission_mode = req.permission_mode.clone();
            session.workspace_name = req.workspace_name.clone();
            if session.log_path.is_none() {
                session.log_path = Some(log_path.clone());
            }
        }

        let invocation = AgentInvocation {
            binary_path: req.binary_path.clone(),
            working_dir: req.working_dir.clone(),
            prompt: req.content.clone(),
            resume_session_id: req.resume_session_id.clone(),
            model: req.model.clone(),
            permission_mode: req.permission_mode.clone(),
        };

        let mut process = AgentProcess::spawn(invocation.build()).await?;
        let receiver = process
            .take_receiver()
            .ok_or_else(|| CoreError::Process("event stream already taken".to_string()))?;
        let process = Arc::new(process);

        let pending: PendingQueue = Arc::new(Mutex::new(VecDeque::new()));
        pending.lock().unwrap().push_back(first);

        let mirror = SubagentMirror::start(
            req.session_id.clone(),
            subagents_dir,
            log_path,
            Arc::clone(&self.tracker),
            mirror::POLL_INTERVAL,
        );

        let entry = ProcessEntry {
            process: Arc::clone(&process),
            pending: Arc::clone(&pending),
            _mirror: mirror,
        };
        self.processes
            .lock()
            .unwrap()
            .insert(req.session_id.clone(), entry);

        tokio::spawn(classify_loop(
            req.session_id.clone(),
            receiver,
            Arc::clone(&self.processes),
            Arc::clone(&self.sessions),
            pending,
            Arc::clone(&self.tracker),
        ));

        Ok(())
    }

    fn clear_session(&self, session_id: &str) {
        self.processes.lock().unwrap().remove(session_id);
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.alive = false;
        }
        self.tracker.abandon_session(session_id);
    }
}

/// Consume subprocess events, classifying each output line.
async fn classify_loop(
    session_id: String,
    mut rx: UnboundedReceiver<ProcessEvent>,
    processes: Arc<Mutex<HashMap<String, ProcessEntry>>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    pending: PendingQueue,
    tracker: Arc<TaskCallTracker>,
) {
    let mut stderr_tail: VecDeque<String> = VecDeque::new();
    let mut observed_exit: Option<AgentExit> = None;

    // The exit event can arrive ahead of output lines the reader tasks are
    // still delivering, so the loop runs until every sender is gone: the
    // channel closes once the reader and exit-watcher tasks finish.
    while let Some(event) = rx.recv().await {
        match event {
            ProcessEvent::Stdout(line) => {
                log::debug!("agent stdout [{}]: {}", session_id, line);
                classify_line(&session_id, &line, &pending, &tracker);
            }
            ProcessEvent::Stderr(line) => {
                log::warn!("agent stderr [{}]: {}", session_id, line);
                push_stderr(&mut stderr_tail, line);
            }
            ProcessEvent::Exit(exit) => {
                observed_exit = Some(exit);
            }
        }
    }

    let exit = observed_exit.unwrap_or(AgentExit {
        code: Some(0),
        signal: None,
    });
    log::info!(
        "session {} subprocess exited (code={:?}, signal={:?})",
        session_id,
        exit.code,
        exit.signal
    );

    // Clear the registries before fulfilling outcomes, so a caller woken by
    // an outcome never observes stale liveness or delegation state.
    processes.lock().unwrap().remove(&session_id);
    if let Some(session) = sessions.lock().unwrap().get_mut(&session_id) {
        session.alive = false;
    }
    tracker.abandon_session(&session_id);

    // Synthesize outcomes for every pending send: signal exits are benign
    // cancellations, everything else is an error with the stderr tail.
    let mut queue = pending.lock().unwrap();
    while let Some(p) = queue.pop_front() {
        let outcome = if exit.is_signal() {
            Ok(SendOutcome::Cancelled)
        } else {
            let detail = stderr_tail
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
            let mut message = format!(
                "agent exited with code {} before producing a result",
                exit.code.unwrap_or(-1)
            );
            if !detail.is_empty() {
                message.push_str(": ");
                message.push_str(&detail);
            }
            Err(CoreError::Process(message))
        };
        let _ = p.tx.send(outcome);
    }
}

fn push_stderr(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Classify one output line: `result` fulfills the oldest pending outcome,
/// `assistant` is scanned for delegation tool-use blocks.
fn classify_line(
    session_id: &str,
    line: &str,
    pending: &PendingQueue,
    tracker: &Arc<TaskCallTracker>,
) {
    let entry: LogEntry = match serde_json::from_str(line) {
        Ok(entry) => entry,
        Err(_) => return,
    };

    match entry.entry_type.as_str() {
        "result" => {
            let next = pending.lock().unwrap().pop_front();
            match next {
                Some(p) => {
                    let result = entry.result.clone().unwrap_or_default();
                    let outcome = if entry.is_error.unwrap_or(false) {
                        Err(CoreError::Process(result))
                    } else {
                        Ok(SendOutcome::Completed { result })
                    };
                    let _ = p.tx.send(outcome);
                }
                None => {
                    log::debug!("result line with no pending send for session {session_id}");
                }
            }
        }
        "assistant" => {
            for (delegation_id, prompt) in entry.task_invocations() {
                log::debug!(
                    "recording delegation {} for session {}",
                    delegation_id,
                    session_id
                );
                tracker.record(session_id, &delegation_id, &prompt);
            }
        }
        _ => {}
    }
}
