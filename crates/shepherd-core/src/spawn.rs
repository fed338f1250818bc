//! Agent process spawning and I/O management.
//!
//! Handles spawning the agent executable, capturing stdout/stderr as line
//! streams, writing to stdin, and observing process exit. Output is delivered
//! over a channel so the supervisor's classifier loop can consume events
//! without holding locks on the process.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::CoreError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events emitted by an agent process.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A line was read from stdout
    Stdout(String),
    /// A line was read from stderr
    Stderr(String),
    /// The process exited
    Exit(AgentExit),
}

/// How an agent process exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl AgentExit {
    /// Signal-induced exits are treated as benign cancellations.
    pub fn is_signal(&self) -> bool {
        self.signal.is_some()
    }
}

impl From<std::process::ExitStatus> for AgentExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        AgentExit {
            code: status.code(),
            signal,
        }
    }
}

/// Configuration for spawning an agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path to the agent binary
    pub binary_path: String,
    /// Arguments to pass to the binary
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<String>,
    /// Initial message to send to stdin after spawning
    pub initial_stdin: Option<String>,
}

impl SpawnConfig {
    pub fn new(binary_path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args,
            working_dir: None,
            initial_stdin: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn initial_stdin(mut self, message: impl Into<String>) -> Self {
        self.initial_stdin = Some(message.into());
        self
    }
}

/// A running agent process.
#[derive(Debug)]
pub struct AgentProcess {
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<AsyncMutex<Option<ChildStdin>>>,
    events: Option<UnboundedReceiver<ProcessEvent>>,
}

impl AgentProcess {
    /// Spawn a new agent process and start its reader and exit-watcher tasks.
    ///
    /// An executable-not-found failure is translated into an install hint
    /// rather than a raw error.
    pub async fn spawn(config: SpawnConfig) -> Result<Self, CoreError> {
        let mut cmd = Command::new(&config.binary_path);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CoreError::Process(format!(
                    "agent executable '{}' was not found; install the agent CLI and make sure it is on your PATH",
                    config.binary_path
                ))
            } else {
                CoreError::Process(format!(
                    "failed to spawn '{}': {}",
                    config.binary_path, err
                ))
            }
        })?;

        let mut child_stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Process("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoreError::Process("failed to capture stderr".to_string()))?;

        if let Some(ref initial) = config.initial_stdin {
            if let Some(stdin) = child_stdin.as_mut() {
                stdin
                    .write_all(initial.as_bytes())
                    .await
                    .map_err(|e| CoreError::Process(format!("failed to write initial stdin: {e}")))?;
                stdin
                    .write_all(b"\n")
                    .await
                    .map_err(|e| CoreError::Process(format!("failed to write initial stdin: {e}")))?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| CoreError::Process(format!("failed to flush stdin: {e}")))?;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let tx_stdout = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx_stdout.send(ProcessEvent::Stdout(line)).is_err() {
                    break;
                }
            }
        });

        let tx_stderr = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx_stderr.send(ProcessEvent::Stderr(line)).is_err() {
                    break;
                }
            }
        });

        let child_arc = Arc::new(Mutex::new(Some(child)));
        let stdin_arc = Arc::new(AsyncMutex::new(child_stdin));

        let child_exit = Arc::clone(&child_arc);
        let stdin_exit = Arc::clone(&stdin_arc);
        tokio::spawn(async move {
            loop {
                {
                    let mut guard = child_exit.lock().unwrap();
                    match guard.as_mut() {
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                let _ = tx.send(ProcessEvent::Exit(AgentExit::from(status)));
                                guard.take();
                                break;
                            }
                            Ok(None) => {}
                            Err(_) => {
                                guard.take();
                                break;
                            }
                        },
                        None => break,
                    }
                }
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            }
            stdin_exit.lock().await.take();
        });

        Ok(Self {
            child: child_arc,
            stdin: stdin_arc,
            events: Some(rx),
        })
    }

    /// Write a line to stdin.
    pub async fn write_stdin(&self, data: &str) -> Result<(), CoreError> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => {
                stdin
                    .write_all(data.as_bytes())
                    .await
                    .map_err(|e| CoreError::Process(format!("failed to write to stdin: {e}")))?;
                stdin
                    .write_all(b"\n")
                    .await
                    .map_err(|e| CoreError::Process(format!("failed to write to stdin: {e}")))?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| CoreError::Process(format!("failed to flush stdin: {e}")))?;
                Ok(())
            }
            None => Err(CoreError::Process("no active stdin".to_string())),
        }
    }

    /// Take ownership of the event receiver.
    ///
    /// The classifier loop consumes events independently of the process
    /// handle, so it can block on the channel without holding any lock.
    pub fn take_receiver(&mut self) -> Option<UnboundedReceiver<ProcessEvent>> {
        self.events.take()
    }

    /// Check if the process is still running.
    pub fn is_running(&self) -> bool {
        self.child.lock().unwrap().is_some()
    }

    /// Ask the process to terminate.
    ///
    /// Sends SIGTERM on Unix and lets the exit watcher observe the result;
    /// there is no forced escalation if the process ignores the signal.
    pub async fn terminate(&self) {
        self.stdin.lock().await.take();

        let guard = self.child.lock().unwrap();
        if let Some(child) = guard.as_ref() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            #[cfg(not(unix))]
            {
                // No graceful signal available; the caller falls back to kill().
            }
        }
    }

    /// Force kill the process immediately.
    pub async fn kill(&self) {
        self.stdin.lock().await.take();
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_config_builder() {
        let config = SpawnConfig::new("/usr/bin/echo", vec!["hello".to_string()])
            .working_dir("/tmp")
            .initial_stdin("test");

        assert_eq!(config.binary_path, "/usr/bin/echo");
        assert_eq!(config.args, vec!["hello"]);
        assert_eq!(config.working_dir, Some("/tmp".to_string()));
        assert_eq!(config.initial_stdin, Some("test".to_string()));
    }

    #[test]
    fn agent_exit_signal_classification() {
        let signal_exit = AgentExit {
            code: None,
            signal: Some(15),
        };
        assert!(signal_exit.is_signal());

        let code_exit = AgentExit {
            code: Some(1),
            signal: None,
        };
        assert!(!code_exit.is_signal());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn spawn_echo_process() {
        let config = SpawnConfig::new("echo", vec!["hello".to_string()]);
        let mut process = AgentProcess::spawn(config).await.unwrap();
        let mut rx = process.take_receiver().unwrap();

        let mut saw_stdout = false;
        let mut saw_exit = false;
        while let Some(event) = rx.recv().await {
            match event {
                ProcessEvent::Stdout(line) => {
                    assert_eq!(line, "hello");
                    saw_stdout = true;
                }
                ProcessEvent::Exit(exit) => {
                    assert_eq!(exit.code, Some(0));
                    saw_exit = true;
                    break;
                }
                ProcessEvent::Stderr(_) => {}
            }
        }
        assert!(saw_stdout);
        assert!(saw_exit);
    }

    #[tokio::test]
    async fn spawn_missing_binary_yields_install_hint() {
        let config = SpawnConfig::new("/definitely/not/an/agent", vec![]);
        let err = AgentProcess::spawn(config).await.unwrap_err();
        match err {
            CoreError::Process(msg) => assert!(msg.contains("install")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn terminate_is_observed_as_signal_exit() {
        let config = SpawnConfig::new("sleep", vec!["5".to_string()]);
        let mut process = AgentProcess::spawn(config).await.unwrap();
        let mut rx = process.take_receiver().unwrap();

        process.terminate().await;

        let mut exit = None;
        while let Some(event) = rx.recv().await {
            if let ProcessEvent::Exit(e) = event {
                exit = Some(e);
                break;
            }
        }
        let exit = exit.expect("exit event");
        assert_eq!(exit.signal, Some(libc::SIGTERM));
    }
}
