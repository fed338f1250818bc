//! Per-session state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata record for one agent session.
///
/// The backing log path is resolved lazily on first spawn; `alive` tracks
/// whether a subprocess is currently registered for the session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,

    /// Working directory for the session's subprocess
    pub working_dir: String,

    /// Permission mode launch argument
    pub permission_mode: Option<String>,

    /// Model launch argument
    pub model: Option<String>,

    /// Backing log file path, resolved lazily
    pub log_path: Option<PathBuf>,

    /// Whether a subprocess is currently registered
    pub alive: bool,

    /// Optional isolation-workspace name
    pub workspace_name: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, working_dir: String) -> Self {
        Self {
            id,
            working_dir,
            permission_mode: None,
            model: None,
            log_path: None,
            alive: false,
            workspace_name: None,
        }
    }
}
