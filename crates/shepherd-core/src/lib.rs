//! # shepherd-core
//!
//! Session management core for long-running AI coding-agent sessions whose
//! state of record is one append-only JSONL log file per session.
//!
//! The crate is framework-agnostic; route layers, auth, and UIs are external
//! consumers of the types exported here.
//!
//! ## Key Concepts
//!
//! - **Session**: one continuous agent conversation, backed by one log file
//! - **Turn**: a user message and the agent's actions up to the next one
//! - **Delegation**: an agent-issued request to spawn a sub-agent, mirrored
//!   back into the parent log as `progress` entries
//! - **Batch**: an ordered list of reversible file operations that commits
//!   completely or not at all

pub mod agent;
pub mod context;
pub mod dirs;
pub mod error;
pub mod logfile;
pub mod metadata;
pub mod mirror;
pub mod paths;
pub mod protocol;
pub mod session;
pub mod spawn;
pub mod tasks;
pub mod undo;

// Re-export commonly used types
pub use context::{ShepherdContext, ShepherdContextBuilder};
pub use dirs::DirectoryLayout;
pub use error::{BoundaryStatus, CoreError};
pub use metadata::SessionSummary;
pub use mirror::SubagentMirror;
pub use protocol::LogEntry;
pub use session::{SendOutcome, SendRequest, Session, SessionId, SessionSupervisor};
pub use tasks::TaskCallTracker;
pub use undo::{BatchReceipt, FileMutator, FileOperation};
