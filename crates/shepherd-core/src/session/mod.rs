//! Session state and process supervision.

pub mod state;
pub mod supervisor;

pub use state::{Session, SessionId};
pub use supervisor::{SendOutcome, SendRequest, SessionSupervisor};
