//! Undo engine: transactional file mutation and log administration.

pub mod logadmin;
pub mod mutator;

pub use logadmin::{append_log, truncate_log};
pub use mutator::{BatchReceipt, FileMutator, FileOperation};
