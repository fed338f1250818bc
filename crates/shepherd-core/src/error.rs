//! Error taxonomy shared by all core subsystems.
//!
//! Validation and access errors are detected synchronously and abort before
//! any mutation. Batch failures surface as Conflict/ProcessFailure with the
//! number of files rolled back. `BoundaryStatus` is the classification the
//! out-of-scope HTTP layer maps outcomes onto.

use thiserror::Error;

/// Core error type for session supervision, mirroring, and file mutation.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("conflict: {message} ({files_rolled_back} file(s) rolled back)")]
    Conflict {
        message: String,
        files_rolled_back: usize,
    },

    #[error("process failure: {0}")]
    Process(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Shorthand for a conflict with no on-disk damage.
    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict {
            message: message.into(),
            files_rolled_back: 0,
        }
    }
}

/// Status classification exposed to the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStatus {
    Success,
    InvalidRequest,
    AccessDenied,
    Conflict,
    NotFound,
    TooLarge,
    Internal,
}

impl CoreError {
    /// Map an error onto the boundary status taxonomy.
    pub fn boundary_status(&self) -> BoundaryStatus {
        match self {
            CoreError::Validation(_) => BoundaryStatus::InvalidRequest,
            CoreError::AccessDenied(_) => BoundaryStatus::AccessDenied,
            CoreError::Conflict { .. } => BoundaryStatus::Conflict,
            CoreError::NotFound(_) => BoundaryStatus::NotFound,
            CoreError::TooLarge(_) => BoundaryStatus::TooLarge,
            CoreError::Process(_) | CoreError::Timeout(_) | CoreError::Io(_) | CoreError::Json(_) => {
                BoundaryStatus::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_displays_rollback_count() {
        let err = CoreError::Conflict {
            message: "old text not found".to_string(),
            files_rolled_back: 2,
        };
        let text = err.to_string();
        assert!(text.contains("old text not found"));
        assert!(text.contains("2 file(s) rolled back"));
    }

    #[test]
    fn boundary_status_mapping() {
        assert_eq!(
            CoreError::Validation("x".into()).boundary_status(),
            BoundaryStatus::InvalidRequest
        );
        assert_eq!(
            CoreError::AccessDenied("x".into()).boundary_status(),
            BoundaryStatus::AccessDenied
        );
        assert_eq!(
            CoreError::conflict("x").boundary_status(),
            BoundaryStatus::Conflict
        );
        assert_eq!(
            CoreError::Timeout("x".into()).boundary_status(),
            BoundaryStatus::Internal
        );
        assert_eq!(
            CoreError::NotFound("x".into()).boundary_status(),
            BoundaryStatus::NotFound
        );
    }
}
