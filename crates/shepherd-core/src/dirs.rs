//! Directory resolution for session logs, subagent logs, and undo state.
//!
//! This is the collaborator contract from the component design: the layout
//! hands out root-derived paths, and callers trust that anything they write
//! under those paths has already gone through the shared containment check
//! in [`crate::paths`].

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Resolves the per-project directory tree.
///
/// Session logs live at `{projects_root}/{project}/{session}.jsonl` and
/// subagent logs under `{projects_root}/{project}/{session}/subagents/`.
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    projects_root: PathBuf,
    undo_root: PathBuf,
}

impl DirectoryLayout {
    pub fn new(projects_root: PathBuf, undo_root: PathBuf) -> Self {
        Self {
            projects_root,
            undo_root,
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    pub fn undo_root(&self) -> &Path {
        &self.undo_root
    }

    /// Directory holding all session logs for a project.
    pub fn project_dir(&self, project: &str) -> Result<PathBuf, CoreError> {
        validate_component(project)?;
        Ok(self.projects_root.join(project))
    }

    /// Backing log file for a session.
    pub fn session_log_path(&self, project: &str, session_id: &str) -> Result<PathBuf, CoreError> {
        validate_component(session_id)?;
        Ok(self
            .project_dir(project)?
            .join(format!("{session_id}.jsonl")))
    }

    /// Nested per-session directory the wrapped runtime writes subagent logs into.
    pub fn subagents_dir(&self, project: &str, session_id: &str) -> Result<PathBuf, CoreError> {
        validate_component(session_id)?;
        Ok(self.project_dir(project)?.join(session_id).join("subagents"))
    }

    /// Undo state directory for a project.
    pub fn undo_dir(&self, project: &str) -> Result<PathBuf, CoreError> {
        validate_component(project)?;
        Ok(self.undo_root.join(project))
    }
}

/// Reject path components that could escape the layout roots.
fn validate_component(component: &str) -> Result<(), CoreError> {
    if component.is_empty() {
        return Err(CoreError::Validation("empty path component".to_string()));
    }
    if component == "." || component == ".." {
        return Err(CoreError::Validation(format!(
            "invalid path component: {component}"
        )));
    }
    if component.contains('/') || component.contains('\\') {
        return Err(CoreError::Validation(format!(
            "path component contains separator: {component}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DirectoryLayout {
        DirectoryLayout::new(
            PathBuf::from("/data/projects"),
            PathBuf::from("/data/undo"),
        )
    }

    #[test]
    fn session_log_path_derivation() {
        let path = layout().session_log_path("web-app", "sess-1").unwrap();
        assert_eq!(path, PathBuf::from("/data/projects/web-app/sess-1.jsonl"));
    }

    #[test]
    fn subagents_dir_is_nested_per_session() {
        let path = layout().subagents_dir("web-app", "sess-1").unwrap();
        assert_eq!(
            path,
            PathBuf::from("/data/projects/web-app/sess-1/subagents")
        );
    }

    #[test]
    fn undo_dir_under_undo_root() {
        let path = layout().undo_dir("web-app").unwrap();
        assert_eq!(path, PathBuf::from("/data/undo/web-app"));
    }

    #[test]
    fn rejects_traversal_components() {
        assert!(layout().project_dir("..").is_err());
        assert!(layout().session_log_path("web-app", "a/b").is_err());
        assert!(layout().subagents_dir("web-app", "").is_err());
    }
}
