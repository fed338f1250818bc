//! The context object owning all per-process state.
//!
//! Handlers receive a [`ShepherdContext`] instead of reaching for globals,
//! so tests construct a fresh context per case and concurrent contexts never
//! share registries.

use std::path::PathBuf;
use std::sync::Arc;

use crate::dirs::DirectoryLayout;
use crate::error::CoreError;
use crate::paths;
use crate::session::SessionSupervisor;
use crate::tasks::TaskCallTracker;
use crate::undo::FileMutator;

/// Builder for [`ShepherdContext`].
///
/// Unset roots default under the user's home directory:
/// `~/.shepherd/projects`, `~/.shepherd/undo`, and home itself as the
/// permitted mutation root.
#[derive(Debug, Default)]
pub struct ShepherdContextBuilder {
    projects_root: Option<PathBuf>,
    undo_root: Option<PathBuf>,
    permitted_root: Option<PathBuf>,
}

impl ShepherdContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projects_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.projects_root = Some(path.into());
        self
    }

    pub fn undo_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.undo_root = Some(path.into());
        self
    }

    pub fn permitted_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.permitted_root = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ShepherdContext, CoreError> {
        let (projects_root, undo_root, permitted_root) =
            match (self.projects_root, self.undo_root, self.permitted_root) {
                (Some(p), Some(u), Some(r)) => (p, u, r),
                (p, u, r) => {
                    let home = PathBuf::from(paths::get_home_dir()?);
                    (
                        p.unwrap_or_else(|| home.join(".shepherd").join("projects")),
                        u.unwrap_or_else(|| home.join(".shepherd").join("undo")),
                        r.unwrap_or_else(|| home.clone()),
                    )
                }
            };

        let layout = Arc::new(DirectoryLayout::new(projects_root, undo_root));
        let tracker = Arc::new(TaskCallTracker::new());
        let supervisor = Arc::new(SessionSupervisor::new(
            Arc::clone(&layout),
            Arc::clone(&tracker),
        ));
        let mutator = Arc::new(FileMutator::new(permitted_root));

        Ok(ShepherdContext {
            layout,
            tracker,
            supervisor,
            mutator,
        })
    }
}

/// Owns the directory layout, task-call tracker, supervisor, and mutator
/// for one logical deployment.
#[derive(Clone)]
pub struct ShepherdContext {
    layout: Arc<DirectoryLayout>,
    tracker: Arc<TaskCallTracker>,
    supervisor: Arc<SessionSupervisor>,
    mutator: Arc<FileMutator>,
}

impl ShepherdContext {
    pub fn builder() -> ShepherdContextBuilder {
        ShepherdContextBuilder::new()
    }

    pub fn layout(&self) -> &Arc<DirectoryLayout> {
        &self.layout
    }

    pub fn tracker(&self) -> &Arc<TaskCallTracker> {
        &self.tracker
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    pub fn mutator(&self) -> &Arc<FileMutator> {
        &self.mutator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_roots_are_used_verbatim() {
        let dir = tempdir().unwrap();
        let ctx = ShepherdContext::builder()
            .projects_root(dir.path().join("p"))
            .undo_root(dir.path().join("u"))
            .permitted_root(dir.path())
            .build()
            .unwrap();

        assert_eq!(ctx.layout().projects_root(), dir.path().join("p"));
        assert_eq!(ctx.layout().undo_root(), dir.path().join("u"));
        assert_eq!(ctx.mutator().permitted_root(), dir.path());
    }

    #[test]
    fn contexts_do_not_share_registries() {
        let dir = tempdir().unwrap();
        let make = || {
            ShepherdContext::builder()
                .projects_root(dir.path().join("p"))
                .undo_root(dir.path().join("u"))
                .permitted_root(dir.path())
                .build()
                .unwrap()
        };
        let a = make();
        let b = make();

        a.tracker().record("s1", "task-1", "prompt");
        assert_eq!(a.tracker().unresolved("s1").len(), 1);
        assert!(b.tracker().unresolved("s1").is_empty());
    }
}
