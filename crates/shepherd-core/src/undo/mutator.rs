//! Transactional File Mutator.
//!
//! Applies a batch of file operations with all-or-nothing semantics. Every
//! path is validated before any mutation, then the whole batch is replayed
//! in memory so edits to the same file compose, and only a fully successful
//! replay is committed to disk. A commit failure restores every captured
//! original; no partial-success state is ever observable.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::paths;

/// One reversible file operation.
///
/// `ReverseEdit` and `ApplyEdit` are the same find-and-replace mechanism in
/// opposite ledger directions; the caller picks which texts to find and put.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum FileOperation {
    /// Undo an edit: find `old_text`, put `new_text` back.
    ReverseEdit {
        file_path: String,
        old_text: String,
        new_text: String,
        #[serde(default)]
        replace_all: bool,
    },
    /// Redo an edit: find `old_text`, put `new_text`.
    ApplyEdit {
        file_path: String,
        old_text: String,
        new_text: String,
        #[serde(default)]
        replace_all: bool,
    },
    /// Restore a deleted file with its captured content.
    CreateWrite { file_path: String, content: String },
    /// Remove a file a prior operation created.
    DeleteWrite { file_path: String },
}

impl FileOperation {
    fn file_path(&self) -> &str {
        match self {
            FileOperation::ReverseEdit { file_path, .. }
            | FileOperation::ApplyEdit { file_path, .. }
            | FileOperation::CreateWrite { file_path, .. }
            | FileOperation::DeleteWrite { file_path } => file_path,
        }
    }
}

/// Successful batch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub operations_applied: usize,
}

/// Staged state for one target file.
///
/// `original` is captured the first time the path is touched and drives
/// rollback; `current` is the content as replayed so far. `None` means the
/// file does not exist in that state.
struct StagedFile {
    original: Option<String>,
    current: Option<String>,
}

/// Applies batched file operations inside a permitted root.
pub struct FileMutator {
    permitted_root: PathBuf,
}

impl FileMutator {
    pub fn new(permitted_root: PathBuf) -> Self {
        Self { permitted_root }
    }

    pub fn permitted_root(&self) -> &Path {
        &self.permitted_root
    }

    /// Apply a batch atomically.
    ///
    /// Validation and in-memory replay failures abort with zero side
    /// effects. A write failure during commit rolls back every file already
    /// committed and reports how many were restored.
    pub fn apply_batch(&self, operations: &[FileOperation]) -> Result<BatchReceipt, CoreError> {
        for op in operations {
            paths::ensure_contained(Path::new(op.file_path()), &self.permitted_root)?;
        }

        let mut staging: HashMap<PathBuf, StagedFile> = HashMap::new();
        for op in operations {
            self.replay(op, &mut staging)?;
        }

        self.commit(&staging)?;

        Ok(BatchReceipt {
            operations_applied: operations.len(),
        })
    }

    /// Phase 1: replay one operation against the staged content.
    fn replay(
        &self,
        op: &FileOperation,
        staging: &mut HashMap<PathBuf, StagedFile>,
    ) -> Result<(), CoreError> {
        let path = PathBuf::from(op.file_path());
        let staged = match staging.entry(path.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let original = match fs::read_to_string(&path) {
                    Ok(content) => Some(content),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                    Err(err) => return Err(err.into()),
                };
                entry.insert(StagedFile {
                    current: original.clone(),
                    original,
                })
            }
        };

        match op {
            FileOperation::ReverseEdit {
                old_text,
                new_text,
                replace_all,
                ..
            }
            | FileOperation::ApplyEdit {
                old_text,
                new_text,
                replace_all,
                ..
            } => {
                if old_text.is_empty() {
                    return Err(CoreError::Validation(format!(
                        "empty target text for edit of {}",
                        path.display()
                    )));
                }
                let Some(current) = staged.current.as_ref() else {
                    return Err(CoreError::conflict(format!(
                        "{} does not exist",
                        path.display()
                    )));
                };
                let occurrences = current.matches(old_text.as_str()).count();
                if occurrences == 0 {
                    return Err(CoreError::conflict(format!(
                        "target text not found in {}; the file changed since the edit was captured",
                        path.display()
                    )));
                }
                if occurrences > 1 && !replace_all {
                    return Err(CoreError::conflict(format!(
                        "target text occurs {} times in {}; ambiguous without replace-all",
                        occurrences,
                        path.display()
                    )));
                }
                staged.current = Some(if *replace_all {
                    current.replace(old_text.as_str(), new_text)
                } else {
                    current.replacen(old_text.as_str(), new_text, 1)
                });
            }
            FileOperation::CreateWrite { content, .. } => {
                staged.current = Some(content.clone());
            }
            FileOperation::DeleteWrite { .. } => {
                if staged.current.is_none() {
                    return Err(CoreError::conflict(format!(
                        "{} does not exist",
                        path.display()
                    )));
                }
                staged.current = None;
            }
        }

        Ok(())
    }

    /// Phase 2: write every staged state to disk, rolling back on failure.
    fn commit(&self, staging: &HashMap<PathBuf, StagedFile>) -> Result<(), CoreError> {
        let mut committed: Vec<&PathBuf> = Vec::new();

        for (path, staged) in staging {
            let result = match &staged.current {
                Some(content) => write_file(path, content),
                None => remove_file(path),
            };
            if let Err(err) = result {
                let files_rolled_back = self.rollback(&committed, staging);
                return Err(CoreError::Conflict {
                    message: format!("failed to commit {}: {}", path.display(), err),
                    files_rolled_back,
                });
            }
            committed.push(path);
        }

        Ok(())
    }

    /// Restore captured originals for already-committed files.
    ///
    /// Best effort: a failure here is logged and swallowed, recovery is
    /// already a best-effort path.
    fn rollback(
        &self,
        committed: &[&PathBuf],
        staging: &HashMap<PathBuf, StagedFile>,
    ) -> usize {
        let mut restored = 0;
        for path in committed {
            let staged = &staging[*path];
            let result = match &staged.original {
                Some(content) => write_file(path, content),
                None => remove_file(path),
            };
            match result {
                Ok(()) => restored += 1,
                Err(err) => {
                    log::warn!("rollback of {} failed: {}", path.display(), err);
                }
            }
        }
        restored
    }
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reverse_edit(path: &Path, old: &str, new: &str) -> FileOperation {
        FileOperation::ReverseEdit {
            file_path: path.to_str().unwrap().to_string(),
            old_text: old.to_string(),
            new_text: new.to_string(),
            replace_all: false,
        }
    }

    #[test]
    fn single_edit_with_one_occurrence_succeeds() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "let x = 1;").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let receipt = mutator
            .apply_batch(&[reverse_edit(&file, "x = 1", "x = 2")])
            .unwrap();

        assert_eq!(receipt.operations_applied, 1);
        assert_eq!(fs::read_to_string(&file).unwrap(), "let x = 2;");
    }

    #[test]
    fn zero_occurrences_is_conflict_with_no_side_effects() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "unchanged").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[reverse_edit(&file, "missing text", "anything")])
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(fs::read_to_string(&file).unwrap(), "unchanged");
    }

    #[test]
    fn multiple_occurrences_without_replace_all_is_conflict() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "foo foo foo").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[reverse_edit(&file, "foo", "bar")])
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(fs::read_to_string(&file).unwrap(), "foo foo foo");
    }

    #[test]
    fn replace_all_replaces_every_occurrence() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "foo foo foo").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        mutator
            .apply_batch(&[FileOperation::ReverseEdit {
                file_path: file.to_str().unwrap().to_string(),
                old_text: "foo".to_string(),
                new_text: "bar".to_string(),
                replace_all: true,
            }])
            .unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "bar bar bar");
    }

    #[test]
    fn edits_to_the_same_file_compose_in_order() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        mutator
            .apply_batch(&[
                reverse_edit(&file, "x", "y"),
                reverse_edit(&file, "y", "z"),
            ])
            .unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "z");
    }

    #[test]
    fn failed_second_edit_leaves_original_content() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[
                reverse_edit(&file, "x", "y"),
                reverse_edit(&file, "absent", "z"),
            ])
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict { .. }));
        // Not "y": the first edit must not leak through.
        assert_eq!(fs::read_to_string(&file).unwrap(), "x");
    }

    #[test]
    fn batch_spanning_files_is_atomic() {
        let dir = tempdir().unwrap();
        let created = dir.path().join("new.txt");
        let edited = dir.path().join("existing.txt");
        fs::write(&edited, "hello").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[
                FileOperation::CreateWrite {
                    file_path: created.to_str().unwrap().to_string(),
                    content: "restored".to_string(),
                },
                reverse_edit(&edited, "goodbye", "farewell"),
            ])
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict { .. }));
        assert!(!created.exists());
        assert_eq!(fs::read_to_string(&edited).unwrap(), "hello");
    }

    #[test]
    fn create_write_restores_file_and_parents() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("nested").join("deep").join("a.txt");

        let mutator = FileMutator::new(dir.path().to_path_buf());
        mutator
            .apply_batch(&[FileOperation::CreateWrite {
                file_path: file.to_str().unwrap().to_string(),
                content: "restored".to_string(),
            }])
            .unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "restored");
    }

    #[test]
    fn delete_write_removes_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "created by agent").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        mutator
            .apply_batch(&[FileOperation::DeleteWrite {
                file_path: file.to_str().unwrap().to_string(),
            }])
            .unwrap();

        assert!(!file.exists());
    }

    #[test]
    fn delete_write_of_missing_file_is_conflict() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("gone.txt");

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[FileOperation::DeleteWrite {
                file_path: file.to_str().unwrap().to_string(),
            }])
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[test]
    fn edit_on_missing_file_is_conflict() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("gone.txt");

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[reverse_edit(&file, "a", "b")])
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[test]
    fn empty_target_text_is_validation_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "content").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[reverse_edit(&file, "", "b")])
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn path_outside_root_aborts_whole_batch() {
        let dir = tempdir().unwrap();
        let inside = dir.path().join("a.txt");
        fs::write(&inside, "x").unwrap();

        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[
                reverse_edit(&inside, "x", "y"),
                FileOperation::DeleteWrite {
                    file_path: "/home/other/secret.txt".to_string(),
                },
            ])
            .unwrap_err();

        assert!(matches!(err, CoreError::AccessDenied(_)));
        assert_eq!(fs::read_to_string(&inside).unwrap(), "x");
    }

    #[test]
    fn relative_path_is_validation_error() {
        let dir = tempdir().unwrap();
        let mutator = FileMutator::new(dir.path().to_path_buf());
        let err = mutator
            .apply_batch(&[FileOperation::DeleteWrite {
                file_path: "relative/path.txt".to_string(),
            }])
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn protected_prefix_is_access_denied() {
        let mutator = FileMutator::new(PathBuf::from("/"));
        let err = mutator
            .apply_batch(&[FileOperation::DeleteWrite {
                file_path: "/etc/passwd".to_string(),
            }])
            .unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied(_)));
    }

    #[test]
    fn operation_serialization_uses_kebab_case_tags() {
        let op = FileOperation::CreateWrite {
            file_path: "/home/user/a.txt".to_string(),
            content: "x".to_string(),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "create-write");

        let parsed: FileOperation = serde_json::from_str(
            r#"{"op":"reverse-edit","file_path":"/home/user/a.txt","old_text":"a","new_text":"b"}"#,
        )
        .unwrap();
        match parsed {
            FileOperation::ReverseEdit { replace_all, .. } => assert!(!replace_all),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
