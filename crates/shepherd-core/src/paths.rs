//! Path resolution and the shared containment check.
//!
//! Every writer in the core runs destination paths through
//! [`ensure_contained`] before touching disk. The check is deliberately
//! strict: paths must arrive fully resolved, so anything that would require
//! normalization is rejected rather than normalized.

use std::env;
use std::path::Path;

use crate::error::CoreError;

/// Prefixes no batch operation may ever write under, regardless of the
/// permitted root.
pub const FORBIDDEN_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/dev", "/proc", "/sys", "/var",
];

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Result<String, CoreError> {
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Ok(home);
        }
    }

    if let Ok(profile) = env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Ok(profile);
        }
    }

    Err(CoreError::NotFound("home directory not set".to_string()))
}

/// Validate that `path` is absolute, already normalized, inside
/// `permitted_root`, and outside every forbidden prefix.
pub fn ensure_contained(path: &Path, permitted_root: &Path) -> Result<(), CoreError> {
    if !path.is_absolute() {
        return Err(CoreError::Validation(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }

    // components() folds interior `.` segments away, so the raw string is
    // what decides whether the path still needs normalization.
    let raw = path.to_string_lossy();
    if raw.split(['/', '\\']).any(|seg| seg == "." || seg == "..") {
        return Err(CoreError::Validation(format!(
            "path requires normalization: {}",
            path.display()
        )));
    }

    if !path.starts_with(permitted_root) {
        return Err(CoreError::AccessDenied(format!(
            "path {} is outside the permitted root {}",
            path.display(),
            permitted_root.display()
        )));
    }

    for prefix in FORBIDDEN_PREFIXES {
        if path.starts_with(prefix) {
            return Err(CoreError::AccessDenied(format!(
                "path {} is under protected prefix {}",
                path.display(),
                prefix
            )));
        }
    }

    Ok(())
}
