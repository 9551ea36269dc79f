//! Path validation and symlink-escape detection.
//!
//! Every path crossing the protocol must be absolute. Paths are normalized
//! lexically (`.` dropped, `..` popped) and, when the provider is confined
//! to a root, checked against that root after resolving symlinks.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Validate that `candidate` is absolute and return it normalized.
///
/// # Errors
///
/// Returns `AppError::InvalidParams` if the path is empty or relative.
pub fn validate_absolute(candidate: &str) -> Result<PathBuf> {
    if candidate.is_empty() {
        return Err(AppError::InvalidParams("path must not be empty".into()));
    }
    let path = Path::new(candidate);
    if !path.is_absolute() {
        return Err(AppError::InvalidParams(format!(
            "path must be absolute: {candidate}"
        )));
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // `..` at the root stays at the root.
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }
    Ok(normalized)
}

/// Validate that the absolute `path` resides within `root`.
///
/// `root` must already be canonical. Returns the resolved path on success.
/// Symlinks are resolved through `tokio::fs`, off the async worker.
///
/// # Errors
///
/// Returns `AppError::PermissionDenied` if:
/// - The path does not start with the root.
/// - The path (or its nearest existing ancestor) is a symlink whose target
///   escapes the root.
pub async fn confine(root: &Path, path: &Path) -> Result<PathBuf> {
    if !path.starts_with(root) {
        return Err(AppError::PermissionDenied(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        )));
    }

    // Resolve the deepest existing ancestor so a symlinked parent directory
    // cannot smuggle a not-yet-created file outside the root.
    let mut existing = path;
    let mut suffix = Vec::new();
    while !tokio::fs::try_exists(existing).await.unwrap_or(false) {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_owned());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = tokio::fs::canonicalize(existing)
        .await
        .map_err(|err| AppError::PermissionDenied(format!("cannot resolve path: {err}")))?;
    if !resolved.starts_with(root) {
        return Err(AppError::PermissionDenied(
            "symlink target escapes the allowed root".into(),
        ));
    }
    for name in suffix.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
