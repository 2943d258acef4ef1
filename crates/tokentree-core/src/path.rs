//! Path canonicalization and root containment checks.

use std::path::{Component, Path};

use crate::error::PathValidationError;

/// Whether the host filesystem compares paths case-insensitively by default.
pub const CASE_INSENSITIVE_FS: bool = cfg!(any(windows, target_os = "macos"));

/// Canonical cache key for an absolute path.
///
/// Separators become `/`, trailing separators are dropped, and case is folded
/// on case-insensitive filesystems so that equal paths collide.
pub fn cache_key(path: &Path) -> String {
    let mut key = path.to_string_lossy().replace('\\', "/");
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    if CASE_INSENSITIVE_FS {
        key = key.to_lowercase();
    }
    key
}

/// Path of `path` relative to `root`, `/`-separated.
///
/// Rejects paths outside the root and paths whose `..` components would
/// climb out of it. The root itself is rejected as empty.
pub fn relative_to_root(root: &Path, path: &Path) -> Result<String, PathValidationError> {
    let stripped = path
        .strip_prefix(root)
        .map_err(|_| PathValidationError::OutsideRoot {
            path: path.to_path_buf(),
        })?;
    normalize_relative(stripped)
}

fn normalize_relative(path: &Path) -> Result<String, PathValidationError> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PathValidationError::EscapesRoot {
                        path: path.to_path_buf(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathValidationError::OutsideRoot {
                    path: path.to_path_buf(),
                });
            }
        }
    }
    if parts.is_empty() {
        return Err(PathValidationError::Empty);
    }
    Ok(parts.join("/"))
}

/// Display key for a directory relative to the root; the root itself is `"."`.
pub fn dir_key(relative_dir: &str) -> String {
    let trimmed = relative_dir.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}
