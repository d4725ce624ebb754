// crates/mediator-core/src/fs/safe_path.rs
// ============================================================================
// Module: Safe Path Resolution
// Description: Confines relative paths to a base directory without symlinks.
// Purpose: Stop traversal and symlink redirection before any file is opened.
// Dependencies: std::fs
// ============================================================================

//! ## Overview
//! Each component is inspected with `symlink_metadata` while walking down from
//! the base. Canonicalizing first would follow a link and erase it from view,
//! so canonicalization happens only after the walk, as a containment check on
//! targets that exist.

use std::io::ErrorKind;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::fs::SafeFsError;

/// Resolves `relative` under `base_dir`.
///
/// Components that do not exist yet are allowed so callers can create new
/// files, but every existing component must be a real directory or file.
///
/// # Errors
///
/// Returns [`SafeFsError::PathEscape`] when `relative` is absolute, empty,
/// climbs above `base_dir`, or crosses a symbolic link, and
/// [`SafeFsError::Io`] when the base cannot be resolved.
pub fn resolve_safe_path(base_dir: &Path, relative: &Path) -> Result<PathBuf, SafeFsError> {
    let base = base_dir
        .canonicalize()
        .map_err(|err| SafeFsError::Io(format!("{}: {err}", base_dir.display())))?;
    let mut stack: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(SafeFsError::escape(relative, "climbs above base directory"));
                }
                continue;
            }
            Component::Normal(name) => stack.push(name),
            Component::RootDir | Component::Prefix(_) => {
                return Err(SafeFsError::escape(relative, "path must be relative"));
            }
        }
        // Every pushed prefix is inspected, even below a missing one, since a
        // later `..` can climb back into existing directories.
        let candidate = stack.iter().fold(base.clone(), |path, name| path.join(name));
        if inspect(&candidate)? == Entry::Symlink {
            return Err(SafeFsError::escape(relative, "path crosses a symbolic link"));
        }
    }
    if stack.is_empty() {
        return Err(SafeFsError::escape(relative, "path names the base directory itself"));
    }
    let resolved = stack.iter().fold(base.clone(), |path, name| path.join(name));
    if inspect(&resolved)? == Entry::Present {
        let canonical =
            resolved.canonicalize().map_err(|err| SafeFsError::Io(err.to_string()))?;
        if !canonical.starts_with(&base) {
            return Err(SafeFsError::escape(relative, "resolves outside base directory"));
        }
    }
    Ok(resolved)
}

/// What `symlink_metadata` found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// A real file or directory.
    Present,
    /// A symbolic link.
    Symlink,
    /// Nothing, or a parent that is missing or not a directory.
    Missing,
}

/// Inspects `path` without following a final symlink.
fn inspect(path: &Path) -> Result<Entry, SafeFsError> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => Ok(Entry::Symlink),
        Ok(_) => Ok(Entry::Present),
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            Ok(Entry::Missing)
        }
        Err(err) => Err(SafeFsError::Io(err.to_string())),
    }
}
