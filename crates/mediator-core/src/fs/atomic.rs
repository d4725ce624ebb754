// crates/mediator-core/src/fs/atomic.rs
// ============================================================================
// Module: Atomic File Operations
// Description: No-follow reads, atomic writes, and verified atomic moves.
// Purpose: Make the bytes that were verified the bytes that become durable.
// Dependencies: cap-std, cap-primitives
// ============================================================================

//! ## Overview
//! Files are opened through a directory handle with symlink following
//! disabled, so a swapped-in link fails the open rather than redirecting it.
//! Writes go to a `create_new` temporary sibling that is synced, renamed into
//! place, and followed by a sync of the directory.
//!
//! [`atomic_move_then_verify`] reads the source once, writes the copy,
//! re-reads and hashes the copy, and links it into place only when the hash
//! matches. Moves never replace an existing destination file. The source is
//! removed only after the copy is in place; on any earlier failure it is left
//! untouched and no destination file appears.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsStr;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use cap_primitives::fs::FollowSymlinks;
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use cap_std::fs::OpenOptions;

use crate::core::DEFAULT_HASH_ALGORITHM;
use crate::core::HashDigest;
use crate::core::hash_bytes;
use crate::fs::SafeFsError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Attempts made to allocate a unique temporary name.
const TEMP_NAME_ATTEMPTS: u32 = 64;

/// Linux `ELOOP`, reported when a no-follow open meets a symlink.
#[cfg(unix)]
const ELOOP: i32 = 40;

// ============================================================================
// SECTION: Public Operations
// ============================================================================

/// Reads a regular file without following a final symlink.
///
/// # Errors
///
/// Returns [`SafeFsError::PathEscape`] when the file is a symlink or not a
/// regular file, [`SafeFsError::NotFound`] when it is missing, and
/// [`SafeFsError::TooLarge`] when it exceeds `max_bytes`.
pub fn read_file_nofollow(path: &Path, max_bytes: u64) -> Result<Vec<u8>, SafeFsError> {
    let (parent, name) = open_parent(path)?;
    read_from(&parent, name, path, max_bytes)
}

/// Writes `bytes` to `dir/name` through a synced temporary sibling.
///
/// # Errors
///
/// Returns [`SafeFsError::PathEscape`] when `name` is not a single plain file
/// name and [`SafeFsError::Io`] on write failure.
pub fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, SafeFsError> {
    let name = Path::new(name);
    if name.components().count() != 1 {
        return Err(SafeFsError::escape(name, "not a plain file name"));
    }
    let file_name = plain_file_name(name)?;
    let dest = open_dir(dir)?;
    let temp = write_temp(&dest, file_name, bytes)?;
    commit(&dest, &temp, file_name)?;
    sync_dir(dir);
    Ok(dir.join(file_name))
}

/// Moves `source` into `destination_dir`, verifying the written copy.
///
/// # Errors
///
/// Returns [`SafeFsError::IntegrityMismatch`] when the copy does not hash to
/// `expected`, [`SafeFsError::NotFound`] when the source is missing,
/// [`SafeFsError::AlreadyExists`] when the destination name is taken, and
/// [`SafeFsError::PathEscape`] when the source is a symlink.
pub fn atomic_move_then_verify(
    source: &Path,
    destination_dir: &Path,
    expected: &HashDigest,
) -> Result<PathBuf, SafeFsError> {
    let name = plain_file_name(source)?;
    move_verified(source, destination_dir, name, Some(expected), u64::MAX).map(|(path, _)| path)
}

/// Moves `source` into `destination_dir`, pinning the hash of the bytes read.
///
/// Used when no hash was declared ahead of time; the returned digest still
/// guarantees the durable copy equals what was read.
///
/// # Errors
///
/// Same as [`atomic_move_then_verify`].
pub fn move_then_verify_unpinned(
    source: &Path,
    destination_dir: &Path,
) -> Result<(PathBuf, HashDigest), SafeFsError> {
    let name = plain_file_name(source)?;
    move_verified(source, destination_dir, name, None, u64::MAX)
}

/// Moves `source` to `destination_dir/dest_name`, reading at most
/// `max_bytes`.
///
/// # Errors
///
/// Returns [`SafeFsError::TooLarge`] before anything is written when the
/// source exceeds `max_bytes`, [`SafeFsError::PathEscape`] when `dest_name`
/// is not a plain file name, and otherwise the errors of
/// [`atomic_move_then_verify`].
pub fn move_then_verify_bounded(
    source: &Path,
    destination_dir: &Path,
    dest_name: &str,
    expected: Option<&HashDigest>,
    max_bytes: u64,
) -> Result<(PathBuf, HashDigest), SafeFsError> {
    let dest = Path::new(dest_name);
    if dest.components().count() != 1 {
        return Err(SafeFsError::escape(dest, "not a plain file name"));
    }
    let name = plain_file_name(dest)?;
    move_verified(source, destination_dir, name, expected, max_bytes)
}

// ============================================================================
// SECTION: Move Implementation
// ============================================================================

/// Shared move sequence; `expected` defaults to the hash of the read bytes.
fn move_verified(
    source: &Path,
    destination_dir: &Path,
    dest_name: &OsStr,
    expected: Option<&HashDigest>,
    max_bytes: u64,
) -> Result<(PathBuf, HashDigest), SafeFsError> {
    let (source_parent, source_name) = open_parent(source)?;
    let bytes = read_from(&source_parent, source_name, source, max_bytes)?;
    let expected = expected.cloned().unwrap_or_else(|| hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes));

    let dest = open_dir(destination_dir)?;
    let temp = write_temp(&dest, dest_name, &bytes)?;
    let limit = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    let written = match read_from(&dest, &temp, &destination_dir.join(&temp), limit) {
        Ok(written) => written,
        Err(err) => {
            let _ = dest.remove_file(&temp);
            return Err(err);
        }
    };
    let actual = hash_bytes(expected.algorithm, &written);
    if actual != expected {
        let _ = dest.remove_file(&temp);
        return Err(SafeFsError::IntegrityMismatch {
            expected: expected.value,
            actual: actual.value,
        });
    }
    let dest_path = destination_dir.join(dest_name);
    commit_new(&dest, &temp, dest_name, &dest_path)?;
    sync_dir(destination_dir);
    source_parent.remove_file(source_name).map_err(|err| SafeFsError::Io(err.to_string()))?;
    Ok((dest_path, actual))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens a directory handle for `dir`.
fn open_dir(dir: &Path) -> Result<Dir, SafeFsError> {
    Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| map_open_error(&err, dir))
}

/// Opens the parent of `path` and returns it with the final file name.
fn open_parent(path: &Path) -> Result<(Dir, &OsStr), SafeFsError> {
    let name = plain_file_name(path)?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((open_dir(parent)?, name))
}

/// Returns the final component when it is a plain file name.
fn plain_file_name(path: &Path) -> Result<&OsStr, SafeFsError> {
    match path.components().next_back() {
        Some(Component::Normal(name)) => Ok(name),
        _ => Err(SafeFsError::escape(path, "not a plain file name")),
    }
}

/// Reads `name` from `dir` with symlink following disabled.
fn read_from(
    dir: &Dir,
    name: impl AsRef<Path>,
    display: &Path,
    max_bytes: u64,
) -> Result<Vec<u8>, SafeFsError> {
    let mut options = OpenOptions::new();
    options.read(true);
    options._cap_fs_ext_follow(FollowSymlinks::No);
    let file =
        dir.open_with(name.as_ref(), &options).map_err(|err| map_open_error(&err, display))?;
    let metadata = file.metadata().map_err(|err| SafeFsError::Io(err.to_string()))?;
    if !metadata.is_file() {
        return Err(SafeFsError::escape(display, "not a regular file"));
    }
    let mut bytes = Vec::new();
    file.take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| SafeFsError::Io(err.to_string()))?;
    if bytes.len() as u64 > max_bytes {
        return Err(SafeFsError::TooLarge {
            path: display.display().to_string(),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Writes bytes to a fresh synced temporary sibling of `file_name`.
fn write_temp(dir: &Dir, file_name: &OsStr, bytes: &[u8]) -> Result<PathBuf, SafeFsError> {
    for attempt in 0 .. TEMP_NAME_ATTEMPTS {
        let temp = temp_file_name(file_name, attempt);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        options._cap_fs_ext_follow(FollowSymlinks::No);
        match dir.open_with(&temp, &options) {
            Ok(mut file) => {
                let written = file.write_all(bytes).and_then(|()| file.sync_all());
                if let Err(err) = written {
                    let _ = dir.remove_file(&temp);
                    return Err(SafeFsError::Io(err.to_string()));
                }
                return Ok(temp);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(SafeFsError::Io(err.to_string())),
        }
    }
    Err(SafeFsError::Io("unable to allocate temporary file".to_string()))
}

/// Renames `temp` onto `file_name`, removing `temp` on failure.
fn commit(dir: &Dir, temp: &Path, file_name: &OsStr) -> Result<(), SafeFsError> {
    if let Err(err) = dir.rename(temp, dir, file_name) {
        let _ = dir.remove_file(temp);
        return Err(SafeFsError::Io(err.to_string()));
    }
    Ok(())
}

/// Links `temp` to `file_name` only if that name is free, then drops `temp`.
fn commit_new(
    dir: &Dir,
    temp: &Path,
    file_name: &OsStr,
    display: &Path,
) -> Result<(), SafeFsError> {
    let linked = dir.hard_link(temp, dir, file_name);
    let _ = dir.remove_file(temp);
    match linked {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(SafeFsError::AlreadyExists(display.display().to_string()))
        }
        Err(err) => Err(SafeFsError::Io(err.to_string())),
    }
}

/// Builds the temporary sibling name for an attempt.
fn temp_file_name(file_name: &OsStr, attempt: u32) -> PathBuf {
    let mut temp = OsString::from(".tmp-");
    temp.push(file_name);
    temp.push(format!(".{}.{attempt}", std::process::id()));
    PathBuf::from(temp)
}

/// Flushes directory entries so a completed rename survives a crash.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Maps open failures, treating symlink refusals as path escapes.
fn map_open_error(err: &std::io::Error, path: &Path) -> SafeFsError {
    if err.kind() == ErrorKind::NotFound {
        return SafeFsError::NotFound(path.display().to_string());
    }
    #[cfg(unix)]
    if err.raw_os_error() == Some(ELOOP) {
        return SafeFsError::escape(path, "refusing to follow symbolic link");
    }
    SafeFsError::Io(format!("{}: {err}", path.display()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
