// crates/mediator-core/src/fs/mod.rs
// ============================================================================
// Module: Safe Filesystem
// Description: Symlink-safe path resolution and verified atomic file moves.
// Purpose: Remove time-of-check/time-of-use races from file handling.
// Dependencies: cap-std, cap-primitives
// ============================================================================

//! ## Overview
//! Two primitives back every file the mediator touches:
//! [`resolve_safe_path`] confines a relative path to a base directory and
//! refuses symlinks before anything is resolved, and
//! [`atomic_move_then_verify`] reads a file exactly once, verifies the copy
//! it wrote, and only then makes it durable under its final name.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod atomic;
pub mod safe_path;

pub use atomic::atomic_move_then_verify;
pub use atomic::move_then_verify_bounded;
pub use atomic::move_then_verify_unpinned;
pub use atomic::read_file_nofollow;
pub use atomic::write_atomic;
pub use safe_path::resolve_safe_path;

use thiserror::Error;

use crate::core::RejectionKind;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Safe filesystem failures.
#[derive(Debug, Error)]
pub enum SafeFsError {
    /// Path leaves its base directory, is absolute, or crosses a symlink.
    #[error("path escape: {path}: {reason}")]
    PathEscape {
        /// Offending path as supplied.
        path: String,
        /// Why the path was refused.
        reason: String,
    },
    /// Written content hash differs from the expected hash.
    #[error("integrity mismatch: expected {expected}, found {actual}")]
    IntegrityMismatch {
        /// Expected lowercase hex digest.
        expected: String,
        /// Digest of the bytes actually written.
        actual: String,
    },
    /// Source file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),
    /// Destination already holds a file that must not be replaced.
    #[error("destination exists: {0}")]
    AlreadyExists(String),
    /// File exceeds the permitted read size.
    #[error("file too large: {path} exceeds {limit} bytes")]
    TooLarge {
        /// Offending file.
        path: String,
        /// Permitted size.
        limit: u64,
    },
    /// Underlying I/O failed.
    #[error("filesystem error: {0}")]
    Io(String),
}

impl SafeFsError {
    /// Builds a path escape error.
    pub(crate) fn escape(path: &std::path::Path, reason: &str) -> Self {
        Self::PathEscape {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the rejection kind for security refusals.
    #[must_use]
    pub const fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            Self::PathEscape {
                ..
            } => Some(RejectionKind::PathEscape),
            Self::IntegrityMismatch {
                ..
            } => Some(RejectionKind::IntegrityMismatch),
            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::TooLarge {
                ..
            }
            | Self::Io(_) => None,
        }
    }
}
