// crates/mediator-core/src/runtime/quarantine.rs
// ============================================================================
// Module: Quarantine Intake
// Description: Inbound queue promotion, validation, and disposal.
// Purpose: Validate only bytes that were moved out of the writable inbox.
// Dependencies: crate::fs, crate::runtime::validator
// ============================================================================

//! ## Overview
//! Senders drop envelope files into an inbound directory they can write.
//! [`Quarantine::promote`] moves a file into a quarantine directory with
//! [`move_then_verify_bounded`], and validation reads only the quarantined
//! copy, so a sender cannot change the bytes between check and use.
//!
//! Accepted files are deleted. Rejected files stay in quarantine for review.
//! [`Quarantine::poll_once`] processes every pending inbound file once and
//! refuses to run while quarantine holds too many retained files. Scheduling
//! repeated polls is the caller's concern.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::core::HashDigest;
use crate::core::RejectionKind;
use crate::fs::SafeFsError;
use crate::fs::move_then_verify_bounded;
use crate::fs::read_file_nofollow;
use crate::fs::resolve_safe_path;
use crate::runtime::telemetry::NoopTelemetrySink;
use crate::runtime::telemetry::TelemetryEvent;
use crate::runtime::telemetry::TelemetryOutcome;
use crate::runtime::telemetry::TelemetrySink;
use crate::runtime::validator::AcceptedMessage;
use crate::runtime::validator::EnvelopeValidator;
use crate::runtime::validator::ValidationError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File name suffix of queued envelopes.
pub const ENVELOPE_FILE_SUFFIX: &str = ".envelope.json";

/// Default cap on files retained in quarantine.
pub const DEFAULT_MAX_QUARANTINE_FILES: usize = 50;

/// Alternate quarantine names tried when an inbound name is already retained.
const MAX_NAME_ATTEMPTS: u32 = 1024;

/// Telemetry component name.
const COMPONENT: &str = "quarantine";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Intake failures.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Promotion or reading failed.
    #[error(transparent)]
    Fs(#[from] SafeFsError),
    /// The quarantined envelope was rejected.
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    /// Quarantine holds too many retained files to accept more.
    #[error("quarantine full: {count} files, limit {max}")]
    QuarantineFull {
        /// Files currently retained.
        count: usize,
        /// Configured limit.
        max: usize,
    },
}

impl IntakeError {
    /// Returns the rejection kind when the failure is a security refusal.
    #[must_use]
    pub const fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            Self::Fs(err) => err.rejection_kind(),
            Self::Rejected(err) => Some(err.kind()),
            Self::QuarantineFull {
                ..
            } => None,
        }
    }
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Envelope file that has been moved into quarantine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineRecord {
    /// Path of the quarantined copy.
    pub path: PathBuf,
    /// Hash of the quarantined bytes.
    pub digest: HashDigest,
}

/// Final state of a quarantined file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Envelope was accepted; the file is deleted.
    Accepted,
    /// Envelope was rejected; the file is retained.
    Rejected,
}

/// Result of one polling pass.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Envelopes accepted during the pass.
    pub accepted: Vec<AcceptedMessage>,
    /// File names that failed, with the failure.
    pub failed: Vec<(String, IntakeError)>,
}

// ============================================================================
// SECTION: Quarantine
// ============================================================================

/// Inbound directory paired with its quarantine directory.
pub struct Quarantine {
    /// Writable inbox.
    inbound_dir: PathBuf,
    /// Directory validation reads from.
    quarantine_dir: PathBuf,
    /// Retained-file limit.
    max_files: usize,
    /// Largest quarantined file read for validation.
    max_read_bytes: u64,
    /// Operational event sink.
    telemetry: Arc<dyn TelemetrySink>,
}

impl Quarantine {
    /// Creates a quarantine over existing directories.
    #[must_use]
    pub fn new(inbound_dir: impl Into<PathBuf>, quarantine_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbound_dir: inbound_dir.into(),
            quarantine_dir: quarantine_dir.into(),
            max_files: DEFAULT_MAX_QUARANTINE_FILES,
            max_read_bytes: u64::MAX,
            telemetry: Arc::new(NoopTelemetrySink),
        }
    }

    /// Overrides the retained-file limit.
    #[must_use]
    pub const fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Caps how many bytes of an inbound file are read.
    ///
    /// The cap applies when the file is promoted, so an oversized inbound
    /// file fails with [`SafeFsError::TooLarge`] before it is loaded whole.
    #[must_use]
    pub const fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes;
        self
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the inbound directory.
    #[must_use]
    pub fn inbound_dir(&self) -> &Path {
        &self.inbound_dir
    }

    /// Moves inbound file `name` into quarantine.
    ///
    /// When `expected` is given the quarantined bytes must hash to it;
    /// otherwise the hash of the bytes read is recorded. A name already
    /// retained in quarantine is never replaced; the new copy gets a numbered
    /// name instead.
    ///
    /// # Errors
    ///
    /// Returns [`SafeFsError::PathEscape`] when `name` is not a plain file
    /// name in the inbound directory or is a symlink, [`SafeFsError::TooLarge`]
    /// when the file exceeds the read cap, and the errors of
    /// [`move_then_verify_bounded`].
    pub fn promote(
        &self,
        name: &str,
        expected: Option<&HashDigest>,
    ) -> Result<QuarantineRecord, SafeFsError> {
        let relative = Path::new(name);
        if relative.components().count() != 1 {
            return Err(SafeFsError::PathEscape {
                path: name.to_string(),
                reason: "not a plain file name".to_string(),
            });
        }
        let source = resolve_safe_path(&self.inbound_dir, relative)?;
        for attempt in 0 .. MAX_NAME_ATTEMPTS {
            let dest_name = quarantine_name(name, attempt);
            if std::fs::symlink_metadata(self.quarantine_dir.join(&dest_name)).is_ok() {
                continue;
            }
            match move_then_verify_bounded(
                &source,
                &self.quarantine_dir,
                &dest_name,
                expected,
                self.max_read_bytes,
            ) {
                Ok((path, digest)) => {
                    return Ok(QuarantineRecord {
                        path,
                        digest,
                    });
                }
                Err(SafeFsError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Err(SafeFsError::AlreadyExists(name.to_string()))
    }

    /// Reads the quarantined bytes once.
    ///
    /// # Errors
    ///
    /// Returns [`SafeFsError`] when the file is missing, replaced by a
    /// symlink, or larger than the read cap.
    pub fn read(&self, record: &QuarantineRecord) -> Result<Vec<u8>, SafeFsError> {
        read_file_nofollow(&record.path, self.max_read_bytes)
    }

    /// Deletes accepted files and retains rejected ones.
    ///
    /// # Errors
    ///
    /// Returns [`SafeFsError::Io`] when an accepted file cannot be removed.
    pub fn dispose(
        &self,
        record: &QuarantineRecord,
        disposition: Disposition,
    ) -> Result<(), SafeFsError> {
        match disposition {
            Disposition::Accepted => match std::fs::remove_file(&record.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(SafeFsError::Io(err.to_string())),
            },
            Disposition::Rejected => Ok(()),
        }
    }

    /// Promotes, validates, and disposes of one inbound file.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError`] when promotion, reading, or validation fails.
    /// A rejected file is left in quarantine.
    pub fn process(
        &self,
        name: &str,
        expected: Option<&HashDigest>,
        validator: &EnvelopeValidator,
    ) -> Result<AcceptedMessage, IntakeError> {
        let record = self.promote(name, expected).inspect_err(|err| self.fs_failure(name, err))?;
        let raw = self.read(&record).inspect_err(|err| self.fs_failure(name, err))?;
        match validator.validate(&raw) {
            Ok(accepted) => {
                self.dispose(&record, Disposition::Accepted)?;
                Ok(accepted)
            }
            Err(err) => {
                self.dispose(&record, Disposition::Rejected)?;
                self.telemetry.record(
                    &TelemetryEvent::new(
                        COMPONENT,
                        "envelope_retained",
                        TelemetryOutcome::Rejected,
                    )
                    .with_kind(err.kind().as_str())
                    .with_detail(record.path.display().to_string()),
                );
                Err(err.into())
            }
        }
    }

    /// Records a promotion or read failure, which never reaches the audit log.
    fn fs_failure(&self, name: &str, err: &SafeFsError) {
        let event = match err.rejection_kind() {
            Some(kind) => {
                TelemetryEvent::new(COMPONENT, "intake_failed", TelemetryOutcome::Rejected)
                    .with_kind(kind.as_str())
            }
            None => TelemetryEvent::new(COMPONENT, "intake_failed", TelemetryOutcome::Error),
        };
        self.telemetry.record(&event.with_detail(format!("{name}: {err}")));
    }

    /// Lists inbound envelope file names in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`SafeFsError::Io`] when the inbound directory cannot be read.
    pub fn pending(&self) -> Result<Vec<String>, SafeFsError> {
        envelope_files(&self.inbound_dir)
    }

    /// Returns the number of envelope files retained in quarantine.
    ///
    /// # Errors
    ///
    /// Returns [`SafeFsError::Io`] when the quarantine directory cannot be
    /// read.
    pub fn retained(&self) -> Result<usize, SafeFsError> {
        envelope_files(&self.quarantine_dir).map(|files| files.len())
    }

    /// Processes every pending inbound file once.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError::QuarantineFull`] without touching the inbox
    /// when the retained-file limit is reached, and [`IntakeError::Fs`] when
    /// a directory cannot be listed. Per-file failures are reported in the
    /// returned [`PollReport`].
    pub fn poll_once(&self, validator: &EnvelopeValidator) -> Result<PollReport, IntakeError> {
        let count = self.retained()?;
        if count >= self.max_files {
            self.telemetry.record(
                &TelemetryEvent::new(COMPONENT, "quarantine_full", TelemetryOutcome::Error)
                    .with_detail(format!("{count} files, limit {}", self.max_files)),
            );
            return Err(IntakeError::QuarantineFull {
                count,
                max: self.max_files,
            });
        }
        let mut report = PollReport::default();
        for name in self.pending()? {
            match self.process(&name, None, validator) {
                Ok(accepted) => report.accepted.push(accepted),
                Err(err) => report.failed.push((name, err)),
            }
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Quarantine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quarantine")
            .field("inbound_dir", &self.inbound_dir)
            .field("quarantine_dir", &self.quarantine_dir)
            .field("max_files", &self.max_files)
            .finish_non_exhaustive()
    }
}

/// Quarantine file name for `name` on the given attempt.
///
/// Attempt 0 keeps the inbound name; later attempts number the copy and keep
/// the envelope suffix so retained copies are still counted.
fn quarantine_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.strip_suffix(ENVELOPE_FILE_SUFFIX) {
        Some(stem) => format!("{stem}.{attempt}{ENVELOPE_FILE_SUFFIX}"),
        None => format!("{name}.{attempt}"),
    }
}

/// Lists regular envelope files directly inside `dir`, sorted by name.
fn envelope_files(dir: &Path) -> Result<Vec<String>, SafeFsError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| SafeFsError::Io(format!("{}: {err}", dir.display())))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SafeFsError::Io(err.to_string()))?;
        let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
        if let Some(name) = entry.file_name().to_str()
            && is_file
            && name.ends_with(ENVELOPE_FILE_SUFFIX)
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;
    use crate::core::DEFAULT_HASH_ALGORITHM;
    use crate::core::hash_bytes;

    fn dirs() -> (tempfile::TempDir, Quarantine) {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("inbox")).unwrap();
        std::fs::create_dir(root.path().join("quarantine")).unwrap();
        let quarantine = Quarantine::new(root.path().join("inbox"), root.path().join("quarantine"));
        (root, quarantine)
    }

    #[test]
    fn promote_moves_and_records_digest() {
        let (root, quarantine) = dirs();
        std::fs::write(root.path().join("inbox/a.envelope.json"), b"{}").unwrap();
        let record = quarantine.promote("a.envelope.json", None).unwrap();
        assert_eq!(record.digest, hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}"));
        assert!(!root.path().join("inbox/a.envelope.json").exists());
        assert_eq!(quarantine.read(&record).unwrap(), b"{}");
        assert_eq!(quarantine.retained().unwrap(), 1);
    }

    #[test]
    fn promote_refuses_nested_names() {
        let (_root, quarantine) = dirs();
        let err = quarantine.promote("../a.envelope.json", None).unwrap_err();
        assert!(matches!(err, SafeFsError::PathEscape { .. }));
    }

    #[test]
    fn rejected_disposition_retains_file() {
        let (root, quarantine) = dirs();
        std::fs::write(root.path().join("inbox/b.envelope.json"), b"[]").unwrap();
        let record = quarantine.promote("b.envelope.json", None).unwrap();
        quarantine.dispose(&record, Disposition::Rejected).unwrap();
        assert!(record.path.exists());
        quarantine.dispose(&record, Disposition::Accepted).unwrap();
        assert!(!record.path.exists());
    }

    #[test]
    fn resubmitted_name_keeps_retained_copy() {
        let (root, quarantine) = dirs();
        let inbound = root.path().join("inbox/abc-1.envelope.json");
        std::fs::write(&inbound, b"original").unwrap();
        let first = quarantine.promote("abc-1.envelope.json", None).unwrap();
        quarantine.dispose(&first, Disposition::Rejected).unwrap();

        std::fs::write(&inbound, b"replacement").unwrap();
        let second = quarantine.promote("abc-1.envelope.json", None).unwrap();
        assert_ne!(second.path, first.path);
        assert_eq!(std::fs::read(&first.path).unwrap(), b"original");
        assert_eq!(std::fs::read(&second.path).unwrap(), b"replacement");
        assert!(second.path.ends_with("abc-1.1.envelope.json"));
        assert_eq!(quarantine.retained().unwrap(), 2);
    }

    #[test]
    fn oversized_inbound_file_is_not_promoted() {
        let (root, quarantine) = dirs();
        let quarantine = quarantine.with_max_read_bytes(8);
        std::fs::write(root.path().join("inbox/big.envelope.json"), vec![b' '; 64]).unwrap();
        let err = quarantine.promote("big.envelope.json", None).unwrap_err();
        assert!(matches!(err, SafeFsError::TooLarge { limit: 8, .. }));
        assert!(root.path().join("inbox/big.envelope.json").exists());
        assert_eq!(quarantine.retained().unwrap(), 0);
    }

    #[test]
    fn pending_lists_only_envelope_files() {
        let (root, quarantine) = dirs();
        std::fs::write(root.path().join("inbox/2.envelope.json"), b"{}").unwrap();
        std::fs::write(root.path().join("inbox/1.envelope.json"), b"{}").unwrap();
        std::fs::write(root.path().join("inbox/notes.txt"), b"").unwrap();
        assert_eq!(quarantine.pending().unwrap(), vec!["1.envelope.json", "2.envelope.json"]);
    }
}
