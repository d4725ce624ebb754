// crates/mediator-core/src/interfaces/mod.rs
// ============================================================================
// Module: Mediator Interfaces
// Description: Backend-agnostic seams for trust data, auditing, and tools.
// Purpose: Define the contracts the validator and ToolGate are built on.
// Dependencies: crate::core, crate::audit, crate::fs
// ============================================================================

//! ## Overview
//! The validator and `ToolGate` depend only on the traits in this module.
//! Implementations must fail closed: a missing entry, an unreadable store, or
//! an ambiguous result is an error, never a default.
//!
//! Every trait is synchronous. Callers that need bounded latency impose
//! their own timeouts around these calls.

// ============================================================================
// SECTION: Imports
// ============================================================================

use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditRecord;
use crate::core::AgentId;
use crate::core::CapabilitySet;
use crate::core::EnvelopeId;
use crate::core::PlanId;
use crate::core::SessionId;
use crate::core::TemplateEntry;
use crate::core::TemplateId;
use crate::core::TemplateVersion;
use crate::core::ToolCallId;
use crate::fs::SafeFsError;

// ============================================================================
// SECTION: Trust Store
// ============================================================================

/// Kinds of records held in the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Template schema record.
    Template,
    /// Capability set record.
    CapabilitySet,
}

impl EntryKind {
    /// Returns the vault subdirectory name for the kind.
    #[must_use]
    pub const fn directory(self) -> &'static str {
        match self {
            Self::Template => "templates",
            Self::CapabilitySet => "capsets",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Template => f.write_str("template"),
            Self::CapabilitySet => f.write_str("capability set"),
        }
    }
}

/// Trust store and vault failures.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No record exists for the requested id and version.
    #[error("{kind} not found: {template_id} v{version}")]
    EntryNotFound {
        /// Requested record kind.
        kind: EntryKind,
        /// Requested template id.
        template_id: TemplateId,
        /// Requested version.
        version: TemplateVersion,
    },
    /// Authority key fingerprint differs from the pin.
    #[error("authority key pin mismatch: expected {expected}, found {actual}")]
    KeyPinMismatch {
        /// Pinned fingerprint.
        expected: String,
        /// Fingerprint of the loaded key.
        actual: String,
    },
    /// Vault directory is writable by this process.
    #[error("vault directory is writable: {0}")]
    WritableVault(String),
    /// Authority key or identity file problem.
    #[error("vault key error: {0}")]
    Key(String),
    /// Backend could not produce a record.
    #[error("vault backend error: {0}")]
    Backend(String),
    /// Stored record is malformed or does not match its location.
    #[error("invalid vault entry: {0}")]
    Invalid(String),
    /// Publishing was not confirmed by the operator.
    #[error("publish not confirmed: {0}")]
    Unconfirmed(String),
}

/// Read-only provider of templates and capability sets.
pub trait TrustStore: Send + Sync {
    /// Resolves the template for `template_id` at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EntryNotFound`] when absent, other variants when
    /// the store cannot be read.
    fn resolve_template(
        &self,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<TemplateEntry, VaultError>;

    /// Resolves the capability set for `template_id` at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EntryNotFound`] when absent, other variants when
    /// the store cannot be read.
    fn resolve_capabilities(
        &self,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<CapabilitySet, VaultError>;

    /// Returns the pinned authority verification key.
    fn authority_key(&self) -> &VerifyingKey;
}

/// Raw record source behind a vault.
pub trait VaultBackend: Send + Sync {
    /// Returns the plaintext bytes of a record, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Backend`] when the record exists but cannot be
    /// read or decrypted.
    fn fetch(
        &self,
        kind: EntryKind,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<Option<Vec<u8>>, VaultError>;
}

// ============================================================================
// SECTION: Audit Log
// ============================================================================

/// Audit store failures.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A `validated` event already exists for the envelope id.
    #[error("validated event already recorded for envelope {0}")]
    ConstraintViolation(EnvelopeId),
    /// Storage transport failed.
    #[error("audit storage error: {0}")]
    Storage(String),
    /// Event could not be encoded or decoded.
    #[error("invalid audit event: {0}")]
    Invalid(String),
}

/// Append-only audit event store.
///
/// Implementations enforce at most one `validated` event per envelope id at
/// the storage layer, atomically with the insert.
pub trait AuditLog: Send + Sync {
    /// Appends `event`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ConstraintViolation`] when `event` is a second
    /// `validated` event for its envelope id, other variants on storage
    /// failure.
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Returns true when a `validated` event exists for `envelope_id`.
    ///
    /// Advisory only; the constrained insert in [`AuditLog::emit`] is the
    /// authority on replay.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    fn has_envelope_id(&self, envelope_id: &EnvelopeId) -> Result<bool, AuditError>;

    /// Counts `validated` events from `sender` at or after `since_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    fn count_validated_since(&self, sender: &AgentId, since_ms: i64) -> Result<u64, AuditError>;

    /// Returns up to `limit` most recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    fn recent_events(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;

    /// Returns every event recorded for `envelope_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    fn events_for_envelope(&self, envelope_id: &EnvelopeId) -> Result<Vec<AuditRecord>, AuditError>;
}

// ============================================================================
// SECTION: Tools
// ============================================================================

/// Per-call context handed to a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    /// Plan authorizing the call.
    pub plan_id: PlanId,
    /// Call within the plan.
    pub tool_call_id: ToolCallId,
    /// Session the plan belongs to.
    pub session_id: SessionId,
    /// Agent that issued the plan.
    pub issuer_id: AgentId,
    /// Caller-supplied context for the run.
    pub extra: Value,
}

/// Tool execution failures.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A path argument was refused by the safe filesystem.
    #[error(transparent)]
    Path(#[from] SafeFsError),
    /// Arguments passed the schema but are still unusable.
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    /// The tool ran and failed.
    #[error("tool failed: {0}")]
    Failed(String),
}

/// Capability invoked by `ToolGate` under a verified plan.
pub trait Tool: Send + Sync {
    /// Runs the tool with schema-validated arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the tool refuses or fails.
    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}
