// crates/mediator-core/src/core/rejection.rs
// ============================================================================
// Module: Rejection Taxonomy
// Description: Stable classification of every refusal the mediator issues.
// Purpose: Give audit records and callers one label set for rejections.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every validator, `ToolGate`, and safe-filesystem failure maps to exactly one
//! [`RejectionKind`]. The snake_case label from [`RejectionKind::as_str`] is
//! what lands in audit `details` and telemetry, so labels never change once
//! published.

use serde::Deserialize;
use serde::Serialize;

/// Classified rejection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Raw message exceeds the size cap.
    SizeExceeded,
    /// Raw message repeats an object key.
    DuplicateKey,
    /// Raw message is not a well-formed envelope.
    ParseError,
    /// Envelope signature does not verify for the claimed sender.
    SignatureInvalid,
    /// Envelope is addressed to another agent.
    ReceiverMismatch,
    /// Template or capability set is absent from the trust store.
    EntryNotFound,
    /// Trust store could not be read.
    TrustStoreUnavailable,
    /// Declared template hash differs from the stored template.
    TemplateHashMismatch,
    /// Authority signature over the template manifest is invalid.
    AuthoritySignatureInvalid,
    /// Payload does not satisfy the template schema.
    PayloadSchemaInvalid,
    /// Capability set denies the message.
    CapabilityDenied,
    /// Envelope id was already accepted.
    ReplayDetected,
    /// Audit store failed for a reason other than replay.
    AuditUnavailable,
    /// Authority key fingerprint differs from the pin.
    KeyPinMismatch,
    /// Plan issuer key fingerprint differs from the pin.
    IssuerKeyMismatch,
    /// Execution plan signature is invalid.
    PlanSignatureInvalid,
    /// Plan names a tool that is not registered.
    UnknownTool,
    /// Tool arguments do not satisfy the tool schema.
    ArgSchemaInvalid,
    /// A path would leave its base directory or crosses a symlink.
    PathEscape,
    /// Content hash differs from the expected value.
    IntegrityMismatch,
    /// A registered tool failed while running.
    ToolFailed,
}

impl RejectionKind {
    /// Returns the stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SizeExceeded => "size_exceeded",
            Self::DuplicateKey => "duplicate_key",
            Self::ParseError => "parse_error",
            Self::SignatureInvalid => "signature_invalid",
            Self::ReceiverMismatch => "receiver_mismatch",
            Self::EntryNotFound => "entry_not_found",
            Self::TrustStoreUnavailable => "trust_store_unavailable",
            Self::TemplateHashMismatch => "template_hash_mismatch",
            Self::AuthoritySignatureInvalid => "authority_signature_invalid",
            Self::PayloadSchemaInvalid => "payload_schema_invalid",
            Self::CapabilityDenied => "capability_denied",
            Self::ReplayDetected => "replay_detected",
            Self::AuditUnavailable => "audit_unavailable",
            Self::KeyPinMismatch => "key_pin_mismatch",
            Self::IssuerKeyMismatch => "issuer_key_mismatch",
            Self::PlanSignatureInvalid => "plan_signature_invalid",
            Self::UnknownTool => "unknown_tool",
            Self::ArgSchemaInvalid => "arg_schema_invalid",
            Self::PathEscape => "path_escape",
            Self::IntegrityMismatch => "integrity_mismatch",
            Self::ToolFailed => "tool_failed",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
