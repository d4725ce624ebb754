// crates/mediator-core/src/lib.rs
// ============================================================================
// Module: Mediator Core Library
// Description: Public API surface for the mediator core.
// Purpose: Expose codec, trust, audit, filesystem, and runtime components.
// Dependencies: crate::{core, interfaces, audit, vault, fs, runtime}
// ============================================================================

//! ## Overview
//! The mediator admits signed envelopes between agents and gates tool use
//! behind issuer-signed plans. Admission runs a fixed, fail-closed sequence
//! of checks against a key-pinned vault; an audit log with a storage-level
//! uniqueness constraint is the only replay guard. Every component is
//! synchronous and backend-agnostic, integrating through the traits in
//! [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod core;
pub mod fs;
pub mod interfaces;
pub mod runtime;
pub mod vault;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use audit::AuditEvent;
pub use audit::AuditEventKind;
pub use audit::AuditRecord;
pub use audit::InMemoryAuditLog;
pub use fs::SafeFsError;
pub use fs::atomic_move_then_verify;
pub use fs::move_then_verify_bounded;
pub use fs::move_then_verify_unpinned;
pub use fs::read_file_nofollow;
pub use fs::resolve_safe_path;
pub use fs::write_atomic;
pub use interfaces::AuditError;
pub use interfaces::AuditLog;
pub use interfaces::EntryKind;
pub use interfaces::Tool;
pub use interfaces::ToolContext;
pub use interfaces::ToolError;
pub use interfaces::TrustStore;
pub use interfaces::VaultBackend;
pub use interfaces::VaultError;
pub use runtime::AcceptedMessage;
pub use runtime::CapabilityDenial;
pub use runtime::Disposition;
pub use runtime::EnvelopeValidator;
pub use runtime::ExecutionContext;
pub use runtime::ExecutionPlan;
pub use runtime::IntakeError;
pub use runtime::Outbox;
pub use runtime::OutboxError;
pub use runtime::PlanDraft;
pub use runtime::PollReport;
pub use runtime::Quarantine;
pub use runtime::QuarantineRecord;
pub use runtime::ReadFileTool;
pub use runtime::TelemetryEvent;
pub use runtime::TelemetryOutcome;
pub use runtime::TelemetrySink;
pub use runtime::ToolCall;
pub use runtime::ToolGate;
pub use runtime::ToolGateError;
pub use runtime::ToolResult;
pub use runtime::ValidationError;
pub use runtime::ValidatorConfig;
pub use runtime::WriteFileTool;
pub use vault::AgeCli;
pub use vault::AgeCliBackend;
pub use vault::AgeEncryptor;
pub use vault::InMemoryBackend;
pub use vault::PublishedTemplate;
pub use vault::Vault;
pub use vault::install_published;
pub use vault::publish_template;
