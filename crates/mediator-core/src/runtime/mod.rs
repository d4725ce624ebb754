// crates/mediator-core/src/runtime/mod.rs
// ============================================================================
// Module: Mediator Runtime
// Description: Validator, ToolGate, intake, delivery, and telemetry.
// Purpose: Enforce message admission and capability use over the interfaces.
// Dependencies: crate::{core, interfaces, audit, fs}
// ============================================================================

//! ## Overview
//! Runtime modules are synchronous and hold no persistent state of their own.
//! Replay protection lives in the audit store, trust data in the vault, and
//! every durable file change goes through the safe filesystem helpers.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod outbox;
pub mod plan;
pub mod quarantine;
pub mod telemetry;
pub mod toolgate;
pub mod tools;
pub mod validator;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use outbox::Outbox;
pub use outbox::OutboxError;
pub use plan::ExecutionPlan;
pub use plan::PLAN_SCHEMA_VERSION;
pub use plan::PlanDraft;
pub use plan::ToolCall;
pub use quarantine::Disposition;
pub use quarantine::IntakeError;
pub use quarantine::PollReport;
pub use quarantine::Quarantine;
pub use quarantine::QuarantineRecord;
pub use telemetry::FileTelemetrySink;
pub use telemetry::NoopTelemetrySink;
pub use telemetry::StderrTelemetrySink;
pub use telemetry::TelemetryEvent;
pub use telemetry::TelemetryOutcome;
pub use telemetry::TelemetrySink;
pub use toolgate::ExecutionContext;
pub use toolgate::ToolGate;
pub use toolgate::ToolGateError;
pub use toolgate::ToolResult;
pub use tools::ReadFileTool;
pub use tools::WriteFileTool;
pub use validator::AcceptedMessage;
pub use validator::CapabilityDenial;
pub use validator::EnvelopeValidator;
pub use validator::ValidationError;
pub use validator::ValidatorConfig;
