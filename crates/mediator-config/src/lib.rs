// crates/mediator-config/src/lib.rs
// ============================================================================
// Module: Mediator Config Library
// Description: Canonical config model, validation, and runtime assembly.
// Purpose: Single source of truth for mediator.toml semantics.
// Dependencies: mediator-core, mediator-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `mediator-config` defines the configuration model for one mediator agent
//! and builds the runtime pieces (audit log, vault, validator, `ToolGate`,
//! quarantine, telemetry) from it. Validation is strict and fails closed:
//! key pins and limits are always explicit values in the file.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod assembly;
pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use assembly::*;
pub use config::*;
