// crates/mediator-store-sqlite/src/lib.rs
// ============================================================================
// Module: Mediator SQLite Store
// Description: SQLite-backed audit log for the mediator.
// Purpose: Provide the durable, multi-process replay guard.
// Dependencies: mediator-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteAuditLog`], the durable implementation of the
//! core `AuditLog` trait. Independent processes may share one database file.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_DETAILS_BYTES;
pub use store::SqliteAuditConfig;
pub use store::SqliteAuditError;
pub use store::SqliteAuditLog;
pub use store::SqliteJournalMode;
pub use store::SqliteSyncMode;
