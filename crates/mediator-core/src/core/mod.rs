// crates/mediator-core/src/core/mod.rs
// ============================================================================
// Module: Mediator Core Types
// Description: Codec, identifiers, keys, envelopes, and rejection taxonomy.
// Purpose: Group the data model shared by every mediator component.
// Dependencies: crate::core::*
// ============================================================================

//! ## Overview
//! Core types are pure data (envelopes, templates, capability sets) plus the
//! cryptographic and canonical-encoding helpers that operate on them. Nothing
//! here performs I/O except key loading.

pub mod envelope;
pub mod hashing;
pub mod identifiers;
pub mod json;
pub mod keys;
pub mod rejection;
pub mod schema;
pub mod template;
pub mod time;

pub use envelope::*;
pub use hashing::*;
pub use identifiers::*;
pub use json::*;
pub use keys::*;
pub use rejection::*;
pub use schema::*;
pub use template::*;
pub use time::*;
