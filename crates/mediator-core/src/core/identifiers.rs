// crates/mediator-core/src/core/identifiers.rs
// ============================================================================
// Module: Mediator Identifiers
// Description: Canonical opaque identifiers for envelopes, agents, and plans.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: getrandom, serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque and serialize as plain strings. They carry no
//! validation of their own; the validator and the vault enforce the rules
//! that matter at their boundaries. Envelope, plan, and tool-call ids can be
//! freshly generated from OS randomness.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque string identifier newtype.
macro_rules! opaque_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

opaque_identifier!(
    /// Globally unique identifier of one envelope instance.
    EnvelopeId
);

opaque_identifier!(
    /// Correlates one logical unit of work across hops.
    SessionId
);

opaque_identifier!(
    /// Identity of a pipeline participant (sender, receiver, or issuer).
    AgentId
);

opaque_identifier!(
    /// Identifier of a template held in the trust store.
    TemplateId
);

opaque_identifier!(
    /// Version label of a template or capability set.
    TemplateVersion
);

opaque_identifier!(
    /// Identifier of a signed execution plan.
    PlanId
);

opaque_identifier!(
    /// Identifier of one call inside an execution plan.
    ToolCallId
);

opaque_identifier!(
    /// Registered tool name.
    ToolName
);

// ============================================================================
// SECTION: Generation
// ============================================================================

/// Failure to obtain randomness for a fresh identifier.
#[derive(Debug, Error)]
#[error("identifier generation failed: {0}")]
pub struct IdentifierError(String);

impl EnvelopeId {
    /// Generates a fresh random envelope identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the OS random source is unavailable.
    pub fn generate() -> Result<Self, IdentifierError> {
        random_token().map(Self)
    }
}

impl PlanId {
    /// Generates a fresh random plan identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the OS random source is unavailable.
    pub fn generate() -> Result<Self, IdentifierError> {
        random_token().map(Self)
    }
}

impl ToolCallId {
    /// Generates a fresh random tool call identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the OS random source is unavailable.
    pub fn generate() -> Result<Self, IdentifierError> {
        random_token().map(Self)
    }
}

/// Renders 16 random bytes as a UUID-v4-shaped token.
fn random_token() -> Result<String, IdentifierError> {
    let mut bytes = [0_u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|err| IdentifierError(err.to_string()))?;
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex = hex::encode(bytes);
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0 .. 8],
        &hex[8 .. 12],
        &hex[12 .. 16],
        &hex[16 .. 20],
        &hex[20 .. 32]
    ))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
