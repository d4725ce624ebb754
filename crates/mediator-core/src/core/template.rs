// crates/mediator-core/src/core/template.rs
// ============================================================================
// Module: Templates and Capability Sets
// Description: Trust store records governing payload shape and routing.
// Purpose: Define what the vault stores and what the authority signs.
// Dependencies: ed25519-dalek, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`TemplateEntry`] carries the JSON Schema for one payload type. Its
//! content hash is SHA-256 over its canonical encoding, and the authority
//! signs the [`TemplateManifest`] `{template_id, version, sha256_hash}` rather
//! than the schema itself. A [`CapabilitySet`] is default-deny: a missing or
//! empty allow-list admits nobody and a missing payload cap admits nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::canonical_json_bytes;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::TemplateId;
use crate::core::identifiers::TemplateVersion;
use crate::core::keys::KeyError;
use crate::core::keys::sign_bytes;
use crate::core::keys::verify_bytes;

// ============================================================================
// SECTION: Templates
// ============================================================================

/// Schema record for one payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateEntry {
    /// Template identifier.
    pub template_id: TemplateId,
    /// Template version.
    pub version: TemplateVersion,
    /// Free-form description for operators.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the payload.
    pub json_schema: Value,
}

impl TemplateEntry {
    /// Returns the SHA-256 of the canonical entry encoding.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical encoding fails.
    pub fn content_hash(&self) -> Result<HashDigest, HashError> {
        hash_canonical_json(DEFAULT_HASH_ALGORITHM, self)
    }

    /// Builds the manifest the authority signs for this entry.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical encoding fails.
    pub fn manifest(&self) -> Result<TemplateManifest, HashError> {
        Ok(TemplateManifest {
            template_id: self.template_id.clone(),
            version: self.version.clone(),
            sha256_hash: self.content_hash()?.value,
        })
    }
}

/// Authority-signed identity of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateManifest {
    /// Template identifier.
    pub template_id: TemplateId,
    /// Template version.
    pub version: TemplateVersion,
    /// Lowercase hex SHA-256 of the canonical template entry.
    pub sha256_hash: String,
}

impl TemplateManifest {
    /// Signs the canonical manifest encoding.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical encoding fails.
    pub fn sign(&self, key: &SigningKey) -> Result<String, HashError> {
        Ok(sign_bytes(key, &canonical_json_bytes(self)?))
    }

    /// Verifies a hex authority signature over the canonical manifest.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when encoding fails or the signature is invalid.
    pub fn verify(&self, key: &VerifyingKey, signature_hex: &str) -> Result<(), KeyError> {
        let bytes = canonical_json_bytes(self)
            .map_err(|err| KeyError::MalformedSignature(err.to_string()))?;
        verify_bytes(key, &bytes, signature_hex)
    }
}

// ============================================================================
// SECTION: Capability Sets
// ============================================================================

/// Rolling-window message quota per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaPolicy {
    /// Maximum accepted messages inside one window.
    pub max_messages: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
}

impl QuotaPolicy {
    /// One thousand messages per hour.
    pub const DEFAULT: Self = Self {
        max_messages: 1000,
        window_seconds: 3600,
    };

    /// Returns the window length in milliseconds.
    #[must_use]
    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-template routing and volume policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilitySet {
    /// Template this policy governs.
    pub template_id: TemplateId,
    /// Template version this policy governs.
    pub version: TemplateVersion,
    /// Agents permitted to send this template.
    #[serde(default)]
    pub allowed_senders: Vec<AgentId>,
    /// Agents permitted to receive this template.
    #[serde(default)]
    pub allowed_receivers: Vec<AgentId>,
    /// Maximum canonical payload size in bytes.
    #[serde(default)]
    pub max_payload_bytes: Option<u64>,
    /// Optional quota overriding the validator default.
    #[serde(default)]
    pub per_sender_quota: Option<QuotaPolicy>,
}

impl CapabilitySet {
    /// Returns true when `sender` is explicitly allowed.
    #[must_use]
    pub fn allows_sender(&self, sender: &AgentId) -> bool {
        self.allowed_senders.contains(sender)
    }

    /// Returns true when `receiver` is explicitly allowed.
    #[must_use]
    pub fn allows_receiver(&self, receiver: &AgentId) -> bool {
        self.allowed_receivers.contains(receiver)
    }
}
