// crates/mediator-core/src/core/envelope.rs
// ============================================================================
// Module: Envelope
// Description: Signed unit of inter-agent communication.
// Purpose: Define the envelope wire form and its signing discipline.
// Dependencies: ed25519-dalek, serde, serde_json
// ============================================================================

//! ## Overview
//! An [`Envelope`] is built from an [`EnvelopeDraft`] by signing the canonical
//! encoding of every field except `signature`. Because `human_readable` is
//! part of the signed view, annotations cannot be altered or stripped without
//! breaking verification. Unknown fields are rejected at parse time so that
//! nothing unsigned can ride along with a message.

// ============================================================================
// SECTION: Imports
// ============================================================================

use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::HashError;
use crate::core::hashing::canonical_json_bytes;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::EnvelopeId;
use crate::core::identifiers::IdentifierError;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TemplateId;
use crate::core::identifiers::TemplateVersion;
use crate::core::keys::KeyError;
use crate::core::keys::sign_bytes;
use crate::core::keys::verify_bytes;
use crate::core::time::is_rfc3339;
use crate::core::time::now_rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Envelope wire format version.
pub const ENVELOPE_FORMAT_VERSION: &str = "1.0";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Envelope construction, parsing, and signing failures.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The value does not have the envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// Canonical encoding failed.
    #[error(transparent)]
    Codec(#[from] HashError),
    /// Signing or verification failed.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// A fresh identifier could not be generated.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Reference to the template governing an envelope payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateRef {
    /// Template identifier.
    pub template_id: TemplateId,
    /// Template version.
    pub version: TemplateVersion,
    /// Declared lowercase hex SHA-256 of the canonical template entry.
    pub sha256_hash: String,
    /// Hex authority signature over the template manifest.
    pub authority_signature: String,
}

/// Unsigned envelope contents.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeDraft {
    /// Unique envelope identifier.
    pub envelope_id: EnvelopeId,
    /// Session correlating hops of one unit of work.
    pub session_id: SessionId,
    /// RFC 3339 creation time.
    pub timestamp_utc: String,
    /// Originating agent.
    pub sender_id: AgentId,
    /// Intended receiving agent.
    pub receiver_id: AgentId,
    /// Operator-facing annotation.
    pub human_readable: String,
    /// Governing template.
    pub template_ref: TemplateRef,
    /// Structured payload.
    pub payload: Map<String, Value>,
}

impl EnvelopeDraft {
    /// Creates a draft with a fresh envelope id and the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Identifier`] when id generation fails.
    pub fn new(
        session_id: SessionId,
        sender_id: AgentId,
        receiver_id: AgentId,
        template_ref: TemplateRef,
        payload: Map<String, Value>,
        human_readable: impl Into<String>,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            envelope_id: EnvelopeId::generate()?,
            session_id,
            timestamp_utc: now_rfc3339(),
            sender_id,
            receiver_id,
            human_readable: human_readable.into(),
            template_ref,
            payload,
        })
    }

    /// Signs the draft.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Codec`] when canonical encoding fails.
    pub fn sign(self, key: &SigningKey) -> Result<Envelope, EnvelopeError> {
        let mut envelope = Envelope {
            version: ENVELOPE_FORMAT_VERSION.to_string(),
            envelope_id: self.envelope_id,
            session_id: self.session_id,
            timestamp_utc: self.timestamp_utc,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            human_readable: self.human_readable,
            template_ref: self.template_ref,
            payload: self.payload,
            signature: String::new(),
        };
        envelope.signature = sign_bytes(key, &envelope.signing_bytes()?);
        Ok(envelope)
    }
}

/// Signed envelope as it travels between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Wire format version.
    pub version: String,
    /// Unique envelope identifier.
    pub envelope_id: EnvelopeId,
    /// Session correlating hops of one unit of work.
    pub session_id: SessionId,
    /// RFC 3339 creation time.
    pub timestamp_utc: String,
    /// Originating agent.
    pub sender_id: AgentId,
    /// Intended receiving agent.
    pub receiver_id: AgentId,
    /// Operator-facing annotation, covered by the signature.
    pub human_readable: String,
    /// Governing template.
    pub template_ref: TemplateRef,
    /// Structured payload.
    pub payload: Map<String, Value>,
    /// Hex Ed25519 signature over every other field.
    pub signature: String,
}

/// Borrowed view of the signed fields.
#[derive(Serialize)]
struct SignedView<'a> {
    /// Wire format version.
    version: &'a str,
    /// Envelope identifier.
    envelope_id: &'a EnvelopeId,
    /// Session identifier.
    session_id: &'a SessionId,
    /// Creation time.
    timestamp_utc: &'a str,
    /// Sender.
    sender_id: &'a AgentId,
    /// Receiver.
    receiver_id: &'a AgentId,
    /// Annotation.
    human_readable: &'a str,
    /// Template reference.
    template_ref: &'a TemplateRef,
    /// Payload.
    payload: &'a Map<String, Value>,
}

impl Envelope {
    /// Converts a strictly parsed JSON value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] for missing or unknown fields, an
    /// unsupported version, or a timestamp that is not RFC 3339.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_value(value).map_err(|err| EnvelopeError::Malformed(err.to_string()))?;
        if envelope.version != ENVELOPE_FORMAT_VERSION {
            return Err(EnvelopeError::Malformed(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if !is_rfc3339(&envelope.timestamp_utc) {
            return Err(EnvelopeError::Malformed("timestamp_utc is not rfc 3339".to_string()));
        }
        Ok(envelope)
    }

    /// Returns the canonical bytes covered by the signature.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Codec`] when canonical encoding fails.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let view = SignedView {
            version: &self.version,
            envelope_id: &self.envelope_id,
            session_id: &self.session_id,
            timestamp_utc: &self.timestamp_utc,
            sender_id: &self.sender_id,
            receiver_id: &self.receiver_id,
            human_readable: &self.human_readable,
            template_ref: &self.template_ref,
            payload: &self.payload,
        };
        Ok(canonical_json_bytes(&view)?)
    }

    /// Verifies the envelope signature against `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Key`] when the signature is malformed or does
    /// not verify.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), EnvelopeError> {
        verify_bytes(key, &self.signing_bytes()?, &self.signature)?;
        Ok(())
    }

    /// Serializes the envelope for writing to an inbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec_pretty(self).map_err(|err| EnvelopeError::Malformed(err.to_string()))
    }

    /// Builds and signs the next hop of this envelope.
    ///
    /// The hop keeps the session, template, and payload but receives a fresh
    /// envelope id so it can be validated once at its own receiver.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when id generation or signing fails.
    pub fn forward(
        &self,
        sender_id: AgentId,
        receiver_id: AgentId,
        key: &SigningKey,
    ) -> Result<Self, EnvelopeError> {
        EnvelopeDraft::new(
            self.session_id.clone(),
            sender_id,
            receiver_id,
            self.template_ref.clone(),
            self.payload.clone(),
            self.human_readable.clone(),
        )?
        .sign(key)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::*;

    fn draft() -> EnvelopeDraft {
        let payload = json!({"title": "Hello"}).as_object().unwrap().clone();
        EnvelopeDraft {
            envelope_id: EnvelopeId::new("env-1"),
            session_id: SessionId::new("session-1"),
            timestamp_utc: "2026-01-01T00:00:00Z".to_string(),
            sender_id: AgentId::new("intake"),
            receiver_id: AgentId::new("sanitizer"),
            human_readable: "new post".to_string(),
            template_ref: TemplateRef {
                template_id: TemplateId::new("blog_post_v1"),
                version: TemplateVersion::new("1"),
                sha256_hash: "0".repeat(64),
                authority_signature: String::new(),
            },
            payload,
        }
    }

    #[test]
    fn human_readable_is_covered_by_signature() {
        let key = SigningKey::from_bytes(&[9_u8; 32]);
        let mut envelope = draft().sign(&key).unwrap();
        assert!(envelope.verify(&key.verifying_key()).is_ok());
        envelope.human_readable.push('!');
        assert!(envelope.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let key = SigningKey::from_bytes(&[9_u8; 32]);
        let mut value = serde_json::to_value(draft().sign(&key).unwrap()).unwrap();
        value["extra"] = json!(true);
        assert!(matches!(Envelope::from_value(value), Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn forward_keeps_session_with_new_identity() {
        let key = SigningKey::from_bytes(&[9_u8; 32]);
        let original = draft().sign(&key).unwrap();
        let hop = original
            .forward(AgentId::new("sanitizer"), AgentId::new("formatter"), &key)
            .unwrap();
        assert_eq!(hop.session_id, original.session_id);
        assert_ne!(hop.envelope_id, original.envelope_id);
        assert!(hop.verify(&key.verifying_key()).is_ok());
    }
}
