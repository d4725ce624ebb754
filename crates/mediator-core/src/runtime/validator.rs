// crates/mediator-core/src/runtime/validator.rs
// ============================================================================
// Module: Envelope Validator
// Description: Ordered, fail-closed admission pipeline for inbound envelopes.
// Purpose: Turn raw bytes into an accepted message or a classified rejection.
// Dependencies: crate::core, crate::interfaces, crate::audit, serde_json
// ============================================================================

//! ## Overview
//! [`EnvelopeValidator::validate`] runs twelve gates in a fixed order and
//! stops at the first failure:
//!
//! 1. raw size cap
//! 2. strict parse with duplicate-key rejection
//! 3. sender signature
//! 4. receiver is this agent (before any trust store access)
//! 5. template resolution
//! 6. template content hash
//! 7. authority signature over the template manifest
//! 8. capability set resolution
//! 9. capability set integrity (trusted through the vault chain)
//! 10. payload schema, closed against unknown fields
//! 11. capability constraints: sender, receiver, payload size, quota
//! 12. constrained insert of the `validated` audit event (replay guard)
//!
//! Every rejection is recorded as a `rejected` audit event. The validator
//! keeps no state of its own; replay protection lives in the audit store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditEventKind;
use crate::core::AgentId;
use crate::core::CapabilitySet;
use crate::core::Envelope;
use crate::core::EnvelopeId;
use crate::core::QuotaPolicy;
use crate::core::RejectionKind;
use crate::core::SenderKeyring;
use crate::core::StrictJsonError;
use crate::core::TemplateEntry;
use crate::core::TemplateManifest;
use crate::core::canonical_json_bytes;
use crate::core::compile_closed_schema;
use crate::core::parse_strict;
use crate::core::unix_millis;
use crate::interfaces::AuditError;
use crate::interfaces::AuditLog;
use crate::interfaces::TrustStore;
use crate::interfaces::VaultError;
use crate::runtime::telemetry::NoopTelemetrySink;
use crate::runtime::telemetry::TelemetryEvent;
use crate::runtime::telemetry::TelemetryOutcome;
use crate::runtime::telemetry::TelemetrySink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default raw envelope size cap (1 MiB).
pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// Telemetry component name.
const COMPONENT: &str = "validator";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Validator settings supplied at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Identity of the agent this validator admits messages for.
    pub own_id: AgentId,
    /// Raw envelope size cap in bytes.
    pub max_envelope_bytes: usize,
    /// Quota applied when a capability set names none.
    pub default_quota: QuotaPolicy,
}

impl ValidatorConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub fn new(own_id: impl Into<AgentId>) -> Self {
        Self {
            own_id: own_id.into(),
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
            default_quota: QuotaPolicy::DEFAULT,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reason a capability set denied a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityDenial {
    /// Sender is not on the allow-list.
    #[error("sender {0} is not allowed")]
    SenderNotAllowed(AgentId),
    /// Receiver is not on the allow-list.
    #[error("receiver {0} is not allowed")]
    ReceiverNotAllowed(AgentId),
    /// Canonical payload is larger than permitted.
    #[error("payload is {actual} bytes, limit {max}")]
    PayloadTooLarge {
        /// Canonical payload size.
        actual: u64,
        /// Permitted size.
        max: u64,
    },
    /// Sender exhausted its quota for the current window.
    #[error("sender quota exhausted: {count} of {max} in window")]
    QuotaExceeded {
        /// Messages already accepted in the window.
        count: u64,
        /// Permitted messages per window.
        max: u64,
    },
}

/// Classified validation failure.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Raw bytes exceed the size cap.
    #[error("envelope is {actual} bytes, limit {max}")]
    SizeExceeded {
        /// Raw size.
        actual: usize,
        /// Permitted size.
        max: usize,
    },
    /// Raw bytes repeat an object key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// Raw bytes are not a well-formed envelope.
    #[error("parse error: {0}")]
    Parse(String),
    /// Signature does not verify for the claimed sender.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
    /// Envelope is addressed to another agent.
    #[error("receiver mismatch: addressed to {actual}, this agent is {expected}")]
    ReceiverMismatch {
        /// This agent.
        expected: AgentId,
        /// Addressed receiver.
        actual: AgentId,
    },
    /// Template or capability set is absent.
    #[error("{0}")]
    EntryNotFound(String),
    /// Trust store failed or holds an unusable record.
    #[error("trust store unavailable: {0}")]
    TrustStoreUnavailable(String),
    /// Declared template hash differs from the stored template.
    #[error("template hash mismatch: declared {declared}, stored {actual}")]
    TemplateHashMismatch {
        /// Hash claimed by the envelope.
        declared: String,
        /// Hash of the stored template.
        actual: String,
    },
    /// Authority signature over the manifest is invalid.
    #[error("authority signature invalid: {0}")]
    AuthoritySignatureInvalid(String),
    /// Payload fails the template schema.
    #[error("payload schema invalid: {0}")]
    PayloadSchemaInvalid(String),
    /// Capability set denies the message.
    #[error("capability denied: {0}")]
    CapabilityDenied(CapabilityDenial),
    /// A `validated` event already exists for the envelope id.
    #[error("replay detected for envelope {0}")]
    ReplayDetected(EnvelopeId),
    /// Audit store failed for a reason other than replay.
    #[error("audit unavailable: {0}")]
    AuditUnavailable(String),
}

impl ValidationError {
    /// Returns the stable rejection kind.
    #[must_use]
    pub const fn kind(&self) -> RejectionKind {
        match self {
            Self::SizeExceeded {
                ..
            } => RejectionKind::SizeExceeded,
            Self::DuplicateKey(_) => RejectionKind::DuplicateKey,
            Self::Parse(_) => RejectionKind::ParseError,
            Self::SignatureInvalid(_) => RejectionKind::SignatureInvalid,
            Self::ReceiverMismatch {
                ..
            } => RejectionKind::ReceiverMismatch,
            Self::EntryNotFound(_) => RejectionKind::EntryNotFound,
            Self::TrustStoreUnavailable(_) => RejectionKind::TrustStoreUnavailable,
            Self::TemplateHashMismatch {
                ..
            } => RejectionKind::TemplateHashMismatch,
            Self::AuthoritySignatureInvalid(_) => RejectionKind::AuthoritySignatureInvalid,
            Self::PayloadSchemaInvalid(_) => RejectionKind::PayloadSchemaInvalid,
            Self::CapabilityDenied(_) => RejectionKind::CapabilityDenied,
            Self::ReplayDetected(_) => RejectionKind::ReplayDetected,
            Self::AuditUnavailable(_) => RejectionKind::AuditUnavailable,
        }
    }
}

impl From<StrictJsonError> for ValidationError {
    fn from(err: StrictJsonError) -> Self {
        match err {
            StrictJsonError::DuplicateKey {
                key,
            } => Self::DuplicateKey(key),
            other => Self::Parse(other.to_string()),
        }
    }
}

impl From<VaultError> for ValidationError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::EntryNotFound {
                ..
            } => Self::EntryNotFound(err.to_string()),
            other => Self::TrustStoreUnavailable(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Accepted Message
// ============================================================================

/// Envelope that passed every gate, with the records it was checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedMessage {
    /// The accepted envelope.
    pub envelope: Envelope,
    /// Template the payload conforms to.
    pub template: TemplateEntry,
    /// Capability set that admitted the message.
    pub capabilities: CapabilitySet,
}

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Twelve-gate envelope validator.
pub struct EnvelopeValidator {
    /// Limits and identity.
    config: ValidatorConfig,
    /// Template and capability source.
    trust_store: Arc<dyn TrustStore>,
    /// Audit trail and replay guard.
    audit: Arc<dyn AuditLog>,
    /// Sender verification keys.
    senders: SenderKeyring,
    /// Operational event sink.
    telemetry: Arc<dyn TelemetrySink>,
}

impl EnvelopeValidator {
    /// Creates a validator with telemetry disabled.
    #[must_use]
    pub fn new(
        config: ValidatorConfig,
        trust_store: Arc<dyn TrustStore>,
        audit: Arc<dyn AuditLog>,
        senders: SenderKeyring,
    ) -> Self {
        Self {
            config,
            trust_store,
            audit,
            senders,
            telemetry: Arc::new(NoopTelemetrySink),
        }
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the validator configuration.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Runs all twelve gates over raw envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns the first failing gate's [`ValidationError`]. The rejection
    /// has been recorded in the audit log when this returns.
    pub fn validate(&self, raw: &[u8]) -> Result<AcceptedMessage, ValidationError> {
        let envelope = match self.parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reject(None, &err);
                return Err(err);
            }
        };
        match self.admit(&envelope) {
            Ok((template, capabilities)) => {
                self.telemetry.record(
                    &TelemetryEvent::new(COMPONENT, "envelope_accepted", TelemetryOutcome::Ok)
                        .with_envelope(envelope.envelope_id.as_str())
                        .with_session(envelope.session_id.as_str()),
                );
                Ok(AcceptedMessage {
                    envelope,
                    template,
                    capabilities,
                })
            }
            Err(err) => {
                self.reject(Some(&envelope), &err);
                Err(err)
            }
        }
    }

    /// Gates 1 and 2: size cap and strict parse.
    fn parse(&self, raw: &[u8]) -> Result<Envelope, ValidationError> {
        if raw.len() > self.config.max_envelope_bytes {
            return Err(ValidationError::SizeExceeded {
                actual: raw.len(),
                max: self.config.max_envelope_bytes,
            });
        }
        let value = parse_strict(raw)?;
        Envelope::from_value(value).map_err(|err| ValidationError::Parse(err.to_string()))
    }

    /// Gates 3 through 12 over a parsed envelope.
    fn admit(
        &self,
        envelope: &Envelope,
    ) -> Result<(TemplateEntry, CapabilitySet), ValidationError> {
        // Gate 3.
        let sender_key = self.senders.get(&envelope.sender_id).ok_or_else(|| {
            ValidationError::SignatureInvalid(format!("no key for sender {}", envelope.sender_id))
        })?;
        envelope
            .verify(sender_key)
            .map_err(|err| ValidationError::SignatureInvalid(err.to_string()))?;

        // Gate 4.
        if envelope.receiver_id != self.config.own_id {
            return Err(ValidationError::ReceiverMismatch {
                expected: self.config.own_id.clone(),
                actual: envelope.receiver_id.clone(),
            });
        }

        // Gates 5 through 7.
        let template_ref = &envelope.template_ref;
        let template =
            self.trust_store.resolve_template(&template_ref.template_id, &template_ref.version)?;
        let actual_hash = template
            .content_hash()
            .map_err(|err| ValidationError::TrustStoreUnavailable(err.to_string()))?
            .value;
        if actual_hash != template_ref.sha256_hash {
            return Err(ValidationError::TemplateHashMismatch {
                declared: template_ref.sha256_hash.clone(),
                actual: actual_hash,
            });
        }
        let manifest = TemplateManifest {
            template_id: template.template_id.clone(),
            version: template.version.clone(),
            sha256_hash: actual_hash,
        };
        manifest
            .verify(self.trust_store.authority_key(), &template_ref.authority_signature)
            .map_err(|err| ValidationError::AuthoritySignatureInvalid(err.to_string()))?;

        // Gate 8.
        let capabilities = self
            .trust_store
            .resolve_capabilities(&template_ref.template_id, &template_ref.version)?;

        // Gate 9 performs no independent check: capability sets are trusted
        // through the read-only, key-pinned vault that served them.

        // Gate 10.
        let schema = compile_closed_schema(&template.json_schema)
            .map_err(|err| ValidationError::TrustStoreUnavailable(err.to_string()))?;
        let payload = serde_json::Value::Object(envelope.payload.clone());
        if let Some(violation) = schema.first_violation(&payload) {
            return Err(ValidationError::PayloadSchemaInvalid(violation));
        }

        // Gate 11.
        self.check_capabilities(envelope, &capabilities)?;

        // Gate 12.
        let validated = AuditEvent::new(AuditEventKind::Validated)
            .for_envelope(envelope)
            .with_agent(self.config.own_id.clone())
            .with_details(json!({"template_version": template_ref.version}));
        self.audit.emit(&validated).map_err(|err| match err {
            AuditError::ConstraintViolation(envelope_id) => {
                ValidationError::ReplayDetected(envelope_id)
            }
            other => ValidationError::AuditUnavailable(other.to_string()),
        })?;

        Ok((template, capabilities))
    }

    /// Gate 11: allow-lists, payload size, then quota.
    fn check_capabilities(
        &self,
        envelope: &Envelope,
        capabilities: &CapabilitySet,
    ) -> Result<(), ValidationError> {
        let deny = |denial| Err(ValidationError::CapabilityDenied(denial));
        if !capabilities.allows_sender(&envelope.sender_id) {
            return deny(CapabilityDenial::SenderNotAllowed(envelope.sender_id.clone()));
        }
        if !capabilities.allows_receiver(&envelope.receiver_id) {
            return deny(CapabilityDenial::ReceiverNotAllowed(envelope.receiver_id.clone()));
        }
        let payload_len = canonical_json_bytes(&envelope.payload)
            .map_err(|err| ValidationError::Parse(err.to_string()))?
            .len();
        let actual = u64::try_from(payload_len).unwrap_or(u64::MAX);
        let max = capabilities.max_payload_bytes.unwrap_or(0);
        if actual > max {
            return deny(CapabilityDenial::PayloadTooLarge {
                actual,
                max,
            });
        }
        let quota = capabilities.per_sender_quota.unwrap_or(self.config.default_quota);
        let since_ms = unix_millis().saturating_sub(quota.window_millis());
        let count = self
            .audit
            .count_validated_since(&envelope.sender_id, since_ms)
            .map_err(|err| ValidationError::AuditUnavailable(err.to_string()))?;
        if count >= quota.max_messages {
            return deny(CapabilityDenial::QuotaExceeded {
                count,
                max: quota.max_messages,
            });
        }
        Ok(())
    }

    /// Records a rejection in the audit log and telemetry.
    fn reject(&self, envelope: Option<&Envelope>, err: &ValidationError) {
        let kind = err.kind();
        let mut event = AuditEvent::new(AuditEventKind::Rejected)
            .with_agent(self.config.own_id.clone())
            .with_details(json!({"kind": kind.as_str(), "detail": err.to_string()}));
        let mut telemetry =
            TelemetryEvent::new(COMPONENT, "envelope_rejected", TelemetryOutcome::Rejected)
                .with_kind(kind.as_str())
                .with_detail(err.to_string());
        if let Some(envelope) = envelope {
            event = event.for_envelope(envelope);
            telemetry = telemetry
                .with_envelope(envelope.envelope_id.as_str())
                .with_session(envelope.session_id.as_str());
        }
        self.telemetry.record(&telemetry);
        if let Err(audit_err) = self.audit.emit(&event) {
            self.telemetry.record(
                &TelemetryEvent::new(COMPONENT, "rejection_unrecorded", TelemetryOutcome::Error)
                    .with_kind(RejectionKind::AuditUnavailable.as_str())
                    .with_detail(audit_err.to_string()),
            );
        }
    }
}

impl std::fmt::Debug for EnvelopeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeValidator")
            .field("config", &self.config)
            .field("senders", &self.senders.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
