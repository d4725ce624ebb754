// crates/mediator-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared keys, template, vault, and envelope builders.
// Purpose: Provide one deterministic pipeline for integration tests.
// Dependencies: mediator-core, ed25519-dalek
// ============================================================================

//! ## Overview
//! The fixture models the intake -> sanitizer hop governed by the
//! `blog_post_v1` template. All keys are derived from fixed seeds.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use mediator_core::AgentId;
use mediator_core::AuditLog;
use mediator_core::CapabilitySet;
use mediator_core::EnvelopeDraft;
use mediator_core::EnvelopeId;
use mediator_core::EnvelopeValidator;
use mediator_core::InMemoryBackend;
use mediator_core::KeyPin;
use mediator_core::SenderKeyring;
use mediator_core::SessionId;
use mediator_core::TemplateEntry;
use mediator_core::TemplateId;
use mediator_core::TemplateRef;
use mediator_core::TemplateVersion;
use mediator_core::ValidatorConfig;
use mediator_core::Vault;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Identities
// ============================================================================

/// Sending agent.
pub const INTAKE: &str = "intake";
/// Receiving agent.
pub const SANITIZER: &str = "sanitizer";
/// Plan issuer.
pub const PLANNER: &str = "planner";

/// Template authority signing key.
pub fn authority_key() -> SigningKey {
    SigningKey::from_bytes(&[21_u8; 32])
}

/// Intake agent signing key.
pub fn intake_key() -> SigningKey {
    SigningKey::from_bytes(&[22_u8; 32])
}

/// Sanitizer agent signing key.
pub fn sanitizer_key() -> SigningKey {
    SigningKey::from_bytes(&[23_u8; 32])
}

/// Plan issuer signing key.
pub fn planner_key() -> SigningKey {
    SigningKey::from_bytes(&[24_u8; 32])
}

// ============================================================================
// SECTION: Trust Data
// ============================================================================

/// The `blog_post_v1` template.
pub fn blog_template() -> TemplateEntry {
    TemplateEntry {
        template_id: TemplateId::new("blog_post_v1"),
        version: TemplateVersion::new("1"),
        description: "Blog post draft".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": {"title": {"type": "string", "minLength": 1, "maxLength": 120}},
            "required": ["title"]
        }),
    }
}

/// Capability set governing `blog_post_v1`.
pub fn blog_capabilities() -> CapabilitySet {
    CapabilitySet {
        template_id: TemplateId::new("blog_post_v1"),
        version: TemplateVersion::new("1"),
        allowed_senders: vec![AgentId::new(INTAKE), AgentId::new(SANITIZER)],
        allowed_receivers: vec![AgentId::new(SANITIZER), AgentId::new(PLANNER)],
        max_payload_bytes: Some(4096),
        per_sender_quota: None,
    }
}

/// In-memory vault pinned to the authority key.
pub fn vault() -> Vault {
    let mut backend = InMemoryBackend::new();
    backend.insert_template(&blog_template()).unwrap();
    backend.insert_capabilities(&blog_capabilities()).unwrap();
    let key = authority_key().verifying_key();
    Vault::in_memory(backend, key, &KeyPin::for_key(&key)).unwrap()
}

/// Verification keys for intake and sanitizer.
pub fn senders() -> SenderKeyring {
    SenderKeyring::new()
        .with(INTAKE, intake_key().verifying_key())
        .with(SANITIZER, sanitizer_key().verifying_key())
}

/// Validator owned by `own_id` over the fixture vault.
pub fn validator_for(own_id: &str, audit: Arc<dyn AuditLog>) -> EnvelopeValidator {
    EnvelopeValidator::new(ValidatorConfig::new(own_id), Arc::new(vault()), audit, senders())
}

/// Validator owned by the sanitizer.
pub fn validator(audit: Arc<dyn AuditLog>) -> EnvelopeValidator {
    validator_for(SANITIZER, audit)
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Authority-signed reference to `blog_post_v1`.
pub fn template_ref() -> TemplateRef {
    let manifest = blog_template().manifest().unwrap();
    TemplateRef {
        template_id: manifest.template_id.clone(),
        version: manifest.version.clone(),
        authority_signature: manifest.sign(&authority_key()).unwrap(),
        sha256_hash: manifest.sha256_hash,
    }
}

/// Unsigned intake -> sanitizer draft with a fixed envelope id.
pub fn draft(envelope_id: &str, payload: Value) -> EnvelopeDraft {
    let mut draft = EnvelopeDraft::new(
        SessionId::new("session-1"),
        AgentId::new(INTAKE),
        AgentId::new(SANITIZER),
        template_ref(),
        payload.as_object().unwrap().clone(),
        "Blog post draft for review",
    )
    .unwrap();
    draft.envelope_id = EnvelopeId::new(envelope_id);
    draft
}

/// Signed intake -> sanitizer envelope bytes.
pub fn signed_bytes(envelope_id: &str, payload: Value) -> Vec<u8> {
    draft(envelope_id, payload).sign(&intake_key()).unwrap().to_json_bytes().unwrap()
}
