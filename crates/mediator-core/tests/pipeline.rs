// crates/mediator-core/tests/pipeline.rs
// ============================================================================
// Module: Pipeline Integration Tests
// Description: End-to-end validation, replay, forwarding, and intake.
// Purpose: Exercise the validator through its public surface only.
// ============================================================================

//! ## Overview
//! Messages travel intake -> sanitizer -> planner. Each hop is written to the
//! receiver's inbox, promoted through quarantine, and validated against the
//! shared audit log.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;

use mediator_core::AgentId;
use mediator_core::AuditEventKind;
use mediator_core::AuditLog;
use mediator_core::EnvelopeId;
use mediator_core::InMemoryAuditLog;
use mediator_core::IntakeError;
use mediator_core::Outbox;
use mediator_core::Quarantine;
use mediator_core::RejectionKind;
use mediator_core::SessionId;
use mediator_core::ValidationError;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

use crate::common::INTAKE;
use crate::common::PLANNER;
use crate::common::SANITIZER;
use crate::common::intake_key;
use crate::common::sanitizer_key;
use crate::common::signed_bytes;
use crate::common::template_ref;
use crate::common::validator;
use crate::common::validator_for;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn kinds(audit: &dyn AuditLog, envelope_id: &str) -> Vec<AuditEventKind> {
    audit
        .events_for_envelope(&EnvelopeId::new(envelope_id))
        .unwrap()
        .into_iter()
        .map(|record| record.event.event_kind)
        .collect()
}

/// Creates `<root>/<name>/inbox` and `<root>/<name>/quarantine`.
fn agent_dirs(root: &TempDir, name: &str) -> Quarantine {
    let inbox = root.path().join(name).join("inbox");
    let quarantine = root.path().join(name).join("quarantine");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::create_dir_all(&quarantine).unwrap();
    Quarantine::new(inbox, quarantine)
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn accepted_envelope_is_replayed_once_only() {
    let audit = Arc::new(InMemoryAuditLog::new());
    let validator = validator(audit.clone());
    let raw = signed_bytes("abc-1", json!({"title": "Hello"}));

    let accepted = validator.validate(&raw).unwrap();
    assert_eq!(accepted.envelope.envelope_id.as_str(), "abc-1");
    assert_eq!(accepted.envelope.payload["title"], "Hello");
    assert_eq!(accepted.template.template_id.as_str(), "blog_post_v1");
    assert_eq!(kinds(audit.as_ref(), "abc-1"), vec![AuditEventKind::Validated]);

    let err = validator.validate(&raw).unwrap_err();
    match &err {
        ValidationError::ReplayDetected(id) => assert_eq!(id.as_str(), "abc-1"),
        other => panic!("expected replay, got {other}"),
    }
    assert_eq!(err.kind(), RejectionKind::ReplayDetected);
    assert_eq!(
        kinds(audit.as_ref(), "abc-1"),
        vec![AuditEventKind::Validated, AuditEventKind::Rejected]
    );
}

#[test]
fn tampered_payload_fails_signature_gate() {
    let audit = Arc::new(InMemoryAuditLog::new());
    let validator = validator(audit.clone());
    let mut value: Value =
        serde_json::from_slice(&signed_bytes("abc-2", json!({"title": "Hello"}))).unwrap();
    value["payload"]["title"] = json!("Goodbye");
    let tampered = serde_json::to_vec(&value).unwrap();

    let err = validator.validate(&tampered).unwrap_err();
    assert!(matches!(err, ValidationError::SignatureInvalid(_)));
    assert!(!audit.has_envelope_id(&EnvelopeId::new("abc-2")).unwrap());
    assert_eq!(kinds(audit.as_ref(), "abc-2"), vec![AuditEventKind::Rejected]);
}

#[test]
fn reserialized_envelope_still_verifies() {
    let audit = Arc::new(InMemoryAuditLog::new());
    let validator = validator(audit);
    let value: Value =
        serde_json::from_slice(&signed_bytes("abc-3", json!({"title": "Hello"}))).unwrap();
    let compact = serde_json::to_vec(&value).unwrap();
    assert!(validator.validate(&compact).is_ok());
}

#[test]
fn duplicate_payload_key_is_refused_before_signature_check() {
    let audit = Arc::new(InMemoryAuditLog::new());
    let validator = validator(audit.clone());
    let text = String::from_utf8(signed_bytes("abc-4", json!({"title": "Hello"}))).unwrap();
    let duplicated =
        text.replacen("\"title\": \"Hello\"", "\"title\": \"Hello\", \"title\": \"Evil\"", 1);
    assert_ne!(duplicated, text);

    let err = validator.validate(duplicated.as_bytes()).unwrap_err();
    assert!(matches!(err, ValidationError::DuplicateKey(_)));
    assert_eq!(err.kind(), RejectionKind::DuplicateKey);
    let recent = audit.recent_events(1).unwrap();
    assert_eq!(recent[0].event.event_kind, AuditEventKind::Rejected);
    assert_eq!(recent[0].event.details["kind"], "duplicate_key");
}

#[test]
fn payload_outside_schema_is_rejected() {
    let audit = Arc::new(InMemoryAuditLog::new());
    let validator = validator(audit);
    let raw = signed_bytes("abc-5", json!({"title": ""}));
    let err = validator.validate(&raw).unwrap_err();
    assert_eq!(err.kind(), RejectionKind::PayloadSchemaInvalid);
}

// ============================================================================
// SECTION: Hops
// ============================================================================

#[test]
fn outbox_to_quarantine_golden_path_across_two_hops() {
    let root = TempDir::new().unwrap();
    let audit = Arc::new(InMemoryAuditLog::new());
    let sanitizer_intake = agent_dirs(&root, SANITIZER);
    let planner_intake = agent_dirs(&root, PLANNER);

    let intake = Outbox::new(AgentId::new(INTAKE), intake_key(), audit.clone());
    let first = intake
        .send(
            SessionId::new("session-9"),
            AgentId::new(SANITIZER),
            template_ref(),
            json!({"title": "Hello"}).as_object().unwrap().clone(),
            "Blog post titled Hello",
            sanitizer_intake.inbound_dir(),
        )
        .unwrap();
    assert_eq!(sanitizer_intake.pending().unwrap().len(), 1);

    let report = sanitizer_intake.poll_once(&validator(audit.clone())).unwrap();
    assert!(report.failed.is_empty());
    let accepted = &report.accepted[0];
    assert_eq!(accepted.envelope.envelope_id, first.envelope_id);

    let sanitizer = Outbox::new(AgentId::new(SANITIZER), sanitizer_key(), audit.clone());
    let second = sanitizer
        .forward(accepted, AgentId::new(PLANNER), planner_intake.inbound_dir())
        .unwrap();
    assert_ne!(second.envelope_id, first.envelope_id);
    assert_eq!(second.session_id, first.session_id);

    let report = planner_intake.poll_once(&validator_for(PLANNER, audit.clone())).unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.accepted[0].envelope.sender_id.as_str(), SANITIZER);

    assert_eq!(
        kinds(audit.as_ref(), first.envelope_id.as_str()),
        vec![AuditEventKind::Forwarded, AuditEventKind::Validated]
    );
    assert_eq!(
        kinds(audit.as_ref(), second.envelope_id.as_str()),
        vec![AuditEventKind::Forwarded, AuditEventKind::Validated]
    );
    assert_eq!(sanitizer_intake.retained().unwrap(), 0);
    assert_eq!(planner_intake.retained().unwrap(), 0);
}

#[test]
fn rejected_intake_is_retained_and_caps_the_quarantine() {
    let root = TempDir::new().unwrap();
    let audit = Arc::new(InMemoryAuditLog::new());
    let quarantine = agent_dirs(&root, SANITIZER).with_max_files(1);
    let validator = validator(audit);

    std::fs::write(quarantine.inbound_dir().join("bad.envelope.json"), b"{\"version\": 1}")
        .unwrap();
    let report = quarantine.poll_once(&validator).unwrap();
    assert!(report.accepted.is_empty());
    let (name, err) = &report.failed[0];
    assert_eq!(name, "bad.envelope.json");
    assert_eq!(err.rejection_kind(), Some(RejectionKind::ParseError));
    assert_eq!(quarantine.retained().unwrap(), 1);

    std::fs::write(
        quarantine.inbound_dir().join("good.envelope.json"),
        signed_bytes("abc-6", json!({"title": "Hello"})),
    )
    .unwrap();
    let err = quarantine.poll_once(&validator).unwrap_err();
    assert!(matches!(err, IntakeError::QuarantineFull { count: 1, max: 1 }));
    assert_eq!(quarantine.pending().unwrap(), vec!["good.envelope.json"]);
}

#[test]
fn pinned_intake_refuses_substituted_file() {
    let root = TempDir::new().unwrap();
    let audit = Arc::new(InMemoryAuditLog::new());
    let quarantine = agent_dirs(&root, SANITIZER);
    let raw = signed_bytes("abc-7", json!({"title": "Hello"}));
    let expected = mediator_core::hash_bytes(mediator_core::DEFAULT_HASH_ALGORITHM, &raw);

    std::fs::write(
        quarantine.inbound_dir().join("abc-7.envelope.json"),
        signed_bytes("abc-7", json!({"title": "Other"})),
    )
    .unwrap();
    let err = quarantine
        .process("abc-7.envelope.json", Some(&expected), &validator(audit))
        .unwrap_err();
    assert_eq!(err.rejection_kind(), Some(RejectionKind::IntegrityMismatch));
    assert_eq!(quarantine.retained().unwrap(), 0);
    assert_eq!(quarantine.pending().unwrap(), vec!["abc-7.envelope.json"]);
}
