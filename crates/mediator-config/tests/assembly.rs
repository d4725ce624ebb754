// crates/mediator-config/tests/assembly.rs
// ============================================================================
// Module: Runtime Assembly Tests
// Description: Builds mediator components from config files on disk.
// Purpose: Validate key loading, pin checks, and end-to-end wiring.
// ============================================================================

//! ## Overview
//! Exercises the assembly helpers with real key files, a `SQLite` audit log,
//! and an in-memory trust store standing in for the age vault.

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

use std::path::Path;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use mediator_config::AssemblyError;
use mediator_config::Mediator;
use mediator_config::MediatorConfig;
use mediator_config::WRITE_FILE_TOOL;
use mediator_config::build_outbox;
use mediator_config::build_tool_gate;
use mediator_config::load_sender_keyring;
use mediator_config::open_audit_log;
use mediator_config::open_vault;
use mediator_config::telemetry_sink;
use mediator_core::AgentId;
use mediator_core::AuditEventKind;
use mediator_core::AuditLog;
use mediator_core::CapabilitySet;
use mediator_core::EnvelopeDraft;
use mediator_core::ExecutionContext;
use mediator_core::InMemoryBackend;
use mediator_core::KeyPin;
use mediator_core::PlanDraft;
use mediator_core::SessionId;
use mediator_core::TelemetryEvent;
use mediator_core::TelemetryOutcome;
use mediator_core::TelemetrySink;
use mediator_core::TemplateEntry;
use mediator_core::TemplateId;
use mediator_core::TemplateRef;
use mediator_core::TemplateVersion;
use mediator_core::ToolCall;
use mediator_core::ToolGateError;
use mediator_core::Vault;
use mediator_core::VaultError;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn authority() -> SigningKey {
    SigningKey::from_bytes(&[11_u8; 32])
}

fn intake() -> SigningKey {
    SigningKey::from_bytes(&[12_u8; 32])
}

fn planner() -> SigningKey {
    SigningKey::from_bytes(&[13_u8; 32])
}

fn pin_hex(key: &SigningKey) -> String {
    KeyPin::for_key(&key.verifying_key()).digest().value.clone()
}

fn write_owner_only(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).unwrap();
    }
}

fn template() -> TemplateEntry {
    TemplateEntry {
        template_id: TemplateId::new("blog_post_v1"),
        version: TemplateVersion::new("1"),
        description: "Blog post draft".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": {"title": {"type": "string", "maxLength": 80}},
            "required": ["title"]
        }),
    }
}

fn trust_store() -> Arc<Vault> {
    let template = template();
    let mut backend = InMemoryBackend::new();
    backend.insert_template(&template).unwrap();
    backend
        .insert_capabilities(&CapabilitySet {
            template_id: template.template_id.clone(),
            version: template.version.clone(),
            allowed_senders: vec![AgentId::new("intake")],
            allowed_receivers: vec![AgentId::new("sanitizer")],
            max_payload_bytes: Some(1024),
            per_sender_quota: None,
        })
        .unwrap();
    let key = authority().verifying_key();
    Arc::new(Vault::in_memory(backend, key, &KeyPin::for_key(&key)).unwrap())
}

fn template_ref() -> TemplateRef {
    let manifest = template().manifest().unwrap();
    TemplateRef {
        template_id: manifest.template_id.clone(),
        version: manifest.version.clone(),
        authority_signature: manifest.sign(&authority()).unwrap(),
        sha256_hash: manifest.sha256_hash,
    }
}

/// Lays out key files and directories and returns the config text.
fn workspace(dir: &Path) -> String {
    for name in ["keys", "inbox", "quarantine", "output"] {
        std::fs::create_dir_all(dir.join(name)).unwrap();
    }
    std::fs::write(dir.join("keys/planner.pub"), hex::encode(planner().verifying_key().as_bytes()))
        .unwrap();
    write_owner_only(&dir.join("keys/sanitizer.key"), &[14_u8; 32]);
    format!(
        r#"
[agent]
id = "sanitizer"
signing_key_path = "{root}/keys/sanitizer.key"

[vault]
dir = "{root}/vault"
identity_file = "{root}/keys/identity.txt"
authority_pin = "{authority_pin}"

[audit]
type = "sqlite"
path = "{root}/state/audit.db"

[toolgate]
issuer_key_path = "{root}/keys/planner.pub"
issuer_pin = "{planner_pin}"
write_root = "{root}/output"

[[senders]]
agent_id = "intake"
key_hex = "{intake_key}"

[quarantine]
inbound_dir = "{root}/inbox"
quarantine_dir = "{root}/quarantine"

[telemetry]
sink = "file"
path = "{root}/telemetry.jsonl"
"#,
        root = dir.display(),
        authority_pin = pin_hex(&authority()),
        planner_pin = pin_hex(&planner()),
        intake_key = hex::encode(intake().verifying_key().as_bytes()),
    )
}

// ============================================================================
// SECTION: End-to-End
// ============================================================================

#[test]
fn assembled_mediator_accepts_inbound_envelope_and_runs_plan() {
    let dir = TempDir::new().unwrap();
    let config = MediatorConfig::parse(&workspace(dir.path())).unwrap();
    let mediator = Mediator::with_trust_store(&config, trust_store()).unwrap();

    let envelope = EnvelopeDraft::new(
        SessionId::new("s-1"),
        AgentId::new("intake"),
        AgentId::new("sanitizer"),
        template_ref(),
        json!({"title": "Hello"}).as_object().unwrap().clone(),
        "Blog post titled Hello",
    )
    .unwrap()
    .sign(&intake())
    .unwrap();
    std::fs::write(
        dir.path().join("inbox").join(format!("{}.envelope.json", envelope.envelope_id)),
        envelope.to_json_bytes().unwrap(),
    )
    .unwrap();

    let quarantine = mediator.quarantine.as_ref().unwrap();
    let report = quarantine.poll_once(&mediator.validator).unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(quarantine.retained().unwrap(), 0);

    let gate = mediator.tool_gate.as_ref().unwrap();
    let names = gate.tool_names();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].as_str(), WRITE_FILE_TOOL);
    let plan = PlanDraft::new(
        SessionId::new("s-1"),
        AgentId::new("planner"),
        vec![
            ToolCall::new(WRITE_FILE_TOOL, json!({"path": "post.md", "content": "# Hello"}))
                .unwrap(),
        ],
    )
    .unwrap()
    .sign(&planner())
    .unwrap();
    let results = gate.execute(&plan, &ExecutionContext::default()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(std::fs::read_to_string(dir.path().join("output/post.md")).unwrap(), "# Hello");

    let audit: Arc<dyn AuditLog> = Arc::clone(&mediator.audit);
    let kinds: Vec<AuditEventKind> = audit
        .recent_events(10)
        .unwrap()
        .into_iter()
        .map(|record| record.event.event_kind)
        .collect();
    assert_eq!(kinds, vec![AuditEventKind::ToolExecuted, AuditEventKind::Validated]);
    assert!(dir.path().join("state/audit.db").is_file());
    assert!(mediator.outbox.is_some());
}

// ============================================================================
// SECTION: Components
// ============================================================================

#[test]
fn tool_gate_refuses_issuer_key_with_wrong_pin() {
    let dir = TempDir::new().unwrap();
    let mut config = MediatorConfig::parse(&workspace(dir.path())).unwrap();
    let toolgate = config.toolgate.as_mut().unwrap();
    toolgate.issuer_pin = pin_hex(&intake());
    let audit = open_audit_log(&config.audit).unwrap();
    let sink = telemetry_sink(&config.telemetry).unwrap();
    let err = build_tool_gate(config.toolgate.as_ref().unwrap(), audit, sink).unwrap_err();
    assert!(matches!(err, AssemblyError::ToolGate(ToolGateError::IssuerKeyMismatch { .. })));
}

#[test]
fn writable_vault_directory_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut config = MediatorConfig::parse(&workspace(dir.path())).unwrap();
    std::fs::create_dir_all(dir.path().join("vault")).unwrap();
    write_owner_only(&dir.path().join("keys/identity.txt"), b"AGE-SECRET-KEY-1TEST");
    config.vault.dir = dir.path().join("vault");
    let err = open_vault(&config.vault).unwrap_err();
    assert!(matches!(err, AssemblyError::Vault(VaultError::WritableVault(_))));
}

#[test]
fn sender_keys_load_from_files_and_hex() {
    let dir = TempDir::new().unwrap();
    let config = MediatorConfig::parse(&workspace(dir.path())).unwrap();
    let keyring = load_sender_keyring(&config.senders).unwrap();
    assert_eq!(keyring.get(&AgentId::new("intake")), Some(&intake().verifying_key()));

    let mut senders = config.senders.clone();
    senders[0].key_hex = None;
    senders[0].key_path = Some(dir.path().join("keys/planner.pub"));
    let keyring = load_sender_keyring(&senders).unwrap();
    assert_eq!(keyring.get(&AgentId::new("intake")), Some(&planner().verifying_key()));

    senders[0].key_path = Some(dir.path().join("keys/absent.pub"));
    assert!(matches!(load_sender_keyring(&senders), Err(AssemblyError::Key { .. })));
}

#[cfg(unix)]
#[test]
fn outbox_refuses_group_readable_signing_key() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let config = MediatorConfig::parse(&workspace(dir.path())).unwrap();
    let key_path = dir.path().join("keys/sanitizer.key");
    std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o640)).unwrap();
    let audit = open_audit_log(&config.audit).unwrap();
    let err = build_outbox(&config.agent, audit).unwrap_err();
    assert!(matches!(err, AssemblyError::Key { .. }));
}

#[test]
fn file_telemetry_sink_appends_json_lines() {
    let dir = TempDir::new().unwrap();
    let config = MediatorConfig::parse(&workspace(dir.path())).unwrap();
    let sink: Arc<dyn TelemetrySink> = telemetry_sink(&config.telemetry).unwrap();
    sink.record(&TelemetryEvent::new("test", "probe", TelemetryOutcome::Ok));
    sink.record(&TelemetryEvent::new("test", "probe", TelemetryOutcome::Ok));
    let text = std::fs::read_to_string(dir.path().join("telemetry.jsonl")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["event"], "probe");
}
