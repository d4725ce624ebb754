// crates/mediator-core/tests/vault_age.rs
// ============================================================================
// Module: Age Vault Tests
// Description: Publish, install, and resolve through the age CLI backend.
// Purpose: Exercise the encrypted vault layout with a stand-in age binary.
// ============================================================================

//! ## Overview
//! A shell script standing in for `age` copies stdin on encrypt and prints
//! the record file on decrypt, so the directory layout, key pinning, and
//! publish flow run without real cryptography.

#![cfg(unix)]
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

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use std::time::Instant;

use mediator_core::AgeCli;
use mediator_core::AgeCliBackend;
use mediator_core::AgeEncryptor;
use mediator_core::AgentId;
use mediator_core::EnvelopeDraft;
use mediator_core::EnvelopeValidator;
use mediator_core::InMemoryAuditLog;
use mediator_core::KeyPin;
use mediator_core::PublishedTemplate;
use mediator_core::SessionId;
use mediator_core::TemplateId;
use mediator_core::TemplateVersion;
use mediator_core::TrustStore;
use mediator_core::ValidatorConfig;
use mediator_core::Vault;
use mediator_core::VaultError;
use mediator_core::install_published;
use mediator_core::publish_template;
use serde_json::json;
use tempfile::TempDir;

use crate::common::INTAKE;
use crate::common::SANITIZER;
use crate::common::authority_key;
use crate::common::blog_capabilities;
use crate::common::blog_template;
use crate::common::intake_key;
use crate::common::senders;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Stand-in `age`: `--decrypt -i <identity> <file>` prints the file,
/// anything else copies stdin.
const FAKE_AGE: &str = "#!/bin/sh\nif [ \"$1\" = \"--decrypt\" ]; then cat \"$4\"; else cat; fi\n";

/// Stand-in `age` that never reads its input.
const STALLED_AGE: &str = "#!/bin/sh\nexec sleep 30\n";

/// Writes the stand-in binaries once so no test forks while one is open.
fn scripts() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        for (name, body) in [("age", FAKE_AGE), ("stalled-age", STALLED_AGE)] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
    .path()
}

fn fake_age() -> AgeCli {
    AgeCli {
        binary: scripts().join("age"),
        timeout: Duration::from_secs(10),
    }
}

/// Owner-only identity file required by the backend.
fn identity(root: &Path) -> PathBuf {
    let path = root.join("identity.txt");
    std::fs::write(&path, "AGE-SECRET-KEY-1TEST").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
    path
}

/// Publishes the blog template with a correct confirmation.
fn publish() -> PublishedTemplate {
    publish_template(&blog_template(), &blog_capabilities(), &authority_key(), |manifest| {
        format!("{}\n", manifest.sha256_hash)
    })
    .unwrap()
}

/// Publishes and installs into `<root>/vault`, returning the vault dir.
fn installed(root: &Path) -> PathBuf {
    let vault_dir = root.join("vault");
    std::fs::create_dir_all(&vault_dir).unwrap();
    let encryptor = AgeEncryptor {
        cli: fake_age(),
        recipient: "age1recipient".to_string(),
    };
    install_published(&vault_dir, &publish(), &encryptor).unwrap();
    vault_dir
}

/// Age-backed vault over `vault_dir`, pinned to the authority key.
fn age_vault(vault_dir: &Path, identity_file: &Path) -> Result<Vault, VaultError> {
    let backend = AgeCliBackend::new(vault_dir, identity_file, fake_age())?;
    let key = authority_key().verifying_key();
    Vault::with_backend(Box::new(backend), key, &KeyPin::for_key(&key))
}

// ============================================================================
// SECTION: Publish and Resolve
// ============================================================================

#[test]
fn installed_bundle_has_expected_layout() {
    let root = TempDir::new().unwrap();
    let vault_dir = installed(root.path());
    for path in [
        "templates/blog_post_v1_v1.json.age",
        "capsets/blog_post_v1_v1.json.age",
        "manifests/blog_post_v1_v1.manifest.json",
    ] {
        assert!(vault_dir.join(path).is_file(), "missing {path}");
    }
    let raw = std::fs::read(vault_dir.join("manifests/blog_post_v1_v1.manifest.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let published = publish();
    assert_eq!(manifest["sha256_hash"], published.manifest.sha256_hash.as_str());
    assert_eq!(manifest["authority_signature"], published.authority_signature.as_str());
}

#[test]
fn age_backed_vault_resolves_published_records() {
    let root = TempDir::new().unwrap();
    let vault_dir = installed(root.path());
    let vault = age_vault(&vault_dir, &identity(root.path())).unwrap();

    let template_id = TemplateId::new("blog_post_v1");
    let version = TemplateVersion::new("1");
    assert_eq!(vault.resolve_template(&template_id, &version).unwrap(), blog_template());
    assert_eq!(vault.resolve_capabilities(&template_id, &version).unwrap(), blog_capabilities());

    let missing = vault.resolve_template(&template_id, &TemplateVersion::new("2"));
    assert!(matches!(missing, Err(VaultError::EntryNotFound { .. })));
}

#[test]
fn envelope_using_published_ref_validates_against_age_vault() {
    let root = TempDir::new().unwrap();
    let vault_dir = installed(root.path());
    let vault = age_vault(&vault_dir, &identity(root.path())).unwrap();
    let validator = EnvelopeValidator::new(
        ValidatorConfig::new(SANITIZER),
        Arc::new(vault),
        Arc::new(InMemoryAuditLog::new()),
        senders(),
    );
    let envelope = EnvelopeDraft::new(
        SessionId::new("session-1"),
        AgentId::new(INTAKE),
        AgentId::new(SANITIZER),
        publish().template_ref(),
        json!({"title": "Hello"}).as_object().unwrap().clone(),
        "Blog post titled Hello",
    )
    .unwrap()
    .sign(&intake_key())
    .unwrap();

    let accepted = validator.validate(&envelope.to_json_bytes().unwrap()).unwrap();
    assert_eq!(accepted.capabilities, blog_capabilities());
}

// ============================================================================
// SECTION: Refusals
// ============================================================================

#[test]
fn wrong_confirmation_aborts_publish() {
    let err = publish_template(&blog_template(), &blog_capabilities(), &authority_key(), |_| {
        "yes".to_string()
    })
    .unwrap_err();
    assert!(matches!(err, VaultError::Unconfirmed(_)));
}

#[test]
fn capability_set_for_other_template_is_refused() {
    let mut capabilities = blog_capabilities();
    capabilities.version = TemplateVersion::new("2");
    let err = publish_template(&blog_template(), &capabilities, &authority_key(), |manifest| {
        manifest.sha256_hash.clone()
    })
    .unwrap_err();
    assert!(matches!(err, VaultError::Invalid(_)));
}

#[test]
fn authority_key_must_match_pin() {
    let root = TempDir::new().unwrap();
    let backend = AgeCliBackend::new(root.path(), &identity(root.path()), fake_age()).unwrap();
    let pin = KeyPin::for_key(&intake_key().verifying_key());
    let err = Vault::with_backend(Box::new(backend), authority_key().verifying_key(), &pin)
        .unwrap_err();
    assert!(matches!(err, VaultError::KeyPinMismatch { .. }));
}

#[test]
fn shared_identity_file_is_refused() {
    let root = TempDir::new().unwrap();
    let identity_file = identity(root.path());
    std::fs::set_permissions(&identity_file, std::fs::Permissions::from_mode(0o644)).unwrap();
    let err = AgeCliBackend::new(root.path(), &identity_file, fake_age()).unwrap_err();
    assert!(matches!(err, VaultError::Key(_)));
}

#[test]
fn writable_vault_directory_is_refused() {
    let root = TempDir::new().unwrap();
    let vault_dir = installed(root.path());
    let pin = KeyPin::for_key(&authority_key().verifying_key());
    let err = Vault::open(&vault_dir, &identity(root.path()), &pin, fake_age()).unwrap_err();
    assert!(matches!(err, VaultError::WritableVault(_)));
}

#[test]
fn age_ignoring_its_input_is_stopped_by_the_timeout() {
    let encryptor = AgeEncryptor {
        cli: AgeCli {
            binary: scripts().join("stalled-age"),
            timeout: Duration::from_millis(300),
        },
        recipient: "age1recipient".to_string(),
    };
    let started = Instant::now();
    let err = encryptor.encrypt(&vec![b'x'; 4 * 1024 * 1024]).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        VaultError::Backend(message) => assert!(message.contains("timed out"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
}
