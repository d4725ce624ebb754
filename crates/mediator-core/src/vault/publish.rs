// crates/mediator-core/src/vault/publish.rs
// ============================================================================
// Module: Template Publishing
// Description: Operator-confirmed signing and installation of vault records.
// Purpose: Produce authority-signed templates without unattended overwrites.
// Dependencies: ed25519-dalek, serde_json, crate::fs
// ============================================================================

//! ## Overview
//! Publishing is the only write path into a vault and runs outside the
//! mediator's runtime processes. [`publish_template`] computes the canonical
//! template hash and refuses to sign unless the operator confirmation echoes
//! that exact hash back. [`install_published`] encrypts the records, writes
//! them atomically into the vault layout, and writes the signed manifest in
//! plaintext next to them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use ed25519_dalek::SigningKey;
use serde::Serialize;
use serde_json::json;

use crate::audit::AuditEvent;
use crate::audit::AuditEventKind;
use crate::core::CapabilitySet;
use crate::core::TemplateEntry;
use crate::core::TemplateManifest;
use crate::core::TemplateRef;
use crate::core::canonical_json_bytes;
use crate::core::compile_closed_schema;
use crate::fs::write_atomic;
use crate::interfaces::EntryKind;
use crate::interfaces::VaultError;
use crate::vault::AgeEncryptor;
use crate::vault::entries::entry_stem;
use crate::vault::entries::is_safe_entry_key;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Signed publish bundle ready for encryption and installation.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedTemplate {
    /// Signed manifest.
    pub manifest: TemplateManifest,
    /// Hex authority signature over the manifest.
    pub authority_signature: String,
    /// Canonical template bytes.
    pub template_bytes: Vec<u8>,
    /// Canonical capability set bytes.
    pub capabilities_bytes: Vec<u8>,
}

/// Plaintext manifest file written beside the encrypted records.
#[derive(Debug, Serialize)]
struct ManifestFile<'a> {
    /// Signed manifest fields.
    #[serde(flatten)]
    manifest: &'a TemplateManifest,
    /// Hex authority signature.
    authority_signature: &'a str,
}

impl PublishedTemplate {
    /// Returns the template reference senders embed in envelopes.
    #[must_use]
    pub fn template_ref(&self) -> TemplateRef {
        TemplateRef {
            template_id: self.manifest.template_id.clone(),
            version: self.manifest.version.clone(),
            sha256_hash: self.manifest.sha256_hash.clone(),
            authority_signature: self.authority_signature.clone(),
        }
    }

    /// Returns the `published` audit event for this bundle.
    #[must_use]
    pub fn audit_event(&self) -> AuditEvent {
        AuditEvent::new(AuditEventKind::Published)
            .with_template(self.manifest.template_id.clone())
            .with_details(json!({
                "version": self.manifest.version,
                "sha256_hash": self.manifest.sha256_hash,
            }))
    }
}

// ============================================================================
// SECTION: Publishing
// ============================================================================

/// Signs a template and its capability set after operator confirmation.
///
/// `confirm` is shown the manifest and must return the typed hash; anything
/// other than the exact hash aborts publication.
///
/// # Errors
///
/// Returns [`VaultError::Invalid`] when the records are inconsistent or the
/// schema does not compile, and [`VaultError::Unconfirmed`] when the
/// confirmation does not match.
pub fn publish_template(
    template: &TemplateEntry,
    capabilities: &CapabilitySet,
    authority_key: &SigningKey,
    confirm: impl FnOnce(&TemplateManifest) -> String,
) -> Result<PublishedTemplate, VaultError> {
    if !is_safe_entry_key(&template.template_id, &template.version) {
        return Err(VaultError::Invalid(format!(
            "unsafe template id or version: {} v{}",
            template.template_id, template.version
        )));
    }
    if capabilities.template_id != template.template_id
        || capabilities.version != template.version
    {
        return Err(VaultError::Invalid(
            "capability set does not govern the published template".to_string(),
        ));
    }
    compile_closed_schema(&template.json_schema)
        .map_err(|err| VaultError::Invalid(err.to_string()))?;

    let manifest = template.manifest().map_err(|err| VaultError::Invalid(err.to_string()))?;
    let typed = confirm(&manifest);
    if typed.trim() != manifest.sha256_hash {
        return Err(VaultError::Unconfirmed(format!(
            "expected {}, operator entered {}",
            manifest.sha256_hash,
            typed.trim()
        )));
    }
    let authority_signature =
        manifest.sign(authority_key).map_err(|err| VaultError::Invalid(err.to_string()))?;
    Ok(PublishedTemplate {
        authority_signature,
        template_bytes: canonical_json_bytes(template)
            .map_err(|err| VaultError::Invalid(err.to_string()))?,
        capabilities_bytes: canonical_json_bytes(capabilities)
            .map_err(|err| VaultError::Invalid(err.to_string()))?,
        manifest,
    })
}

/// Encrypts and writes a publish bundle into the vault layout.
///
/// # Errors
///
/// Returns [`VaultError::Backend`] when encryption or any write fails.
pub fn install_published(
    vault_dir: &Path,
    published: &PublishedTemplate,
    encryptor: &AgeEncryptor,
) -> Result<(), VaultError> {
    let stem = entry_stem(&published.manifest.template_id, &published.manifest.version);
    let records = [
        (EntryKind::Template, &published.template_bytes),
        (EntryKind::CapabilitySet, &published.capabilities_bytes),
    ];
    for (kind, plaintext) in records {
        let ciphertext = encryptor.encrypt(plaintext)?;
        let dir = vault_dir.join(kind.directory());
        std::fs::create_dir_all(&dir).map_err(|err| VaultError::Backend(err.to_string()))?;
        write_atomic(&dir, &format!("{stem}.json.age"), &ciphertext)
            .map_err(|err| VaultError::Backend(err.to_string()))?;
    }
    let manifest = serde_json::to_vec_pretty(&ManifestFile {
        manifest: &published.manifest,
        authority_signature: &published.authority_signature,
    })
    .map_err(|err| VaultError::Backend(err.to_string()))?;
    let dir = vault_dir.join("manifests");
    std::fs::create_dir_all(&dir).map_err(|err| VaultError::Backend(err.to_string()))?;
    write_atomic(&dir, &format!("{stem}.manifest.json"), &manifest)
        .map_err(|err| VaultError::Backend(err.to_string()))?;
    Ok(())
}
