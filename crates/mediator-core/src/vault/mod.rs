// crates/mediator-core/src/vault/mod.rs
// ============================================================================
// Module: Vault
// Description: Key-pinned, read-only trust store over pluggable backends.
// Purpose: Supply templates and capability sets under a pinned authority key.
// Dependencies: ed25519-dalek, tempfile, crate::interfaces
// ============================================================================

//! ## Overview
//! [`Vault`] is the mediator's [`TrustStore`]. Every constructor asserts the
//! authority key fingerprint against a caller-supplied [`KeyPin`] before the
//! vault exists, so no record is ever resolved under an unpinned key. The
//! on-disk constructor additionally refuses a vault directory the running
//! process could write to.
//!
//! Records are parsed with the strict duplicate-key parser and must name the
//! same id and version they were requested under.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::ErrorKind;
use std::path::Path;

use ed25519_dalek::VerifyingKey;
use serde::de::DeserializeOwned;

use crate::core::CapabilitySet;
use crate::core::KeyError;
use crate::core::KeyPin;
use crate::core::TemplateEntry;
use crate::core::TemplateId;
use crate::core::TemplateVersion;
use crate::core::assert_key_pin;
use crate::core::load_verifying_key;
use crate::core::parse_strict;
use crate::interfaces::EntryKind;
use crate::interfaces::TrustStore;
use crate::interfaces::VaultBackend;
use crate::interfaces::VaultError;

pub mod age;
pub mod entries;
pub mod memory;
pub mod publish;

pub use age::AgeCli;
pub use age::AgeCliBackend;
pub use age::AgeEncryptor;
pub use memory::InMemoryBackend;
pub use publish::PublishedTemplate;
pub use publish::install_published;
pub use publish::publish_template;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Authority verification key path relative to the vault root.
pub const AUTHORITY_KEY_PATH: &str = "keys/authority_verify.pub";

// ============================================================================
// SECTION: Vault
// ============================================================================

/// Read-only, key-pinned trust store.
pub struct Vault {
    /// Record source.
    backend: Box<dyn VaultBackend>,
    /// Pinned authority verification key.
    authority_key: VerifyingKey,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("authority_key", &self.authority_key).finish_non_exhaustive()
    }
}

impl Vault {
    /// Builds a vault over `backend` once `authority_key` matches `pin`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyPinMismatch`] when the key is not the pinned
    /// one.
    pub fn with_backend(
        backend: Box<dyn VaultBackend>,
        authority_key: VerifyingKey,
        pin: &KeyPin,
    ) -> Result<Self, VaultError> {
        assert_key_pin(&authority_key, pin).map_err(|err| match err {
            KeyError::PinMismatch {
                expected,
                actual,
            } => VaultError::KeyPinMismatch {
                expected,
                actual,
            },
            other => VaultError::Key(other.to_string()),
        })?;
        Ok(Self {
            backend,
            authority_key,
        })
    }

    /// Builds a vault over injected plaintext records.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyPinMismatch`] exactly as [`Vault::open`] does.
    pub fn in_memory(
        backend: InMemoryBackend,
        authority_key: VerifyingKey,
        pin: &KeyPin,
    ) -> Result<Self, VaultError> {
        Self::with_backend(Box::new(backend), authority_key, pin)
    }

    /// Opens an age-encrypted vault directory.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::WritableVault`] when this process can create
    /// files in `vault_dir`, [`VaultError::Key`] when the authority key or
    /// identity file is unusable, and [`VaultError::KeyPinMismatch`] when the
    /// authority key is not the pinned one.
    pub fn open(
        vault_dir: &Path,
        identity_file: &Path,
        pin: &KeyPin,
        cli: AgeCli,
    ) -> Result<Self, VaultError> {
        ensure_not_writable(vault_dir)?;
        let authority_key = load_verifying_key(&vault_dir.join(AUTHORITY_KEY_PATH))
            .map_err(|err| VaultError::Key(format!("authority key: {err}")))?;
        let backend = AgeCliBackend::new(vault_dir, identity_file, cli)?;
        Self::with_backend(Box::new(backend), authority_key, pin)
    }

    /// Fetches, strictly parses, and decodes one record.
    fn load<T: DeserializeOwned>(
        &self,
        kind: EntryKind,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<T, VaultError> {
        let not_found = || VaultError::EntryNotFound {
            kind,
            template_id: template_id.clone(),
            version: version.clone(),
        };
        if !entries::is_safe_entry_key(template_id, version) {
            return Err(not_found());
        }
        let bytes = self.backend.fetch(kind, template_id, version)?.ok_or_else(not_found)?;
        let value =
            parse_strict(&bytes).map_err(|err| VaultError::Invalid(format!("{kind}: {err}")))?;
        serde_json::from_value(value).map_err(|err| VaultError::Invalid(format!("{kind}: {err}")))
    }
}

impl TrustStore for Vault {
    fn resolve_template(
        &self,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<TemplateEntry, VaultError> {
        let entry: TemplateEntry = self.load(EntryKind::Template, template_id, version)?;
        if &entry.template_id != template_id || &entry.version != version {
            return Err(VaultError::Invalid(format!(
                "template stored as {template_id} v{version} names {} v{}",
                entry.template_id, entry.version
            )));
        }
        Ok(entry)
    }

    fn resolve_capabilities(
        &self,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<CapabilitySet, VaultError> {
        let capabilities: CapabilitySet =
            self.load(EntryKind::CapabilitySet, template_id, version)?;
        if &capabilities.template_id != template_id || &capabilities.version != version {
            return Err(VaultError::Invalid(format!(
                "capability set stored as {template_id} v{version} names {} v{}",
                capabilities.template_id, capabilities.version
            )));
        }
        Ok(capabilities)
    }

    fn authority_key(&self) -> &VerifyingKey {
        &self.authority_key
    }
}

// ============================================================================
// SECTION: Write Probe
// ============================================================================

/// Fails when the running process can create a file in `dir`.
///
/// # Errors
///
/// Returns [`VaultError::WritableVault`] when the probe file was created and
/// [`VaultError::Backend`] when the directory cannot be inspected at all.
pub fn ensure_not_writable(dir: &Path) -> Result<(), VaultError> {
    if !dir.is_dir() {
        return Err(VaultError::Backend(format!("vault directory missing: {}", dir.display())));
    }
    match tempfile::tempfile_in(dir) {
        Ok(_) => Err(VaultError::WritableVault(dir.display().to_string())),
        Err(err)
            if matches!(err.kind(), ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem) =>
        {
            Ok(())
        }
        Err(err) => Err(VaultError::Backend(format!("vault write probe failed: {err}"))),
    }
}
