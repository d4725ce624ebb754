// crates/mediator-core/src/vault/memory.rs
// ============================================================================
// Module: In-Memory Vault Backend
// Description: Plaintext vault records injected directly, for fixtures.
// Purpose: Exercise the vault without the external decryption tool.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryBackend`] stands in for the encrypted directory. It changes only
//! where bytes come from: a vault built on it still runs the key pin check
//! and the same strict parsing of every record.

use std::collections::HashMap;

use crate::core::CapabilitySet;
use crate::core::TemplateEntry;
use crate::core::TemplateId;
use crate::core::TemplateVersion;
use crate::core::canonical_json_bytes;
use crate::interfaces::EntryKind;
use crate::interfaces::VaultBackend;
use crate::interfaces::VaultError;

/// Vault backend holding plaintext records in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    /// Records keyed by kind, template id, and version.
    entries: HashMap<(EntryKind, TemplateId, TemplateVersion), Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw record bytes.
    pub fn insert_raw(
        &mut self,
        kind: EntryKind,
        template_id: TemplateId,
        version: TemplateVersion,
        bytes: Vec<u8>,
    ) {
        self.entries.insert((kind, template_id, version), bytes);
    }

    /// Stores a template under its own id and version.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Invalid`] when the entry cannot be encoded.
    pub fn insert_template(&mut self, entry: &TemplateEntry) -> Result<(), VaultError> {
        let bytes =
            canonical_json_bytes(entry).map_err(|err| VaultError::Invalid(err.to_string()))?;
        self.insert_raw(
            EntryKind::Template,
            entry.template_id.clone(),
            entry.version.clone(),
            bytes,
        );
        Ok(())
    }

    /// Stores a capability set under its own id and version.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Invalid`] when the set cannot be encoded.
    pub fn insert_capabilities(&mut self, capabilities: &CapabilitySet) -> Result<(), VaultError> {
        let bytes =
            canonical_json_bytes(capabilities).map_err(|err| VaultError::Invalid(err.to_string()))?;
        self.insert_raw(
            EntryKind::CapabilitySet,
            capabilities.template_id.clone(),
            capabilities.version.clone(),
            bytes,
        );
        Ok(())
    }
}

impl VaultBackend for InMemoryBackend {
    fn fetch(
        &self,
        kind: EntryKind,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.entries.get(&(kind, template_id.clone(), version.clone())).cloned())
    }
}
