// crates/mediator-core/src/vault/entries.rs
// ============================================================================
// Module: Vault Entry Naming
// Description: Validation of entry ids and the on-disk naming scheme.
// Purpose: Keep attacker-chosen ids from ever forming a traversal path.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Template ids and versions arrive inside untrusted envelopes and are later
//! joined into vault paths. Both must be a single path component drawn from
//! `[A-Za-z0-9._-]`, at most 128 bytes, and neither `.` nor `..`.

use crate::core::TemplateId;
use crate::core::TemplateVersion;
use crate::interfaces::EntryKind;

/// Maximum length of an id or version component.
const MAX_COMPONENT_LEN: usize = 128;

/// Returns true when `value` is safe to use as one path component.
#[must_use]
pub fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_COMPONENT_LEN
        && value != "."
        && value != ".."
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-'))
}

/// Returns true when both parts of an entry key are safe components.
#[must_use]
pub fn is_safe_entry_key(template_id: &TemplateId, version: &TemplateVersion) -> bool {
    is_safe_component(template_id.as_str()) && is_safe_component(version.as_str())
}

/// Returns the stem `<id>_v<version>` shared by every file of an entry.
#[must_use]
pub fn entry_stem(template_id: &TemplateId, version: &TemplateVersion) -> String {
    format!("{}_v{}", template_id.as_str(), version.as_str())
}

/// Returns the encrypted record path relative to the vault root.
#[must_use]
pub fn encrypted_entry_path(
    kind: EntryKind,
    template_id: &TemplateId,
    version: &TemplateVersion,
) -> std::path::PathBuf {
    let file_name = format!("{}.json.age", entry_stem(template_id, version));
    std::path::Path::new(kind.directory()).join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_components_are_unsafe() {
        for value in ["", ".", "..", "../x", "a/b", "a\\b", "a b", "é"] {
            assert!(!is_safe_component(value), "{value:?} accepted");
        }
        assert!(is_safe_component("blog_post_v1"));
        assert!(is_safe_component("1.0"));
    }
}
