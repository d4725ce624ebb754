// crates/mediator-core/src/core/keys.rs
// ============================================================================
// Module: Keys and Pinning
// Description: Ed25519 key loading, fingerprint pinning, and signatures.
// Purpose: Anchor every signature check to an explicitly pinned public key.
// Dependencies: ed25519-dalek, hex
// ============================================================================

//! ## Overview
//! A [`KeyPin`] is the SHA-256 fingerprint of a raw 32-byte Ed25519 public
//! key. Components that trust a key (the vault authority key, the plan issuer
//! key) compare the loaded key against a pin supplied at construction and
//! refuse to exist on mismatch. Signatures travel as lowercase hex of the
//! 64-byte Ed25519 signature and are verified with strict verification.
//!
//! Key files hold either raw key bytes or their hex text. Signing key files
//! must not be readable by group or other on unix.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::hash_bytes;
use crate::core::identifiers::AgentId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum size of a key file on disk.
const MAX_KEY_FILE_BYTES: u64 = 4096;

/// Raw Ed25519 key length in bytes.
const KEY_LEN: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Key loading, pinning, and signature failures.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key file could not be read.
    #[error("key file io error: {0}")]
    Io(String),
    /// Key material is malformed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// Signing key file is readable beyond its owner.
    #[error("insecure permissions on {path}: mode {mode:o}, expected 600")]
    InsecurePermissions {
        /// Offending key file.
        path: String,
        /// Observed permission bits.
        mode: u32,
    },
    /// Loaded key fingerprint differs from the pinned value.
    #[error("key pin mismatch: expected {expected}, found {actual}")]
    PinMismatch {
        /// Pinned fingerprint.
        expected: String,
        /// Fingerprint of the loaded key.
        actual: String,
    },
    /// Signature text is not 64 hex-encoded bytes.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    /// Signature does not verify.
    #[error("signature verification failed")]
    SignatureInvalid,
}

// ============================================================================
// SECTION: Pinning
// ============================================================================

/// Expected SHA-256 fingerprint of a trusted public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPin(HashDigest);

impl KeyPin {
    /// Parses a pin from 64 lowercase hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKey`] when the pin is malformed.
    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        HashDigest::from_hex(DEFAULT_HASH_ALGORITHM, value.trim())
            .map(Self)
            .map_err(|err| KeyError::InvalidKey(format!("key pin: {err}")))
    }

    /// Pins the fingerprint of an already trusted key.
    #[must_use]
    pub fn for_key(key: &VerifyingKey) -> Self {
        Self(key_fingerprint(key))
    }

    /// Returns the pinned digest.
    #[must_use]
    pub const fn digest(&self) -> &HashDigest {
        &self.0
    }
}

/// Returns the SHA-256 fingerprint of a raw public key.
#[must_use]
pub fn key_fingerprint(key: &VerifyingKey) -> HashDigest {
    hash_bytes(DEFAULT_HASH_ALGORITHM, key.as_bytes())
}

/// Asserts that `key` matches `pin`.
///
/// # Errors
///
/// Returns [`KeyError::PinMismatch`] when the fingerprints differ.
pub fn assert_key_pin(key: &VerifyingKey, pin: &KeyPin) -> Result<(), KeyError> {
    let actual = key_fingerprint(key);
    if &actual != pin.digest() {
        return Err(KeyError::PinMismatch {
            expected: pin.digest().value.clone(),
            actual: actual.value,
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: Key Loading
// ============================================================================

/// Loads an Ed25519 public key stored as raw bytes or hex text.
///
/// # Errors
///
/// Returns [`KeyError`] when the file is unreadable or malformed.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, KeyError> {
    let bytes = read_key_file(path)?;
    verifying_key_from_bytes(&decode_key_material(&bytes)?)
}

/// Builds a verifying key from 32 raw bytes.
///
/// # Errors
///
/// Returns [`KeyError::InvalidKey`] when the bytes are not a valid point.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, KeyError> {
    let raw: [u8; KEY_LEN] = bytes
        .try_into()
        .map_err(|_| KeyError::InvalidKey(format!("expected {KEY_LEN} key bytes")))?;
    VerifyingKey::from_bytes(&raw)
        .map_err(|_| KeyError::InvalidKey("invalid ed25519 public key".to_string()))
}

/// Parses a verifying key from 64 hex characters.
///
/// # Errors
///
/// Returns [`KeyError::InvalidKey`] when the text is malformed.
pub fn verifying_key_from_hex(text: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(text.trim())
        .map_err(|_| KeyError::InvalidKey("public key is not hex".to_string()))?;
    verifying_key_from_bytes(&bytes)
}

/// Loads an Ed25519 signing key seed stored as raw bytes or hex text.
///
/// # Errors
///
/// Returns [`KeyError::InsecurePermissions`] when the file is group or world
/// accessible on unix, and other [`KeyError`] variants for malformed input.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, KeyError> {
    ensure_owner_only(path)?;
    let bytes = read_key_file(path)?;
    let seed: [u8; KEY_LEN] = decode_key_material(&bytes)?
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidKey(format!("expected {KEY_LEN} seed bytes")))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Rejects files readable or writable by anyone but the owner.
///
/// # Errors
///
/// Returns [`KeyError::InsecurePermissions`] on unix when group or other bits
/// are set.
#[cfg(unix)]
pub fn ensure_owner_only(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|err| KeyError::Io(err.to_string()))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(KeyError::InsecurePermissions {
            path: path.display().to_string(),
            mode,
        });
    }
    Ok(())
}

/// Permission bits are not enforced off unix.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub const fn ensure_owner_only(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}

/// Reads a key file with a size limit.
fn read_key_file(path: &Path) -> Result<Vec<u8>, KeyError> {
    let file = File::open(path).map_err(|err| KeyError::Io(err.to_string()))?;
    let mut bytes = Vec::new();
    file.take(MAX_KEY_FILE_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|err| KeyError::Io(err.to_string()))?;
    if bytes.len() as u64 > MAX_KEY_FILE_BYTES {
        return Err(KeyError::InvalidKey("key file too large".to_string()));
    }
    Ok(bytes)
}

/// Accepts raw 32 bytes or their hex encoding.
fn decode_key_material(bytes: &[u8]) -> Result<Vec<u8>, KeyError> {
    if bytes.len() == KEY_LEN {
        return Ok(bytes.to_vec());
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|_| KeyError::InvalidKey("key file must be raw bytes or hex".to_string()))?;
    let decoded = hex::decode(text.trim())
        .map_err(|_| KeyError::InvalidKey("key file must be raw bytes or hex".to_string()))?;
    if decoded.len() != KEY_LEN {
        return Err(KeyError::InvalidKey(format!("expected {KEY_LEN} key bytes")));
    }
    Ok(decoded)
}

// ============================================================================
// SECTION: Signatures
// ============================================================================

/// Signs bytes and returns the hex-encoded signature.
#[must_use]
pub fn sign_bytes(key: &SigningKey, message: &[u8]) -> String {
    hex::encode(key.sign(message).to_bytes())
}

/// Verifies a hex-encoded signature with strict Ed25519 rules.
///
/// # Errors
///
/// Returns [`KeyError::MalformedSignature`] for undecodable input and
/// [`KeyError::SignatureInvalid`] when verification fails.
pub fn verify_bytes(
    key: &VerifyingKey,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), KeyError> {
    let raw = hex::decode(signature_hex)
        .map_err(|_| KeyError::MalformedSignature("signature is not hex".to_string()))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|_| KeyError::MalformedSignature("signature must be 64 bytes".to_string()))?;
    key.verify_strict(message, &signature).map_err(|_| KeyError::SignatureInvalid)
}

// ============================================================================
// SECTION: Sender Keyring
// ============================================================================

/// Public keys of the agents allowed to originate envelopes.
#[derive(Debug, Clone, Default)]
pub struct SenderKeyring {
    /// Keys indexed by agent identity.
    keys: BTreeMap<AgentId, VerifyingKey>,
}

impl SenderKeyring {
    /// Creates an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the key for `agent`.
    pub fn insert(&mut self, agent: AgentId, key: VerifyingKey) {
        self.keys.insert(agent, key);
    }

    /// Returns the keyring with `agent` added.
    #[must_use]
    pub fn with(mut self, agent: impl Into<AgentId>, key: VerifyingKey) -> Self {
        self.insert(agent.into(), key);
        self
    }

    /// Looks up the key for `agent`.
    #[must_use]
    pub fn get(&self, agent: &AgentId) -> Option<&VerifyingKey> {
        self.keys.get(agent)
    }

    /// Returns the number of known senders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true when no sender is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
