// crates/mediator-core/src/core/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide the single byte encoding used for every signature and hash.
// Dependencies: hex, serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Every signature and integrity hash in the mediator is computed over the
//! RFC 8785 (JCS) encoding of a structured value: keys sorted at every level,
//! no insignificant whitespace, fixed number and string escaping, UTF-8.
//! Raw file bytes (quarantined messages, tool artifacts) are hashed directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for mediator artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the stable label for the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Returns the digest length in bytes.
    const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
        }
    }
}

/// Default hash algorithm for the mediator.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex::encode(bytes),
        }
    }

    /// Parses a declared hex digest.
    ///
    /// Only lowercase hex of the algorithm's exact length is accepted so that
    /// two spellings of one digest can never compare unequal.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidDigest`] when the value is malformed.
    pub fn from_hex(algorithm: HashAlgorithm, value: &str) -> Result<Self, HashError> {
        let expected_len = algorithm.digest_len() * 2;
        if value.len() != expected_len {
            return Err(HashError::InvalidDigest(format!(
                "expected {expected_len} hex characters, got {}",
                value.len()
            )));
        }
        if !value.bytes().all(|byte| matches!(byte, b'0' ..= b'9' | b'a' ..= b'f')) {
            return Err(HashError::InvalidDigest("digest must be lowercase hex".to_string()));
        }
        Ok(Self {
            algorithm,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.value)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
    /// A declared digest is malformed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}
