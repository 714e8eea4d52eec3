//! Content checksums and stable fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::FlowError;
use crate::serde::to_canonical_json_bytes;

/// Computes a stable SHA256 hash for the provided serializable value.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, FlowError> {
    let bytes = to_canonical_json_bytes(value)?;
    Ok(content_checksum(&bytes))
}

/// Hex encoded SHA256 digest of raw content.
pub fn content_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
