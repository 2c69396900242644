//! Serialização canônica e hashing SHA-256.
//!
//! This module is the single serializer used for every hash in the network.
//! The canonical form of a value is its JSON with keys sorted
//! lexicographically and no whitespace; `serde_json`'s default map is a
//! `BTreeMap`, which yields exactly that ordering. Hash inputs are the UTF-8
//! bytes of the canonical string and hash outputs are lowercase hex.

use crate::{BlockchainError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serializes `value` in the canonical form used for hashing and gossip
///
/// # Errors
///
/// Returns error if the value cannot be represented as JSON
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
    Ok(value.to_string())
}

/// SHA-256 de `data`, em hex minúsculo
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 da forma canônica de `value`
///
/// # Errors
///
/// Retorna erro se a serialização canônica falhar
pub fn canonical_sha256<T: Serialize>(value: &T) -> Result<String> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}
