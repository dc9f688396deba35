//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
