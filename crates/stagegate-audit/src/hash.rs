//! Content-hash strategies for audit records.
//!
//! The hash method is injected at construction and its label is recorded
//! inside every record body, so verification replays the same algorithm
//! regardless of what the log is configured with today.

use stagegate_core::HashPreference;

/// Label recorded for blake3-hashed records.
pub const METHOD_BLAKE3: &str = "blake3";
/// Label recorded for sha256-hashed records.
pub const METHOD_SHA256: &str = "sha256";

/// Hashes a canonical record body and names the algorithm used.
pub trait HashStrategy: Send + Sync {
    /// Hex digest of the canonical body bytes.
    fn digest(&self, body: &[u8]) -> String;
    /// Method label recorded in the body (`blake3` or `sha256`).
    fn method(&self) -> &'static str;
}

/// 256-bit blake3 content hash, the preferred strategy.
pub struct Blake3Hash;

impl HashStrategy for Blake3Hash {
    fn digest(&self, body: &[u8]) -> String {
        blake3::hash(body).to_hex().to_string()
    }

    fn method(&self) -> &'static str {
        METHOD_BLAKE3
    }
}

/// SHA-256 fallback strategy.
pub struct Sha256Hash;

impl HashStrategy for Sha256Hash {
    fn digest(&self, body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(body))
    }

    fn method(&self) -> &'static str {
        METHOD_SHA256
    }
}

/// Strategy for the policy's configured preference.
pub fn strategy_for(preference: HashPreference) -> Box<dyn HashStrategy> {
    match preference {
        HashPreference::Blake3 => Box::new(Blake3Hash),
        HashPreference::Sha256 => Box::new(Sha256Hash),
    }
}

/// Strategy for a recorded method label, used when verifying.
pub fn strategy_for_method(method: &str) -> Option<Box<dyn HashStrategy>> {
    match method {
        METHOD_BLAKE3 => Some(Box::new(Blake3Hash)),
        METHOD_SHA256 => Some(Box::new(Sha256Hash)),
        _ => None,
    }
}
