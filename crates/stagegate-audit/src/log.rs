//! Hash-chained, HMAC-signed decision ledger.
//!
//! Every record embeds the hash of its predecessor, so silent insertion,
//! deletion, or reordering breaks the chain. The body is canonicalized to
//! JSON with sorted keys before hashing and signing; consumers persist
//! records verbatim and replay the same canonicalization to verify.
//!
//! `record` computes the hash and advances the last-hash pointer inside
//! one critical section. Two concurrent writers can never observe the
//! same `previous_hash`, which is what keeps the chain linear.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use stagegate_core::{CanaryResult, GateResult, Policy};

use crate::hash::{HashStrategy, strategy_for, strategy_for_method};

type HmacSha256 = Hmac<Sha256>;

/// Canonical-form revision recorded in every body.
pub const API_VERSION: &str = "v1";

/// Previous-hash value of the first record in a chain.
pub const GENESIS_HASH: &str = "";

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to canonicalize record body: {0}")]
    Canonicalize(#[from] serde_json::Error),
    #[error("invalid signing key")]
    InvalidKey,
}

/// Why a chain failed verification, with the offending record index.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("record {index}: unknown hash method {method:?}")]
    UnknownHashMethod { index: usize, method: String },
    #[error("record {index}: content hash does not match its body")]
    HashMismatch { index: usize },
    #[error("record {index}: previous_hash does not link to record {}", .index - 1)]
    BrokenLink { index: usize },
    #[error("record {index}: signature verification failed")]
    BadSignature { index: usize },
    #[error("record {index}: body could not be canonicalized: {message}")]
    Canonicalize { index: usize, message: String },
}

/// One rollout decision to append to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub stage_idx: usize,
    pub reason: String,
    pub metrics: BTreeMap<String, f64>,
    /// Gate outcome the decision was made against, when one was evaluated.
    pub gate: Option<GateResult>,
    pub pct_from: Option<f64>,
    pub pct_to: Option<f64>,
}

impl AuditEntry {
    /// Build an entry from a controller result and its gate outcome.
    ///
    /// Promote results carry `pct_from`/`pct_to` in their metrics map;
    /// those move to the dedicated fields here.
    pub fn from_result(result: &CanaryResult, gate: Option<&GateResult>) -> Self {
        let mut metrics = result.metrics.clone();
        let pct_from = metrics.remove("pct_from");
        let pct_to = metrics.remove("pct_to");
        Self {
            action: result.action.as_str().to_string(),
            stage_idx: result.stage_idx,
            reason: result.reason.clone(),
            metrics,
            gate: gate.cloned(),
            pct_from,
            pct_to,
        }
    }
}

/// An appended, immutable ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub api_version: String,
    pub action: String,
    pub stage_idx: usize,
    pub reason: String,
    pub metrics: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_to: Option<f64>,
    /// Unix seconds when the record was appended.
    pub recorded_at: u64,
    /// Hash of the preceding record; empty for the chain head.
    pub previous_hash: String,
    /// Algorithm the content hash was computed with.
    pub hash_method: String,
    /// Content hash over the canonical body (everything above).
    pub hash: String,
    /// HMAC-SHA256 over the canonical body, hex encoded.
    pub signature: String,
}

/// The hashed-and-signed portion of a record. Field set must stay in
/// lockstep with [`AuditRecord`] minus `hash` and `signature`.
#[derive(Serialize)]
struct CanonicalBody<'a> {
    api_version: &'a str,
    action: &'a str,
    stage_idx: usize,
    reason: &'a str,
    metrics: &'a BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gate: Option<&'a GateResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pct_from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pct_to: Option<f64>,
    recorded_at: u64,
    previous_hash: &'a str,
    hash_method: &'a str,
}

impl<'a> CanonicalBody<'a> {
    fn from_record(record: &'a AuditRecord) -> Self {
        Self {
            api_version: &record.api_version,
            action: &record.action,
            stage_idx: record.stage_idx,
            reason: &record.reason,
            metrics: &record.metrics,
            gate: record.gate.as_ref(),
            pct_from: record.pct_from,
            pct_to: record.pct_to,
            recorded_at: record.recorded_at,
            previous_hash: &record.previous_hash,
            hash_method: &record.hash_method,
        }
    }

    /// Canonical JSON bytes: object keys sorted, no insignificant
    /// whitespace. Round-tripping through `Value` sorts the keys.
    fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&value)?.into_bytes())
    }
}

/// Append-only decision ledger.
///
/// The log itself holds no records; consumers persist what `record`
/// returns. Its only mutable state is the last-hash pointer.
pub struct AuditLog {
    hasher: Box<dyn HashStrategy>,
    key: Vec<u8>,
    last_hash: Mutex<String>,
}

impl AuditLog {
    pub fn new(hasher: Box<dyn HashStrategy>, signing_key: &[u8]) -> Self {
        Self {
            hasher,
            key: signing_key.to_vec(),
            last_hash: Mutex::new(GENESIS_HASH.to_string()),
        }
    }

    /// Log configured the way the policy asks: the preferred content
    /// hash with the given signing key.
    pub fn for_policy(policy: &Policy, signing_key: &[u8]) -> Self {
        Self::new(strategy_for(policy.audit_hash), signing_key)
    }

    /// Append one decision: canonicalize, hash, sign, advance the chain.
    pub fn record(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let recorded_at = epoch_secs();

        // Hash computation and pointer advance share one critical
        // section so concurrent writers never fork the chain.
        let mut last = self.last_hash.lock().unwrap();

        let body = CanonicalBody {
            api_version: API_VERSION,
            action: &entry.action,
            stage_idx: entry.stage_idx,
            reason: &entry.reason,
            metrics: &entry.metrics,
            gate: entry.gate.as_ref(),
            pct_from: entry.pct_from,
            pct_to: entry.pct_to,
            recorded_at,
            previous_hash: &last,
            hash_method: self.hasher.method(),
        };
        let bytes = body.canonical_bytes()?;
        let hash = self.hasher.digest(&bytes);
        let signature = sign(&self.key, &bytes)?;

        let record = AuditRecord {
            api_version: API_VERSION.to_string(),
            action: entry.action,
            stage_idx: entry.stage_idx,
            reason: entry.reason,
            metrics: entry.metrics,
            gate: entry.gate,
            pct_from: entry.pct_from,
            pct_to: entry.pct_to,
            recorded_at,
            previous_hash: std::mem::take(&mut *last),
            hash_method: self.hasher.method().to_string(),
            hash: hash.clone(),
            signature,
        };
        *last = hash;
        drop(last);

        debug!(
            action = %record.action,
            stage = record.stage_idx,
            hash = %record.hash,
            "appended audit record"
        );
        Ok(record)
    }

    /// Hash of the most recently appended record; empty before the first.
    pub fn last_hash(&self) -> String {
        self.last_hash.lock().unwrap().clone()
    }
}

/// Verify a record sequence: each content hash matches its canonical
/// body, each record links to its predecessor, and each signature
/// verifies against `key`. Records with an empty `previous_hash` are
/// accepted as chain heads.
pub fn verify_chain(records: &[AuditRecord], key: &[u8]) -> Result<(), ChainError> {
    for (index, record) in records.iter().enumerate() {
        let hasher = strategy_for_method(&record.hash_method).ok_or_else(|| {
            ChainError::UnknownHashMethod {
                index,
                method: record.hash_method.clone(),
            }
        })?;

        let bytes = CanonicalBody::from_record(record)
            .canonical_bytes()
            .map_err(|err| ChainError::Canonicalize {
                index,
                message: err.to_string(),
            })?;

        if hasher.digest(&bytes) != record.hash {
            return Err(ChainError::HashMismatch { index });
        }
        if index > 0 && record.previous_hash != records[index - 1].hash {
            return Err(ChainError::BrokenLink { index });
        }

        // Mac::verify_slice is constant-time.
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| ChainError::BadSignature { index })?;
        mac.update(&bytes);
        let raw = hex::decode(&record.signature)
            .map_err(|_| ChainError::BadSignature { index })?;
        mac.verify_slice(&raw)
            .map_err(|_| ChainError::BadSignature { index })?;
    }
    Ok(())
}

fn sign(key: &[u8], bytes: &[u8]) -> Result<String, AuditError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AuditError::InvalidKey)?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Blake3Hash, METHOD_BLAKE3, METHOD_SHA256, Sha256Hash};

    const KEY: &[u8] = b"stagegate-test-signing-key";

    fn entry(action: &str, stage_idx: usize, reason: &str) -> AuditEntry {
        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), 0.01);
        AuditEntry {
            action: action.to_string(),
            stage_idx,
            reason: reason.to_string(),
            metrics,
            gate: Some(GateResult::pass()),
            pct_from: None,
            pct_to: None,
        }
    }

    fn chain_of(n: usize) -> Vec<AuditRecord> {
        let log = AuditLog::new(Box::new(Blake3Hash), KEY);
        (0..n)
            .map(|i| log.record(entry("promote", i, "Promoted")).unwrap())
            .collect()
    }

    #[test]
    fn first_record_is_a_chain_head() {
        let log = AuditLog::new(Box::new(Blake3Hash), KEY);
        let record = log.record(entry("start", 0, "Deployment started")).unwrap();
        assert_eq!(record.previous_hash, GENESIS_HASH);
        assert_eq!(record.hash_method, METHOD_BLAKE3);
        assert_eq!(record.api_version, API_VERSION);
        assert_eq!(log.last_hash(), record.hash);
    }

    #[test]
    fn records_link_and_verify() {
        let records = chain_of(4);
        for i in 1..records.len() {
            assert_eq!(records[i].previous_hash, records[i - 1].hash);
        }
        verify_chain(&records, KEY).unwrap();
    }

    #[test]
    fn for_policy_uses_the_configured_hash_preference() {
        use stagegate_core::HashPreference;

        let log = AuditLog::for_policy(&Policy::default(), KEY);
        let record = log.record(entry("start", 0, "Deployment started")).unwrap();
        assert_eq!(record.hash_method, METHOD_BLAKE3);

        let policy = Policy {
            audit_hash: HashPreference::Sha256,
            ..Policy::default()
        };
        let log = AuditLog::for_policy(&policy, KEY);
        let record = log.record(entry("start", 0, "Deployment started")).unwrap();
        assert_eq!(record.hash_method, METHOD_SHA256);
        verify_chain(&[record], KEY).unwrap();
    }

    #[test]
    fn sha256_chain_verifies_via_recorded_method() {
        let log = AuditLog::new(Box::new(Sha256Hash), KEY);
        let records: Vec<_> = (0..3)
            .map(|i| log.record(entry("promote", i, "Promoted")).unwrap())
            .collect();
        assert!(records.iter().all(|r| r.hash_method == METHOD_SHA256));
        verify_chain(&records, KEY).unwrap();
    }

    #[test]
    fn tampered_reason_breaks_the_hash() {
        let mut records = chain_of(3);
        records[1].reason = "Rewritten history".to_string();
        assert_eq!(
            verify_chain(&records, KEY),
            Err(ChainError::HashMismatch { index: 1 })
        );
    }

    #[test]
    fn dropped_record_breaks_linkage() {
        let mut records = chain_of(3);
        records.remove(1);
        assert_eq!(
            verify_chain(&records, KEY),
            Err(ChainError::BrokenLink { index: 1 })
        );
    }

    #[test]
    fn reordered_records_break_linkage() {
        let mut records = chain_of(3);
        records.swap(1, 2);
        assert_eq!(
            verify_chain(&records, KEY),
            Err(ChainError::BrokenLink { index: 1 })
        );
    }

    #[test]
    fn wrong_key_fails_signature_check() {
        let records = chain_of(2);
        assert_eq!(
            verify_chain(&records, b"someone-elses-key"),
            Err(ChainError::BadSignature { index: 0 })
        );
    }

    #[test]
    fn unknown_hash_method_is_rejected() {
        let mut records = chain_of(1);
        records[0].hash_method = "md5".to_string();
        assert!(matches!(
            verify_chain(&records, KEY),
            Err(ChainError::UnknownHashMethod { index: 0, .. })
        ));
    }

    #[test]
    fn records_survive_serde_round_trip_and_still_verify() {
        let records = chain_of(3);
        let json = serde_json::to_string(&records).unwrap();
        let back: Vec<AuditRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, records);
        verify_chain(&back, KEY).unwrap();
    }

    #[test]
    fn entry_from_result_lifts_promotion_percentages() {
        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), 0.01);
        metrics.insert("pct_from".to_string(), 0.05);
        metrics.insert("pct_to".to_string(), 0.25);
        let result = CanaryResult {
            success: true,
            action: stagegate_core::CanaryAction::Promote,
            stage_idx: 2,
            reason: "Promoted to stage 2 (25%)".to_string(),
            metrics,
        };

        let entry = AuditEntry::from_result(&result, Some(&GateResult::pass()));
        assert_eq!(entry.pct_from, Some(0.05));
        assert_eq!(entry.pct_to, Some(0.25));
        assert!(!entry.metrics.contains_key("pct_from"));
        assert_eq!(entry.metrics.get("error_rate"), Some(&0.01));
    }

    #[test]
    fn concurrent_writers_never_fork_the_chain() {
        use std::sync::Arc;

        let log = Arc::new(AuditLog::new(Box::new(Blake3Hash), KEY));
        let mut handles = Vec::new();
        for t in 0..4 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                (0..25)
                    .map(|i| log.record(entry("continue", t * 25 + i, "tick")).unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut records: Vec<AuditRecord> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        // Every previous_hash is unique: the chain is a line, not a tree.
        let mut prevs: Vec<&str> =
            records.iter().map(|r| r.previous_hash.as_str()).collect();
        prevs.sort_unstable();
        prevs.dedup();
        assert_eq!(prevs.len(), records.len());

        // Reassembled in chain order, the whole thing verifies.
        let mut ordered = Vec::with_capacity(records.len());
        let mut cursor = GENESIS_HASH.to_string();
        while let Some(pos) = records.iter().position(|r| r.previous_hash == cursor) {
            let record = records.swap_remove(pos);
            cursor = record.hash.clone();
            ordered.push(record);
        }
        assert_eq!(ordered.len(), 100);
        verify_chain(&ordered, KEY).unwrap();
    }
}
