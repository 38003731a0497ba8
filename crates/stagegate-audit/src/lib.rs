//! Stagegate audit — the tamper-evident deployment decision ledger.
//!
//! Rollout decisions are appended as hash-chained, HMAC-signed records:
//! each record's canonical body embeds the hash of its predecessor, so
//! silent insertion, deletion, or reordering is detectable, and the
//! signature binds the chain to the holder of the signing key. The log
//! stores nothing itself; consumers persist records verbatim and replay
//! [`verify_chain`] over them.
//!
//! # Components
//!
//! - **`hash`** — Pluggable content-hash strategies (blake3 preferred, sha256 fallback)
//! - **`log`** — Canonicalization, record append, chain verification

pub mod hash;
pub mod log;

pub use hash::{Blake3Hash, HashStrategy, METHOD_BLAKE3, METHOD_SHA256, Sha256Hash, strategy_for};
pub use log::{
    API_VERSION, AuditEntry, AuditError, AuditLog, AuditRecord, ChainError, GENESIS_HASH,
    verify_chain,
};
