//! Stagegate core — rollout policy, health signal types, and the feed
//! capability shared by the other stagegate crates.
//!
//! The controller, gates, backout, audit trail, and exporter all speak in
//! the types defined here: an immutable [`Policy`], point-in-time health
//! snapshots from the truth-anchor store (slot08) and the drift sentinel
//! (slot09), runtime SLO metrics, and the per-tick [`CanaryResult`].
//!
//! # Components
//!
//! - **`policy`** — Immutable rollout policy, TOML loading, validation
//! - **`types`** — Health snapshots, gate results, canary results
//! - **`feed`** — Pull-based health feed capability + static test feed

pub mod feed;
pub mod policy;
pub mod types;

pub use feed::{HealthFeed, StaticHealthFeed};
pub use policy::{HashPreference, Policy};
pub use types::{
    CanaryAction, CanaryResult, CoherenceGateResult, CoherenceLevel, DriftSentinelHealth,
    GateResult, RuntimeMetrics, TruthAnchorHealth,
};
