//! Domain types shared across the stagegate crates.
//!
//! Health snapshots mirror what the platform's slot08 (truth-anchor store)
//! and slot09 (drift sentinel) feeds publish; gate and canary results are
//! the evaluator outputs consumed by the exporter and the audit trail.
//! All types are serializable to JSON so audit consumers can persist them
//! verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a snapshot held by an external snapshot store.
pub type SnapshotId = String;

/// String code naming one violated gate precondition (e.g. `slot08_quarantine`).
pub type ConditionCode = String;

// ── Health signals ──────────────────────────────────────────────────

/// Point-in-time health of the truth-anchor store (slot08).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthAnchorHealth {
    /// Aggregate anchor integrity in [0, 1].
    pub integrity_score: f64,
    /// True while the store has quarantined suspect anchors.
    pub quarantine_active: bool,
    /// Rolling success rate of recent recovery operations, in [0, 1].
    pub recent_recovery_rate: f64,
    pub checksum_mismatch: bool,
    pub tamper_evidence: bool,
}

/// Point-in-time health of the drift sentinel (slot09).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftSentinelHealth {
    /// True while the sentinel has forced the platform into safe mode.
    pub safe_mode_active: bool,
    /// Standard score of observed drift; higher means further from baseline.
    pub drift_z: f64,
    /// Truth-resonance score in [0, 1], when the sentinel computes one.
    pub tri_score: Option<f64>,
}

/// Runtime service metrics sampled once per controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    /// Fraction of failed requests, in [0, 1].
    pub error_rate: f64,
    /// 95th percentile request latency in milliseconds.
    pub latency_p95: f64,
    /// Worst resource saturation across the serving fleet, in [0, 1].
    pub saturation: f64,
}

// ── Gate results ────────────────────────────────────────────────────

/// Outcome of one deploy-gate evaluation.
///
/// `failed_conditions` carries every violated precondition, not just the
/// first; operators diagnose from the full list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub failed_conditions: Vec<ConditionCode>,
}

impl GateResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failed_conditions: Vec::new(),
        }
    }

    pub fn fail(failed_conditions: Vec<ConditionCode>) -> Self {
        Self {
            passed: false,
            failed_conditions,
        }
    }
}

/// Coherence band derived from the phase-lock signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoherenceLevel {
    High,
    Medium,
    Low,
    /// The phase-lock signal was absent.
    Unknown,
}

impl CoherenceLevel {
    /// Bucket a phase-lock reading: >= 0.85 is high, < 0.4 is low,
    /// anything between is medium, and a missing signal is unknown.
    pub fn from_phase_lock(phase_lock: Option<f64>) -> Self {
        match phase_lock {
            None => CoherenceLevel::Unknown,
            Some(v) if v >= 0.85 => CoherenceLevel::High,
            Some(v) if v < 0.4 => CoherenceLevel::Low,
            Some(_) => CoherenceLevel::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoherenceLevel::High => "high",
            CoherenceLevel::Medium => "medium",
            CoherenceLevel::Low => "low",
            CoherenceLevel::Unknown => "unknown",
        }
    }
}

/// Outcome of a coherence-gate evaluation (the LightClock variant).
///
/// Carries the base gate verdict plus the coherence signals it was
/// derived from, so the controller can pick a tuning regime without
/// re-reading the signal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceGateResult {
    pub passed: bool,
    pub failed_conditions: Vec<ConditionCode>,
    pub phase_lock_value: Option<f64>,
    pub tri_score: Option<f64>,
    pub policy_label: Option<String>,
    pub coherence_level: CoherenceLevel,
}

impl CoherenceGateResult {
    /// Project down to the base gate verdict (for audit records and the
    /// metrics exporter, which speak plain `GateResult`).
    pub fn as_gate_result(&self) -> GateResult {
        GateResult {
            passed: self.passed,
            failed_conditions: self.failed_conditions.clone(),
        }
    }
}

// ── Canary results ──────────────────────────────────────────────────

/// What the controller decided on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanaryAction {
    Start,
    Continue,
    Promote,
    Rollback,
}

impl CanaryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanaryAction::Start => "start",
            CanaryAction::Continue => "continue",
            CanaryAction::Promote => "promote",
            CanaryAction::Rollback => "rollback",
        }
    }
}

/// The controller's sole externally observable output, one per tick.
///
/// `metrics` holds the runtime numbers the decision was made against;
/// promote results additionally carry `pct_from`/`pct_to` so audit
/// consumers never reach into live controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryResult {
    pub success: bool,
    pub action: CanaryAction,
    pub stage_idx: usize,
    pub reason: String,
    pub metrics: BTreeMap<String, f64>,
}

impl CanaryResult {
    /// Metrics map entries for a runtime sample, in the shape every
    /// result carries.
    pub fn metrics_from_runtime(runtime: &RuntimeMetrics) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("error_rate".to_string(), runtime.error_rate);
        m.insert("latency_p95".to_string(), runtime.latency_p95);
        m.insert("saturation".to_string(), runtime.saturation);
        m
    }
}
