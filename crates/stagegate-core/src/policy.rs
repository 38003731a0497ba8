//! Rollout policy — the immutable configuration every component reads.
//!
//! A `Policy` is created once at deployment configuration time (inline or
//! from a TOML file) and never mutated afterwards; the controller, gates,
//! and backout all hold shared references to the same instance. Anything
//! that used to be an environment switch in older deploy tooling is an
//! explicit field here so behavior stays deterministic and testable.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which content hash the audit trail should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashPreference {
    #[default]
    Blake3,
    Sha256,
}

/// Immutable rollout policy.
///
/// Durations are stored as whole seconds (the granularity promotion
/// decisions operate at); use the accessor methods when a
/// [`std::time::Duration`] is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Ordered traffic fractions, strictly ascending, each in (0, 1].
    pub stages: Vec<f64>,
    /// Seconds a stage must soak before SLO and promotion checks apply.
    pub min_stage_duration_secs: u64,
    /// Seconds after which a stage that has not promoted is rolled back.
    pub stage_timeout_secs: u64,
    /// MTTR budget for a full cross-component rollback.
    pub rollback_timeout_secs: u64,
    /// Minimum seconds between consecutive promotions (velocity guard).
    pub min_promotion_gap_secs: u64,

    /// Rollback when error_rate exceeds baseline by this factor.
    pub error_rate_multiplier: f64,
    /// Rollback when latency_p95 exceeds baseline by this factor.
    pub latency_p95_multiplier: f64,
    /// Absolute saturation ceiling in [0, 1]; not baseline-relative.
    pub saturation_threshold: f64,

    /// slot08: integrity score floor.
    pub anchor_integrity_threshold: f64,
    /// slot08: rolling recovery-rate floor.
    pub anchor_recovery_threshold: f64,
    /// slot09: drift z-score ceiling (gate fails at or above it).
    pub sentinel_drift_z_threshold: f64,

    /// Evaluate the coherence (LightClock) gate in addition to the base gate.
    pub coherence_gate: bool,
    /// Coherence gate: TRI score floor.
    pub tri_score_threshold: f64,
    /// Coherence gate: phase-lock floor.
    pub phase_lock_threshold: f64,
    /// Coherence gate: policy labels permitted to deploy.
    pub allowed_policies: Vec<String>,

    /// Content hash the audit trail prefers (falls back to sha256 when
    /// the preferred strategy is unavailable at construction).
    pub audit_hash: HashPreference,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            stages: vec![0.01, 0.05, 0.25, 0.50, 1.00],
            min_stage_duration_secs: 300,
            stage_timeout_secs: 3600,
            rollback_timeout_secs: 300,
            min_promotion_gap_secs: 600,
            error_rate_multiplier: 1.5,
            latency_p95_multiplier: 1.5,
            saturation_threshold: 0.85,
            anchor_integrity_threshold: 0.7,
            anchor_recovery_threshold: 0.8,
            sentinel_drift_z_threshold: 3.0,
            coherence_gate: false,
            tri_score_threshold: 0.7,
            phase_lock_threshold: 0.4,
            allowed_policies: vec!["standard".to_string()],
            audit_hash: HashPreference::Blake3,
        }
    }
}

impl Policy {
    /// Load a policy from a TOML file and validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let policy: Policy = toml::from_str(&content)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject configurations the controller cannot run safely.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stages.is_empty() {
            bail!("policy has no stages");
        }
        let mut prev = 0.0;
        for (i, pct) in self.stages.iter().enumerate() {
            if !pct.is_finite() || *pct <= prev || *pct > 1.0 {
                bail!(
                    "stage {i} percentage {pct} must be ascending and in (0, 1]"
                );
            }
            prev = *pct;
        }
        if self.error_rate_multiplier <= 0.0 || self.latency_p95_multiplier <= 0.0 {
            bail!("SLO multipliers must be positive");
        }
        if !(0.0..=1.0).contains(&self.saturation_threshold) {
            bail!(
                "saturation_threshold {} must be in [0, 1]",
                self.saturation_threshold
            );
        }
        if self.coherence_gate && self.allowed_policies.is_empty() {
            bail!("coherence gate enabled with an empty policy allow-list");
        }
        Ok(())
    }

    pub fn min_stage_duration(&self) -> Duration {
        Duration::from_secs(self.min_stage_duration_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_secs(self.rollback_timeout_secs)
    }

    pub fn min_promotion_gap(&self) -> Duration {
        Duration::from_secs(self.min_promotion_gap_secs)
    }

    /// Percentage for a stage index, if the index is in range.
    pub fn stage_pct(&self, idx: usize) -> Option<f64> {
        self.stages.get(idx).copied()
    }
}
