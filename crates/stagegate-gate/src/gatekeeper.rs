//! Base deploy gate — precondition checks over slot08/slot09 health.
//!
//! Every precondition is evaluated on every call; nothing short-circuits.
//! Operators diagnosing a blocked deploy see the complete list of
//! violations, not whichever happened to be checked first.

use std::sync::Arc;

use tracing::{debug, warn};

use stagegate_core::{DriftSentinelHealth, GateResult, Policy, TruthAnchorHealth};

/// slot08: suspect anchors are quarantined.
pub const COND_ANCHOR_QUARANTINE: &str = "slot08_quarantine";
/// slot08: integrity score under the policy floor.
pub const COND_ANCHOR_INTEGRITY: &str = "slot08_integrity";
/// slot08: rolling recovery rate under the policy floor.
pub const COND_ANCHOR_RECOVERY: &str = "slot08_recovery_rate";
/// slot09: sentinel has forced safe mode.
pub const COND_SENTINEL_SAFE_MODE: &str = "slot09_safe_mode";
/// slot09: drift z-score at or above the policy ceiling.
pub const COND_SENTINEL_DRIFT: &str = "slot09_drift";

/// Promotion precondition evaluator.
///
/// Pure function of its inputs plus the policy; holds no mutable state.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    policy: Arc<Policy>,
}

impl Gatekeeper {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    /// Evaluate all five promotion preconditions.
    ///
    /// `passed` is true exactly when `failed_conditions` is empty.
    pub fn evaluate_deploy_gate(
        &self,
        anchor: &TruthAnchorHealth,
        sentinel: &DriftSentinelHealth,
    ) -> GateResult {
        let mut failed = Vec::new();

        if anchor.quarantine_active {
            failed.push(COND_ANCHOR_QUARANTINE.to_string());
        }
        if anchor.integrity_score < self.policy.anchor_integrity_threshold {
            failed.push(COND_ANCHOR_INTEGRITY.to_string());
        }
        if anchor.recent_recovery_rate < self.policy.anchor_recovery_threshold {
            failed.push(COND_ANCHOR_RECOVERY.to_string());
        }
        if sentinel.safe_mode_active {
            failed.push(COND_SENTINEL_SAFE_MODE.to_string());
        }
        if sentinel.drift_z >= self.policy.sentinel_drift_z_threshold {
            failed.push(COND_SENTINEL_DRIFT.to_string());
        }

        if failed.is_empty() {
            debug!("deploy gate passed");
            GateResult::pass()
        } else {
            warn!(conditions = ?failed, "deploy gate failed");
            GateResult::fail(failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_anchor() -> TruthAnchorHealth {
        TruthAnchorHealth {
            integrity_score: 0.95,
            quarantine_active: false,
            recent_recovery_rate: 0.99,
            checksum_mismatch: false,
            tamper_evidence: false,
        }
    }

    fn healthy_sentinel() -> DriftSentinelHealth {
        DriftSentinelHealth {
            safe_mode_active: false,
            drift_z: 0.4,
            tri_score: Some(0.9),
        }
    }

    fn gatekeeper() -> Gatekeeper {
        Gatekeeper::new(Arc::new(Policy::default()))
    }

    #[test]
    fn healthy_inputs_pass() {
        let result = gatekeeper().evaluate_deploy_gate(&healthy_anchor(), &healthy_sentinel());
        assert!(result.passed);
        assert!(result.failed_conditions.is_empty());
    }

    #[test]
    fn quarantine_alone_fails_with_only_that_condition() {
        let anchor = TruthAnchorHealth {
            quarantine_active: true,
            ..healthy_anchor()
        };
        let result = gatekeeper().evaluate_deploy_gate(&anchor, &healthy_sentinel());
        assert!(!result.passed);
        assert_eq!(result.failed_conditions, vec![COND_ANCHOR_QUARANTINE]);
    }

    #[test]
    fn all_violations_accumulate() {
        let anchor = TruthAnchorHealth {
            integrity_score: 0.1,
            quarantine_active: true,
            recent_recovery_rate: 0.2,
            checksum_mismatch: true,
            tamper_evidence: false,
        };
        let sentinel = DriftSentinelHealth {
            safe_mode_active: true,
            drift_z: 5.0,
            tri_score: None,
        };
        let result = gatekeeper().evaluate_deploy_gate(&anchor, &sentinel);
        assert!(!result.passed);
        assert_eq!(
            result.failed_conditions,
            vec![
                COND_ANCHOR_QUARANTINE,
                COND_ANCHOR_INTEGRITY,
                COND_ANCHOR_RECOVERY,
                COND_SENTINEL_SAFE_MODE,
                COND_SENTINEL_DRIFT,
            ]
        );
    }

    #[test]
    fn drift_at_threshold_fails() {
        // Ceiling is inclusive: z == threshold already fails.
        let sentinel = DriftSentinelHealth {
            drift_z: 3.0,
            ..healthy_sentinel()
        };
        let result = gatekeeper().evaluate_deploy_gate(&healthy_anchor(), &sentinel);
        assert_eq!(result.failed_conditions, vec![COND_SENTINEL_DRIFT]);
    }

    #[test]
    fn integrity_at_threshold_passes() {
        // Floors are exclusive: score == threshold still passes.
        let anchor = TruthAnchorHealth {
            integrity_score: 0.7,
            ..healthy_anchor()
        };
        let result = gatekeeper().evaluate_deploy_gate(&anchor, &healthy_sentinel());
        assert!(result.passed);
    }

    #[test]
    fn checksum_and_tamper_flags_do_not_gate() {
        // Carried for diagnostics; not promotion preconditions.
        let anchor = TruthAnchorHealth {
            checksum_mismatch: true,
            tamper_evidence: true,
            ..healthy_anchor()
        };
        let result = gatekeeper().evaluate_deploy_gate(&anchor, &healthy_sentinel());
        assert!(result.passed);
    }
}
