//! LightClock coherence gate — phase-locked promotion preconditions.
//!
//! Extends the base deploy gate with three platform-wide signals: the
//! TRI (truth-resonance) score published by the drift sentinel, the
//! LightClock phase-lock value, and the active deploy-policy label. The
//! phase-lock value is also bucketed into a coherence level the
//! controller uses to pick a promotion tuning regime.
//!
//! Signals arrive through a key/value reader. A missing or unparseable
//! signal fails its precondition; promotion never proceeds on absent
//! evidence.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use stagegate_core::{
    CoherenceGateResult, CoherenceLevel, DriftSentinelHealth, Policy, TruthAnchorHealth,
};

use crate::gatekeeper::Gatekeeper;

/// Signal key the phase-lock value is published under.
pub const PHASE_LOCK_KEY: &str = "phase_lock";
/// Signal key the active deploy-policy label is published under.
pub const DEPLOY_POLICY_KEY: &str = "deploy_policy";

/// Coherence gate: TRI score missing or under the policy floor.
pub const COND_TRI_SCORE: &str = "lightclock_tri_score";
/// Coherence gate: phase-lock missing or under the policy floor.
pub const COND_PHASE_LOCK: &str = "lightclock_phase_lock";
/// Coherence gate: active policy label missing or not in the allow-list.
pub const COND_POLICY_LABEL: &str = "lightclock_policy";

/// Key/value lookup over the platform's signal plane.
pub trait SignalReader: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Fixed-map signal reader for tests and demos.
#[derive(Default)]
pub struct StaticSignalReader {
    values: RwLock<BTreeMap<String, String>>,
}

impl StaticSignalReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().unwrap().remove(key);
    }
}

impl SignalReader for StaticSignalReader {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().unwrap().get(key).cloned()
    }
}

/// The LightClock gate: base preconditions plus coherence signals.
pub struct CoherenceGatekeeper {
    policy: Arc<Policy>,
    base: Gatekeeper,
    signals: Arc<dyn SignalReader>,
}

impl CoherenceGatekeeper {
    pub fn new(policy: Arc<Policy>, signals: Arc<dyn SignalReader>) -> Self {
        Self {
            base: Gatekeeper::new(Arc::clone(&policy)),
            policy,
            signals,
        }
    }

    /// Evaluate the base gate plus the three coherence preconditions.
    ///
    /// `failed_conditions` is the union of base and coherence violations.
    pub fn evaluate_deploy_gate(
        &self,
        anchor: &TruthAnchorHealth,
        sentinel: &DriftSentinelHealth,
    ) -> CoherenceGateResult {
        let base = self.base.evaluate_deploy_gate(anchor, sentinel);
        let mut failed = base.failed_conditions;

        let tri_score = sentinel.tri_score;
        match tri_score {
            Some(score) if score >= self.policy.tri_score_threshold => {}
            _ => failed.push(COND_TRI_SCORE.to_string()),
        }

        let phase_lock = self.read_phase_lock();
        match phase_lock {
            Some(value) if value >= self.policy.phase_lock_threshold => {}
            _ => failed.push(COND_PHASE_LOCK.to_string()),
        }

        let policy_label = self.signals.get(DEPLOY_POLICY_KEY);
        match &policy_label {
            Some(label) if self.policy.allowed_policies.iter().any(|p| p == label) => {}
            _ => failed.push(COND_POLICY_LABEL.to_string()),
        }

        let coherence_level = CoherenceLevel::from_phase_lock(phase_lock);
        let passed = failed.is_empty();
        if passed {
            debug!(level = coherence_level.as_str(), "coherence gate passed");
        } else {
            warn!(
                conditions = ?failed,
                level = coherence_level.as_str(),
                "coherence gate failed"
            );
        }

        CoherenceGateResult {
            passed,
            failed_conditions: failed,
            phase_lock_value: phase_lock,
            tri_score,
            policy_label,
            coherence_level,
        }
    }

    /// Current phase-lock reading, independent of a full evaluation.
    /// The controller reads this to select its tuning regime.
    pub fn phase_lock(&self) -> Option<f64> {
        self.read_phase_lock()
    }

    fn read_phase_lock(&self) -> Option<f64> {
        let raw = self.signals.get(PHASE_LOCK_KEY)?;
        match raw.parse::<f64>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(value = %raw, "unparseable phase_lock signal, treating as absent");
                None
            }
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

    fn green_signals() -> Arc<StaticSignalReader> {
        let signals = StaticSignalReader::new();
        signals.set(PHASE_LOCK_KEY, "0.92");
        signals.set(DEPLOY_POLICY_KEY, "standard");
        Arc::new(signals)
    }

    fn gatekeeper(signals: Arc<StaticSignalReader>) -> CoherenceGatekeeper {
        CoherenceGatekeeper::new(Arc::new(Policy::default()), signals)
    }

    #[test]
    fn green_signals_pass_at_high_coherence() {
        let gate = gatekeeper(green_signals());
        let result = gate.evaluate_deploy_gate(&healthy_anchor(), &healthy_sentinel());
        assert!(result.passed);
        assert_eq!(result.coherence_level, CoherenceLevel::High);
        assert_eq!(result.phase_lock_value, Some(0.92));
        assert_eq!(result.policy_label.as_deref(), Some("standard"));
    }

    #[test]
    fn low_phase_lock_fails_and_classifies_low() {
        let signals = green_signals();
        signals.set(PHASE_LOCK_KEY, "0.2");
        let gate = gatekeeper(signals);
        let result = gate.evaluate_deploy_gate(&healthy_anchor(), &healthy_sentinel());
        assert!(!result.passed);
        assert_eq!(result.failed_conditions, vec![COND_PHASE_LOCK]);
        assert_eq!(result.coherence_level, CoherenceLevel::Low);
    }

    #[test]
    fn missing_phase_lock_is_unknown_and_fails() {
        let signals = green_signals();
        signals.remove(PHASE_LOCK_KEY);
        let gate = gatekeeper(signals);
        let result = gate.evaluate_deploy_gate(&healthy_anchor(), &healthy_sentinel());
        assert!(!result.passed);
        assert!(result.failed_conditions.contains(&COND_PHASE_LOCK.to_string()));
        assert_eq!(result.coherence_level, CoherenceLevel::Unknown);
        assert_eq!(result.phase_lock_value, None);
    }

    #[test]
    fn unparseable_phase_lock_treated_as_absent() {
        let signals = green_signals();
        signals.set(PHASE_LOCK_KEY, "not-a-number");
        let gate = gatekeeper(signals);
        let result = gate.evaluate_deploy_gate(&healthy_anchor(), &healthy_sentinel());
        assert!(result.failed_conditions.contains(&COND_PHASE_LOCK.to_string()));
        assert_eq!(result.coherence_level, CoherenceLevel::Unknown);
    }

    #[test]
    fn missing_tri_score_fails() {
        let sentinel = DriftSentinelHealth {
            tri_score: None,
            ..healthy_sentinel()
        };
        let gate = gatekeeper(green_signals());
        let result = gate.evaluate_deploy_gate(&healthy_anchor(), &sentinel);
        assert!(!result.passed);
        assert_eq!(result.failed_conditions, vec![COND_TRI_SCORE]);
    }

    #[test]
    fn disallowed_policy_label_fails() {
        let signals = green_signals();
        signals.set(DEPLOY_POLICY_KEY, "experimental");
        let gate = gatekeeper(signals);
        let result = gate.evaluate_deploy_gate(&healthy_anchor(), &healthy_sentinel());
        assert!(!result.passed);
        assert_eq!(result.failed_conditions, vec![COND_POLICY_LABEL]);
        assert_eq!(result.policy_label.as_deref(), Some("experimental"));
    }

    #[test]
    fn base_and_coherence_violations_union() {
        let anchor = TruthAnchorHealth {
            quarantine_active: true,
            ..healthy_anchor()
        };
        let signals = green_signals();
        signals.set(PHASE_LOCK_KEY, "0.1");
        let gate = gatekeeper(signals);
        let result = gate.evaluate_deploy_gate(&anchor, &healthy_sentinel());
        assert_eq!(
            result.failed_conditions,
            vec![
                crate::gatekeeper::COND_ANCHOR_QUARANTINE.to_string(),
                COND_PHASE_LOCK.to_string(),
            ]
        );
    }
}
