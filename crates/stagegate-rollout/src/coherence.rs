//! Coherence-adaptive canary controller.
//!
//! Wraps the base controller with the LightClock gate and a tuning
//! regime picked from the phase-lock signal: high coherence promotes
//! faster with looser SLO multipliers, low coherence slower and
//! stricter, minimal coherence much slower and much stricter. An
//! unknown signal keeps the policy's own tuning but still fails the
//! coherence gate, so promotion halts either way.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use stagegate_core::{
    CanaryAction, CanaryResult, CoherenceGateResult, DriftSentinelHealth, HealthFeed, Policy,
    RuntimeMetrics, TruthAnchorHealth,
};
use stagegate_gate::{CoherenceGatekeeper, SignalReader};

use crate::controller::{CanaryController, StageTuning};

/// Scale factors applied to the policy's promotion knobs for one
/// coherence regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeTuning {
    /// Scales `min_stage_duration`.
    pub stage_duration_factor: f64,
    /// Scales `min_promotion_gap`.
    pub promotion_gap_factor: f64,
    /// Scales both baseline-relative SLO multipliers.
    pub slo_multiplier_factor: f64,
}

impl RegimeTuning {
    /// Phase-locked platform: promote faster, tolerate more drift.
    pub const ACCELERATE: Self = Self {
        stage_duration_factor: 0.5,
        promotion_gap_factor: 0.5,
        slo_multiplier_factor: 1.25,
    };

    /// Policy values as configured.
    pub const STANDARD: Self = Self {
        stage_duration_factor: 1.0,
        promotion_gap_factor: 1.0,
        slo_multiplier_factor: 1.0,
    };

    /// Coherence degrading: slow down, tighten objectives.
    pub const DECELERATE: Self = Self {
        stage_duration_factor: 2.0,
        promotion_gap_factor: 2.0,
        slo_multiplier_factor: 0.75,
    };

    /// Barely coherent: crawl, tolerate almost no drift.
    pub const EXTREME_CAUTION: Self = Self {
        stage_duration_factor: 4.0,
        promotion_gap_factor: 4.0,
        slo_multiplier_factor: 0.5,
    };

    /// Pick the regime for a phase-lock reading. An absent signal keeps
    /// the standard regime (the coherence gate already blocks on it).
    pub fn for_phase_lock(phase_lock: Option<f64>) -> Self {
        match phase_lock {
            Some(v) if v >= 0.85 => Self::ACCELERATE,
            Some(v) if v < 0.2 => Self::EXTREME_CAUTION,
            Some(v) if v < 0.4 => Self::DECELERATE,
            _ => Self::STANDARD,
        }
    }

    /// Derive the effective tuning from policy values.
    pub fn apply(&self, policy: &Policy) -> StageTuning {
        StageTuning {
            min_stage_duration: policy.min_stage_duration().mul_f64(self.stage_duration_factor),
            min_promotion_gap: policy.min_promotion_gap().mul_f64(self.promotion_gap_factor),
            error_rate_multiplier: policy.error_rate_multiplier * self.slo_multiplier_factor,
            latency_p95_multiplier: policy.latency_p95_multiplier * self.slo_multiplier_factor,
        }
    }
}

/// Canary controller with coherence-adaptive promotion.
pub struct CoherenceCanaryController {
    inner: CanaryController,
    gate: CoherenceGatekeeper,
    last_promotion_at: Option<Instant>,
    last_coherence: Option<CoherenceGateResult>,
}

impl CoherenceCanaryController {
    pub fn new(
        policy: Arc<Policy>,
        feed: Arc<dyn HealthFeed>,
        signals: Arc<dyn SignalReader>,
    ) -> Self {
        Self {
            gate: CoherenceGatekeeper::new(Arc::clone(&policy), signals),
            inner: CanaryController::new(policy, feed),
            last_promotion_at: None,
            last_coherence: None,
        }
    }

    /// See [`CanaryController::start_deployment`]; also resets the
    /// promotion-velocity clock.
    pub fn start_deployment(&mut self, baseline: RuntimeMetrics) -> CanaryResult {
        self.last_promotion_at = None;
        self.last_coherence = None;
        self.inner.start_deployment(baseline)
    }

    /// Coherence-gated stage evaluation.
    ///
    /// Order: terminal/no-op replay, stage-index sanity, coherence gate,
    /// regime tuning, promotion-velocity guard, then the base checks.
    pub fn evaluate_stage(
        &mut self,
        current: &RuntimeMetrics,
        anchor: &TruthAnchorHealth,
        sentinel: &DriftSentinelHealth,
    ) -> CanaryResult {
        if let Some(result) = self.inner.non_running_result() {
            return result;
        }

        // Defensive: bookkeeping out of range should never happen.
        if self.inner.stage_idx() >= self.inner.stage_count() {
            return self.inner.force_rollback(format!(
                "Invalid stage index {} ({} stages)",
                self.inner.stage_idx(),
                self.inner.stage_count()
            ));
        }

        let coherence = self.gate.evaluate_deploy_gate(anchor, sentinel);
        self.inner.set_last_gate(coherence.as_gate_result());
        let phase_lock = coherence.phase_lock_value;

        if !coherence.passed {
            let conditions = coherence.failed_conditions.join(", ");
            self.last_coherence = Some(coherence);
            return self
                .inner
                .force_rollback(format!("Coherence gate failed: {conditions}"));
        }

        let regime = RegimeTuning::for_phase_lock(phase_lock);
        let tuning = regime.apply(self.inner.policy());
        debug!(
            level = coherence.coherence_level.as_str(),
            min_stage_secs = tuning.min_stage_duration.as_secs(),
            err_mult = tuning.error_rate_multiplier,
            "applying coherence regime"
        );
        self.inner.apply_tuning(tuning);
        self.last_coherence = Some(coherence);

        if let Some(last) = self.last_promotion_at {
            let gap = self.inner.tuning().min_promotion_gap;
            if last.elapsed() < gap {
                debug!(
                    elapsed_secs = last.elapsed().as_secs(),
                    gap_secs = gap.as_secs(),
                    "promotion velocity guard holding"
                );
                return CanaryResult {
                    success: true,
                    action: CanaryAction::Continue,
                    stage_idx: self.inner.stage_idx(),
                    reason: format!(
                        "Promotion gap: {}s since last promotion, minimum {}s",
                        last.elapsed().as_secs(),
                        gap.as_secs()
                    ),
                    metrics: CanaryResult::metrics_from_runtime(current),
                };
            }
        }

        let result = self.inner.evaluate_stage(current, anchor, sentinel);
        if result.action == CanaryAction::Promote {
            self.last_promotion_at = Some(Instant::now());
        }
        result
    }

    /// Pull from the feed and evaluate; feed errors fail closed exactly
    /// like the base controller.
    pub fn tick(&mut self) -> CanaryResult {
        if let Some(result) = self.inner.non_running_result() {
            return result;
        }
        match self.inner.pull_signals() {
            Ok((anchor, sentinel, runtime)) => self.evaluate_stage(&runtime, &anchor, &sentinel),
            Err(err) => {
                error!(error = %err, "health feed error, failing closed");
                self.inner
                    .force_rollback(format!("Health feed error: {err}"))
            }
        }
    }

    /// The wrapped state machine (exporter reads through this).
    pub fn controller(&self) -> &CanaryController {
        &self.inner
    }

    /// Outcome of the most recent coherence gate evaluation.
    pub fn last_coherence(&self) -> Option<&CoherenceGateResult> {
        self.last_coherence.as_ref()
    }
}

/// The controller variant a policy asks for.
///
/// `Policy::coherence_gate` selects between the base state machine and
/// the coherence-gated wrapper at construction time; callers hold one
/// of these instead of deciding per deployment.
pub enum DeployController {
    Standard(CanaryController),
    Coherence(CoherenceCanaryController),
}

impl DeployController {
    /// Build the controller the policy configures. The signal reader is
    /// only consulted by the coherence variant.
    pub fn from_policy(
        policy: Arc<Policy>,
        feed: Arc<dyn HealthFeed>,
        signals: Arc<dyn SignalReader>,
    ) -> Self {
        if policy.coherence_gate {
            Self::Coherence(CoherenceCanaryController::new(policy, feed, signals))
        } else {
            Self::Standard(CanaryController::new(policy, feed))
        }
    }

    pub fn start_deployment(&mut self, baseline: RuntimeMetrics) -> CanaryResult {
        match self {
            Self::Standard(ctl) => ctl.start_deployment(baseline),
            Self::Coherence(ctl) => ctl.start_deployment(baseline),
        }
    }

    pub fn evaluate_stage(
        &mut self,
        current: &RuntimeMetrics,
        anchor: &TruthAnchorHealth,
        sentinel: &DriftSentinelHealth,
    ) -> CanaryResult {
        match self {
            Self::Standard(ctl) => ctl.evaluate_stage(current, anchor, sentinel),
            Self::Coherence(ctl) => ctl.evaluate_stage(current, anchor, sentinel),
        }
    }

    pub fn tick(&mut self) -> CanaryResult {
        match self {
            Self::Standard(ctl) => ctl.tick(),
            Self::Coherence(ctl) => ctl.tick(),
        }
    }

    /// The underlying state machine (exporter reads through this).
    pub fn base(&self) -> &CanaryController {
        match self {
            Self::Standard(ctl) => ctl,
            Self::Coherence(ctl) => ctl.controller(),
        }
    }
}
