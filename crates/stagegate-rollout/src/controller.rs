//! Canary controller — drives the staged-rollout state machine.
//!
//! The controller owns one deployment's lifecycle: it freezes an SLO
//! baseline at start, then on every tick checks the deploy gate, the
//! stage soak time, SLO drift against the baseline, and the stuck-stage
//! timeout, and either holds, promotes, or rolls back. Rollback is
//! terminal; repeated evaluation replays the identical result and
//! mutates nothing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use stagegate_core::{
    CanaryAction, CanaryResult, DriftSentinelHealth, GateResult, HealthFeed, Policy,
    RuntimeMetrics, TruthAnchorHealth,
};
use stagegate_gate::Gatekeeper;

use crate::stage::CanaryStage;

/// Lifecycle phase of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeployPhase {
    /// No deployment started yet.
    NotStarted,
    /// Working through the stage list.
    InProgress,
    /// Promoted through the final stage.
    Completed,
    /// Rolled back by gate failure, SLO breach, timeout, or fault.
    RolledBack,
}

impl DeployPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPhase::NotStarted => "not_started",
            DeployPhase::InProgress => "in_progress",
            DeployPhase::Completed => "completed",
            DeployPhase::RolledBack => "rolled_back",
        }
    }
}

/// Effective promotion tuning.
///
/// Starts as a copy of the policy's knobs; the coherence controller
/// re-derives it each tick from the active regime. The base controller
/// only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTuning {
    pub min_stage_duration: Duration,
    pub min_promotion_gap: Duration,
    pub error_rate_multiplier: f64,
    pub latency_p95_multiplier: f64,
}

impl StageTuning {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            min_stage_duration: policy.min_stage_duration(),
            min_promotion_gap: policy.min_promotion_gap(),
            error_rate_multiplier: policy.error_rate_multiplier,
            latency_p95_multiplier: policy.latency_p95_multiplier,
        }
    }
}

/// The staged-rollout state machine for one deployment.
pub struct CanaryController {
    policy: Arc<Policy>,
    gatekeeper: Gatekeeper,
    feed: Arc<dyn HealthFeed>,
    phase: DeployPhase,
    stages: Vec<CanaryStage>,
    stage_idx: usize,
    baseline: Option<RuntimeMetrics>,
    rollback_triggered: bool,
    rollback_result: Option<CanaryResult>,
    last_gate: Option<GateResult>,
    tuning: StageTuning,
}

impl CanaryController {
    pub fn new(policy: Arc<Policy>, feed: Arc<dyn HealthFeed>) -> Self {
        Self {
            gatekeeper: Gatekeeper::new(Arc::clone(&policy)),
            tuning: StageTuning::from_policy(&policy),
            policy,
            feed,
            phase: DeployPhase::NotStarted,
            stages: Vec::new(),
            stage_idx: 0,
            baseline: None,
            rollback_triggered: false,
            rollback_result: None,
            last_gate: None,
        }
    }

    /// Freeze the SLO baseline, build the stage list, and open stage 0.
    ///
    /// Also the only way `stage_idx` and `rollback_triggered` ever reset.
    pub fn start_deployment(&mut self, baseline: RuntimeMetrics) -> CanaryResult {
        self.stages = self
            .policy
            .stages
            .iter()
            .map(|pct| CanaryStage::new(*pct))
            .collect();
        self.stage_idx = 0;
        self.baseline = Some(baseline);
        self.rollback_triggered = false;
        self.rollback_result = None;
        self.last_gate = None;
        self.phase = DeployPhase::InProgress;

        let pct_label = match self.stages.first_mut() {
            Some(stage) => {
                stage.open();
                stage.pct_display()
            }
            None => "0%".to_string(), // validate() rejects empty stage lists
        };
        info!(stage = 0usize, pct = %pct_label, "deployment started");

        CanaryResult {
            success: true,
            action: CanaryAction::Start,
            stage_idx: 0,
            reason: format!("Deployment started at stage 0 ({pct_label})"),
            metrics: CanaryResult::metrics_from_runtime(&baseline),
        }
    }

    /// Evaluate the current stage against fresh signals.
    ///
    /// Check order: terminal replay, deploy gate, minimum soak, SLO vs
    /// frozen baseline, stuck-stage timeout, promote.
    pub fn evaluate_stage(
        &mut self,
        current: &RuntimeMetrics,
        anchor: &TruthAnchorHealth,
        sentinel: &DriftSentinelHealth,
    ) -> CanaryResult {
        if let Some(result) = self.non_running_result() {
            return result;
        }

        let gate = self.gatekeeper.evaluate_deploy_gate(anchor, sentinel);
        let gate_passed = gate.passed;
        let conditions = gate.failed_conditions.join(", ");
        self.last_gate = Some(gate);
        if !gate_passed {
            return self.trigger_rollback(
                format!("Gate failed: {conditions}"),
                CanaryResult::metrics_from_runtime(current),
            );
        }

        let stage_duration = match self.stages.get(self.stage_idx) {
            Some(stage) => stage.duration(),
            None => {
                // Bookkeeping fault; should never happen.
                return self.trigger_rollback(
                    format!(
                        "Invalid stage index {} ({} stages)",
                        self.stage_idx,
                        self.stages.len()
                    ),
                    CanaryResult::metrics_from_runtime(current),
                );
            }
        };

        if stage_duration < self.tuning.min_stage_duration {
            debug!(
                stage = self.stage_idx,
                soaked_secs = stage_duration.as_secs(),
                "holding stage for minimum duration"
            );
            return CanaryResult {
                success: true,
                action: CanaryAction::Continue,
                stage_idx: self.stage_idx,
                reason: format!(
                    "Holding stage {}: {}s of {}s minimum",
                    self.stage_idx,
                    stage_duration.as_secs(),
                    self.tuning.min_stage_duration.as_secs()
                ),
                metrics: CanaryResult::metrics_from_runtime(current),
            };
        }

        if let Some(breach) = self.slo_breach(current) {
            if let Some(stage) = self.stages.get_mut(self.stage_idx) {
                stage.slo_violations += 1;
            }
            return self.trigger_rollback(
                format!("SLO violation: {breach}"),
                CanaryResult::metrics_from_runtime(current),
            );
        }

        if stage_duration > self.policy.stage_timeout() {
            return self.trigger_rollback(
                format!(
                    "Stage timeout: stage {} active for {}s, limit {}s",
                    self.stage_idx,
                    stage_duration.as_secs(),
                    self.policy.stage_timeout_secs
                ),
                CanaryResult::metrics_from_runtime(current),
            );
        }

        self.promote(current)
    }

    /// Pull signals from the health feed and evaluate the current stage.
    ///
    /// A feed error fails closed: the deployment rolls back with the
    /// error in the reason rather than promoting on absent evidence.
    pub fn tick(&mut self) -> CanaryResult {
        if let Some(result) = self.non_running_result() {
            return result;
        }
        match self.pull_signals() {
            Ok((anchor, sentinel, runtime)) => self.evaluate_stage(&runtime, &anchor, &sentinel),
            Err(err) => {
                error!(error = %err, "health feed error, failing closed");
                self.force_rollback(format!("Health feed error: {err}"))
            }
        }
    }

    /// Trigger a rollback from outside the normal evaluation flow
    /// (coherence gate failures, feed outages, stage-index faults).
    /// Idempotent like the rest of the terminal handling.
    pub fn force_rollback(&mut self, reason: impl Into<String>) -> CanaryResult {
        if let Some(result) = self.non_running_result() {
            return result;
        }
        self.trigger_rollback(reason.into(), BTreeMap::new())
    }

    fn trigger_rollback(
        &mut self,
        reason: String,
        metrics: BTreeMap<String, f64>,
    ) -> CanaryResult {
        self.rollback_triggered = true;
        self.phase = DeployPhase::RolledBack;
        if let Some(stage) = self.stages.get_mut(self.stage_idx) {
            if stage.ended_at.is_none() {
                stage.close();
            }
        }
        warn!(stage = self.stage_idx, reason = %reason, "rolling back deployment");

        let result = CanaryResult {
            success: false,
            action: CanaryAction::Rollback,
            stage_idx: self.stage_idx,
            reason,
            metrics,
        };
        self.rollback_result = Some(result.clone());
        result
    }

    fn promote(&mut self, current: &RuntimeMetrics) -> CanaryResult {
        let from_idx = self.stage_idx;
        let pct_from = match self.stages.get_mut(from_idx) {
            Some(stage) => {
                stage.close();
                stage.percentage
            }
            None => 0.0,
        };
        let mut metrics = CanaryResult::metrics_from_runtime(current);
        metrics.insert("pct_from".to_string(), pct_from);

        if from_idx + 1 >= self.stages.len() {
            self.phase = DeployPhase::Completed;
            metrics.insert("pct_to".to_string(), pct_from);
            info!(stage = from_idx, "deployment completed");
            return CanaryResult {
                success: true,
                action: CanaryAction::Promote,
                stage_idx: from_idx,
                reason: "Deployment completed".to_string(),
                metrics,
            };
        }

        self.stage_idx = from_idx + 1;
        let (pct_to, pct_label) = match self.stages.get_mut(self.stage_idx) {
            Some(stage) => {
                stage.open();
                (stage.percentage, stage.pct_display())
            }
            None => (0.0, "0%".to_string()),
        };
        metrics.insert("pct_to".to_string(), pct_to);
        info!(
            from_stage = from_idx,
            to_stage = self.stage_idx,
            pct = %pct_label,
            "promoted to next stage"
        );

        CanaryResult {
            success: true,
            action: CanaryAction::Promote,
            stage_idx: self.stage_idx,
            reason: format!("Promoted to stage {} ({pct_label})", self.stage_idx),
            metrics,
        }
    }

    /// Compare current metrics against the frozen baseline; returns a
    /// description of every breached objective, or None when clean.
    fn slo_breach(&self, current: &RuntimeMetrics) -> Option<String> {
        let baseline = self.baseline?;
        let mut breaches = Vec::new();

        let error_limit = baseline.error_rate * self.tuning.error_rate_multiplier;
        if current.error_rate > error_limit {
            breaches.push(format!(
                "error_rate {:.4} > {:.4} (baseline {:.4} x {:.2})",
                current.error_rate,
                error_limit,
                baseline.error_rate,
                self.tuning.error_rate_multiplier
            ));
        }

        let latency_limit = baseline.latency_p95 * self.tuning.latency_p95_multiplier;
        if current.latency_p95 > latency_limit {
            breaches.push(format!(
                "latency_p95 {:.1}ms > {:.1}ms (baseline {:.1}ms x {:.2})",
                current.latency_p95,
                latency_limit,
                baseline.latency_p95,
                self.tuning.latency_p95_multiplier
            ));
        }

        if current.saturation > self.policy.saturation_threshold {
            breaches.push(format!(
                "saturation {:.2} > {:.2}",
                current.saturation, self.policy.saturation_threshold
            ));
        }

        if breaches.is_empty() {
            None
        } else {
            Some(breaches.join("; "))
        }
    }

    /// Result for states where no evaluation may run: terminal replay,
    /// not-started, completed. None while a deployment is in progress.
    pub(crate) fn non_running_result(&self) -> Option<CanaryResult> {
        if self.rollback_triggered {
            debug!("evaluation after rollback, replaying terminal result");
            return Some(self.rollback_result.clone().unwrap_or_else(|| CanaryResult {
                success: false,
                action: CanaryAction::Rollback,
                stage_idx: self.stage_idx,
                reason: "Deployment rolled back".to_string(),
                metrics: BTreeMap::new(),
            }));
        }
        match self.phase {
            DeployPhase::NotStarted => Some(CanaryResult {
                success: false,
                action: CanaryAction::Continue,
                stage_idx: 0,
                reason: "Deployment not started".to_string(),
                metrics: BTreeMap::new(),
            }),
            DeployPhase::Completed => Some(CanaryResult {
                success: true,
                action: CanaryAction::Continue,
                stage_idx: self.stage_idx,
                reason: "Deployment already completed".to_string(),
                metrics: BTreeMap::new(),
            }),
            _ => None,
        }
    }

    pub(crate) fn pull_signals(
        &self,
    ) -> anyhow::Result<(TruthAnchorHealth, DriftSentinelHealth, RuntimeMetrics)> {
        let anchor = self.feed.anchor_health()?;
        let sentinel = self.feed.sentinel_health()?;
        let runtime = self.feed.runtime_metrics()?;
        Ok((anchor, sentinel, runtime))
    }

    pub(crate) fn set_last_gate(&mut self, gate: GateResult) {
        self.last_gate = Some(gate);
    }

    pub(crate) fn apply_tuning(&mut self, tuning: StageTuning) {
        self.tuning = tuning;
    }

    #[cfg(test)]
    pub(crate) fn stage_mut(&mut self, idx: usize) -> Option<&mut CanaryStage> {
        self.stages.get_mut(idx)
    }

    // ── Read-only views (exporter, coherence wrapper) ──────────────

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn phase(&self) -> DeployPhase {
        self.phase
    }

    pub fn stage_idx(&self) -> usize {
        self.stage_idx
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Traffic fraction of the current stage; None before the first start.
    pub fn current_stage_pct(&self) -> Option<f64> {
        self.stages.get(self.stage_idx).map(|s| s.percentage)
    }

    pub fn in_progress(&self) -> bool {
        self.phase == DeployPhase::InProgress
    }

    pub fn rollback_triggered(&self) -> bool {
        self.rollback_triggered
    }

    /// Reason of the terminal rollback, if one happened.
    pub fn rollback_reason(&self) -> Option<&str> {
        self.rollback_result.as_ref().map(|r| r.reason.as_str())
    }

    /// SLO breaches summed across all stages of this deployment.
    pub fn total_slo_violations(&self) -> u64 {
        self.stages.iter().map(|s| u64::from(s.slo_violations)).sum()
    }

    pub fn baseline(&self) -> Option<RuntimeMetrics> {
        self.baseline
    }

    /// Gate outcome backing the most recent evaluation.
    pub fn last_gate(&self) -> Option<&GateResult> {
        self.last_gate.as_ref()
    }

    pub fn tuning(&self) -> &StageTuning {
        &self.tuning
    }
}
