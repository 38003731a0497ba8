//! Metrics exporter — periodic, rate-limited views of controller state.
//!
//! The exporter never reads live controller internals from another
//! thread: it captures an immutable [`CanaryMetricsSnapshot`] while the
//! tick holds the controller, then exports from that snapshot on its own
//! schedule. Exports also land in a bounded in-memory history for
//! dashboards that want recent trend data without a metrics backend.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use stagegate_core::{GateResult, RuntimeMetrics};
use stagegate_rollout::{CanaryController, DeployPhase};

/// Default minimum time between exports.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(30);
/// Default number of snapshots retained in the history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
/// Cap on indexed `gate_fail_condition_<i>` entries in a flat export.
pub const MAX_GATE_FAIL_CONDITIONS: usize = 5;

/// Denormalized controller + gate + runtime state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetricsSnapshot {
    /// Unix seconds when the snapshot was captured.
    pub captured_at: u64,
    pub phase: DeployPhase,
    pub stage_idx: usize,
    /// Traffic fraction of the current stage, 0 before the first start.
    pub stage_pct: f64,
    /// Verdicts of the most recent gate evaluation, if one ran.
    pub gate_passed: Option<bool>,
    pub failed_conditions: Vec<String>,
    /// SLO breaches summed across all stages of the deployment.
    pub slo_violations: u64,
    pub error_rate: f64,
    pub latency_p95: f64,
    pub saturation: f64,
    pub rollback_triggered: bool,
    pub rollback_reason: Option<String>,
}

impl CanaryMetricsSnapshot {
    /// 1.0 while a deployment is working through its stages.
    pub fn deploy_active(&self) -> bool {
        self.phase == DeployPhase::InProgress
    }
}

/// Rate-limited exporter with a bounded snapshot history.
pub struct MetricsExporter {
    interval: Duration,
    capacity: usize,
    last_export: Option<Instant>,
    history: VecDeque<CanaryMetricsSnapshot>,
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_INTERVAL)
    }
}

impl MetricsExporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            capacity: DEFAULT_HISTORY_CAPACITY,
            last_export: None,
            history: VecDeque::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Capture an immutable snapshot of the controller's current state.
    ///
    /// Runtime numbers default to the frozen baseline until
    /// [`Self::update_metrics`] merges in a fresher sample.
    pub fn capture_canary_state(&self, controller: &CanaryController) -> CanaryMetricsSnapshot {
        let runtime = controller.baseline().unwrap_or(RuntimeMetrics {
            error_rate: 0.0,
            latency_p95: 0.0,
            saturation: 0.0,
        });
        CanaryMetricsSnapshot {
            captured_at: epoch_secs(),
            phase: controller.phase(),
            stage_idx: controller.stage_idx(),
            stage_pct: controller.current_stage_pct().unwrap_or(0.0),
            gate_passed: controller.last_gate().map(|g| g.passed),
            failed_conditions: controller
                .last_gate()
                .map(|g| g.failed_conditions.clone())
                .unwrap_or_default(),
            slo_violations: controller.total_slo_violations(),
            error_rate: runtime.error_rate,
            latency_p95: runtime.latency_p95,
            saturation: runtime.saturation,
            rollback_triggered: controller.rollback_triggered(),
            rollback_reason: controller.rollback_reason().map(str::to_string),
        }
    }

    /// Merge fresher signals into a captured snapshot.
    pub fn update_metrics(
        &self,
        snapshot: &mut CanaryMetricsSnapshot,
        gate: Option<&GateResult>,
        runtime: Option<&RuntimeMetrics>,
        rollback_reason: Option<&str>,
    ) {
        if let Some(gate) = gate {
            snapshot.gate_passed = Some(gate.passed);
            snapshot.failed_conditions = gate.failed_conditions.clone();
        }
        if let Some(runtime) = runtime {
            snapshot.error_rate = runtime.error_rate;
            snapshot.latency_p95 = runtime.latency_p95;
            snapshot.saturation = runtime.saturation;
        }
        if let Some(reason) = rollback_reason {
            snapshot.rollback_triggered = true;
            snapshot.rollback_reason = Some(reason.to_string());
        }
        snapshot.captured_at = epoch_secs();
    }

    /// Flatten a snapshot into the `slot10_*` export map and append it
    /// to the history ring, dropping the oldest entry when full.
    pub fn export_metrics(&mut self, snapshot: &CanaryMetricsSnapshot) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        out.insert(
            "slot10_deploy_stage_pct".to_string(),
            json!(snapshot.stage_pct * 100.0),
        );
        out.insert(
            "slot10_deploy_active".to_string(),
            json!(u8::from(snapshot.deploy_active())),
        );
        out.insert(
            "slot10_gate_status".to_string(),
            json!(u8::from(snapshot.gate_passed == Some(true))),
        );
        out.insert(
            "slot10_slo_violations".to_string(),
            json!(snapshot.slo_violations),
        );
        out.insert("slot10_error_rate".to_string(), json!(snapshot.error_rate));
        out.insert(
            "slot10_latency_p95_ms".to_string(),
            json!(snapshot.latency_p95),
        );
        out.insert(
            "slot10_rollback_triggered".to_string(),
            json!(u8::from(snapshot.rollback_triggered)),
        );
        for (i, condition) in snapshot
            .failed_conditions
            .iter()
            .take(MAX_GATE_FAIL_CONDITIONS)
            .enumerate()
        {
            out.insert(format!("gate_fail_condition_{i}"), json!(condition));
        }

        self.history.push_back(snapshot.clone());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        debug!(
            stage = snapshot.stage_idx,
            history = self.history.len(),
            "exported canary metrics"
        );
        out
    }

    /// True once per interval; the first call always exports.
    pub fn should_export(&mut self) -> bool {
        match self.last_export {
            Some(last) if last.elapsed() < self.interval => false,
            _ => {
                self.last_export = Some(Instant::now());
                true
            }
        }
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &CanaryMetricsSnapshot> {
        self.history.iter()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
