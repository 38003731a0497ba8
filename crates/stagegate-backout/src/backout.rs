//! Snapshot bundle recording and coordinated restore.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stagegate_core::Policy;

/// Error-map key for the application restore.
pub const COMPONENT_APP: &str = "app";
/// Error-map key for the truth-anchor store restore.
pub const COMPONENT_ANCHOR: &str = "slot08";
/// Error-map key for the drift sentinel restore.
pub const COMPONENT_SENTINEL: &str = "slot09";

/// Cross-component snapshot bundle recorded at a promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSet {
    pub app_snapshot_id: String,
    pub anchor_snapshot_id: String,
    pub sentinel_snapshot_id: String,
    /// Why this bundle was recorded (usually the promotion reason).
    pub reason: String,
    /// Unix seconds when recorded.
    pub recorded_at: u64,
}

/// Outcome of one rollback invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    /// AND of the three component outcomes; false when no snapshot existed.
    pub success: bool,
    pub app_restored: bool,
    pub anchor_restored: bool,
    pub sentinel_restored: bool,
    /// Wall-clock time spent in the restore callbacks.
    pub execution_time: Duration,
    /// Component → message for each failed restore.
    pub errors: BTreeMap<String, String>,
    /// Restores ran but took longer than the MTTR budget. A warning
    /// flag only; it never flips `success`.
    pub mttr_exceeded: bool,
}

impl RollbackResult {
    fn no_snapshot() -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(
            "snapshot".to_string(),
            "no snapshot recorded, nothing to restore".to_string(),
        );
        Self {
            success: false,
            app_restored: false,
            anchor_restored: false,
            sentinel_restored: false,
            execution_time: Duration::ZERO,
            errors,
            mttr_exceeded: false,
        }
    }
}

/// Records the active snapshot bundle and coordinates rollback.
///
/// At most one bundle is active; each `record_promotion` replaces it and
/// `rollback` always targets the latest.
///
/// # Concurrency
///
/// The active bundle sits behind a `std::sync::Mutex`. `rollback` clones
/// it out under the lock and runs the restore callbacks outside it, so a
/// slow restore never blocks the recording path.
pub struct SnapshotBackout {
    policy: Arc<Policy>,
    active: Mutex<Option<SnapshotSet>>,
}

impl SnapshotBackout {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            policy,
            active: Mutex::new(None),
        }
    }

    /// Record (replacing) the snapshot bundle for the latest promotion.
    pub fn record_promotion(
        &self,
        app_snapshot_id: &str,
        anchor_snapshot_id: &str,
        sentinel_snapshot_id: &str,
        reason: &str,
    ) -> SnapshotSet {
        let set = SnapshotSet {
            app_snapshot_id: app_snapshot_id.to_string(),
            anchor_snapshot_id: anchor_snapshot_id.to_string(),
            sentinel_snapshot_id: sentinel_snapshot_id.to_string(),
            reason: reason.to_string(),
            recorded_at: epoch_secs(),
        };
        *self.active.lock().unwrap() = Some(set.clone());
        info!(
            app = %set.app_snapshot_id,
            anchor = %set.anchor_snapshot_id,
            sentinel = %set.sentinel_snapshot_id,
            reason = %set.reason,
            "recorded promotion snapshot bundle"
        );
        set
    }

    /// The currently recorded bundle, if any.
    pub fn active_set(&self) -> Option<SnapshotSet> {
        self.active.lock().unwrap().clone()
    }

    /// Restore all three components from the recorded bundle.
    ///
    /// Every callback is invoked even when an earlier one fails, so a
    /// partial outage still gets a complete cross-component restore
    /// attempt. `success` is the AND of the three outcomes; exceeding
    /// the MTTR budget only sets `mttr_exceeded`.
    pub fn rollback(
        &self,
        app_restore: impl Fn(&str) -> bool,
        anchor_restore: impl Fn(&str) -> bool,
        sentinel_restore: impl Fn(&str) -> bool,
    ) -> RollbackResult {
        let set = match self.active.lock().unwrap().clone() {
            Some(set) => set,
            None => {
                warn!("rollback requested with no snapshot recorded");
                return RollbackResult::no_snapshot();
            }
        };

        info!(
            app = %set.app_snapshot_id,
            anchor = %set.anchor_snapshot_id,
            sentinel = %set.sentinel_snapshot_id,
            "starting coordinated rollback"
        );
        let started = Instant::now();
        let app_restored = app_restore(&set.app_snapshot_id);
        let anchor_restored = anchor_restore(&set.anchor_snapshot_id);
        let sentinel_restored = sentinel_restore(&set.sentinel_snapshot_id);
        let execution_time = started.elapsed();

        let mut errors = BTreeMap::new();
        if !app_restored {
            errors.insert(
                COMPONENT_APP.to_string(),
                format!("restore failed for snapshot {}", set.app_snapshot_id),
            );
        }
        if !anchor_restored {
            errors.insert(
                COMPONENT_ANCHOR.to_string(),
                format!("restore failed for snapshot {}", set.anchor_snapshot_id),
            );
        }
        if !sentinel_restored {
            errors.insert(
                COMPONENT_SENTINEL.to_string(),
                format!("restore failed for snapshot {}", set.sentinel_snapshot_id),
            );
        }

        let success = app_restored && anchor_restored && sentinel_restored;
        let mttr_exceeded = execution_time > self.policy.rollback_timeout();
        if mttr_exceeded {
            warn!(
                elapsed_ms = execution_time.as_millis() as u64,
                budget_secs = self.policy.rollback_timeout_secs,
                "rollback exceeded the MTTR budget"
            );
        }
        if success {
            info!(
                elapsed_ms = execution_time.as_millis() as u64,
                "coordinated rollback completed"
            );
        } else {
            warn!(
                failed = ?errors.keys().collect::<Vec<_>>(),
                "coordinated rollback partially failed"
            );
        }

        RollbackResult {
            success,
            app_restored,
            anchor_restored,
            sentinel_restored,
            execution_time,
            errors,
            mttr_exceeded,
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
