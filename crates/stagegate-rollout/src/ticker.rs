//! Tick scheduler — drives a controller at a fixed cadence.
//!
//! The controllers are synchronous state machines; this loop owns the
//! cadence, shutdown, and the observer fan-out that lets the audit trail,
//! metrics exporter, and backout watch results without the controller
//! knowing they exist.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use stagegate_core::{CanaryAction, CanaryResult, GateResult};

use crate::coherence::{CoherenceCanaryController, DeployController};
use crate::controller::{CanaryController, DeployPhase};

/// Observer invoked after every tick with the result and the gate
/// outcome the decision was made against.
pub type ResultObserver = Arc<dyn Fn(&CanaryResult, Option<&GateResult>) + Send + Sync>;

/// A controller the ticker can drive.
pub trait TickDriven: Send {
    fn tick(&mut self) -> CanaryResult;
    /// Gate outcome backing the latest result, if any evaluation ran.
    fn last_gate(&self) -> Option<GateResult>;
    /// True once the deployment can make no further progress.
    fn terminal(&self) -> bool;
}

impl TickDriven for CanaryController {
    fn tick(&mut self) -> CanaryResult {
        CanaryController::tick(self)
    }

    fn last_gate(&self) -> Option<GateResult> {
        CanaryController::last_gate(self).cloned()
    }

    fn terminal(&self) -> bool {
        matches!(
            self.phase(),
            DeployPhase::Completed | DeployPhase::RolledBack
        )
    }
}

impl TickDriven for DeployController {
    fn tick(&mut self) -> CanaryResult {
        DeployController::tick(self)
    }

    fn last_gate(&self) -> Option<GateResult> {
        self.base().last_gate().cloned()
    }

    fn terminal(&self) -> bool {
        matches!(
            self.base().phase(),
            DeployPhase::Completed | DeployPhase::RolledBack
        )
    }
}

impl TickDriven for CoherenceCanaryController {
    fn tick(&mut self) -> CanaryResult {
        CoherenceCanaryController::tick(self)
    }

    fn last_gate(&self) -> Option<GateResult> {
        self.controller().last_gate().cloned()
    }

    fn terminal(&self) -> bool {
        matches!(
            self.controller().phase(),
            DeployPhase::Completed | DeployPhase::RolledBack
        )
    }
}

/// Fixed-interval driver for one deployment's controller.
///
/// # Concurrency
///
/// The controller sits behind a `std::sync::Mutex`; a tick holds the
/// lock only for the synchronous evaluation, never across an await.
/// Exporters sharing the same handle take brief snapshots between ticks.
pub struct Ticker<C: TickDriven> {
    controller: Arc<Mutex<C>>,
    interval: Duration,
    observer: Option<ResultObserver>,
}

impl<C: TickDriven> Ticker<C> {
    pub fn new(controller: Arc<Mutex<C>>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            observer: None,
        }
    }

    /// Attach an observer for audit/metrics fan-out.
    pub fn with_observer(mut self, observer: ResultObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run until shutdown flips or the deployment reaches a terminal
    /// state (completed or rolled back).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "ticker started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let (result, gate, terminal) = {
                        let mut controller = self.controller.lock().unwrap();
                        let result = controller.tick();
                        let gate = controller.last_gate();
                        (result, gate, controller.terminal())
                    };
                    if started.elapsed() > self.interval {
                        warn!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "tick overran the interval, check feed latency"
                        );
                    }

                    if let Some(observer) = &self.observer {
                        observer(&result, gate.as_ref());
                    }

                    match result.action {
                        CanaryAction::Promote => {
                            info!(stage = result.stage_idx, reason = %result.reason, "tick: promote");
                        }
                        CanaryAction::Rollback => {
                            warn!(stage = result.stage_idx, reason = %result.reason, "tick: rollback");
                        }
                        _ => {
                            debug!(stage = result.stage_idx, action = result.action.as_str(), "tick");
                        }
                    }

                    if terminal {
                        info!("deployment reached a terminal state, ticker stopping");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    // Err means the sender is gone; nothing will ever
                    // signal again, so stop rather than spin.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ticker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
