//! Health feed capability consumed by the rollout controller.
//!
//! The controller never owns metric collection; it pulls point-in-time
//! snapshots through this trait on every tick. Live implementations wrap
//! the platform's slot08/slot09 stores and the service metrics pipeline
//! and must bound their own pull latency so a slow backend cannot stall
//! the promotion cadence.

use crate::types::{DriftSentinelHealth, RuntimeMetrics, TruthAnchorHealth};
use anyhow::anyhow;
use std::sync::RwLock;

/// Pull-based source of health and runtime signals.
///
/// Any error from an accessor is treated by the controller as a gate
/// failure (fail closed); implementations should return errors rather
/// than fabricate values when a backend is unreachable.
pub trait HealthFeed: Send + Sync {
    fn anchor_health(&self) -> anyhow::Result<TruthAnchorHealth>;
    fn sentinel_health(&self) -> anyhow::Result<DriftSentinelHealth>;
    fn runtime_metrics(&self) -> anyhow::Result<RuntimeMetrics>;
}

/// Fixed-value feed for tests and demos.
///
/// Values are set ahead of time and returned verbatim on every pull;
/// `set_failing` makes all accessors error until cleared, which is how
/// feed-outage handling is exercised.
///
/// # Concurrency
///
/// State sits behind a `std::sync::RwLock`; lock hold time is a single
/// copy in or out.
pub struct StaticHealthFeed {
    inner: RwLock<FeedState>,
}

struct FeedState {
    anchor: TruthAnchorHealth,
    sentinel: DriftSentinelHealth,
    runtime: RuntimeMetrics,
    failing: Option<String>,
}

impl StaticHealthFeed {
    pub fn new(
        anchor: TruthAnchorHealth,
        sentinel: DriftSentinelHealth,
        runtime: RuntimeMetrics,
    ) -> Self {
        Self {
            inner: RwLock::new(FeedState {
                anchor,
                sentinel,
                runtime,
                failing: None,
            }),
        }
    }

    /// A feed reporting green across the board: full integrity, no
    /// quarantine or safe mode, negligible drift, quiet runtime.
    pub fn healthy() -> Self {
        Self::new(
            TruthAnchorHealth {
                integrity_score: 1.0,
                quarantine_active: false,
                recent_recovery_rate: 1.0,
                checksum_mismatch: false,
                tamper_evidence: false,
            },
            DriftSentinelHealth {
                safe_mode_active: false,
                drift_z: 0.0,
                tri_score: Some(1.0),
            },
            RuntimeMetrics {
                error_rate: 0.0,
                latency_p95: 50.0,
                saturation: 0.1,
            },
        )
    }

    pub fn set_anchor(&self, anchor: TruthAnchorHealth) {
        self.inner.write().unwrap().anchor = anchor;
    }

    pub fn set_sentinel(&self, sentinel: DriftSentinelHealth) {
        self.inner.write().unwrap().sentinel = sentinel;
    }

    pub fn set_runtime(&self, runtime: RuntimeMetrics) {
        self.inner.write().unwrap().runtime = runtime;
    }

    /// Make every accessor return the given error until cleared with `None`.
    pub fn set_failing(&self, message: Option<&str>) {
        self.inner.write().unwrap().failing = message.map(str::to_string);
    }

    fn fail_or<T>(&self, value: T) -> anyhow::Result<T> {
        match &self.inner.read().unwrap().failing {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(value),
        }
    }
}

impl HealthFeed for StaticHealthFeed {
    fn anchor_health(&self) -> anyhow::Result<TruthAnchorHealth> {
        let anchor = self.inner.read().unwrap().anchor;
        self.fail_or(anchor)
    }

    fn sentinel_health(&self) -> anyhow::Result<DriftSentinelHealth> {
        let sentinel = self.inner.read().unwrap().sentinel;
        self.fail_or(sentinel)
    }

    fn runtime_metrics(&self) -> anyhow::Result<RuntimeMetrics> {
        let runtime = self.inner.read().unwrap().runtime;
        self.fail_or(runtime)
    }
}
