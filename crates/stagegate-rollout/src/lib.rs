//! Stagegate rollout — the canary deployment state machine.
//!
//! This crate decides, tick by tick, whether a canary advances to a
//! larger traffic percentage, holds, or rolls back. It owns no traffic
//! splitting and no metric collection: signals come in through the
//! health feed, decisions go out as [`stagegate_core::CanaryResult`]s,
//! and restore/rollback execution belongs to the backout crate.
//!
//! # Components
//!
//! - **`stage`** — Per-stage bookkeeping (percentage, soak time, SLO breaches)
//! - **`controller`** — Base state machine (gate, soak, SLO, timeout, promote)
//! - **`coherence`** — Coherence-adaptive wrapper (LightClock gate, tuning regimes)
//! - **`ticker`** — Fixed-cadence async driver with observer fan-out

pub mod coherence;
pub mod controller;
pub mod stage;
pub mod ticker;

pub use coherence::{CoherenceCanaryController, DeployController, RegimeTuning};
pub use controller::{CanaryController, DeployPhase, StageTuning};
pub use stage::CanaryStage;
pub use ticker::{ResultObserver, TickDriven, Ticker};
