//! Stagegate deploy gates — promotion preconditions over slot08/slot09
//! health, plus the LightClock coherence variant.
//!
//! Gates are pure evaluators: health snapshots in, pass/fail plus the
//! full list of violated condition codes out. The controller decides
//! what to do with a failure; gates never mutate anything.
//!
//! # Components
//!
//! - **`gatekeeper`** — Base gate: quarantine, integrity, recovery rate, safe mode, drift
//! - **`coherence`** — LightClock gate: TRI score, phase-lock, policy allow-list

pub mod coherence;
pub mod gatekeeper;

pub use coherence::{
    COND_PHASE_LOCK, COND_POLICY_LABEL, COND_TRI_SCORE, CoherenceGatekeeper, DEPLOY_POLICY_KEY,
    PHASE_LOCK_KEY, SignalReader, StaticSignalReader,
};
pub use gatekeeper::{
    COND_ANCHOR_INTEGRITY, COND_ANCHOR_QUARANTINE, COND_ANCHOR_RECOVERY, COND_SENTINEL_DRIFT,
    COND_SENTINEL_SAFE_MODE, Gatekeeper,
};
