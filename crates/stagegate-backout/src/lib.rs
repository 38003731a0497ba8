//! Stagegate backout — coordinated cross-component rollback.
//!
//! Each promotion records a bundle of three snapshot ids: the
//! application release, the slot08 truth-anchor store, and the slot09
//! drift sentinel. A rollback restores all three through caller-supplied
//! callbacks and accounts the wall-clock recovery time against the
//! policy's MTTR budget. Snapshot creation and the restore mechanics
//! belong to the callers; this crate owns only the coordination.

pub mod backout;

pub use backout::{
    COMPONENT_ANCHOR, COMPONENT_APP, COMPONENT_SENTINEL, RollbackResult, SnapshotBackout,
    SnapshotSet,
};
