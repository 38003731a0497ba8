//! Stagegate metrics — exporter-side views of the rollout controller.
//!
//! The controller is a synchronous state machine; everything observable
//! crosses this crate as an immutable [`CanaryMetricsSnapshot`]. The
//! exporter flattens snapshots into the `slot10_*` metric map, keeps a
//! bounded history, rate-limits exports, and renders the Prometheus
//! text exposition.
//!
//! # Components
//!
//! - **`exporter`** — Snapshot capture, flat export map, history ring, rate limiting
//! - **`prometheus`** — Text exposition rendering

pub mod exporter;
pub mod prometheus;

pub use exporter::{
    CanaryMetricsSnapshot, DEFAULT_EXPORT_INTERVAL, DEFAULT_HISTORY_CAPACITY,
    MAX_GATE_FAIL_CONDITIONS, MetricsExporter,
};
pub use prometheus::render_prometheus;
