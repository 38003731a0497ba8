//! Per-stage bookkeeping for a canary rollout.

use std::time::{Duration, Instant};

/// One percentage step of a canary rollout.
///
/// `started_at` is set when the stage becomes active, `ended_at` when it
/// is exited (promoted past or rolled back). Times are monotonic; the
/// exporter owns the wall-clock view.
#[derive(Debug, Clone)]
pub struct CanaryStage {
    /// Traffic fraction this stage serves, in (0, 1].
    pub percentage: f64,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    /// SLO breaches observed while this stage was active.
    pub slo_violations: u32,
}

impl CanaryStage {
    pub fn new(percentage: f64) -> Self {
        Self {
            percentage,
            started_at: None,
            ended_at: None,
            slo_violations: 0,
        }
    }

    pub fn open(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn close(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Time the stage has been active, or ran for once closed.
    /// Zero if it never started.
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Percentage label for reasons and logs ("5%", "100%").
    pub fn pct_display(&self) -> String {
        format!("{:.0}%", self.percentage * 100.0)
    }
}
