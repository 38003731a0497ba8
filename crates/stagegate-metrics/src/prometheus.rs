//! Prometheus text exposition format.
//!
//! Renders a canary metrics snapshot into the Prometheus text exposition
//! format for scraping. Only the boolean gate status is exposed here;
//! the indexed failure conditions live in the flat export map, since
//! free-form condition strings do not belong in a metric series.

use crate::exporter::CanaryMetricsSnapshot;

/// Render one snapshot into Prometheus text format.
///
/// Each series gets its HELP and TYPE declarations followed by the
/// sample line.
pub fn render_prometheus(snapshot: &CanaryMetricsSnapshot) -> String {
    let mut out = String::new();

    out.push_str(
        "# HELP slot10_deploy_stage_pct Traffic percentage of the current canary stage.\n",
    );
    out.push_str("# TYPE slot10_deploy_stage_pct gauge\n");
    out.push_str(&format!(
        "slot10_deploy_stage_pct {:.2}\n",
        snapshot.stage_pct * 100.0
    ));

    out.push_str("# HELP slot10_deploy_active 1 while a canary deployment is in progress.\n");
    out.push_str("# TYPE slot10_deploy_active gauge\n");
    out.push_str(&format!(
        "slot10_deploy_active {}\n",
        u8::from(snapshot.deploy_active())
    ));

    out.push_str("# HELP slot10_gate_status 1 when the last deploy gate evaluation passed.\n");
    out.push_str("# TYPE slot10_gate_status gauge\n");
    out.push_str(&format!(
        "slot10_gate_status {}\n",
        u8::from(snapshot.gate_passed == Some(true))
    ));

    out.push_str("# HELP slot10_slo_violations SLO breaches observed during this deployment.\n");
    out.push_str("# TYPE slot10_slo_violations counter\n");
    out.push_str(&format!(
        "slot10_slo_violations {}\n",
        snapshot.slo_violations
    ));

    out.push_str("# HELP slot10_error_rate Failed request fraction (0.0-1.0).\n");
    out.push_str("# TYPE slot10_error_rate gauge\n");
    out.push_str(&format!("slot10_error_rate {:.4}\n", snapshot.error_rate));

    out.push_str("# HELP slot10_latency_p95_ms P95 latency in milliseconds.\n");
    out.push_str("# TYPE slot10_latency_p95_ms gauge\n");
    out.push_str(&format!(
        "slot10_latency_p95_ms {:.2}\n",
        snapshot.latency_p95
    ));

    out.push_str("# HELP slot10_rollback_triggered 1 once the deployment has rolled back.\n");
    out.push_str("# TYPE slot10_rollback_triggered gauge\n");
    out.push_str(&format!(
        "slot10_rollback_triggered {}\n",
        u8::from(snapshot.rollback_triggered)
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagegate_rollout::DeployPhase;

    fn test_snapshot() -> CanaryMetricsSnapshot {
        CanaryMetricsSnapshot {
            captured_at: 1000,
            phase: DeployPhase::InProgress,
            stage_idx: 2,
            stage_pct: 0.25,
            gate_passed: Some(true),
            failed_conditions: Vec::new(),
            slo_violations: 1,
            error_rate: 0.012,
            latency_p95: 145.8,
            saturation: 0.4,
            rollback_triggered: false,
            rollback_reason: None,
        }
    }

    #[test]
    fn render_in_progress_snapshot() {
        let output = render_prometheus(&test_snapshot());

        assert!(output.contains("slot10_deploy_stage_pct 25.00"));
        assert!(output.contains("slot10_deploy_active 1"));
        assert!(output.contains("slot10_gate_status 1"));
        assert!(output.contains("slot10_slo_violations 1"));
        assert!(output.contains("slot10_error_rate 0.0120"));
        assert!(output.contains("slot10_latency_p95_ms 145.80"));
        assert!(output.contains("slot10_rollback_triggered 0"));
    }

    #[test]
    fn render_rolled_back_snapshot() {
        let snapshot = CanaryMetricsSnapshot {
            phase: DeployPhase::RolledBack,
            gate_passed: Some(false),
            failed_conditions: vec!["slot08_quarantine".to_string()],
            rollback_triggered: true,
            rollback_reason: Some("Gate failed: slot08_quarantine".to_string()),
            ..test_snapshot()
        };
        let output = render_prometheus(&snapshot);

        assert!(output.contains("slot10_deploy_active 0"));
        assert!(output.contains("slot10_gate_status 0"));
        assert!(output.contains("slot10_rollback_triggered 1"));
        // Condition strings stay out of the text exposition.
        assert!(!output.contains("slot08_quarantine"));
    }

    #[test]
    fn every_series_has_help_and_type() {
        let output = render_prometheus(&test_snapshot());
        for name in [
            "slot10_deploy_stage_pct",
            "slot10_deploy_active",
            "slot10_gate_status",
            "slot10_slo_violations",
            "slot10_error_rate",
            "slot10_latency_p95_ms",
            "slot10_rollback_triggered",
        ] {
            assert!(output.contains(&format!("# HELP {name} ")), "missing HELP for {name}");
            assert!(output.contains(&format!("# TYPE {name} ")), "missing TYPE for {name}");
            assert!(output.contains(&format!("\n{name} ")), "missing sample for {name}");
        }
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&test_snapshot());

        // Every non-comment line is `name value` with a numeric value.
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split(' ');
            let name = parts.next().unwrap();
            let value = parts.next().expect("sample line should carry a value");
            assert!(parts.next().is_none(), "unexpected extra field: {line}");
            assert!(name.starts_with("slot10_"));
            assert!(value.parse::<f64>().is_ok(), "non-numeric value: {line}");
        }
    }
}
