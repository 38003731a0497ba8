//! End-to-end deployment flows: controller decisions observed by the
//! audit trail, the snapshot backout, and the metrics exporter.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagegate_audit::{AuditEntry, AuditLog, AuditRecord, Blake3Hash, verify_chain};
use stagegate_backout::SnapshotBackout;
use stagegate_core::{
    CanaryAction, DriftSentinelHealth, Policy, RuntimeMetrics, StaticHealthFeed, TruthAnchorHealth,
};
use stagegate_metrics::{MetricsExporter, render_prometheus};
use stagegate_rollout::{CanaryController, DeployPhase};

const SIGNING_KEY: &[u8] = b"deployment-flow-test-key";

fn fast_policy() -> Policy {
    Policy {
        stages: vec![0.01, 0.05, 0.25, 0.50, 1.00],
        min_stage_duration_secs: 0,
        min_promotion_gap_secs: 0,
        error_rate_multiplier: 1.15,
        ..Policy::default()
    }
}

fn baseline() -> RuntimeMetrics {
    RuntimeMetrics {
        error_rate: 0.01,
        latency_p95: 100.0,
        saturation: 0.30,
    }
}

fn healthy_anchor() -> TruthAnchorHealth {
    TruthAnchorHealth {
        integrity_score: 0.95,
        quarantine_active: false,
        recent_recovery_rate: 0.99,
        checksum_mismatch: false,
        tamper_evidence: false,
    }
}

fn healthy_sentinel() -> DriftSentinelHealth {
    DriftSentinelHealth {
        safe_mode_active: false,
        drift_z: 0.4,
        tri_score: Some(0.9),
    }
}

fn controller() -> CanaryController {
    CanaryController::new(
        Arc::new(fast_policy()),
        Arc::new(StaticHealthFeed::healthy()),
    )
}

#[test]
fn healthy_deployment_leaves_a_verifiable_audit_chain() {
    let policy = fast_policy();
    let mut ctl = CanaryController::new(
        Arc::new(policy.clone()),
        Arc::new(StaticHealthFeed::healthy()),
    );
    // The log hashes with whatever the policy prefers.
    let log = AuditLog::for_policy(&policy, SIGNING_KEY);
    let mut records: Vec<AuditRecord> = Vec::new();

    let start = ctl.start_deployment(baseline());
    records.push(log.record(AuditEntry::from_result(&start, None)).unwrap());

    for _ in 0..5 {
        let result = ctl.evaluate_stage(&baseline(), &healthy_anchor(), &healthy_sentinel());
        assert_eq!(result.action, CanaryAction::Promote);
        records.push(
            log.record(AuditEntry::from_result(&result, ctl.last_gate()))
                .unwrap(),
        );
    }

    assert_eq!(ctl.phase(), DeployPhase::Completed);
    let last = records.last().unwrap();
    assert_eq!(last.action, "promote");
    assert_eq!(last.stage_idx, 4);
    assert_eq!(last.reason, "Deployment completed");
    // Promotions lifted their percentages out of the metrics map.
    assert_eq!(records[1].pct_from, Some(0.01));
    assert_eq!(records[1].pct_to, Some(0.05));
    // Default policy preference is blake3.
    assert!(records.iter().all(|r| r.hash_method == "blake3"));

    verify_chain(&records, SIGNING_KEY).unwrap();
    assert!(verify_chain(&records, b"wrong-key").is_err());
}

#[test]
fn slo_breach_drives_rollback_through_the_backout() {
    let policy = Arc::new(fast_policy());
    let mut ctl = CanaryController::new(
        Arc::clone(&policy),
        Arc::new(StaticHealthFeed::healthy()),
    );
    let backout = SnapshotBackout::new(Arc::clone(&policy));
    let log = AuditLog::new(Box::new(Blake3Hash), SIGNING_KEY);
    let mut records = Vec::new();

    let start = ctl.start_deployment(baseline());
    records.push(log.record(AuditEntry::from_result(&start, None)).unwrap());

    // Promote out of stage 0; each promotion records a snapshot bundle.
    let promote = ctl.evaluate_stage(&baseline(), &healthy_anchor(), &healthy_sentinel());
    assert_eq!(promote.action, CanaryAction::Promote);
    backout.record_promotion("app-v2", "anchors-12", "sentinel-12", &promote.reason);
    records.push(
        log.record(AuditEntry::from_result(&promote, ctl.last_gate()))
            .unwrap(),
    );

    // Error rate drifts above baseline 0.01 x 1.15.
    let degraded = RuntimeMetrics {
        error_rate: 0.03,
        ..baseline()
    };
    let rollback = ctl.evaluate_stage(&degraded, &healthy_anchor(), &healthy_sentinel());
    assert_eq!(rollback.action, CanaryAction::Rollback);
    assert!(rollback.reason.contains("SLO violation"));
    assert!(rollback.reason.contains("error_rate"));
    records.push(
        log.record(AuditEntry::from_result(&rollback, ctl.last_gate()))
            .unwrap(),
    );

    let restored: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c) = (
        Arc::clone(&restored),
        Arc::clone(&restored),
        Arc::clone(&restored),
    );
    let result = backout.rollback(
        move |id| {
            a.lock().unwrap().push(id.to_string());
            true
        },
        move |id| {
            b.lock().unwrap().push(id.to_string());
            true
        },
        move |id| {
            c.lock().unwrap().push(id.to_string());
            true
        },
    );
    assert!(result.success);
    assert!(!result.mttr_exceeded);
    assert_eq!(
        *restored.lock().unwrap(),
        vec!["app-v2", "anchors-12", "sentinel-12"]
    );

    verify_chain(&records, SIGNING_KEY).unwrap();
    assert_eq!(records.last().unwrap().action, "rollback");
}

#[test]
fn rollback_without_a_recorded_promotion_fails_hard() {
    let backout = SnapshotBackout::new(Arc::new(fast_policy()));
    let calls = Arc::new(Mutex::new(0u32));
    let (a, b, c) = (Arc::clone(&calls), Arc::clone(&calls), Arc::clone(&calls));

    let result = backout.rollback(
        move |_| {
            *a.lock().unwrap() += 1;
            true
        },
        move |_| {
            *b.lock().unwrap() += 1;
            true
        },
        move |_| {
            *c.lock().unwrap() += 1;
            true
        },
    );
    assert!(!result.success);
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn exporter_tracks_a_deployment_through_rollback() {
    let mut ctl = controller();
    let mut exporter = MetricsExporter::new(Duration::ZERO);
    ctl.start_deployment(baseline());

    let snapshot = exporter.capture_canary_state(&ctl);
    let map = exporter.export_metrics(&snapshot);
    assert_eq!(map["slot10_deploy_active"], serde_json::json!(1));
    assert_eq!(map["slot10_deploy_stage_pct"], serde_json::json!(1.0));

    // Quarantine flips the gate; the rollback shows up in the export.
    let quarantined = TruthAnchorHealth {
        quarantine_active: true,
        ..healthy_anchor()
    };
    let result = ctl.evaluate_stage(&baseline(), &quarantined, &healthy_sentinel());
    assert_eq!(result.action, CanaryAction::Rollback);

    let mut snapshot = exporter.capture_canary_state(&ctl);
    exporter.update_metrics(&mut snapshot, ctl.last_gate(), Some(&baseline()), None);
    let map = exporter.export_metrics(&snapshot);
    assert_eq!(map["slot10_rollback_triggered"], serde_json::json!(1));
    assert_eq!(map["slot10_gate_status"], serde_json::json!(0));
    assert_eq!(
        map["gate_fail_condition_0"],
        serde_json::json!("slot08_quarantine")
    );

    let text = render_prometheus(&snapshot);
    assert!(text.contains("slot10_rollback_triggered 1"));
    assert!(text.contains("slot10_gate_status 0"));
    assert!(text.contains("slot10_deploy_active 0"));
    assert!(!text.contains("slot08_quarantine"));

    assert_eq!(exporter.history().count(), 2);
}

#[test]
fn every_decision_is_replayable_from_persisted_records() {
    let mut ctl = controller();
    let log = AuditLog::new(Box::new(Blake3Hash), SIGNING_KEY);
    let mut records = Vec::new();

    let start = ctl.start_deployment(baseline());
    records.push(log.record(AuditEntry::from_result(&start, None)).unwrap());
    for _ in 0..5 {
        let result = ctl.evaluate_stage(&baseline(), &healthy_anchor(), &healthy_sentinel());
        records.push(
            log.record(AuditEntry::from_result(&result, ctl.last_gate()))
                .unwrap(),
        );
    }

    // Consumers persist verbatim; verification works on what comes back.
    let persisted = serde_json::to_string(&records).unwrap();
    let replayed: Vec<AuditRecord> = serde_json::from_str(&persisted).unwrap();
    verify_chain(&replayed, SIGNING_KEY).unwrap();

    let actions: Vec<&str> = replayed.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["start", "promote", "promote", "promote", "promote", "promote"]
    );
    let metrics: &BTreeMap<String, f64> = &replayed[2].metrics;
    assert_eq!(metrics.get("error_rate"), Some(&0.01));
}
