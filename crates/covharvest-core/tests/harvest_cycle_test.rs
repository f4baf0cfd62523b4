//! Tests for a single harvest cycle using scripted bridge and analyzer
//! fakes.

use std::time::Duration;

use covharvest_core::config::SessionConfig;
use covharvest_core::cycle::{CycleOutcome, HarvestCycle};
use covharvest_core::error::{ErrorKind, HarvestError};
use covharvest_core::record::CoverageRecord;
use covharvest_test_utils::{ScriptedAnalyzer, ScriptedBridge};

fn session(staging: &std::path::Path) -> SessionConfig {
    SessionConfig::builder("app/build/classes", "/sdcard/coverage/", "coverage.ec")
        .target(Some("emulator-5554"))
        .staging_dir(staging)
        .output(staging.join("coverage.txt"))
        .settle_interval(Duration::ZERO)
        .build()
        .expect("valid config")
}

fn two_classes() -> Vec<CoverageRecord> {
    vec![
        CoverageRecord::new("com.example.One", 3, 1),
        CoverageRecord::new("com.example.Two", 2, 2),
    ]
}

#[tokio::test]
async fn successful_cycle_reports_aggregate_ratio() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new();
    let analyzer = ScriptedAnalyzer::new(two_classes());

    let outcome = HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    match outcome {
        CycleOutcome::Success(summary) => {
            assert_eq!(summary.ratio.value(), 0.625);
            assert_eq!(summary.covered, 5);
            assert_eq!(summary.missed, 3);
            assert_eq!(summary.total, 8);
            assert_eq!(summary.classes, 2);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(analyzer.decode_calls(), 1);
    assert_eq!(analyzer.analyze_calls(), 1);
}

#[tokio::test]
async fn cycle_passes_target_and_paths_to_bridge() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new();
    let analyzer = ScriptedAnalyzer::new(two_classes());

    HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    assert_eq!(
        bridge.triggers(),
        vec![(Some("emulator-5554".to_string()), "coverage.ec".to_string())]
    );
    assert_eq!(
        bridge.transfers(),
        vec![(
            Some("emulator-5554".to_string()),
            "/sdcard/coverage/coverage.ec".to_string()
        )]
    );
    assert!(tmp.path().join("coverage.ec").exists());
}

#[tokio::test]
async fn failed_transfer_skips_analyzer() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new().script_transfer(Err("remote object does not exist"));
    let analyzer = ScriptedAnalyzer::new(two_classes());

    let outcome = HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    match outcome {
        CycleOutcome::Failure { kind, message } => {
            assert_eq!(kind, ErrorKind::Transfer);
            assert!(message.contains("remote object does not exist"), "{message}");
        }
        other => panic!("expected transfer failure, got {other:?}"),
    }
    assert_eq!(analyzer.decode_calls(), 0);
    assert_eq!(analyzer.analyze_calls(), 0);
}

#[tokio::test]
async fn missing_local_file_after_transfer_is_transfer_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new().script_silent_transfer();
    let analyzer = ScriptedAnalyzer::new(two_classes());

    let err = HarvestCycle::new(&cfg, &bridge, &analyzer)
        .try_run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Transfer(ref m) if m.contains("not found")));
    assert_eq!(analyzer.decode_calls(), 0);
}

#[tokio::test]
async fn stale_artifact_from_earlier_cycle_is_not_reused() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    std::fs::write(tmp.path().join("coverage.ec"), covharvest_test_utils::empty_artifact())
        .unwrap();
    let bridge = ScriptedBridge::new().script_silent_transfer();
    let analyzer = ScriptedAnalyzer::new(two_classes());

    let outcome = HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Failure {
            kind: ErrorKind::Transfer,
            ..
        }
    ));
}

#[tokio::test]
async fn failed_trigger_skips_transfer() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new().fail_trigger("device unauthorized");
    let analyzer = ScriptedAnalyzer::new(two_classes());

    let outcome = HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Failure {
            kind: ErrorKind::Trigger,
            ..
        }
    ));
    assert!(bridge.transfers().is_empty());
}

#[tokio::test]
async fn malformed_artifact_is_decode_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::with_artifact(b"not an exec file".to_vec());
    let analyzer = ScriptedAnalyzer::new(two_classes());

    let outcome = HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Failure {
            kind: ErrorKind::Decode,
            ..
        }
    ));
    assert_eq!(analyzer.analyze_calls(), 0);
}

#[tokio::test]
async fn no_classes_is_no_samples() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new();
    let analyzer = ScriptedAnalyzer::new(vec![]);

    let err = HarvestCycle::new(&cfg, &bridge, &analyzer)
        .try_run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::NoSamples));
}

#[tokio::test]
async fn analyzer_failure_is_analyze_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new();
    let analyzer = ScriptedAnalyzer::new(two_classes()).then_fail("report exited 1");

    let outcome = HarvestCycle::new(&cfg, &bridge, &analyzer).run().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Failure {
            kind: ErrorKind::Analyze,
            ..
        }
    ));
}

#[tokio::test]
async fn each_cycle_starts_from_zero() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cfg = session(tmp.path());
    let bridge = ScriptedBridge::new();
    let analyzer = ScriptedAnalyzer::new(vec![CoverageRecord::new("a.B", 1, 3)])
        .then_records(vec![CoverageRecord::new("a.B", 4, 0)]);
    let cycle = HarvestCycle::new(&cfg, &bridge, &analyzer);

    let first = cycle.run().await.ratio().expect("first succeeds");
    let second = cycle.run().await.ratio().expect("second succeeds");

    assert_eq!(first.value(), 1.0);
    assert_eq!(second.value(), 0.25);
}
