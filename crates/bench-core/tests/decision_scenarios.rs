//! End-to-end decision scenarios through the public API
//!
//! These follow a test from creation through approval and a stream of
//! worker batches to its final verdict:
//! - SPRT acceptance with a monotonically rising LLR
//! - Fixed-games completion and error-bar reporting
//! - SPSA and DATAGEN completion

use bench_core::{
    BatchDelta, BatchOutcome, EngineBuild, ErrorRates, ModeSpec, Outcome, Pentanomial,
    TestStatus, TestSummary, Trinomial, Workload, WorkloadSpec,
};
use chrono::Utc;

fn new_test(mode: ModeSpec, use_penta: bool) -> Workload {
    let build = |name: &str| EngineBuild {
        engine: "Ethereal".to_string(),
        name: name.to_string(),
        sha: "c0ffee1".to_string(),
    };
    let spec = WorkloadSpec {
        author: "andrew".to_string(),
        dev: build("history-gravity"),
        base: build("master"),
        dev_time_control: "N=25000".to_string(),
        base_time_control: "nodes=25000".to_string(),
        mode,
        use_tri: true,
        use_penta,
        priority: 1,
        upload_pgns: false,
    };
    let mut test = Workload::create(42, spec, ErrorRates::default(), Utc::now()).unwrap();
    test.approve(Utc::now()).unwrap();
    test
}

/// A pair batch from counts of (LL, LD, DD, DW, WW), with matching game counts.
fn pairs(ll: u64, ld: u64, dd: u64, dw: u64, ww: u64) -> BatchDelta {
    let tri = Trinomial::new(2 * ll + ld, ld + 2 * dd + dw, dw + 2 * ww);
    BatchDelta::new(tri, Pentanomial::new(ll, ld, dd, dw, ww))
}

// =============================================================================
// SPRT
// =============================================================================

#[test]
fn test_sprt_accepts_h1_on_skewed_stream() {
    let mut test = new_test(
        ModeSpec::Sprt {
            elo_lower: 0.0,
            elo_upper: 5.0,
            rates: None,
        },
        true,
    );
    assert!(!test.uses_time_based_tc());

    let mut llrs = Vec::new();
    let mut outcome = BatchOutcome::Continue;
    for _ in 0..50 {
        outcome = test.apply_batch(&pairs(1, 4, 10, 8, 5), Utc::now()).unwrap();
        llrs.push(test.current_llr);
        if outcome.halt() {
            break;
        }
    }

    assert_eq!(outcome, BatchOutcome::Finished);
    assert!(test.passed && test.finished && !test.failed);
    assert_eq!(test.status(), TestStatus::Finished);
    assert!(
        llrs.windows(2).all(|w| w[1] > w[0]),
        "LLR should rise on every batch: {llrs:?}"
    );

    let summary = TestSummary::from_workload(&test);
    assert_eq!(summary.outcome, Outcome::Passed);
    assert_eq!(summary.mode, "SPRT [0.00, 5.00]");
    assert!(summary.pentanomial.is_some());
    assert!(summary.render().contains("passed"));
}

#[test]
fn test_sprt_never_reports_inconclusive() {
    let mut test = new_test(
        ModeSpec::Sprt {
            elo_lower: -5.0,
            elo_upper: 0.0,
            rates: Some(ErrorRates {
                alpha: 0.25,
                beta: 0.25,
            }),
        },
        true,
    );

    // Barely positive, so the error bar still straddles zero
    while !test.finished {
        test.apply_batch(&pairs(1, 5, 10, 5, 1), Utc::now()).unwrap();
    }

    let summary = TestSummary::from_workload(&test);
    assert!(summary.elo.abs() < summary.error);
    assert_ne!(summary.outcome, Outcome::Inconclusive);
}

// =============================================================================
// Fixed games
// =============================================================================

#[test]
fn test_games_scenario() {
    let mut test = new_test(ModeSpec::Games { max_games: 1000 }, false);
    let batch = BatchDelta::new(Trinomial::new(100, 0, 150), Pentanomial::default());

    for _ in 0..4 {
        test.apply_batch(&batch, Utc::now()).unwrap();
    }

    assert_eq!(test.games, 1000);
    assert_eq!(test.trinomial.wins, 600);
    assert_eq!(test.trinomial.losses, 400);
    assert!(test.passed && test.finished);

    let summary = TestSummary::from_workload(&test);
    assert_eq!(summary.outcome, Outcome::Passed);
    assert_eq!(summary.mode, "1000 games");
    assert!(summary.pentanomial.is_none());
}

#[test]
fn test_games_inside_error_bar_is_inconclusive() {
    let mut test = new_test(ModeSpec::Games { max_games: 100 }, false);
    test.apply_batch(
        &BatchDelta::new(Trinomial::new(30, 38, 32), Pentanomial::default()),
        Utc::now(),
    )
    .unwrap();

    assert!(test.passed);
    let summary = TestSummary::from_workload(&test);
    assert_eq!(summary.outcome, Outcome::Inconclusive);
    assert!(summary.title().ends_with("is inconclusive"));
}

// =============================================================================
// SPSA and DATAGEN
// =============================================================================

#[test]
fn test_spsa_scenario() {
    let config: bench_core::SpsaConfig = serde_json::from_value(serde_json::json!({
        "pairs_per": 10,
        "iterations": 5,
        "parameters": {
            "RFPMargin": { "value": 80.0, "min": 40.0, "max": 120.0, "step": 4.0, "rate": 0.002 }
        }
    }))
    .unwrap();
    let mut test = new_test(ModeSpec::Spsa(config), true);

    let mut played = 0;
    while played < 100 {
        let batch = pairs(1, 2, 4, 2, 1).with_spsa("RFPMargin", -1.0);
        let outcome = test.apply_batch(&batch, Utc::now()).unwrap();
        played += 20;
        assert_eq!(outcome.halt(), played >= 100);
    }

    assert_eq!(test.games, 100);
    assert!(test.finished);

    let late = pairs(1, 2, 4, 2, 1).with_spsa("RFPMargin", -1.0);
    assert_eq!(test.apply_batch(&late, Utc::now()).unwrap(), BatchOutcome::Rejected);
    assert_eq!(test.games, 100);
}

#[test]
fn test_datagen_scenario() {
    let mut test = new_test(ModeSpec::Datagen { max_games: 40 }, true);
    for _ in 0..2 {
        test.apply_batch(&pairs(10, 0, 0, 0, 0), Utc::now()).unwrap();
    }
    assert!(test.finished && test.passed && !test.failed);
    assert_eq!(TestSummary::from_workload(&test).outcome, Outcome::Passed);
}
