//! Batch submission through the aggregator
//!
//! Covers the submit contract end to end:
//! - continue/stop responses and late batches after a test finishes
//! - unknown ids and malformed batches leaving every counter untouched
//! - many threads submitting to one test at once

use std::sync::Arc;
use std::thread;

use bench_core::{
    BatchDelta, EngineBuild, ErrorRates, MatchErrors, ModeSpec, Outcome, Pentanomial, TestId,
    TestStatus, TestSummary, Trinomial, Workload, WorkloadSpec,
};
use bench_server::{
    lock_test, Aggregator, Ledger, MachineId, MachineInfo, MachineRegistry, MemoryStore,
    ResultId, ServerError, SubmitRequest, SubmitResponse, TestRepository,
};
use chrono::Utc;
use tokio::sync::mpsc;

struct Harness {
    tests: Arc<MemoryStore>,
    ledger: Arc<Ledger>,
    machines: Arc<MachineRegistry>,
    aggregator: Aggregator<MemoryStore>,
    finished: mpsc::UnboundedReceiver<TestSummary>,
}

impl Harness {
    fn new() -> Self {
        let tests = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new());
        let machines = Arc::new(MachineRegistry::new());
        let (tx, finished) = mpsc::unbounded_channel();
        let aggregator =
            Aggregator::new(Arc::clone(&tests), Arc::clone(&ledger), Arc::clone(&machines))
                .with_notifications(tx);
        Self {
            tests,
            ledger,
            machines,
            aggregator,
            finished,
        }
    }

    fn add_test(&self, mode: ModeSpec) -> TestId {
        let build = |name: &str| EngineBuild {
            engine: "Torch".to_string(),
            name: name.to_string(),
            sha: "5e1f0a2".to_string(),
        };
        let spec = WorkloadSpec {
            author: "kim".to_string(),
            dev: build("lmr-tweak"),
            base: build("master"),
            dev_time_control: "8.0+0.08".to_string(),
            base_time_control: "8.0+0.08".to_string(),
            mode,
            use_tri: true,
            use_penta: true,
            priority: 0,
            upload_pgns: false,
        };
        let id = self.tests.next_id();
        let mut test = Workload::create(id, spec, ErrorRates::default(), Utc::now()).unwrap();
        test.approve(Utc::now()).unwrap();
        self.tests.insert(test)
    }

    fn add_machine(&self, user: &str) -> MachineId {
        let info = MachineInfo {
            mac_address: Some(format!("mac-{user}")),
            concurrency: 4,
            extra: serde_json::Map::new(),
        };
        self.machines
            .resolve(None, user, info, &self.ledger, Utc::now())
            .unwrap()
            .id
    }

    fn test(&self, id: TestId) -> Workload {
        lock_test(&self.tests.get(id).unwrap()).clone()
    }

    fn drain_finished(&mut self) -> Vec<TestSummary> {
        let mut all = Vec::new();
        while let Ok(summary) = self.finished.try_recv() {
            all.push(summary);
        }
        all
    }
}

/// A pair batch from counts of (LL, LD, DD, DW, WW), with matching game counts.
fn pairs(ll: u64, ld: u64, dd: u64, dw: u64, ww: u64) -> BatchDelta {
    let tri = Trinomial::new(2 * ll + ld, ld + 2 * dd + dw, dw + 2 * ww);
    BatchDelta::new(tri, Pentanomial::new(ll, ld, dd, dw, ww))
}

fn request(
    test_id: TestId,
    result_id: ResultId,
    machine_id: MachineId,
    delta: BatchDelta,
) -> SubmitRequest {
    SubmitRequest {
        machine_id,
        result_id,
        test_id,
        delta,
    }
}

// =============================================================================
// Continue / stop
// =============================================================================

#[test]
fn test_games_run_to_completion() {
    let mut h = Harness::new();
    let test_id = h.add_test(ModeSpec::Games { max_games: 1000 });
    let machine_id = h.add_machine("kim");
    let result_id = h.ledger.open_result(test_id);

    // 100 games per batch: 10 batches to finish
    let batch = pairs(5, 10, 15, 12, 8);
    assert_eq!(batch.games(), 100);

    for i in 1..10 {
        let response = h
            .aggregator
            .submit(&request(test_id, result_id, machine_id, batch.clone()))
            .unwrap();
        assert_eq!(response, SubmitResponse::default(), "batch {i} should continue");
    }
    assert!(h.drain_finished().is_empty());

    let last = h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, batch.clone()))
        .unwrap();
    assert!(last.stop);

    let test = h.test(test_id);
    assert_eq!(test.games, 1000);
    assert_eq!(test.status(), TestStatus::Finished);
    assert!(test.passed);

    let finished = h.drain_finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].test_id, test_id);
    assert_eq!(finished[0].outcome, Outcome::Passed);
    assert_eq!(finished[0].mode, "1000 games");

    let counts = h.ledger.result(result_id).unwrap().counts();
    assert_eq!(counts.games, 1000);
    assert_eq!(counts.ww, 80);
    assert_eq!(h.ledger.profile("kim").games(), 1000);
    assert!(h.machines.get(machine_id).unwrap().last_seen().is_some());
}

#[test]
fn test_late_batch_halts_without_counting() {
    let mut h = Harness::new();
    let test_id = h.add_test(ModeSpec::Datagen { max_games: 100 });
    let machine_id = h.add_machine("kim");
    let result_id = h.ledger.open_result(test_id);

    let batch = pairs(5, 10, 15, 12, 8);
    assert!(h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, batch.clone()))
        .unwrap()
        .stop);
    assert_eq!(h.drain_finished().len(), 1);

    let before = h.test(test_id);
    let late = h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, batch))
        .unwrap();
    assert!(late.stop);

    assert_eq!(h.test(test_id), before);
    assert_eq!(h.ledger.result(result_id).unwrap().counts().games, 100);
    assert_eq!(h.ledger.profile("kim").games(), 100);
    assert!(h.drain_finished().is_empty(), "a finished test notifies once");
}

#[test]
fn test_deleted_test_halts_workers() {
    let h = Harness::new();
    let test_id = h.add_test(ModeSpec::Games { max_games: 1000 });
    let machine_id = h.add_machine("kim");
    let result_id = h.ledger.open_result(test_id);

    lock_test(&h.tests.get(test_id).unwrap())
        .delete(Utc::now())
        .unwrap();

    let response = h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, pairs(1, 1, 1, 1, 1)))
        .unwrap();
    assert!(response.stop);
    assert_eq!(h.test(test_id).games, 0);
    assert_eq!(h.ledger.result(result_id).unwrap().counts().games, 0);
}

// =============================================================================
// Rejection without mutation
// =============================================================================

#[test]
fn test_unknown_ids_mutate_nothing() {
    let h = Harness::new();
    let test_id = h.add_test(ModeSpec::Games { max_games: 1000 });
    let other_test = h.add_test(ModeSpec::Games { max_games: 1000 });
    let machine_id = h.add_machine("kim");
    let result_id = h.ledger.open_result(test_id);
    let foreign_result = h.ledger.open_result(other_test);
    let batch = pairs(1, 2, 3, 2, 1);

    let err = h
        .aggregator
        .submit(&request(999, result_id, machine_id, batch.clone()))
        .unwrap_err();
    assert!(matches!(err, ServerError::TestNotFound(999)));

    let err = h
        .aggregator
        .submit(&request(test_id, result_id, 999, batch.clone()))
        .unwrap_err();
    assert!(matches!(err, ServerError::MachineNotFound(999)));

    let err = h
        .aggregator
        .submit(&request(test_id, 999, machine_id, batch.clone()))
        .unwrap_err();
    assert!(matches!(err, ServerError::ResultNotFound(999)));

    // A result row of another test does not count
    let err = h
        .aggregator
        .submit(&request(test_id, foreign_result, machine_id, batch))
        .unwrap_err();
    assert!(matches!(err, ServerError::ResultNotFound(_)));

    assert_eq!(h.test(test_id).games, 0);
    assert_eq!(h.test(other_test).games, 0);
    assert_eq!(h.ledger.result(result_id).unwrap().counts().games, 0);
    assert_eq!(h.ledger.result(foreign_result).unwrap().counts().games, 0);
    assert_eq!(h.ledger.profile("kim").games(), 0);
}

#[test]
fn test_malformed_batch_mutates_nothing() {
    let h = Harness::new();
    let test_id = h.add_test(ModeSpec::Games { max_games: 1000 });
    let machine_id = h.add_machine("kim");
    let result_id = h.ledger.open_result(test_id);
    let before = h.test(test_id);

    // Pair count disagrees with the game count
    let inconsistent = BatchDelta::new(Trinomial::new(1, 2, 3), Pentanomial::new(0, 0, 1, 0, 0));
    let err = h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, inconsistent))
        .unwrap_err();
    assert!(matches!(err, ServerError::Core(_)));

    // SPSA updates on a fixed-games test
    let stray_spsa = pairs(1, 0, 0, 0, 1).with_spsa("Futility", 0.5);
    assert!(h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, stray_spsa))
        .is_err());

    assert_eq!(h.test(test_id), before);
    assert_eq!(h.ledger.result(result_id).unwrap().counts().games, 0);
    assert_eq!(h.ledger.profile("kim").games(), 0);
}

#[test]
fn test_match_errors_recorded_as_telemetry() {
    let h = Harness::new();
    let test_id = h.add_test(ModeSpec::Games { max_games: 1000 });
    let machine_id = h.add_machine("kim");
    let result_id = h.ledger.open_result(test_id);

    let timeloss_only = pairs(1, 1, 1, 1, 1).with_errors(MatchErrors {
        crashes: 0,
        timelosses: 2,
        illegals: 0,
    });
    let response = h
        .aggregator
        .submit(&request(test_id, result_id, machine_id, timeloss_only))
        .unwrap();
    assert!(!response.stop);
    assert!(!h.test(test_id).error);

    let crash = pairs(1, 1, 1, 1, 1).with_errors(MatchErrors {
        crashes: 1,
        timelosses: 0,
        illegals: 0,
    });
    h.aggregator
        .submit(&request(test_id, result_id, machine_id, crash))
        .unwrap();
    assert!(h.test(test_id).error);

    let counts = h.ledger.result(result_id).unwrap().counts();
    assert_eq!(counts.crashes, 1);
    assert_eq!(counts.timeloss, 2);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_submissions_finish_exactly_once() {
    let mut h = Harness::new();
    // Half of the submitted games fit before the test finishes
    let test_id = h.add_test(ModeSpec::Games { max_games: 4000 });
    let batch = pairs(1, 2, 4, 2, 1);
    assert_eq!(batch.games(), 20);

    let workers: Vec<(MachineId, ResultId)> = (0..8)
        .map(|i| {
            let machine_id = h.add_machine(&format!("user{}", i % 2));
            (machine_id, h.ledger.open_result(test_id))
        })
        .collect();

    let aggregator = Arc::new(h.aggregator);
    let handles: Vec<_> = workers
        .iter()
        .map(|&(machine_id, result_id)| {
            let aggregator = Arc::clone(&aggregator);
            let batch = batch.clone();
            thread::spawn(move || {
                let mut stops = 0;
                for _ in 0..50 {
                    let response = aggregator
                        .submit(&request(test_id, result_id, machine_id, batch.clone()))
                        .unwrap();
                    if response.stop {
                        stops += 1;
                    }
                }
                stops
            })
        })
        .collect();
    let stops: u64 = handles.into_iter().map(|t| t.join().unwrap()).sum();

    let test = lock_test(&h.tests.get(test_id).unwrap()).clone();
    assert_eq!(test.games, 4000);
    assert_eq!(test.trinomial.total_games(), 4000);
    assert_eq!(test.pentanomial.total_pairs(), 2000);
    assert!(test.finished);

    // 400 batches submitted, 200 counted, the 200th of them finished the test
    assert_eq!(stops, 201);

    let counted: u64 = workers
        .iter()
        .map(|&(_, result_id)| h.ledger.result(result_id).unwrap().counts().games)
        .sum();
    assert_eq!(counted, 4000);

    let mut finished = Vec::new();
    while let Ok(summary) = h.finished.try_recv() {
        finished.push(summary);
    }
    assert_eq!(finished.len(), 1);
}

#[test]
fn test_concurrent_profiles_sum_exactly() {
    let h = Harness::new();
    let test_id = h.add_test(ModeSpec::Games { max_games: 1_000_000 });
    let batch = pairs(0, 1, 1, 1, 0);

    let machines: Vec<MachineId> = (0..6).map(|_| h.add_machine("shared")).collect();
    let result_id = h.ledger.open_result(test_id);

    let aggregator = Arc::new(h.aggregator);
    let handles: Vec<_> = machines
        .into_iter()
        .map(|machine_id| {
            let aggregator = Arc::clone(&aggregator);
            let batch = batch.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    aggregator
                        .submit(&request(test_id, result_id, machine_id, batch.clone()))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(h.ledger.profile("shared").games(), 6 * 100 * 6);
    assert_eq!(h.ledger.result(result_id).unwrap().counts().games, 6 * 100 * 6);
}
