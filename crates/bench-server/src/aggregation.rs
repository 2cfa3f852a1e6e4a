//! Merging worker batch submissions into tests.
//!
//! A submission is processed in three steps:
//! 1. Resolve the test, result row and machine. Unknown ids fail here,
//!    before anything is mutated.
//! 2. Under the test's lock: apply the batch and re-evaluate the stopping
//!    rule. This is the only exclusive section.
//! 3. After the lock is released: commutative updates to the result row,
//!    the owner's profile and the machine heartbeat, then hand a summary
//!    to the notifier if the test just finished.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use bench_core::{
    BatchDelta, BatchOutcome, MatchErrors, Pentanomial, TestId, TestSummary, Trinomial,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::ledger::{Ledger, ResultId};
use crate::machines::{MachineId, MachineRegistry};
use crate::notify::NotificationSender;
use crate::store::{lock_test, TestRepository};

/// Prefix of the per-parameter SPSA update fields
const SPSA_FIELD_PREFIX: &str = "spsa_";

/// One worker batch, addressed to a test.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub machine_id: MachineId,
    pub result_id: ResultId,
    pub test_id: TestId,
    pub delta: BatchDelta,
}

impl SubmitRequest {
    /// Decode the worker's form fields.
    ///
    /// `trinomial` is `"losses draws wins"`, `pentanomial` is
    /// `"LL LD DD DW WW"`, and SPSA tests add one `spsa_<name>` field per
    /// parameter.
    pub fn from_fields(fields: &HashMap<String, String>) -> ServerResult<Self> {
        let errors = MatchErrors {
            crashes: field(fields, "crashes")?,
            timelosses: field(fields, "timelosses")?,
            illegals: field(fields, "illegals")?,
        };

        let trinomial = Trinomial::parse(raw_field(fields, "trinomial")?)?;
        let pentanomial = Pentanomial::parse(raw_field(fields, "pentanomial")?)?;

        let mut delta = BatchDelta::new(trinomial, pentanomial).with_errors(errors);
        for (key, value) in fields {
            if let Some(name) = key.strip_prefix(SPSA_FIELD_PREFIX) {
                let update: f64 = value.trim().parse().map_err(|_| {
                    ServerError::Malformed(format!("{key} must be a number, got {value:?}"))
                })?;
                delta.spsa.insert(name.to_string(), update);
            }
        }

        Ok(Self {
            machine_id: field(fields, "machine_id")?,
            result_id: field(fields, "result_id")?,
            test_id: field(fields, "test_id")?,
            delta,
        })
    }
}

fn raw_field<'a>(fields: &'a HashMap<String, String>, name: &str) -> ServerResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ServerError::Malformed(format!("missing field {name}")))
}

fn field<T: FromStr>(fields: &HashMap<String, String>, name: &str) -> ServerResult<T> {
    let raw = raw_field(fields, name)?;
    raw.trim().parse().map_err(|_| {
        ServerError::Malformed(format!("{name} must be a non-negative integer, got {raw:?}"))
    })
}

/// Reply to a worker: `{}` to keep going, `{"stop": true}` to halt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stop: bool,
}

impl SubmitResponse {
    pub fn stop() -> Self {
        Self { stop: true }
    }
}

/// Routes submissions through the test state machine and the reporting
/// aggregates.
pub struct Aggregator<R> {
    tests: Arc<R>,
    ledger: Arc<Ledger>,
    machines: Arc<MachineRegistry>,
    notifications: Option<NotificationSender>,
}

impl<R: TestRepository> Aggregator<R> {
    pub fn new(tests: Arc<R>, ledger: Arc<Ledger>, machines: Arc<MachineRegistry>) -> Self {
        Self {
            tests,
            ledger,
            machines,
            notifications: None,
        }
    }

    pub fn with_notifications(mut self, sender: NotificationSender) -> Self {
        self.notifications = Some(sender);
        self
    }

    pub fn submit(&self, request: &SubmitRequest) -> ServerResult<SubmitResponse> {
        let now = Utc::now();

        let handle = self
            .tests
            .get(request.test_id)
            .ok_or(ServerError::TestNotFound(request.test_id))?;
        let machine = self
            .machines
            .get(request.machine_id)
            .ok_or(ServerError::MachineNotFound(request.machine_id))?;
        let result = self
            .ledger
            .result(request.result_id)
            .filter(|row| row.test_id == request.test_id)
            .ok_or(ServerError::ResultNotFound(request.result_id))?;

        let (outcome, summary) = {
            let mut test = lock_test(&handle);
            let outcome = test.apply_batch(&request.delta, now).inspect_err(|e| {
                warn!(
                    test_id = request.test_id,
                    machine_id = request.machine_id,
                    error = %e,
                    "rejected malformed batch"
                );
            })?;
            let summary = outcome
                .just_finished()
                .then(|| TestSummary::from_workload(&test));
            (outcome, summary)
        };

        if outcome == BatchOutcome::Rejected {
            debug!(
                test_id = request.test_id,
                machine_id = request.machine_id,
                "batch for finished or deleted test"
            );
            return Ok(SubmitResponse::stop());
        }

        result.add(&request.delta, now);
        self.ledger
            .profile(&machine.user)
            .add_games(request.delta.games(), now);
        machine.touch(now);

        if let Some(summary) = summary {
            info!(
                test_id = request.test_id,
                outcome = ?summary.outcome,
                "test finished"
            );
            self.notify(summary);
        }

        Ok(SubmitResponse {
            stop: outcome.halt(),
        })
    }

    fn notify(&self, summary: TestSummary) {
        let Some(sender) = &self.notifications else {
            return;
        };
        let test_id = summary.test_id;
        if sender.send(summary).is_err() {
            warn!(test_id, "notification dispatcher is gone, dropping notification");
        }
    }
}
