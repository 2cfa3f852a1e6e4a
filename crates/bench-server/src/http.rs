//! HTTP surface: worker endpoints and the test management API.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use bench_core::{EloInterval, TestId, TestQuery, TestStatus, Workload, WorkloadSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::aggregation::{Aggregator, SubmitRequest, SubmitResponse};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::ledger::{Ledger, ResultCounts, ResultId};
use crate::machines::{FleetStatus, MachineId, MachineInfo, MachineRegistry};
use crate::notify::NotificationSender;
use crate::store::{lock_test, MemoryStore, TestRepository};

/// Everything a handler can reach.
pub struct AppState {
    pub config: ServerConfig,
    pub tests: Arc<MemoryStore>,
    pub ledger: Arc<Ledger>,
    pub machines: Arc<MachineRegistry>,
    pub aggregator: Aggregator<MemoryStore>,
}

impl AppState {
    pub fn new(config: ServerConfig, notifications: Option<NotificationSender>) -> Self {
        let tests = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new());
        let machines = Arc::new(MachineRegistry::new());

        let mut aggregator =
            Aggregator::new(Arc::clone(&tests), Arc::clone(&ledger), Arc::clone(&machines));
        if let Some(sender) = notifications {
            aggregator = aggregator.with_notifications(sender);
        }

        Self {
            config,
            tests,
            ledger,
            machines,
            aggregator,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/clientGetMachine", post(get_machine))
        .route("/clientSubmitNPS", post(submit_nps))
        .route("/clientSubmitResults", post(submit_results))
        .route("/api/fleet", get(fleet_status))
        .route("/api/tests", post(create_test).get(list_tests))
        .route("/api/tests/:id", get(get_test))
        .route("/api/tests/:id/approve", post(approve_test))
        .route("/api/tests/:id/pause", post(pause_test))
        .route("/api/tests/:id/resume", post(resume_test))
        .route("/api/tests/:id/delete", post(delete_test))
        .route("/api/tests/:id/results", post(open_result))
        .route("/api/results/:id", get(get_result))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Worker endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MachineRequest {
    #[serde(default)]
    pub machine_id: Option<MachineId>,
    pub username: String,
    pub info: MachineInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MachineResponse {
    pub machine_id: MachineId,
}

async fn get_machine(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MachineRequest>,
) -> ServerResult<Json<MachineResponse>> {
    let resolved = state
        .machines
        .resolve(body.machine_id, &body.username, body.info, &state.ledger, Utc::now());

    match (resolved, body.machine_id) {
        (Some(machine), _) => Ok(Json(MachineResponse {
            machine_id: machine.id,
        })),
        (None, Some(id)) if state.machines.get(id).is_none() => {
            Err(ServerError::MachineNotFound(id))
        }
        (None, Some(id)) => Err(ServerError::MachineMismatch(id)),
        (None, None) => Err(ServerError::Malformed("machine registration failed".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ThroughputForm {
    pub machine_id: MachineId,
    /// Million nodes per second measured by the worker's benchmark
    pub mnps: f64,
}

async fn submit_nps(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ThroughputForm>,
) -> ServerResult<Json<SubmitResponse>> {
    if !form.mnps.is_finite() || form.mnps < 0.0 {
        return Err(ServerError::Malformed(format!("invalid mnps {}", form.mnps)));
    }
    let machine = state
        .machines
        .get(form.machine_id)
        .ok_or(ServerError::MachineNotFound(form.machine_id))?;
    machine.record_throughput(form.mnps, Utc::now());
    Ok(Json(SubmitResponse::default()))
}

async fn submit_results(
    State(state): State<Arc<AppState>>,
    Form(fields): Form<HashMap<String, String>>,
) -> ServerResult<Json<SubmitResponse>> {
    let request = SubmitRequest::from_fields(&fields)?;
    let response = state.aggregator.submit(&request)?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct FleetQuery {
    pub username: Option<String>,
}

async fn fleet_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FleetQuery>,
) -> Json<FleetStatus> {
    let status = state.machines.fleet_status(
        Utc::now(),
        state.config.fleet_window(),
        query.username.as_deref(),
    );
    Json(status)
}

// ============================================================================
// Test management
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedTest {
    pub test_id: TestId,
}

async fn create_test(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<WorkloadSpec>,
) -> ServerResult<(StatusCode, Json<CreatedTest>)> {
    let id = state.tests.next_id();
    let test = Workload::create(id, spec, state.config.sprt, Utc::now())?;
    info!(test_id = id, author = %test.author, mode = test.mode.label(), "created test");
    state.tests.insert(test);
    Ok((StatusCode::CREATED, Json(CreatedTest { test_id: id })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<TestQuery>,
}

async fn list_tests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Workload>> {
    let tests = match query.status {
        Some(status) => state.tests.query(status),
        None => {
            let mut all = state.tests.snapshot();
            all.sort_by_key(|t| t.id);
            all
        }
    };
    Json(tests)
}

/// A test with its derived state.
#[derive(Debug, Serialize)]
pub struct TestView {
    #[serde(flatten)]
    pub test: Workload,
    pub status: TestStatus,
    pub elo: EloInterval,
}

type TestReply = ServerResult<Json<TestView>>;

async fn get_test(State(state): State<Arc<AppState>>, Path(id): Path<TestId>) -> TestReply {
    let handle = state.tests.get(id).ok_or(ServerError::TestNotFound(id))?;
    let test = lock_test(&handle).clone();
    Ok(Json(TestView {
        status: test.status(),
        elo: test.elo_interval(),
        test,
    }))
}

fn transition(
    state: &AppState,
    id: TestId,
    action: fn(&mut Workload, DateTime<Utc>) -> bench_core::CoreResult<()>,
) -> TestReply {
    let handle = state.tests.get(id).ok_or(ServerError::TestNotFound(id))?;
    let test = {
        let mut test = lock_test(&handle);
        action(&mut *test, Utc::now())?;
        test.clone()
    };
    info!(test_id = id, status = %test.status(), "test transitioned");
    Ok(Json(TestView {
        status: test.status(),
        elo: test.elo_interval(),
        test,
    }))
}

async fn approve_test(State(state): State<Arc<AppState>>, Path(id): Path<TestId>) -> TestReply {
    transition(&state, id, Workload::approve)
}

async fn pause_test(State(state): State<Arc<AppState>>, Path(id): Path<TestId>) -> TestReply {
    transition(&state, id, Workload::pause)
}

async fn resume_test(State(state): State<Arc<AppState>>, Path(id): Path<TestId>) -> TestReply {
    transition(&state, id, Workload::resume)
}

async fn delete_test(State(state): State<Arc<AppState>>, Path(id): Path<TestId>) -> TestReply {
    transition(&state, id, Workload::delete)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenedResult {
    pub result_id: ResultId,
}

async fn open_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TestId>,
) -> ServerResult<(StatusCode, Json<OpenedResult>)> {
    state.tests.get(id).ok_or(ServerError::TestNotFound(id))?;
    let result_id = state.ledger.open_result(id);
    Ok((StatusCode::CREATED, Json(OpenedResult { result_id })))
}

async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ResultId>,
) -> ServerResult<Json<ResultCounts>> {
    let row = state.ledger.result(id).ok_or(ServerError::ResultNotFound(id))?;
    Ok(Json(row.counts()))
}
