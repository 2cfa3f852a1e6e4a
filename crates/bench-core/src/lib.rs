//! Decision core for distributed engine testing
//!
//! This crate provides:
//! - Time control parsing and classification
//! - Sequential probability ratio tests and Elo intervals over aggregate counts
//! - The test lifecycle and the stopping rules of each test mode
//! - Listing queries and finished-test summaries
//!
//! Nothing here performs I/O. Callers own storage and must serialize
//! [`Workload::apply_batch`] calls per test.

pub mod error;
pub mod outcomes;
pub mod query;
pub mod report;
pub mod spsa;
pub mod stats;
pub mod time_control;
pub mod workload;

pub use error::{CoreError, CoreResult};
pub use outcomes::{BatchDelta, MatchErrors, Pentanomial, Trinomial};
pub use query::TestQuery;
pub use report::{Outcome, TestSummary};
pub use spsa::{SpsaConfig, SpsaParameter};
pub use stats::{elo_interval, llr_bounds, pentanomial_llr, trinomial_llr, EloInterval};
pub use time_control::{ControlBase, ControlKind, TimeControl};
pub use workload::{
    BatchOutcome, EngineBuild, ErrorRates, ModeSpec, SprtBounds, TestId, TestMode, TestStatus,
    Workload, WorkloadSpec,
};
