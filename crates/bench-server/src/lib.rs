//! Result aggregation server for distributed engine testing.
//!
//! Workers register their machines, fetch a result row for a test, play
//! games and submit batches. Each batch is merged into its test under that
//! test's lock; everything else a batch touches is a lock-free counter.

pub mod aggregation;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod machines;
pub mod notify;
pub mod store;

pub use aggregation::{Aggregator, SubmitRequest, SubmitResponse};
pub use config::ServerConfig;
pub use error::{ConfigError, ServerError, ServerResult};
pub use http::{router, AppState};
pub use ledger::{Ledger, Profile, ResultCounts, ResultId, ResultRow};
pub use machines::{FleetStatus, Machine, MachineId, MachineInfo, MachineRegistry};
pub use notify::{spawn_dispatcher, LogNotifier, NotificationSender, Notifier, NotifyError};
pub use store::{lock_test, MemoryStore, TestHandle, TestRepository};
