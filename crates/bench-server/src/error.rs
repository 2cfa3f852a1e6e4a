//! Server error type and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bench_core::{CoreError, TestId};
use thiserror::Error;

use crate::ledger::ResultId;
use crate::machines::MachineId;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no test with id {0}")]
    TestNotFound(TestId),

    #[error("no result row with id {0} for this test")]
    ResultNotFound(ResultId),

    #[error("no machine with id {0}")]
    MachineNotFound(MachineId),

    #[error("machine {0} does not match the supplied identity")]
    MachineMismatch(MachineId),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::TestNotFound(_)
            | ServerError::ResultNotFound(_)
            | ServerError::MachineNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::MachineMismatch(_) => StatusCode::FORBIDDEN,
            ServerError::Malformed(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(CoreError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ServerError::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Errors while loading the server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}
