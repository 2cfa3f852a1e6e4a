//! Error type shared by the bench-core modules

use thiserror::Error;

use crate::workload::TestStatus;

/// Errors raised while validating or mutating a test.
///
/// None of these leave partial state behind: every check runs before the
/// first counter is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("unable to parse time control ({0})")]
    InvalidTimeControl(String),

    #[error("malformed batch: {0}")]
    MalformedDelta(String),

    #[error("unknown SPSA parameter: {0}")]
    UnknownParameter(String),

    #[error("cannot {action} a test that is {status}")]
    InvalidTransition {
        status: TestStatus,
        action: &'static str,
    },

    #[error("invalid test configuration: {0}")]
    InvalidConfig(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
