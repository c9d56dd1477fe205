use crate::domain::session::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Publish error: {0}")]
    PublishError(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Outcome values returned by a `SessionStore`.
///
/// None of these are faults: callers branch on them to decide which notice
/// to emit, and `StateMismatch` in particular is the losing side of a race.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum SessionError {
    #[error("an unfinished payment session already exists")]
    AlreadyActive,
    #[error("no active payment session")]
    NotFound,
    #[error("session is {actual:?}, expected {expected:?}")]
    StateMismatch {
        expected: SessionState,
        actual: SessionState,
    },
    #[error("session cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("session storage failure: {0}")]
    Storage(String),
}
