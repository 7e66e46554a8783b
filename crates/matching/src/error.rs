use thiserror::Error;

use crate::model::{RecordId, ValueKind};

#[derive(Debug, Error)]
pub enum MatchError {
    /// Rule, store, or criteria setup that cannot run (bad weight, no join rule, etc.).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Values of different kinds were compared.
    #[error("cannot compare values of dissimilar type: left = {left}, right = {right}")]
    TypeMismatch { left: ValueKind, right: ValueKind },
    /// Fuzzy comparison requested for a kind with no registered comparator.
    #[error("cannot calculate fuzzy comparison for type {0}")]
    UnsupportedType(ValueKind),
    /// Bad parameter to a comparator (e.g. a date window that isn't a whole number).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Point lookup in a store missed.
    #[error("record {0} not found in store")]
    RecordNotFound(RecordId),
    /// Store adapter failure (CSV, SQLite, ...).
    #[error("store error: {0}")]
    Store(String),
    /// Index backend failure.
    #[error("index error: {0}")]
    Index(String),
    /// Conflict resolution did not converge within its pass bound.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl MatchError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    pub fn index(err: impl std::fmt::Display) -> Self {
        Self::Index(err.to_string())
    }
}
