//! Typed error kinds shared across the crate.
//!
//! Mirrors the teacher's `storage::StorageError` in shape (a flat
//! `thiserror` enum carrying machine-readable variants) but spans the
//! whole core rather than just storage, per spec.md §7.

use thiserror::Error;

/// A single logical error kind, tagged the way spec.md §7 enumerates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connector,
    Schema,
    Integrity,
    Transient,
    Timeout,
    Cancelled,
    Plugin,
    Internal,
}

/// The crate's single error type. Every fallible public operation returns
/// `Result<T, McError>`.
#[derive(Error, Debug)]
pub enum McError {
    #[error("[{kind}] configuration error: {message}")]
    Config { kind: ErrorKind, message: String },

    #[error("[{kind}] connector error: {message}")]
    Connector { kind: ErrorKind, message: String },

    #[error("[{kind}] schema error in column '{column}' at row {row}: {message}")]
    Schema { kind: ErrorKind, column: String, row: usize, message: String },

    #[error("[{kind}] integrity violation: {message}")]
    Integrity { kind: ErrorKind, message: String },

    #[error("[{kind}] transient error (retryable): {message}")]
    Transient { kind: ErrorKind, message: String },

    #[error("[{kind}] operation timed out after {seconds}s")]
    Timeout { kind: ErrorKind, seconds: u64 },

    #[error("[{kind}] cancelled")]
    Cancelled { kind: ErrorKind },

    #[error("[{kind}] plugin error: {message}")]
    Plugin { kind: ErrorKind, message: String },

    #[error("[{kind}] internal invariant violation: {message}")]
    Internal { kind: ErrorKind, message: String },
}

impl McError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { kind: ErrorKind::Config, message: message.into() }
    }

    pub fn connector(message: impl Into<String>) -> Self {
        Self::Connector { kind: ErrorKind::Connector, message: message.into() }
    }

    pub fn schema(column: impl Into<String>, row: usize, message: impl Into<String>) -> Self {
        Self::Schema { kind: ErrorKind::Schema, column: column.into(), row, message: message.into() }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity { kind: ErrorKind::Integrity, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { kind: ErrorKind::Transient, message: message.into() }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { kind: ErrorKind::Timeout, seconds }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled { kind: ErrorKind::Cancelled }
    }

    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin { kind: ErrorKind::Plugin, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { kind: ErrorKind::Internal, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { kind, .. }
            | Self::Connector { kind, .. }
            | Self::Schema { kind, .. }
            | Self::Integrity { kind, .. }
            | Self::Transient { kind, .. }
            | Self::Timeout { kind, .. }
            | Self::Cancelled { kind }
            | Self::Plugin { kind, .. }
            | Self::Internal { kind, .. } => *kind,
        }
    }

    /// Whether the batch-retry policy of §4.6 should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

pub type McResult<T> = Result<T, McError>;
