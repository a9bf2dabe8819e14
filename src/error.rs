//! Error types for the statement engine.
//!
//! Every operation returns [`Result`]. Per-column conversion problems are not
//! errors: they are reported through the output binding's error slot.

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unable to allocate memory")]
    Allocation,

    #[error("Bad data read from server: {0}")]
    Protocol(String),

    #[error("Got response with invalid sync: expected {expected}, got {got}")]
    Sync { expected: u64, got: u64 },

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Wrong call function sequence: {0}")]
    Sequence(&'static str),

    #[error("Unsupported bind type {code} for parameter {index}")]
    UnsupportedBindType { index: usize, code: i32 },

    #[error("Invalid parameter {index}: {reason}")]
    InvalidParameter { index: usize, reason: String },

    #[error("Server error {code}: {message}")]
    Server { code: u32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A cursor that already failed, reported again until it is closed.
    #[error("{message}")]
    Terminal { kind: ErrorKind, message: String },
}

/// Coarse error category, stable across [`Error::Terminal`] re-reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Allocation,
    Protocol,
    Sync,
    Transport,
    Sequence,
    UnsupportedBindType,
    InvalidParameter,
    Server,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Allocation => ErrorKind::Allocation,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Sync { .. } => ErrorKind::Sync,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Sequence(_) => ErrorKind::Sequence,
            Error::UnsupportedBindType { .. } => ErrorKind::UnsupportedBindType,
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::Server { .. } => ErrorKind::Server,
            Error::Config(_) => ErrorKind::Config,
            Error::Terminal { kind, .. } => *kind,
        }
    }

    /// Whether this error ends the current cursor.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Protocol | ErrorKind::Sync | ErrorKind::Transport | ErrorKind::Server
        )
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::Allocation
    }
}

impl From<smallvec::CollectionAllocErr> for Error {
    fn from(_: smallvec::CollectionAllocErr) -> Self {
        Error::Allocation
    }
}

impl From<rmp::encode::ValueWriteError> for Error {
    fn from(e: rmp::encode::ValueWriteError) -> Self {
        Error::Protocol(format!("failed to encode request: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
