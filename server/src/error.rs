//! Error types for the sync server.

use shared::status;
use thiserror::Error;

/// Failure of a single procedure call. Each variant maps onto the status code
/// returned in the `invoke-response` frame.
#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("invalid arguments for {address}: {source}")]
    InvalidArguments {
        address: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode result of {address}: {source}")]
    InvalidResult {
        address: String,
        #[source]
        source: serde_json::Error,
    },

    /// A game command that is not valid right now (wrong phase, not joined...).
    #[error("{0}")]
    Rejected(String),

    #[error("procedure {address} panicked: {message}")]
    Panicked { address: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcedureError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ProcedureError::Rejected(reason.into())
    }

    pub fn status(&self) -> u16 {
        match self {
            ProcedureError::UnknownProcedure(_) => status::NOT_FOUND,
            ProcedureError::InvalidArguments { .. } => status::BAD_REQUEST,
            ProcedureError::Rejected(_) => status::CONFLICT,
            ProcedureError::InvalidResult { .. } | ProcedureError::Panicked { .. } | ProcedureError::Store(_) => {
                status::INTERNAL_ERROR
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode value for cell {address}: {source}")]
    Encode {
        address: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cell {address} holds a value of the wrong shape: {source}")]
    Decode {
        address: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
