use reqwest::StatusCode;
use thiserror::Error;

use crate::transfer::TransferState;

/// Every way a transfer call can fail. Nothing escapes the client as a panic;
/// callers receive one of these and decide what to show.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server returned {status}: {message}")]
    HttpStatus { status: StatusCode, message: String },

    #[error("malformed response: {0}")]
    ResponseFormat(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("cannot enter {to:?} from {from:?}")]
    InvalidState {
        from: TransferState,
        to: TransferState,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferErrorKind {
    Connection,
    HttpStatus,
    ResponseFormat,
    Io,
    InvalidRequest,
    Cancelled,
    InvalidState,
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::Connection(_) => TransferErrorKind::Connection,
            TransferError::HttpStatus { .. } => TransferErrorKind::HttpStatus,
            TransferError::ResponseFormat(_) => TransferErrorKind::ResponseFormat,
            TransferError::Io(_) => TransferErrorKind::Io,
            TransferError::InvalidRequest(_) => TransferErrorKind::InvalidRequest,
            TransferError::Cancelled => TransferErrorKind::Cancelled,
            TransferError::InvalidState { .. } => TransferErrorKind::InvalidState,
        }
    }

    /// Status code of an `HttpStatus` failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransferError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a transport error. Timeouts and bodies cut short count as
    /// connection failures.
    pub(crate) fn from_transport(error: reqwest::Error) -> Self {
        if error.is_builder() {
            return TransferError::InvalidRequest(error.to_string());
        }
        TransferError::Connection(error_chain(&error))
    }
}

// reqwest's Display stops at the outermost layer ("error sending request"),
// the useful cause is further down.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
