//! HTTP error types.

use crtbridge_core::{CrtError, ErrorCode};

/// Errors raised by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// A managed-side failure shared with the rest of crtbridge.
    #[error(transparent)]
    Crt(#[from] CrtError),

    /// The engine reported a protocol-level failure.
    #[error("http exception: error code {code}")]
    Exception {
        /// Native error code.
        code: ErrorCode,
    },
}

/// Convenience result type for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;

impl HttpError {
    /// The native error code behind this error, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Exception { code }
            | Self::Crt(
                CrtError::AcquisitionFailed { code, .. } | CrtError::DispatchFailed { code },
            ) => Some(*code),
            Self::Crt(_) => None,
        }
    }
}
