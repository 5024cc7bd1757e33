//! Error types shared by every crtbridge crate.
//!
//! Native calls report failure through an integer [`ErrorCode`]. Managed-side
//! failures (bad configuration, use of a released handle, ...) are expressed
//! as [`CrtError`] variants, some of which carry the native code that caused
//! them.

use std::fmt;

/// An error code reported by the native engine.
///
/// The engine owns the numbering; only a handful of well-known codes are
/// named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    /// The operation succeeded.
    pub const SUCCESS: Self = Self(0);
    /// Unclassified native failure.
    pub const UNKNOWN: Self = Self(1);
    /// The engine rejected an argument.
    pub const INVALID_ARGUMENT: Self = Self(34);
    /// The operation was canceled before it finished.
    pub const CANCELED: Self = Self(2064);
    /// The underlying connection closed.
    pub const CONNECTION_CLOSED: Self = Self(2058);
    /// The engine tore down an operation without ever reporting completion.
    pub const SHUTDOWN_BEFORE_COMPLETION: Self = Self(2070);

    /// Wrap a raw code received from the engine.
    #[must_use]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// The raw integer value.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Whether this code signals success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Symbolic name for well-known codes.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::SUCCESS => Some("SUCCESS"),
            Self::UNKNOWN => Some("UNKNOWN"),
            Self::INVALID_ARGUMENT => Some("INVALID_ARGUMENT"),
            Self::CANCELED => Some("CANCELED"),
            Self::CONNECTION_CLOSED => Some("CONNECTION_CLOSED"),
            Self::SHUTDOWN_BEFORE_COMPLETION => Some("SHUTDOWN_BEFORE_COMPLETION"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

/// Core error type for managed-side failures.
#[derive(Debug, thiserror::Error)]
pub enum CrtError {
    /// A required option is missing or malformed. Raised before any native call.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A dispatch call is missing its request or its response handler.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The native engine failed to create a resource.
    #[error("failed to acquire native {resource}: error code {code}")]
    AcquisitionFailed {
        /// Resource kind that could not be acquired.
        resource: &'static str,
        /// Native error code.
        code: ErrorCode,
    },

    /// The native engine refused to start a request.
    #[error("native dispatch failed: error code {code}")]
    DispatchFailed {
        /// Native error code.
        code: ErrorCode,
    },

    /// The resource's native handle has already been released.
    #[error("{resource} has been released")]
    UseAfterRelease {
        /// Resource kind that was used after release.
        resource: &'static str,
    },

    /// The operation is not valid in the resource's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The delivering side of a completion went away without delivering.
    #[error("completion for {operation} was dropped before delivery")]
    CompletionDropped {
        /// Label of the operation whose completion was lost.
        operation: &'static str,
    },
}

/// Convenience result type for crtbridge operations.
pub type CrtResult<T> = Result<T, CrtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_name_well_known_codes() {
        assert_eq!(ErrorCode::SUCCESS.name(), Some("SUCCESS"));
        assert_eq!(ErrorCode::CANCELED.to_string(), "2064 (CANCELED)");
        assert_eq!(ErrorCode::new(9999).to_string(), "9999");
        assert!(ErrorCode::SUCCESS.is_success());
        assert!(!ErrorCode::UNKNOWN.is_success());
    }

    #[test]
    fn test_should_carry_native_code_in_message() {
        let err = CrtError::AcquisitionFailed {
            resource: "s3 client",
            code: ErrorCode::INVALID_ARGUMENT,
        };
        assert_eq!(
            err.to_string(),
            "failed to acquire native s3 client: error code 34 (INVALID_ARGUMENT)"
        );
    }
}
