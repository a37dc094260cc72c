//! Error taxonomy for the Hub engine (spec §7).
//!
//! Every fallible boundary in the engine returns a [`HubError`] carrying one
//! of these kinds; callers switch on `kind()` rather than matching error
//! variants by string.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

/// Error classification. Mirrors the taxonomy callers are expected to branch
/// on (HTTP status mapping, retry policy, etc. live outside this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    BadRequestValidationFailure,
    BadRequestInvalidParam,
    BadRequestParseFailure,
    BadRequestDuplicate,
    BadRequestConflict,
    BadRequestPrunable,
    NotFound,
    UnavailableStorageFailure,
    UnavailableNetworkFailure,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::BadRequestValidationFailure => "bad_request.validation_failure",
            ErrorKind::BadRequestInvalidParam => "bad_request.invalid_param",
            ErrorKind::BadRequestParseFailure => "bad_request.parse_failure",
            ErrorKind::BadRequestDuplicate => "bad_request.duplicate",
            ErrorKind::BadRequestConflict => "bad_request.conflict",
            ErrorKind::BadRequestPrunable => "bad_request.prunable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnavailableStorageFailure => "unavailable.storage_failure",
            ErrorKind::UnavailableNetworkFailure => "unavailable.network_failure",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A typed Hub error. The originating cause, when present, is preserved so
/// callers can log or `source()` it without losing the classification.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct HubError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl HubError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        kind: ErrorKind,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn validation_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequestValidationFailure, message)
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequestInvalidParam, message)
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequestParseFailure, message)
    }

    pub fn duplicate() -> Self {
        Self::new(ErrorKind::BadRequestDuplicate, "duplicate message")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequestConflict, message)
    }

    pub fn prunable() -> Self {
        Self::new(
            ErrorKind::BadRequestPrunable,
            "message would be immediately pruned by quota",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn storage_failure(
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::with_cause(
            ErrorKind::UnavailableStorageFailure,
            "storage unavailable",
            cause,
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }
}
