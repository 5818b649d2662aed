//! Error kinds shared between backends, the manager and the HTTP layer
//! (§7 Error Handling Design).

use serde::Serialize;
use thiserror::Error;

/// The taxonomy every backend classifies its storage-driver errors into,
/// once, at the boundary. The manager forwards these unchanged; only the
/// HTTP layer translates them into a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    PreconditionFailed,
    Forbidden,
    MethodNotAllowed,
    Internal,
    NotModified,
}

impl ErrorKind {
    /// The HTTP status this kind maps to.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::PreconditionFailed => 412,
            ErrorKind::Forbidden => 403,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::Internal => 500,
            ErrorKind::NotModified => 304,
        }
    }
}

/// A classified error carrying a caller-visible explanation string.
///
/// 5xx variants deliberately do not echo the underlying driver error's
/// `Display` output to the wire (§7); callers of [`FilerError::internal`]
/// should still pass a message, since it's logged, just not always rendered
/// to the client the same way as a 4xx explanation.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct FilerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FilerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_modified() -> Self {
        Self::new(ErrorKind::NotModified, "not modified")
    }
}

impl From<std::io::Error> for FilerError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        let kind = match err.kind() {
            IoKind::NotFound => ErrorKind::NotFound,
            IoKind::PermissionDenied => ErrorKind::Forbidden,
            IoKind::AlreadyExists => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        };
        FilerError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::BadRequest.status_code(), 400);
        assert_eq!(ErrorKind::Conflict.status_code(), 409);
        assert_eq!(ErrorKind::PreconditionFailed.status_code(), 412);
        assert_eq!(ErrorKind::Forbidden.status_code(), 403);
        assert_eq!(ErrorKind::MethodNotAllowed.status_code(), 405);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
        assert_eq!(ErrorKind::NotModified.status_code(), 304);
    }

    #[test]
    fn io_not_found_maps_to_kind_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FilerError = io_err.into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn io_permission_denied_maps_to_forbidden() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        let err: FilerError = io_err.into();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
