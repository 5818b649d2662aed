//! Maps [`FilerError`] onto an HTTP status and a JSON error body (§7).
//!
//! 5xx messages deliberately don't echo the driver's own `Display` output to
//! the wire; 4xx messages are assumed safe since they describe the caller's
//! own request (bad path, conflicting precondition, unknown backend).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use filegate_schema::{ErrorKind, FilerError};
use serde_json::json;

#[derive(Debug)]
pub struct AppError(pub FilerError);

impl From<FilerError> for AppError {
    fn from(err: FilerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.0.kind == ErrorKind::NotModified {
            return status.into_response();
        }

        let message = if matches!(self.0.kind, ErrorKind::Internal) {
            tracing::error!(error = %self.0.message, "internal error");
            "internal error".to_string()
        } else {
            self.0.message.clone()
        };

        (status, Json(json!({ "error": message, "status": status.as_u16() }))).into_response()
    }
}
