//! Per-request correlation-id middleware (§7): every request gets a UUID
//! recorded on its tracing span, so log lines emitted anywhere during the
//! request (including the error mapping in `errors.rs`) carry it, and the
//! same id is stitched into the JSON body of any 5xx response so a caller
//! can quote it back when reporting a failure.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
/// Error bodies are small JSON objects; this is far above anything the
/// error handlers in this crate ever produce.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

pub async fn request_id_layer(request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let response = next.run(request).instrument(span).await;
    attach_request_id(response, &request_id).await
}

/// Sets `X-Request-Id` on every response, and for 5xx responses merges a
/// `request_id` field into the JSON error body (§7 "5xx responses ...
/// include a correlation identifier when tracing is configured").
async fn attach_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_ERROR_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let mut value: serde_json::Value =
        serde_json::from_slice(&bytes).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("request_id".to_string(), serde_json::Value::String(request_id.to_string()));
    }

    let rewritten = serde_json::to_vec(&value).unwrap_or_default();
    parts.headers.remove(header::CONTENT_LENGTH);
    if let Ok(len) = HeaderValue::from_str(&rewritten.len().to_string()) {
        parts.headers.insert(header::CONTENT_LENGTH, len);
    }

    Response::from_parts(parts, Body::from(rewritten))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn server_error_body_gets_request_id_field() {
        let body = serde_json::json!({ "error": "internal error", "status": 500 });
        let response = (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();

        let stitched = attach_request_id(response, "test-request-id").await;
        assert_eq!(
            stitched.headers().get(REQUEST_ID_HEADER).unwrap(),
            "test-request-id"
        );

        let bytes = to_bytes(stitched.into_body(), MAX_ERROR_BODY_BYTES).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["request_id"], "test-request-id");
        assert_eq!(value["error"], "internal error");
    }

    #[tokio::test]
    async fn client_error_body_is_left_untouched() {
        let body = serde_json::json!({ "error": "not found", "status": 404 });
        let response = (StatusCode::NOT_FOUND, axum::Json(body)).into_response();

        let stitched = attach_request_id(response, "test-request-id").await;
        let bytes = to_bytes(stitched.into_body(), MAX_ERROR_BODY_BYTES).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("request_id").is_none());
    }
}
