// ── Transport bindings ──
//
// `south` serves devices over HTTP, `north` serves the context broker,
// `messaging` drains MQTT and AMQP deliveries into the agent.

pub mod messaging;
pub mod north;
pub mod south;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::CoreError;
use crate::model::PayloadEncoding;

/// A [`CoreError`] rendered as `{"name": ..., "message": ...}` with the
/// status from [`CoreError::http_status`].
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "name": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Encoding implied by the request content type; `None` defers to the
/// device record.
pub(crate) fn encoding_from_headers(headers: &HeaderMap) -> Option<PayloadEncoding> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    content_type
        .starts_with("application/json")
        .then_some(PayloadEncoding::Json)
}

/// Encoding of a request body: the content type when it names JSON,
/// otherwise JSON when the body opens with `{` or `[`.
pub(crate) fn body_encoding(headers: &HeaderMap, body: &[u8]) -> Option<PayloadEncoding> {
    encoding_from_headers(headers).or_else(|| {
        body.iter()
            .find(|b| !b.is_ascii_whitespace())
            .filter(|b| matches!(b, b'{' | b'['))
            .map(|_| PayloadEncoding::Json)
    })
}
