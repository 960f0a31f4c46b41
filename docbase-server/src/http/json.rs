//! JSON response bodies.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use serde::Serialize;
use tracing::warn;

/// Body sent when a response value cannot be serialized.
pub const FALLBACK_BODY: &str = "could not serialize json body";

/// Encoding a response body as JSON failed.
#[derive(Debug, thiserror::Error)]
#[error("serialization failure: {0}")]
pub struct SerializationFailure(#[from] serde_json::Error);

/// Encode `value` as JSON.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, SerializationFailure> {
    Ok(serde_json::to_vec(value)?.into())
}

/// A JSON response.
///
/// If the value fails to serialize, the failure is logged and the response becomes a plain-text
/// `500` carrying [`FALLBACK_BODY`].
#[derive(Debug)]
pub struct JsonBody<T>(pub StatusCode, pub T);

impl<T: Serialize> JsonBody<T> {
    /// A `200 OK` JSON response.
    pub fn ok(value: T) -> Self {
        Self(StatusCode::OK, value)
    }
}

impl<T: Serialize> IntoResponse for JsonBody<T> {
    fn into_response(self) -> Response {
        let JsonBody(status, value) = self;
        match encode(&value) {
            Ok(body) => (
                status,
                [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                body,
            )
                .into_response(),
            Err(err) => {
                warn!(%err, "failed to encode response");
                (StatusCode::INTERNAL_SERVER_ERROR, FALLBACK_BODY).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::body::to_bytes;

    use super::*;

    #[test]
    fn encodes_values() {
        assert_eq!(encode("OK").unwrap(), Bytes::from_static(b"\"OK\""));
        assert_eq!(encode(&[1, 2]).unwrap(), Bytes::from_static(b"[1,2]"));
    }

    #[tokio::test]
    async fn falls_back_on_serialization_failure() {
        // json object keys must be strings
        let mut unencodable = BTreeMap::new();
        unencodable.insert((1u8, 2u8), "value");
        assert!(encode(&unencodable).is_err());

        let response = JsonBody::ok(unencodable).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, FALLBACK_BODY.as_bytes());
    }
}
