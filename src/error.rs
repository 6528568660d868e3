// Error taxonomy for the relay and its HTTP mapping

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;

use crate::proxy::upstream::strip_hop_headers;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed JSON, unsupported model alias or an unreadable body.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid API key")]
    Unauthorized,

    /// Transport failure before any upstream status was received.
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream answered with status >= 400. Forwarded verbatim.
    #[error("Upstream error (status {status})")]
    UpstreamError {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    #[error("Malformed upstream response: {0}")]
    UpstreamResponseMalformed(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamError { status, .. } => *status,
            ProxyError::UpstreamResponseMalformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::Unauthorized => "invalid_request_error",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamError { .. } => "upstream_error",
            ProxyError::UpstreamResponseMalformed(_) => "api_error",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::Unauthorized => "invalid_api_key",
            ProxyError::UpstreamUnreachable(_) => "bad_gateway",
            ProxyError::UpstreamError { .. } => "upstream_error",
            ProxyError::UpstreamResponseMalformed(_) => "malformed_upstream_response",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ProxyError::UpstreamError {
                status,
                mut headers,
                body,
            } => {
                // The client sees the upstream's native error shape.
                strip_hop_headers(&mut headers);
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            other => {
                let body = json!({
                    "error": {
                        "message": other.to_string(),
                        "type": other.error_type(),
                        "code": other.error_code(),
                    }
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
