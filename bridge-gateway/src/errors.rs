//! HTTP error envelope (SPEC_FULL.md §7). Maps [`BridgeError`] and the
//! gateway's own I/O failures onto Anthropic's error response shape
//! (`{"type": "error", "error": {"type": ..., "message": ...}}`), following
//! the donor's `BrightStaffError::into_response` pattern but targeting the
//! Anthropic envelope rather than the donor's own `{error:{code,...}}` shape.

use bridge_core::BridgeError;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{Response, StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("request body could not be read: {0}")]
    BodyRead(#[source] hyper::Error),

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("failed to reach upstream: {0}")]
    UpstreamUnreachable(#[source] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    UpstreamError { status: StatusCode, body: String },
}

impl GatewayError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Bridge(BridgeError::InvalidRequest { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            GatewayError::Bridge(BridgeError::MalformedToolArguments { .. }) => {
                (StatusCode::BAD_GATEWAY, "api_error")
            }
            GatewayError::Bridge(BridgeError::InvalidImageSource { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            GatewayError::Bridge(BridgeError::MalformedUpstream(_)) => {
                (StatusCode::BAD_GATEWAY, "api_error")
            }
            GatewayError::BodyRead(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            GatewayError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            GatewayError::UpstreamUnreachable(_) => {
                (StatusCode::BAD_GATEWAY, "api_error")
            }
            GatewayError::UpstreamError { status, .. } => (*status, "api_error"),
        }
    }

    pub fn into_response(self) -> Response<BoxBody<Bytes, hyper::Error>> {
        let (status, error_type) = self.status_and_type();
        let body_json = json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        });

        let body = Full::new(Bytes::from(body_json.to_string()))
            .map_err(|never| match never {})
            .boxed();

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(body)
            .unwrap_or_else(|_| {
                Response::new(
                    Full::new(Bytes::from("internal error"))
                        .map_err(|never| match never {})
                        .boxed(),
                )
            })
    }
}
