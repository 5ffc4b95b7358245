//! `GET /healthz` — liveness probe. No upstream dependency is checked: a
//! down upstream should not take this gateway out of a load balancer's
//! rotation, since the gateway itself is still able to serve error
//! responses.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};

pub async fn health() -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = Full::new(Bytes::from_static(b"ok"))
        .map_err(|never| match never {})
        .boxed();
    Response::builder()
        .status(StatusCode::OK)
        .body(body)
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()).map_err(|never| match never {}).boxed()))
}
