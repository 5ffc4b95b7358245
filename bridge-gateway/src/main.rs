use std::sync::Arc;
use std::time::Duration;

use bridge_gateway::config::GatewayConfig;
use bridge_gateway::handlers::health::health;
use bridge_gateway::handlers::messages::messages;
use bridge_gateway::logging;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

fn empty() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn not_found() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// CORS preflight response for the routes this gateway serves (SPEC_FULL.md
/// §1's CORS collaborator duty), following the donor's `/v1/models` OPTIONS
/// handler in `brightstaff/src/main.rs`.
fn cors_preflight() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
        .headers_mut()
        .insert("Allow", "POST, GET, OPTIONS".parse().unwrap());
    apply_cors_headers(&mut response);
    response
}

/// Inserts the `Access-Control-Allow-*` headers the donor sets on its
/// CORS-handled routes, so browser clients can call this gateway cross-origin.
fn apply_cors_headers(response: &mut Response<BoxBody<Bytes, hyper::Error>>) {
    response
        .headers_mut()
        .insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    response.headers_mut().insert(
        "Access-Control-Allow-Headers",
        "Authorization, Content-Type, x-api-key, anthropic-beta".parse().unwrap(),
    );
    response.headers_mut().insert(
        "Access-Control-Allow-Methods",
        "GET, POST, OPTIONS".parse().unwrap(),
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();

    let config = Arc::new(GatewayConfig::load().unwrap_or_else(|err| {
        error!(error = %err, "failed to load configuration");
        std::process::exit(1);
    }));

    let client = Arc::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("reqwest client builds with a static config"),
    );

    info!(bind_address = %config.bind_address, upstream = %config.upstream_base_url, "starting bridge-gateway");
    let listener = TcpListener::bind(&config.bind_address).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let client = Arc::clone(&client);
        let config = Arc::clone(&config);

        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let client = Arc::clone(&client);
            let config = Arc::clone(&config);
            async move {
                let mut response = match (req.method(), req.uri().path()) {
                    (&Method::POST, bridge_core::anthropic::MESSAGES_PATH) => {
                        messages(req, client, config).await?
                    }
                    (&Method::GET, "/healthz") => health().await,
                    (&Method::OPTIONS, bridge_core::anthropic::MESSAGES_PATH) | (&Method::OPTIONS, "/healthz") => {
                        cors_preflight()
                    }
                    _ => not_found(),
                };
                apply_cors_headers(&mut response);
                Ok(response)
            }
        });

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %err, "connection error");
            }
        });
    }
}
