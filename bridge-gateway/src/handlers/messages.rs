//! `POST /v1/messages` handler (SPEC_FULL.md §6). Ingress validation, the
//! request transform, an upstream call, and either the non-streaming
//! response transform or the streaming transducer pipeline — grounded in
//! the donor's `chat` handler and `ResponseHandler::create_streaming_response`,
//! stripped of multi-provider routing since this proxy has exactly one
//! upstream (SPEC_FULL.md §1 non-goals).

use std::sync::Arc;
use std::time::Duration;

use bridge_core::anthropic::MessagesRequest;
use bridge_core::openai::ChatCompletionsStreamResponse;
use bridge_core::{request_xform, response_xform, validate, Framer, Transducer};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame as HyperFrame, Incoming};
use hyper::{Request, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::GatewayError;

fn full_body<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

pub async fn messages(
    req: Request<Incoming>,
    client: Arc<reqwest::Client>,
    config: Arc<GatewayConfig>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let request_id = Uuid::new_v4();
    let span = info_span!("messages", request_id = %request_id);

    match handle(req, client, config).instrument(span).await {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(error = %err, "request failed");
            Ok(err.into_response())
        }
    }
}

/// Forwarded as-is when no key is configured for the upstream
/// (SPEC_FULL.md §6 egress: "the configured upstream key or the forwarded
/// client credential").
fn client_credential(req: &Request<Incoming>) -> Option<String> {
    if let Some(value) = req.headers().get("x-api-key") {
        return value.to_str().ok().map(|v| format!("Bearer {v}"));
    }
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

async fn handle(
    req: Request<Incoming>,
    client: Arc<reqwest::Client>,
    config: Arc<GatewayConfig>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, GatewayError> {
    let forwarded_credential = client_credential(&req);
    let body_bytes = req.collect().await.map_err(GatewayError::BodyRead)?.to_bytes();

    let anthropic_req: MessagesRequest =
        serde_json::from_slice(&body_bytes).map_err(GatewayError::InvalidJson)?;
    let anthropic_req = validate(anthropic_req)?;

    let wants_stream = anthropic_req.stream.unwrap_or(false);
    let needs_cache_beta = bridge_core::requires_cache_beta_header(&anthropic_req);
    let mut upstream_req = request_xform(&anthropic_req, &config.upstream_model);
    upstream_req.stream = Some(wants_stream);

    let mut upstream_call = client
        .post(format!("{}/v1/chat/completions", config.upstream_base_url))
        .json(&upstream_req)
        .timeout(Duration::from_secs(config.request_timeout_secs));
    upstream_call = match &config.upstream_api_key {
        Some(api_key) => upstream_call.bearer_auth(api_key),
        None => match &forwarded_credential {
            Some(credential) => upstream_call.header(hyper::header::AUTHORIZATION, credential),
            None => upstream_call,
        },
    };
    if needs_cache_beta {
        upstream_call = upstream_call.header("anthropic-beta", "prompt-caching-2024-07-31");
    }

    let upstream_response = upstream_call
        .send()
        .await
        .map_err(GatewayError::UpstreamUnreachable)?;

    let status = upstream_response.status();
    if status.is_client_error() {
        // The upstream's own error envelope reaches the client unchanged
        // (SPEC_FULL.md §7 policy).
        let passthrough_status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_REQUEST);
        let body = upstream_response
            .bytes()
            .await
            .map_err(GatewayError::UpstreamUnreachable)?;
        return Ok(Response::builder()
            .status(passthrough_status)
            .header("content-type", "application/json")
            .body(full_body(body))
            .expect("static response parts always build"));
    }
    if status.is_server_error() {
        // Re-wrapped, not passed through: SPEC_FULL.md §7 maps any upstream
        // 5xx to a flat HTTP 502 `api_error`, regardless of the original status.
        let body = upstream_response.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamError {
            status: StatusCode::BAD_GATEWAY,
            body,
        });
    }

    if wants_stream {
        stream_response(upstream_response)
    } else {
        let upstream_body = upstream_response
            .bytes()
            .await
            .map_err(GatewayError::UpstreamUnreachable)?;
        let parsed = serde_json::from_slice(&upstream_body)
            .map_err(bridge_core::BridgeError::MalformedUpstream)?;
        let anthropic_resp = response_xform(&parsed)?;
        let body = serde_json::to_vec(&anthropic_resp).expect("MessagesResponse always serializes");
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(full_body(body))
            .expect("static response parts always build"))
    }
}

/// Bridges the upstream SSE body through the framer and transducer into an
/// Anthropic-shaped outgoing SSE stream (SPEC_FULL.md §4.4, §4.5).
fn stream_response(
    upstream_response: reqwest::Response,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, GatewayError> {
    let (tx, rx) = mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        let mut framer = Framer::new();
        let mut transducer = Transducer::new();
        let mut byte_stream = upstream_response.bytes_stream();

        while let Some(item) = byte_stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(error = ?err, "error receiving upstream chunk");
                    break;
                }
            };
            for frame in framer.push(&chunk) {
                if !emit_frame(&mut transducer, frame, &tx).await {
                    return;
                }
            }
        }

        for frame in framer.finish() {
            if !emit_frame(&mut transducer, frame, &tx).await {
                return;
            }
        }

        if !transducer.is_stopped() {
            send_events(transducer.finalize(), &tx).await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|chunk| Ok::<_, hyper::Error>(HyperFrame::data(chunk)));
    let body = BoxBody::new(StreamBody::new(stream));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .expect("static response parts always build"))
}

/// Returns `false` once the receiver has gone away, signalling the spawned
/// task to stop producing (client cancellation, SPEC_FULL.md §4.5.5).
async fn emit_frame(
    transducer: &mut Transducer,
    frame: bridge_core::Frame,
    tx: &mpsc::Sender<Bytes>,
) -> bool {
    let events = match frame {
        bridge_core::Frame::Chunk(chunk) => {
            let chunk: ChatCompletionsStreamResponse = chunk;
            transducer.feed_chunk(&chunk)
        }
        bridge_core::Frame::Done => {
            if transducer.is_stopped() {
                Vec::new()
            } else {
                transducer.finalize()
            }
        }
    };
    send_events(events, tx).await
}

async fn send_events(events: Vec<bridge_core::anthropic::MessagesStreamEvent>, tx: &mpsc::Sender<Bytes>) -> bool {
    for event in events {
        let payload = serde_json::to_string(&event).expect("MessagesStreamEvent always serializes");
        let sse = format!("event: {}\ndata: {}\n\n", event.event_name(), payload);
        if tx.send(Bytes::from(sse)).await.is_err() {
            return false;
        }
    }
    true
}
