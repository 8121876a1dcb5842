// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP span ingestion: the two zipkin-compatible collector endpoints.
//!
//! `POST /api/v1/spans` accepts the v1 JSON format, `POST /api/v2/spans` the
//! v2 JSON format; both accept gzip-compressed bodies. Parsed spans go into
//! the pipeline with a blocking send, so a saturated pipeline turns into
//! slow HTTP responses rather than unbounded buffering.

use std::io::Read;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use flate2::read::GzDecoder;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, warn};

use zipkin_relay_core::{InternCache, Span};

use crate::jsoncodec;
use crate::pipeline::PipelineHandle;
use crate::stats::inc;

const V1_SPANS_PATH: &str = "/api/v1/spans";
const V2_SPANS_PATH: &str = "/api/v2/spans";

const REQUEST_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct ReceiverState {
    pub pipeline: PipelineHandle,
    pub cache: Arc<InternCache>,
}

pub fn make_router(state: ReceiverState) -> Router {
    Router::new()
        .route(V1_SPANS_PATH, post(v1_spans))
        .route(V2_SPANS_PATH, post(v2_spans))
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Binds and serves the collector endpoints until the token is cancelled.
pub async fn serve(
    listen_addr: std::net::SocketAddr,
    state: ReceiverState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    debug!("listening on {listen_addr}");

    axum::serve(listener, make_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn v1_spans(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // the v1 path also exists as a thrift list upstream; this proxy only
    // takes the JSON rendition
    if !content_type_is_json(&headers) {
        inc(&state.pipeline.stats().parse_errors);
        return log_and_respond(
            StatusCode::BAD_REQUEST,
            "unsupported content type, expected application/json",
        );
    }

    let body = match decompressed(&headers, body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match jsoncodec::parse_v1(&body, &state.cache) {
        Ok(spans) => accept_spans(&state, spans).await,
        Err(err) => {
            inc(&state.pipeline.stats().parse_errors);
            log_and_respond(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

async fn v2_spans(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match decompressed(&headers, body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match jsoncodec::parse_v2(&body, &state.cache) {
        Ok(spans) => accept_spans(&state, spans).await,
        Err(err) => {
            inc(&state.pipeline.stats().parse_errors);
            log_and_respond(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

async fn accept_spans(state: &ReceiverState, spans: Vec<Span>) -> Response {
    let count = spans.len();
    match state.pipeline.ingest(spans).await {
        Ok(()) => {
            debug!(count, "accepted spans");
            StatusCode::ACCEPTED.into_response()
        }
        Err(err) => {
            error!(%err, "could not hand spans to the pipeline");
            log_and_respond(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    match headers.get(header::CONTENT_TYPE) {
        Some(value) => value
            .to_str()
            .map(|content_type| content_type.starts_with("application/json"))
            .unwrap_or(false),
        // zipkin tracers commonly omit the header for JSON bodies
        None => true,
    }
}

/// Unpacks a gzip body when the request says so.
fn decompressed(headers: &HeaderMap, body: Bytes) -> Result<Bytes, Response> {
    let is_gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|encoding| encoding.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !is_gzip {
        return Ok(body);
    }

    let mut decoder = GzDecoder::new(&body[..]);
    let mut decoded = Vec::new();
    match decoder.read_to_end(&mut decoded) {
        Ok(_) => Ok(Bytes::from(decoded)),
        Err(err) => Err(log_and_respond(
            StatusCode::BAD_REQUEST,
            &format!("could not decompress request body: {err}"),
        )),
    }
}

/// Logs the message and returns it as the standard `{"message": ...}` error
/// body. Success statuses log at debug, everything else as a warning.
fn log_and_respond(status: StatusCode, message: &str) -> Response {
    if status.is_success() {
        debug!("{message}");
    } else {
        warn!("{message}");
    }
    (status, Json(json!({ "message": message }))).into_response()
}
