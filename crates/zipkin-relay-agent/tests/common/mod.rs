// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common helpers for integration tests: an in-process proxy bound to an
//! ephemeral port, plus payload builders.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use zipkin_relay_agent::aggregator::AggregatorConfig;
use zipkin_relay_agent::pipeline::{Pipeline, PipelineBuilder, PipelineHandle};
use zipkin_relay_agent::receiver::{make_router, ReceiverState};
use zipkin_relay_core::{InternCache, Span};

pub struct TestProxy {
    pub addr: SocketAddr,
    pub handle: PipelineHandle,
    pub sink: mpsc::Receiver<Arc<[Span]>>,
    // kept alive for the duration of the test
    _pipeline: Pipeline,
    _server: JoinHandle<()>,
}

/// Spins up the full pipeline plus HTTP receiver on an ephemeral port, with
/// a short buffer time so traces finish quickly.
pub async fn start_proxy(config: AggregatorConfig) -> TestProxy {
    let cache = Arc::new(InternCache::new(1024 * 1024));
    let mut builder = PipelineBuilder::new(config, cache.clone());
    let sink = builder.sink(64);
    let pipeline = builder.spawn();
    let handle = pipeline.handle();

    let state = ReceiverState {
        pipeline: handle.clone(),
        cache,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, make_router(state))
            .await
            .expect("server failed");
    });

    TestProxy {
        addr,
        handle,
        sink,
        _pipeline: pipeline,
        _server: server,
    }
}

pub fn quick_config() -> AggregatorConfig {
    AggregatorConfig {
        buffer_time: Duration::from_millis(50),
        max_age: Duration::from_millis(2_000),
        max_trace_nodes: 64,
        max_inflight_spans: 10_000,
    }
}

pub fn v2_span(
    trace: &str,
    id: &str,
    parent: Option<&str>,
    kind: &str,
    timestamp_micros: i64,
    duration_micros: i64,
) -> serde_json::Value {
    let mut span = serde_json::json!({
        "traceId": trace,
        "id": id,
        "name": format!("op-{id}"),
        "timestamp": timestamp_micros,
        "duration": duration_micros,
        "localEndpoint": {"serviceName": format!("svc-{kind}")},
    });
    if !kind.is_empty() {
        span["kind"] = serde_json::Value::String(kind.to_string());
    }
    if let Some(parent) = parent {
        span["parentId"] = serde_json::Value::String(parent.to_string());
    }
    span
}

pub async fn recv_trace(proxy: &mut TestProxy) -> Arc<[Span]> {
    tokio::time::timeout(Duration::from_secs(5), proxy.sink.recv())
        .await
        .expect("timed out waiting for a finished trace")
        .expect("sink channel closed")
}
