// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

use common::{quick_config, recv_trace, start_proxy, v2_span};
use zipkin_relay_core::{Id, Timestamp};

#[tokio::test]
async fn test_v2_ingestion_merges_and_corrects() {
    let mut proxy = start_proxy(quick_config()).await;
    let url = format!("http://{}/api/v2/spans", proxy.addr);
    let client = reqwest::Client::new();

    // a root and the two halves of one RPC; the server clock is 1s ahead
    let body = serde_json::json!([
        v2_span("a1", "b1", None, "CLIENT", 100_000, 100_000),
        v2_span("a1", "b2", Some("b1"), "CLIENT", 100_000, 100_000),
        v2_span("a1", "b2", Some("b1"), "SERVER", 1_110_000, 80_000),
    ]);

    let response = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 202);

    let trace = recv_trace(&mut proxy).await;
    assert_eq!(trace.len(), 2);

    // sorted by span id, merged to one record per id
    assert_eq!(trace[0].id, Id::new(0xb1));
    assert_eq!(trace[1].id, Id::new(0xb2));

    let rpc = &trace[1];
    assert!(rpc.timings.cs.is_valid() && rpc.timings.sr.is_valid());
    // corrected into the caller's clock
    assert_eq!(rpc.timestamp, Timestamp::from_micros(100_000));
    assert_eq!(rpc.duration, 100_000_000);
    // the server observation wins the service name
    assert_eq!(&*rpc.service, "svc-SERVER");
}

#[tokio::test]
async fn test_v1_gzip_ingestion() {
    let mut proxy = start_proxy(quick_config()).await;
    let url = format!("http://{}/api/v1/spans", proxy.addr);

    let body = serde_json::json!([{
        "traceId": "c1",
        "id": "c1",
        "name": "get /checkout",
        "annotations": [
            {"timestamp": 1_000_000, "value": "cs", "endpoint": {"serviceName": "shop"}},
            {"timestamp": 2_000_000, "value": "cr"}
        ],
        "binaryAnnotations": [
            {"key": "http.status", "value": 200}
        ]
    }]);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(serde_json::to_vec(&body).unwrap().as_slice())
        .unwrap();
    let compressed = encoder.finish().unwrap();

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .body(compressed)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);

    let trace = recv_trace(&mut proxy).await;
    assert_eq!(trace.len(), 1);
    let span = &trace[0];
    assert_eq!(&*span.name, "get /checkout");
    assert_eq!(&*span.service, "shop");
    assert_eq!(&*span.tags["http.status"], "200");
    assert_eq!(span.timestamp, Timestamp::from_micros(1_000_000));
    assert_eq!(span.duration, 1_000_000_000);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let proxy = start_proxy(quick_config()).await;
    let url = format!("http://{}/api/v2/spans", proxy.addr);

    let response = reqwest::Client::new()
        .post(&url)
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(proxy.handle.stats().snapshot().parse_errors, 1);
}

#[tokio::test]
async fn test_oversized_trace_is_discarded_and_blacklisted() {
    let mut proxy = start_proxy(quick_config()).await;
    let url = format!("http://{}/api/v2/spans", proxy.addr);
    let client = reqwest::Client::new();

    // above the 64 node cap of the test config
    let spans: Vec<serde_json::Value> = (1..=80)
        .map(|idx| {
            v2_span(
                "d1",
                &format!("{idx:x}"),
                Some("1"),
                "",
                1_000 * idx,
                100,
            )
        })
        .collect();
    let response = client
        .post(&url)
        .json(&serde_json::Value::Array(spans))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);

    // wait for the aggregator to classify the trace
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if proxy.handle.stats().snapshot().traces_too_large == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "trace was never classified as too large"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // a late span for the same trace is dropped at the entry
    let late = serde_json::json!([v2_span("d1", "ff1", Some("1"), "", 1, 1)]);
    let response = client.post(&url).json(&late).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 202);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if proxy.handle.stats().snapshot().spans_blacklisted == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "late span was not dropped at the entry"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // nothing ever reaches the sink
    assert!(proxy.sink.try_recv().is_err());
}
