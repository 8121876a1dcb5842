// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwards finished traces to a downstream zipkin-compatible collector as
//! v2 JSON.
//!
//! Spans are batched and posted every couple of seconds or once enough have
//! piled up, whichever comes first. The HTTP upload runs in its own task
//! behind a small channel: when the uplink cannot keep up we drop a batch
//! and log it instead of stalling the fan-out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, Instant};
use tracing::{debug, warn};

use zipkin_relay_core::Span;

use super::TraceStream;
use crate::jsoncodec::v2::SpanV2;

const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_SPAN_COUNT: usize = 1_000;
const UPLOAD_QUEUE_DEPTH: usize = 8;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Durations below one microsecond round to zero in the v2 wire format;
/// clamp so the downstream UI still draws the span.
const MIN_DURATION_NANOS: i64 = 1_000;

const EMPTY_NAME_PLACEHOLDER: &str = "(name empty)";

pub struct ZipkinSink {
    endpoint: String,
    client: reqwest::Client,
}

impl ZipkinSink {
    pub fn new(host: &str, port: u16) -> Result<ZipkinSink, reqwest::Error> {
        Ok(ZipkinSink {
            endpoint: format!("http://{host}:{port}/api/v2/spans"),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
        })
    }

    /// Consumes finished traces until the channel closes, then flushes what
    /// is still buffered.
    pub async fn run(self, mut traces: TraceStream) {
        let (upload_tx, upload_rx) = mpsc::channel::<Vec<SpanV2>>(UPLOAD_QUEUE_DEPTH);
        let uplink = tokio::spawn(upload_batches(self.client, self.endpoint, upload_rx));

        let mut ticker = interval(FLUSH_INTERVAL);
        let mut pending: Vec<SpanV2> = Vec::new();
        let mut last_flush = Instant::now();

        loop {
            let flush = tokio::select! {
                trace = traces.recv() => match trace {
                    Some(trace) => {
                        pending.extend(trace.iter().map(convert));
                        pending.len() >= FLUSH_SPAN_COUNT
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    // skip the periodic flush if a count-triggered one just
                    // went out
                    last_flush.elapsed() >= FLUSH_INTERVAL * 9 / 10
                }
            };

            if flush && !pending.is_empty() {
                match upload_tx.try_send(std::mem::take(&mut pending)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(batch)) => {
                        warn!(
                            spans = batch.len(),
                            "discarding spans, downstream upload would block"
                        );
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
                last_flush = Instant::now();
            }
        }

        if !pending.is_empty() {
            let _ = upload_tx.send(pending).await;
        }
        drop(upload_tx);
        let _ = uplink.await;
    }
}

async fn upload_batches(
    client: reqwest::Client,
    endpoint: String,
    mut batches: mpsc::Receiver<Vec<SpanV2>>,
) {
    while let Some(batch) = batches.recv().await {
        debug!(spans = batch.len(), "posting spans downstream");
        match client.post(&endpoint).json(&batch).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "downstream collector rejected spans");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "error posting spans to downstream collector");
            }
        }
    }
}

fn convert(span: &Span) -> SpanV2 {
    let mut span = span.clone();
    if span.duration < MIN_DURATION_NANOS {
        span.duration = MIN_DURATION_NANOS;
    }
    if span.name.is_empty() {
        span.name = Arc::from(EMPTY_NAME_PLACEHOLDER);
    }
    SpanV2::from_span(&span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zipkin_relay_core::{Id, Timestamp};

    #[test]
    fn test_convert_clamps_duration_and_name() {
        let mut span = Span::new(Arc::from(""), Id::new(1), Id::new(2), Id::UNKNOWN);
        span.timestamp = Timestamp::from_micros(10);
        span.duration = 0;

        let wire = convert(&span);
        let encoded = serde_json::to_string(&wire).unwrap();
        assert!(encoded.contains("\"duration\":1"));
        assert!(encoded.contains(EMPTY_NAME_PLACEHOLDER));
    }
}
