// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The optional shard hop: spans detour through a message bus partitioned by
//! trace id, so that all spans of one trace converge on the same proxy
//! instance no matter which instance received them.
//!
//! The bus client itself (brokers, credentials, topic management) is not our
//! business; this module defines the two contracts a client has to satisfy
//! and the tasks that move spans through them. An in-process loopback bus
//! implements both contracts for tests and single-instance deployments.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use zipkin_relay_core::codec;
use zipkin_relay_core::{InternCache, Span};

use crate::stats::{inc, PipelineStats};

/// Transport-level bus failure. Publishes are fire-and-forget: a failed span
/// is counted and lost, never retried, so one slow broker cannot stall the
/// ingestion path.
#[derive(Debug, thiserror::Error)]
#[error("bus transport error: {0}")]
pub struct BusError(pub String);

/// One message as it travels over the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// 8-byte little-endian trace id; the bus partitions by this key.
    pub key: Bytes,
    /// One binary-codec encoded span.
    pub payload: Bytes,
}

/// Producer half of the bus client contract.
#[async_trait]
pub trait SpanPublisher: Send + Sync {
    /// Publishes one encoded span, keyed by trace id, to the configured
    /// topic. No response is required; buffering and time-batching inside
    /// the client are fine since the bus preserves per-partition order.
    async fn publish(&self, key: [u8; 8], payload: Bytes) -> Result<(), BusError>;
}

/// Consumer half of the bus client contract. The client joins a fixed
/// consumer group and yields messages from whatever partitions it is
/// currently assigned; assignments may change across rebalances.
#[async_trait]
pub trait SpanReceiver: Send {
    /// Next message, or `None` once the subscription ends.
    async fn recv(&mut self) -> Option<BusMessage>;

    /// Acknowledges a message after it was delivered into the aggregator.
    async fn ack(&mut self, message: &BusMessage) -> Result<(), BusError>;
}

/// Drains the pipeline input, encodes each span and publishes it keyed by
/// trace id. Runs until the channel closes.
pub async fn run_producer(
    mut rx: mpsc::Receiver<Span>,
    publisher: Arc<dyn SpanPublisher>,
    stats: Arc<PipelineStats>,
) {
    let mut buf = Vec::with_capacity(512);

    while let Some(span) = rx.recv().await {
        buf.clear();
        codec::encode_span(&span, &mut buf);

        let key = span.trace.to_le_bytes();
        if let Err(err) = publisher.publish(key, Bytes::copy_from_slice(&buf)).await {
            inc(&stats.bus_publish_errors);
            warn!(trace_id = %span.trace, %err, "failed to publish span to the bus");
        }
    }

    debug!("shard producer stopped");
}

/// Consumes bus messages, decodes them and delivers the spans into the
/// aggregator's input channel. A message is acknowledged only after
/// delivery; undecodable messages are logged and skipped, never fatal.
pub async fn run_consumer(
    mut receiver: Box<dyn SpanReceiver>,
    tx: mpsc::Sender<Span>,
    cache: Arc<InternCache>,
    stats: Arc<PipelineStats>,
) {
    while let Some(message) = receiver.recv().await {
        let span = match codec::decode_span(&message.payload, &cache) {
            Ok(span) => span,
            Err(err) => {
                inc(&stats.bus_decode_errors);
                warn!(%err, "cannot decode bus message, skipping");
                continue;
            }
        };

        if tx.send(span).await.is_err() {
            // aggregator is gone, we are shutting down
            break;
        }

        if let Err(err) = receiver.ack(&message).await {
            warn!(%err, "failed to acknowledge bus message");
        }
    }

    debug!("shard consumer stopped");
}

/// In-process bus: a bounded channel wearing the publisher and receiver
/// contracts. Partitioning is trivial (there is one instance), but spans
/// still travel through the binary codec like they would on a real bus.
pub struct LoopbackBus;

impl LoopbackBus {
    pub fn new(capacity: usize) -> (LoopbackPublisher, LoopbackReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (LoopbackPublisher { tx }, LoopbackReceiver { rx })
    }
}

pub struct LoopbackPublisher {
    tx: mpsc::Sender<BusMessage>,
}

#[async_trait]
impl SpanPublisher for LoopbackPublisher {
    async fn publish(&self, key: [u8; 8], payload: Bytes) -> Result<(), BusError> {
        self.tx
            .send(BusMessage {
                key: Bytes::copy_from_slice(&key),
                payload,
            })
            .await
            .map_err(|_| BusError("loopback receiver dropped".to_string()))
    }
}

pub struct LoopbackReceiver {
    rx: mpsc::Receiver<BusMessage>,
}

#[async_trait]
impl SpanReceiver for LoopbackReceiver {
    async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    async fn ack(&mut self, _message: &BusMessage) -> Result<(), BusError> {
        Ok(())
    }
}
