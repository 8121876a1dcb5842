// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline wiring: input channel, aggregator task, converter + fan-out.
//!
//! Data flow, every arrow a bounded channel:
//!
//! ```text
//! ingest() ──> [shard producer ──> bus ──> shard consumer ──>] aggregator
//!          ──> fan-out workers (transform, then broadcast) ──> sinks
//! ```
//!
//! The shard detour only exists when a bus client is attached; otherwise
//! ingested spans go straight into the aggregator.

use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use zipkin_relay_core::{InternCache, Span};

use crate::aggregator::{AggregatorConfig, TraceAggregator};
use crate::shard::{self, SpanPublisher, SpanReceiver};
use crate::stats::{inc, PipelineStats};

/// Matches the original input buffer sizing; deep enough to ride out parse
/// bursts, small enough that backpressure reaches the HTTP layer quickly.
const INPUT_CHANNEL_CAPACITY: usize = 1024;
const OUTPUT_CHANNEL_CAPACITY: usize = 16;

/// Cores kept free of fan-out work for the aggregator and the HTTP layer.
const FANOUT_RESERVED_CORES: usize = 2;

/// Returned by a transform to drop a single span from a finished trace.
#[derive(Debug, thiserror::Error)]
#[error("transform rejected span: {0}")]
pub struct TransformRejected(pub String);

/// A caller-supplied per-span rewrite applied to every finished trace
/// before fan-out. First-class so that multiple pipelines in one process
/// can carry different transforms.
pub trait SpanTransform: Send + Sync + 'static {
    fn transform(&self, span: &mut Span) -> Result<(), TransformRejected>;
}

/// Forwards every span unchanged.
pub struct IdentityTransform;

impl SpanTransform for IdentityTransform {
    fn transform(&self, _span: &mut Span) -> Result<(), TransformRejected> {
        Ok(())
    }
}

/// The pipeline has shut down and no longer accepts spans.
#[derive(Debug, thiserror::Error)]
#[error("span pipeline is shut down")]
pub struct PipelineClosed;

/// Cheap cloneable entry point into the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Span>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Pushes spans into the pipeline's input channel, awaiting when the
    /// channel is full. The resulting backpressure is what caps memory use
    /// under producer bursts; the HTTP layer limits its own concurrency.
    pub async fn ingest<I>(&self, spans: I) -> Result<(), PipelineClosed>
    where
        I: IntoIterator<Item = Span>,
    {
        for span in spans {
            self.tx.send(span).await.map_err(|_| PipelineClosed)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

pub struct PipelineBuilder {
    config: AggregatorConfig,
    cache: Arc<InternCache>,
    transform: Arc<dyn SpanTransform>,
    sinks: Vec<mpsc::Sender<Arc<[Span]>>>,
    bus: Option<(Arc<dyn SpanPublisher>, Box<dyn SpanReceiver>)>,
    fanout_workers: usize,
}

impl PipelineBuilder {
    pub fn new(config: AggregatorConfig, cache: Arc<InternCache>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            cache,
            transform: Arc::new(IdentityTransform),
            sinks: Vec::new(),
            bus: None,
            fanout_workers: default_fanout_workers(),
        }
    }

    pub fn transform(mut self, transform: impl SpanTransform) -> PipelineBuilder {
        self.transform = Arc::new(transform);
        self
    }

    /// Registers a downstream sink and returns the channel it consumes
    /// finished traces from. Traces are shared across sinks and must not be
    /// mutated by them.
    pub fn sink(&mut self, capacity: usize) -> mpsc::Receiver<Arc<[Span]>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.sinks.push(tx);
        rx
    }

    /// Routes ingested spans through the shard bus instead of straight into
    /// the aggregator.
    pub fn bus(
        mut self,
        publisher: Arc<dyn SpanPublisher>,
        receiver: Box<dyn SpanReceiver>,
    ) -> PipelineBuilder {
        self.bus = Some((publisher, receiver));
        self
    }

    #[cfg(test)]
    fn fanout_workers(mut self, workers: usize) -> PipelineBuilder {
        self.fanout_workers = workers.max(1);
        self
    }

    /// Spawns the aggregator, fan-out workers and (if configured) the shard
    /// tasks, and returns the running pipeline.
    pub fn spawn(self) -> Pipeline {
        let stats = Arc::new(PipelineStats::default());
        let mut tasks = Vec::new();

        let (agg_tx, agg_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let aggregator = TraceAggregator::new(self.config, out_tx, stats.clone());
        tasks.push(tokio::spawn(aggregator.run(agg_rx)));

        let out_rx = Arc::new(Mutex::new(out_rx));
        for worker in 0..self.fanout_workers {
            tasks.push(tokio::spawn(fanout_worker(
                worker,
                out_rx.clone(),
                self.transform.clone(),
                self.sinks.clone(),
                stats.clone(),
            )));
        }

        let input_tx = match self.bus {
            Some((publisher, receiver)) => {
                let (bus_tx, bus_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
                tasks.push(tokio::spawn(shard::run_producer(
                    bus_rx,
                    publisher,
                    stats.clone(),
                )));
                tasks.push(tokio::spawn(shard::run_consumer(
                    receiver,
                    agg_tx,
                    self.cache.clone(),
                    stats.clone(),
                )));
                bus_tx
            }
            None => agg_tx,
        };

        Pipeline {
            handle: PipelineHandle {
                tx: input_tx,
                stats,
            },
            tasks,
        }
    }
}

pub struct Pipeline {
    handle: PipelineHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Closes the input and waits for the aggregator to flush its in-flight
    /// traces and for the fan-out to drain. Any other live [`PipelineHandle`]
    /// clones keep the input open until they are dropped.
    pub async fn shutdown(self) {
        drop(self.handle);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

fn default_fanout_workers() -> usize {
    thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(FANOUT_RESERVED_CORES + 1)
        .saturating_sub(FANOUT_RESERVED_CORES)
        .max(1)
}

/// Reads whole traces, applies the transform in place (reusing the slice),
/// drops rejected or id-less spans and broadcasts the result to every sink.
/// One trace at a time per worker keeps per-trace order intact downstream.
async fn fanout_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Vec<Span>>>>,
    transform: Arc<dyn SpanTransform>,
    sinks: Vec<mpsc::Sender<Arc<[Span]>>>,
    stats: Arc<PipelineStats>,
) {
    loop {
        let trace = rx.lock().await.recv().await;
        let Some(mut spans) = trace else {
            break;
        };

        spans.retain_mut(|span| {
            let rejected = transform.transform(span).is_err()
                || span.id.is_unknown()
                || span.trace.is_unknown();
            if rejected {
                inc(&stats.spans_rejected);
            }
            !rejected
        });
        if spans.is_empty() {
            continue;
        }

        let shared: Arc<[Span]> = spans.into();
        for sink in &sinks {
            // a closed sink channel means that sink is gone; the others
            // keep receiving
            let _ = sink.send(shared.clone()).await;
        }
    }

    debug!(worker, "fan-out worker stopped");
}
