// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The trace aggregator: the single task that owns all in-flight state.
//!
//! Spans arrive one at a time on the input channel and are merged into
//! partially assembled [`Trace`]s. A ~100ms ticker drives completion: a
//! trace is finished once it has been idle for `buffer_time`, has lived past
//! `max_age`, or has grown beyond `max_trace_nodes`. Finished traces get a
//! root determined and their clock skew corrected, then leave on the output
//! channel as a slice sorted by span id.
//!
//! Nothing here returns errors; every failure is a drop-with-counter
//! decision (the producers already got their HTTP response long ago).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use zipkin_relay_core::{Id, Span, Trace};

use crate::correct;
use crate::stats::{add, inc, PipelineStats};

pub(crate) const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Traces classified as faulty keep their id around so that late spans are
/// dropped at the entry; the set is bounded and sheds arbitrary entries.
const BLACKLIST_CAPACITY: usize = 1024;

/// Log a pipeline summary roughly once a minute.
const SUMMARY_EVERY_TICKS: u64 = 600;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Idle interval after which a trace is considered complete.
    pub buffer_time: Duration,
    /// Absolute upper bound on trace lifetime in memory.
    pub max_age: Duration,
    /// Node count beyond which a trace is discarded and blacklisted.
    pub max_trace_nodes: usize,
    /// Global in-flight span cap; exceeding it discards the largest traces.
    pub max_inflight_spans: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let buffer_time = Duration::from_secs(10);
        AggregatorConfig {
            buffer_time,
            max_age: buffer_time * 5,
            max_trace_nodes: 8_192,
            max_inflight_spans: 100_000,
        }
    }
}

pub struct TraceAggregator {
    config: AggregatorConfig,
    traces: HashMap<Id, Trace>,
    blacklist: Blacklist,
    inflight_spans: usize,
    output: mpsc::Sender<Vec<Span>>,
    stats: Arc<PipelineStats>,
}

impl TraceAggregator {
    pub fn new(
        config: AggregatorConfig,
        output: mpsc::Sender<Vec<Span>>,
        stats: Arc<PipelineStats>,
    ) -> TraceAggregator {
        TraceAggregator {
            config,
            traces: HashMap::new(),
            blacklist: Blacklist::new(BLACKLIST_CAPACITY),
            inflight_spans: 0,
            output,
            stats,
        }
    }

    /// Runs until the input channel closes, then flushes what is left with
    /// the normal completion rules (no extra grace period) and drops the
    /// output channel.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Span>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                span = rx.recv() => match span {
                    Some(span) => self.insert(span, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush(Instant::now()).await;

                    ticks += 1;
                    if ticks % SUMMARY_EVERY_TICKS == 0 {
                        debug!(
                            in_flight_traces = self.traces.len(),
                            in_flight_spans = self.inflight_spans,
                            stats = ?self.stats.snapshot(),
                            "aggregator summary"
                        );
                    }
                }
            }
        }

        debug!(
            in_flight_traces = self.traces.len(),
            "input channel closed, flushing remaining traces"
        );
        self.flush_all().await;
    }

    fn insert(&mut self, mut span: Span, now: Instant) {
        inc(&self.stats.spans_received);

        if span.trace.is_unknown() || span.id.is_unknown() {
            inc(&self.stats.spans_invalid);
            return;
        }

        if self.blacklist.contains(span.trace) {
            inc(&self.stats.spans_blacklisted);
            return;
        }

        // spans arriving via the shard bus skipped the decoder-side
        // normalization
        span.normalize();

        let trace = self
            .traces
            .entry(span.trace)
            .or_insert_with(|| Trace::new(now));
        if trace.insert(span, now) {
            self.inflight_spans += 1;
        }

        if self.inflight_spans > self.config.max_inflight_spans {
            self.shed_largest_traces();
        }
    }

    /// Discards the largest in-flight traces until the global span count is
    /// back under the cap.
    fn shed_largest_traces(&mut self) {
        let mut sizes: Vec<(Id, usize)> = self
            .traces
            .iter()
            .map(|(id, trace)| (*id, trace.node_count()))
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1));

        for (trace_id, node_count) in sizes {
            if self.inflight_spans <= self.config.max_inflight_spans {
                break;
            }
            self.traces.remove(&trace_id);
            self.inflight_spans -= node_count;
            inc(&self.stats.traces_evicted);
            add(&self.stats.spans_evicted, node_count as u64);
            warn!(%trace_id, node_count, "span cap exceeded, discarding trace");
        }
    }

    async fn flush(&mut self, now: Instant) {
        let mut finished: Vec<Id> = Vec::new();
        for (trace_id, trace) in &self.traces {
            let too_large = trace.node_count() > self.config.max_trace_nodes;
            let too_old = now.duration_since(trace.started()) > self.config.max_age;
            let idle = now.duration_since(trace.updated()) > self.config.buffer_time;
            if too_large || too_old || idle {
                finished.push(*trace_id);
            }
        }

        for trace_id in finished {
            if let Some(trace) = self.traces.remove(&trace_id) {
                let too_old = now.duration_since(trace.started()) > self.config.max_age;
                self.finish(trace_id, trace, too_old).await;
            }
        }
    }

    async fn flush_all(&mut self) {
        let now = Instant::now();
        let remaining: Vec<Id> = self.traces.keys().copied().collect();
        for trace_id in remaining {
            if let Some(trace) = self.traces.remove(&trace_id) {
                let too_old = now.duration_since(trace.started()) > self.config.max_age;
                self.finish(trace_id, trace, too_old).await;
            }
        }
    }

    async fn finish(&mut self, trace_id: Id, trace: Trace, too_old: bool) {
        let node_count = trace.node_count();
        self.inflight_spans -= node_count;

        if node_count > self.config.max_trace_nodes {
            self.blacklist.insert(trace_id);
            inc(&self.stats.traces_too_large);
            warn!(%trace_id, node_count, "trace is too large, blacklisting");
            return;
        }

        if too_old {
            self.blacklist.insert(trace_id);
            inc(&self.stats.traces_too_old);
            debug!(%trace_id, node_count, "trace exceeded max age, blacklisting");
            return;
        }

        let mut spans = trace.into_spans();
        match correct::determine_root(&mut spans) {
            Some(root_idx) => {
                correct::correct_timings(&mut spans, root_idx, 0);

                inc(&self.stats.traces_finished);
                add(&self.stats.spans_finished, spans.len() as u64);
                debug!(%trace_id, spans = spans.len(), "trace finished");

                // a closed output channel means the fan-out is gone and we
                // are shutting down; the trace is lost either way
                let _ = self.output.send(spans).await;
            }
            None => {
                // not blacklisted: a later burst of spans for this trace id
                // may still assemble into something usable
                inc(&self.stats.traces_no_root);
                debug!(%trace_id, node_count, "no unique root, dropping trace");
            }
        }
    }
}

struct Blacklist {
    set: HashSet<Id>,
    capacity: usize,
}

impl Blacklist {
    fn new(capacity: usize) -> Blacklist {
        Blacklist {
            set: HashSet::new(),
            capacity,
        }
    }

    fn contains(&self, trace_id: Id) -> bool {
        self.set.contains(&trace_id)
    }

    fn insert(&mut self, trace_id: Id) {
        if self.set.len() >= self.capacity {
            if let Some(victim) = self.set.iter().next().copied() {
                self.set.remove(&victim);
            }
        }
        self.set.insert(trace_id);
    }
}
