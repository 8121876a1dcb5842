// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline counters (all values use relaxed atomics).
//!
//! Every drop decision in the pipeline bumps exactly one of these counters;
//! nothing is discarded silently. The aggregator logs a summary line at a
//! slow cadence.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Spans accepted into the input channel.
    pub spans_received: AtomicU64,
    /// Spans dropped for a zero trace or span id.
    pub spans_invalid: AtomicU64,
    /// Spans dropped because their trace id is blacklisted.
    pub spans_blacklisted: AtomicU64,

    /// Traces emitted to the fan-out.
    pub traces_finished: AtomicU64,
    /// Spans contained in emitted traces.
    pub spans_finished: AtomicU64,
    /// Traces discarded and blacklisted for exceeding the node cap.
    pub traces_too_large: AtomicU64,
    /// Traces discarded and blacklisted for exceeding the max age.
    pub traces_too_old: AtomicU64,
    /// Traces discarded because no unique root could be determined.
    pub traces_no_root: AtomicU64,
    /// Traces discarded by the global in-flight span cap.
    pub traces_evicted: AtomicU64,
    /// Spans discarded by the global in-flight span cap.
    pub spans_evicted: AtomicU64,

    /// Spans dropped by the caller-supplied transform.
    pub spans_rejected: AtomicU64,

    /// Ingestion bodies that failed to parse.
    pub parse_errors: AtomicU64,
    /// Bus publishes that failed (never retried).
    pub bus_publish_errors: AtomicU64,
    /// Bus messages skipped because they failed to decode.
    pub bus_decode_errors: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spans_received: self.spans_received.load(Ordering::Relaxed),
            spans_invalid: self.spans_invalid.load(Ordering::Relaxed),
            spans_blacklisted: self.spans_blacklisted.load(Ordering::Relaxed),
            traces_finished: self.traces_finished.load(Ordering::Relaxed),
            spans_finished: self.spans_finished.load(Ordering::Relaxed),
            traces_too_large: self.traces_too_large.load(Ordering::Relaxed),
            traces_too_old: self.traces_too_old.load(Ordering::Relaxed),
            traces_no_root: self.traces_no_root.load(Ordering::Relaxed),
            traces_evicted: self.traces_evicted.load(Ordering::Relaxed),
            spans_evicted: self.spans_evicted.load(Ordering::Relaxed),
            spans_rejected: self.spans_rejected.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            bus_publish_errors: self.bus_publish_errors.load(Ordering::Relaxed),
            bus_decode_errors: self.bus_decode_errors.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn add(counter: &AtomicU64, value: u64) {
    counter.fetch_add(value, Ordering::Relaxed);
}

/// Plain data representation of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub spans_received: u64,
    pub spans_invalid: u64,
    pub spans_blacklisted: u64,
    pub traces_finished: u64,
    pub spans_finished: u64,
    pub traces_too_large: u64,
    pub traces_too_old: u64,
    pub traces_no_root: u64,
    pub traces_evicted: u64,
    pub spans_evicted: u64,
    pub spans_rejected: u64,
    pub parse_errors: u64,
    pub bus_publish_errors: u64,
    pub bus_decode_errors: u64,
}
