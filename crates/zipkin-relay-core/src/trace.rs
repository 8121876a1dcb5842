// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A partially assembled trace: the spans of one trace id, sorted by span id.

use std::time::Instant;

use crate::id::Id;
use crate::span::Span;

/// The spans collected so far for one trace id.
///
/// Invariants maintained by [`Trace::insert`]:
/// - the slice is sorted by ascending span id and holds at most one record
///   per span id (second arrivals are merged in place)
/// - `started` is the arrival time of the first span, `updated` of the most
///   recent one
#[derive(Debug)]
pub struct Trace {
    spans: Vec<Span>,
    started: Instant,
    updated: Instant,
}

impl Trace {
    pub fn new(now: Instant) -> Trace {
        Trace {
            spans: Vec::new(),
            started: now,
            updated: now,
        }
    }

    /// Inserts a span, merging it into an existing record with the same id.
    /// Returns true when the span id was not seen before.
    pub fn insert(&mut self, span: Span, now: Instant) -> bool {
        self.updated = now;

        match self.spans.binary_search_by_key(&span.id, |s| s.id) {
            Ok(idx) => {
                self.spans[idx].merge_from(span);
                false
            }
            Err(idx) => {
                self.spans.insert(idx, span);
                true
            }
        }
    }

    pub fn get(&self, id: Id) -> Option<&Span> {
        self.spans
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|idx| &self.spans[idx])
    }

    /// Number of distinct span ids in this trace.
    pub fn node_count(&self) -> usize {
        self.spans.len()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn updated(&self) -> Instant {
        self.updated
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn into_spans(self) -> Vec<Span> {
        self.spans
    }
}
