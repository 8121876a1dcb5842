// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The normalized span record flowing through the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::id::Id;
use crate::timestamp::Timestamp;

/// The four optional RPC timestamps of a span.
///
/// `cs`/`cr` (client send/receive) form the client half of an RPC, `sr`/`ss`
/// (server receive/send) the server half. Both halves share one span id and
/// are merged into a single record by the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timings {
    pub cs: Timestamp,
    pub cr: Timestamp,
    pub sr: Timestamp,
    pub ss: Timestamp,
}

impl Timings {
    /// An observation counts as server-side when it carries any server
    /// timestamp. Everything else is treated as a client observation.
    pub fn is_server(&self) -> bool {
        self.sr.is_valid() || self.ss.is_valid()
    }
}

/// One observation of a unit of work within a trace.
///
/// `name` and `service`, as well as tag keys and values, are interned
/// `Arc<str>` handles so that the many repeated short strings on the wire
/// share storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Span {
    pub id: Id,
    pub parent: Id,
    pub trace: Id,

    pub name: Arc<str>,
    pub service: Arc<str>,

    pub timestamp: Timestamp,
    /// Duration in nanoseconds.
    pub duration: i64,

    pub tags: HashMap<Arc<str>, Arc<str>>,
    pub timings: Timings,
}

impl Span {
    /// Creates a span with normalized parent: a span that is its own parent,
    /// or whose id equals the trace id, is a root and carries parent zero.
    pub fn new(name: Arc<str>, trace: Id, id: Id, parent: Id) -> Span {
        let mut span = Span {
            id,
            parent,
            trace,
            name,
            ..Span::default()
        };
        span.normalize();
        span
    }

    /// Clears the parent of a root span; see [`Span::new`]. Needed for spans
    /// that were built field by field, e.g. decoded from the shard bus.
    pub fn normalize(&mut self) {
        if self.parent == self.id || self.trace == self.id {
            self.parent = Id::UNKNOWN;
        }
    }

    pub fn has_parent(&self) -> bool {
        !self.parent.is_unknown()
    }

    /// End of the span interval, `timestamp + duration`.
    pub fn end(&self) -> Timestamp {
        self.timestamp.add_nanos(self.duration)
    }

    pub fn add_tag(&mut self, key: Arc<str>, value: Arc<str>) {
        self.tags.insert(key, value);
    }

    /// Merges a second observation of the same span into this record.
    ///
    /// The server observation is authoritative for service identity, the
    /// server timestamps and conflicting tags; the client observation is
    /// authoritative for its own timestamps and, where already present, for
    /// name, service and tags. In map terms: the server's entries win over
    /// the client's, regardless of arrival order.
    pub fn merge_from(&mut self, other: Span) {
        if !self.has_parent() && other.has_parent() {
            self.parent = other.parent;
        }

        if other.timings.is_server() {
            if !other.service.is_empty() {
                self.service = other.service;
            }
            if !other.name.is_empty() {
                self.name = other.name;
            }
            if other.timings.sr.is_valid() {
                self.timings.sr = other.timings.sr;
            }
            if other.timings.ss.is_valid() {
                self.timings.ss = other.timings.ss;
            }
            for (key, value) in other.tags {
                self.tags.insert(key, value);
            }
        } else {
            if self.service.is_empty() && !other.service.is_empty() {
                self.service = other.service;
            }
            if self.name.is_empty() && !other.name.is_empty() {
                self.name = other.name;
            }
            if other.timings.cs.is_valid() {
                self.timings.cs = other.timings.cs;
            }
            if other.timings.cr.is_valid() {
                self.timings.cr = other.timings.cr;
            }
            for (key, value) in other.tags {
                self.tags.entry(key).or_insert(value);
            }
        }
    }
}
