// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A small ring of the most recently emitted spans, handy when debugging
//! what the proxy actually forwarded.

use std::sync::{Mutex, PoisonError};

use zipkin_relay_core::Span;

use crate::sink::TraceStream;

pub struct SpansBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    spans: Vec<Option<Span>>,
    position: usize,
}

impl SpansBuffer {
    pub fn new(capacity: usize) -> SpansBuffer {
        SpansBuffer {
            inner: Mutex::new(Inner {
                spans: vec![None; capacity.max(1)],
                position: 0,
            }),
        }
    }

    pub fn push(&self, span: Span) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let position = inner.position;
        inner.spans[position] = Some(span);
        inner.position = (position + 1) % inner.spans.len();
    }

    /// The buffered spans in ring order, oldest slots first.
    pub fn to_vec(&self) -> Vec<Span> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.spans.iter().flatten().cloned().collect()
    }

    /// Mirrors every span of every finished trace into the ring until the
    /// channel closes.
    pub async fn consume(self: std::sync::Arc<Self>, mut traces: TraceStream) {
        while let Some(trace) = traces.recv().await {
            for span in trace.iter() {
                self.push(span.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use zipkin_relay_core::Id;

    fn span(id: u64) -> Span {
        Span::new(Arc::from(""), Id::new(1), Id::new(id), Id::UNKNOWN)
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let buffer = SpansBuffer::new(3);
        for id in 1..=5 {
            buffer.push(span(id));
        }

        let ids: Vec<u64> = buffer
            .to_vec()
            .iter()
            .map(|span| span.id.value())
            .collect();
        // slots: 4 overwrote 1, 5 overwrote 2
        assert_eq!(ids, vec![4, 5, 3]);
    }

    #[test]
    fn test_partially_filled_ring() {
        let buffer = SpansBuffer::new(8);
        buffer.push(span(1));
        assert_eq!(buffer.to_vec().len(), 1);
    }
}
