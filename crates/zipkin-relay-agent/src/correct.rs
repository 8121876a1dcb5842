// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Root determination and clock-skew correction for a finished trace.
//!
//! The server half of an RPC is recorded on a machine whose wall clock may
//! be arbitrarily off from the caller's. Walking the tree from the root, each
//! span with complete client+server timings tells us the offset between the
//! two clocks: the midpoints of the `[cs, cr]` and `[sr, ss]` intervals
//! describe the same instant, so any difference is clock skew. The offset is
//! accumulated down the tree and re-expresses every server-side timestamp in
//! the root's clock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use zipkin_relay_core::span::Timings;
use zipkin_relay_core::{Id, Span, Timestamp};

const FAKE_ROOT_NAME: &str = "fake-root";

/// Determines the unique root of `spans`, which must be sorted by span id.
///
/// A candidate is any span without a parent, or whose parent is not present
/// in the trace. When several candidates share one known parent the trace
/// lost its real root (e.g. the root span was sampled away); a synthetic
/// root spanning all candidates is inserted in its place. Returns the index
/// of the root, or `None` when no unique root can be established.
pub fn determine_root(spans: &mut Vec<Span>) -> Option<usize> {
    let mut candidates = root_candidates(spans);

    if candidates.len() > 1 {
        let shared = spans[candidates[0]].parent;
        if shared.is_unknown()
            || candidates[1..].iter().any(|&idx| spans[idx].parent != shared)
        {
            return None;
        }

        let fake = fake_root(spans, &candidates, shared);
        // the shared parent id is absent from the trace, so this always
        // lands in an empty slot
        if let Err(idx) = spans.binary_search_by_key(&fake.id, |span| span.id) {
            spans.insert(idx, fake);
        }
        candidates = root_candidates(spans);
    }

    match candidates[..] {
        [root] => Some(root),
        _ => None,
    }
}

fn root_candidates(spans: &[Span]) -> Vec<usize> {
    let ids: HashSet<Id> = spans.iter().map(|span| span.id).collect();

    spans
        .iter()
        .enumerate()
        .filter(|(_, span)| !span.has_parent() || !ids.contains(&span.parent))
        .map(|(idx, _)| idx)
        .collect()
}

fn fake_root(spans: &[Span], candidates: &[usize], id: Id) -> Span {
    let start = candidates
        .iter()
        .map(|&idx| spans[idx].timestamp)
        .min()
        .unwrap_or(Timestamp::UNSET);
    let end = candidates
        .iter()
        .map(|&idx| spans[idx].end())
        .max()
        .unwrap_or(Timestamp::UNSET);

    let mut root = Span::new(
        Arc::from(FAKE_ROOT_NAME),
        spans[candidates[0]].trace,
        id,
        Id::UNKNOWN,
    );
    root.timestamp = start;
    root.duration = end.as_nanos() - start.as_nanos();
    root
}

/// Walks the tree from the root and applies the accumulated clock offset to
/// every span, recomputing timestamps and durations from the client's view
/// where both halves of an RPC are known.
pub fn correct_timings(spans: &mut [Span], root_idx: usize, base_offset: i64) {
    // children by parent id; the root is never anybody's child, even when it
    // carries a parent id of its own
    let mut children: HashMap<Id, Vec<usize>> = HashMap::new();
    for (idx, span) in spans.iter().enumerate() {
        if idx != root_idx {
            children.entry(span.parent).or_default().push(idx);
        }
    }

    let mut pending = vec![(root_idx, base_offset)];
    while let Some((idx, offset)) = pending.pop() {
        let child_offset = adjust_node(&mut spans[idx], offset);
        if let Some(kids) = children.get(&spans[idx].id) {
            for &kid in kids {
                pending.push((kid, child_offset));
            }
        }
    }
}

/// Shifts one node into the root's clock and returns the offset its children
/// inherit. Mutating the node before descending is required: the children's
/// offset is derived from the node's own timings.
fn adjust_node(node: &mut Span, offset: i64) -> i64 {
    if offset != 0 && node.timestamp.is_valid() {
        node.timestamp = node.timestamp.add_nanos(offset);
    }

    let Timings { cs, cr, sr, ss } = node.timings;

    //        _________________________
    //       |_cs________|_____________| cr
    //                   |
    //                   |--| <- (sr+ss)/2 - (cs+cr)/2. If the server's
    //                      |    clock runs ahead of the client's, this
    //                      |    difference is positive and has to be
    //                      |    subtracted from everything the server
    //            __________|__________  reported.
    //           |_sr_______|__________| ss
    if cs.is_valid() && cr.is_valid() && sr.is_valid() && ss.is_valid() {
        let screw = (sr.as_nanos() + ss.as_nanos()) / 2 - (cs.as_nanos() + cr.as_nanos()) / 2;

        node.timestamp = Timestamp(cs.as_nanos() + offset);
        node.duration = cr.as_nanos() - cs.as_nanos();

        offset - screw
    } else if cs.is_valid() && sr.is_valid() {
        // no complete server interval; sr happened some time after cs, the
        // difference bounds the skew
        node.timestamp = Timestamp(cs.as_nanos() + offset);

        offset - (sr.as_nanos() - cs.as_nanos())
    } else {
        offset
    }
}
