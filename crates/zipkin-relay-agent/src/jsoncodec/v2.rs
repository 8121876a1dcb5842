// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The v2 JSON span format: explicit kind, timestamp and duration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use zipkin_relay_core::timestamp::NANOS_PER_MICRO;
use zipkin_relay_core::{Id, InternCache, Span, Timestamp};

use super::{Endpoint, ParseError, TAG_JSON_V2, TAG_PROTOCOL_VERSION};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SpanV2 {
    #[serde(rename = "traceId")]
    trace_id: Id,
    id: Id,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<Id>,

    #[serde(default)]
    name: String,

    #[serde(rename = "localEndpoint", default, skip_serializing_if = "Option::is_none")]
    local_endpoint: Option<Endpoint>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    tags: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    kind: String,

    /// Microseconds since the epoch.
    #[serde(default)]
    timestamp: i64,
    /// Microseconds.
    #[serde(default)]
    duration: i64,
}

/// Parses a v2 JSON array of spans into normalized records.
pub fn parse_v2(body: &[u8], cache: &InternCache) -> Result<Vec<Span>, ParseError> {
    let decoded: Vec<SpanV2> = serde_json::from_slice(body)?;
    Ok(decoded.into_iter().map(|span| to_span(span, cache)).collect())
}

fn to_span(wire: SpanV2, cache: &InternCache) -> Span {
    let mut span = Span::new(
        cache.intern(&wire.name),
        wire.trace_id,
        wire.id,
        wire.parent_id.unwrap_or_default(),
    );

    if let Some(endpoint) = &wire.local_endpoint {
        span.service = cache.intern(&endpoint.service_name);
    }

    for (key, value) in &wire.tags {
        span.add_tag(cache.intern(key), cache.intern(value));
    }
    span.add_tag(cache.intern(TAG_PROTOCOL_VERSION), cache.intern(TAG_JSON_V2));

    span.timestamp = Timestamp::from_micros(wire.timestamp);
    span.duration = wire.duration * NANOS_PER_MICRO;

    match wire.kind.as_str() {
        "CLIENT" => {
            span.timings.cs = span.timestamp;
            span.timings.cr = span.end();
        }
        "SERVER" => {
            span.timings.sr = span.timestamp;
            span.timings.ss = span.end();
        }
        _ => {}
    }

    span
}

impl SpanV2 {
    /// Wire representation of an already corrected span, for the downstream
    /// v2 sink. Merged spans carry both halves; the output keeps only the
    /// corrected timestamp and duration.
    pub(crate) fn from_span(span: &Span) -> SpanV2 {
        SpanV2 {
            trace_id: span.trace,
            id: span.id,
            parent_id: if span.has_parent() {
                Some(span.parent)
            } else {
                None
            },
            name: span.name.to_string(),
            local_endpoint: if span.service.is_empty() {
                None
            } else {
                Some(Endpoint {
                    service_name: span.service.to_string(),
                })
            },
            tags: span
                .tags
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            kind: String::new(),
            timestamp: span.timestamp.as_micros(),
            duration: span.duration / NANOS_PER_MICRO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v2_client_kind() {
        let cache = InternCache::new(64 * 1024);
        let body = r#"[{
            "traceId": "beaf",
            "id": "dead",
            "parentId": "77",
            "name": "get /users",
            "kind": "CLIENT",
            "timestamp": 1000,
            "duration": 500,
            "localEndpoint": {"serviceName": "frontend"},
            "tags": {"http.method": "GET"}
        }]"#;

        let spans = parse_v2(body.as_bytes(), &cache).unwrap();
        assert_eq!(spans.len(), 1);

        let span = &spans[0];
        assert_eq!(span.id, Id::new(0xdead));
        assert_eq!(span.parent, Id::new(0x77));
        assert_eq!(&*span.service, "frontend");
        assert_eq!(span.timestamp, Timestamp::from_micros(1000));
        assert_eq!(span.duration, 500_000);
        assert_eq!(span.timings.cs, Timestamp::from_micros(1000));
        assert_eq!(span.timings.cr, Timestamp::from_micros(1500));
        assert!(!span.timings.is_server());
        assert_eq!(&*span.tags["http.method"], "GET");
        assert_eq!(&*span.tags[TAG_PROTOCOL_VERSION], TAG_JSON_V2);
    }

    #[test]
    fn test_parse_v2_server_kind() {
        let cache = InternCache::new(64 * 1024);
        let body = r#"[{
            "traceId": "1", "id": "2",
            "kind": "SERVER", "timestamp": 2000, "duration": 100
        }]"#;

        let spans = parse_v2(body.as_bytes(), &cache).unwrap();
        let span = &spans[0];
        assert_eq!(span.timings.sr, Timestamp::from_micros(2000));
        assert_eq!(span.timings.ss, Timestamp::from_micros(2100));
        assert!(span.timings.is_server());
    }

    #[test]
    fn test_parse_v2_no_kind_has_no_timings() {
        let cache = InternCache::new(64 * 1024);
        let body = r#"[{"traceId": "1", "id": "2", "timestamp": 2000, "duration": 100}]"#;
        let spans = parse_v2(body.as_bytes(), &cache).unwrap();
        assert_eq!(spans[0].timings, Default::default());
    }

    #[test]
    fn test_root_span_with_trace_id_as_id_has_no_parent() {
        let cache = InternCache::new(64 * 1024);
        let body = r#"[{"traceId": "2", "id": "2", "parentId": "9"}]"#;
        let spans = parse_v2(body.as_bytes(), &cache).unwrap();
        assert!(!spans[0].has_parent());
    }

    #[test]
    fn test_from_span_round_trips_ids() {
        let cache = InternCache::new(64 * 1024);
        let mut span = Span::new(
            cache.intern("op"),
            Id::new(0xbeaf),
            Id::new(0xdead),
            Id::new(0x77),
        );
        span.service = cache.intern("svc");
        span.timestamp = Timestamp::from_micros(12);
        span.duration = 34 * NANOS_PER_MICRO;

        let wire = SpanV2::from_span(&span);
        let encoded = serde_json::to_string(&wire).unwrap();
        assert!(encoded.contains("\"000000000000dead\""));
        assert!(encoded.contains("\"timestamp\":12"));
        assert!(encoded.contains("\"duration\":34"));
    }
}
