// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The v1 JSON span format: client/server annotation pairs per span.

use serde::Deserialize;
use serde_json::Value;

use zipkin_relay_core::timestamp::NANOS_PER_MICRO;
use zipkin_relay_core::{Id, InternCache, Span, Timestamp};

use super::{Endpoint, ParseError, TAG_JSON_V1, TAG_PROTOCOL_VERSION};

const FALLBACK_DURATION_NANOS: i64 = 1_000_000;

#[derive(Debug, Deserialize)]
struct SpanV1 {
    #[serde(rename = "traceId")]
    trace_id: Id,
    id: Id,
    #[serde(rename = "parentId", default)]
    parent_id: Option<Id>,

    #[serde(default)]
    annotations: Vec<AnnotationV1>,
    #[serde(rename = "binaryAnnotations", default)]
    binary_annotations: Vec<BinaryAnnotationV1>,

    #[serde(default)]
    name: String,

    /// Microseconds since the epoch.
    #[serde(default)]
    timestamp: Option<i64>,
    /// Microseconds.
    #[serde(default)]
    duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AnnotationV1 {
    timestamp: i64,
    value: String,
    #[serde(default)]
    endpoint: Option<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct BinaryAnnotationV1 {
    key: String,
    value: Value,
    #[serde(default)]
    endpoint: Option<Endpoint>,
}

/// Parses a v1 JSON array of spans into normalized records.
pub fn parse_v1(body: &[u8], cache: &InternCache) -> Result<Vec<Span>, ParseError> {
    let decoded: Vec<SpanV1> = serde_json::from_slice(body)?;
    Ok(decoded.into_iter().map(|span| to_span(span, cache)).collect())
}

fn to_span(wire: SpanV1, cache: &InternCache) -> Span {
    let mut span = Span::new(
        cache.intern(&wire.name),
        wire.trace_id,
        wire.id,
        wire.parent_id.unwrap_or_default(),
    );

    for annotation in &wire.annotations {
        let timestamp = Timestamp::from_micros(annotation.timestamp);
        match annotation.value.as_str() {
            "cs" => span.timings.cs = timestamp,
            "cr" => span.timings.cr = timestamp,
            "sr" => span.timings.sr = timestamp,
            "ss" => span.timings.ss = timestamp,
            _ => {}
        }

        if span.service.is_empty() {
            if let Some(endpoint) = &annotation.endpoint {
                span.service = cache.intern(&endpoint.service_name);
            }
        }
    }

    for annotation in &wire.binary_annotations {
        span.add_tag(
            cache.intern(&annotation.key),
            cache.intern(&stringify(&annotation.value)),
        );

        if span.service.is_empty() {
            if let Some(endpoint) = &annotation.endpoint {
                span.service = cache.intern(&endpoint.service_name);
            }
        }
    }

    span.add_tag(cache.intern(TAG_PROTOCOL_VERSION), cache.intern(TAG_JSON_V1));

    if let Some(timestamp) = wire.timestamp {
        span.timestamp = Timestamp::from_micros(timestamp);
    }
    if let Some(duration) = wire.duration {
        span.duration = duration * NANOS_PER_MICRO;
    }

    fill_in_timestamp(&mut span);

    span
}

/// The annotation pairs are more trustworthy than the top level timestamp
/// and duration fields, which some tracer libraries omit or misreport.
fn fill_in_timestamp(span: &mut Span) {
    let timings = span.timings;

    if timings.sr.is_valid() && timings.ss.is_valid() {
        span.timestamp = timings.sr;
        span.duration = timings.ss.as_nanos() - timings.sr.as_nanos();
    }

    if timings.cs.is_valid() && timings.cr.is_valid() {
        span.timestamp = timings.cs;
        span.duration = timings.cr.as_nanos() - timings.cs.as_nanos();
    }

    if span.duration == 0 {
        span.duration = FALLBACK_DURATION_NANOS;
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODED: &str = r#"[
        {
            "traceId": "beaf",
            "id": "dead",
            "parentId": "beaf",

            "name": "span name",

            "timestamp": 1560276900000000,
            "duration": 50000,

            "annotations": [
                {
                    "timestamp": 1560276970000000,
                    "value": "cs",
                    "endpoint": {"serviceName": "my-service"}
                },
                {
                    "timestamp": 1560276971000000,
                    "value": "cr",
                    "endpoint": {"serviceName": "my-service"}
                }
            ],

            "binaryAnnotations": [
                {"key": "http.path", "value": "/my/path"},
                {"key": "http.status", "value": 404}
            ]
        }
    ]"#;

    #[test]
    fn test_parse_v1() {
        let cache = InternCache::new(64 * 1024);
        let spans = parse_v1(ENCODED.as_bytes(), &cache).unwrap();
        assert_eq!(spans.len(), 1);

        let span = &spans[0];
        assert_eq!(span.id, Id::new(0xdead));
        assert_eq!(span.trace, Id::new(0xbeaf));
        assert_eq!(span.parent, Id::new(0xbeaf));
        assert_eq!(&*span.name, "span name");
        assert_eq!(&*span.service, "my-service");

        // timestamp and duration come from the cs/cr pair, not the top level
        assert_eq!(span.timestamp, Timestamp::from_micros(1_560_276_970_000_000));
        assert_eq!(span.duration, 1_000_000_000);

        assert_eq!(span.timings.cs, Timestamp::from_micros(1_560_276_970_000_000));
        assert_eq!(span.timings.cr, Timestamp::from_micros(1_560_276_971_000_000));
        assert!(!span.timings.sr.is_valid());

        assert_eq!(&*span.tags["http.path"], "/my/path");
        assert_eq!(&*span.tags["http.status"], "404");
        assert_eq!(&*span.tags[TAG_PROTOCOL_VERSION], TAG_JSON_V1);
    }

    #[test]
    fn test_parse_v1_server_annotations_fill_timestamp() {
        let cache = InternCache::new(64 * 1024);
        let body = r#"[{
            "traceId": "1", "id": "2",
            "annotations": [
                {"timestamp": 1000, "value": "sr", "endpoint": {"serviceName": "srv"}},
                {"timestamp": 3000, "value": "ss"}
            ]
        }]"#;

        let spans = parse_v1(body.as_bytes(), &cache).unwrap();
        let span = &spans[0];
        assert_eq!(span.timestamp, Timestamp::from_micros(1000));
        assert_eq!(span.duration, 2_000_000);
        assert_eq!(&*span.service, "srv");
    }

    #[test]
    fn test_parse_v1_duration_falls_back_to_one_milli() {
        let cache = InternCache::new(64 * 1024);
        let body = r#"[{"traceId": "1", "id": "2", "timestamp": 5}]"#;
        let spans = parse_v1(body.as_bytes(), &cache).unwrap();
        assert_eq!(spans[0].duration, FALLBACK_DURATION_NANOS);
    }

    #[test]
    fn test_parse_v1_rejects_malformed_body() {
        let cache = InternCache::new(64 * 1024);
        assert!(parse_v1(b"{\"not\": \"a list\"}", &cache).is_err());
        assert!(parse_v1(b"[{\"traceId\": \"xyz\", \"id\": \"1\"}]", &cache).is_err());
    }
}
