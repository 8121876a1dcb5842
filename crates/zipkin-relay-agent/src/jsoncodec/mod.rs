// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire decoders for the two JSON span formats accepted on ingestion.
//!
//! Both decoders produce normalized [`Span`] records with all strings routed
//! through the intern cache. Timestamps and durations arrive in microseconds
//! on the wire and are converted to nanoseconds here.

pub mod v1;
pub mod v2;

use serde::{Deserialize, Serialize};

pub use v1::parse_v1;
pub use v2::parse_v2;

/// The protocol each span came in with, recorded as a tag for debugging
/// mixed-format deployments.
pub(crate) const TAG_PROTOCOL_VERSION: &str = "protocolVersion";
pub(crate) const TAG_JSON_V1: &str = "json v1";
pub(crate) const TAG_JSON_V2: &str = "json v2";

/// Body-level parse failure; surfaced to the producer as HTTP 400.
#[derive(Debug, thiserror::Error)]
#[error("could not parse list of spans from json: {0}")]
pub struct ParseError(#[from] serde_json::Error);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Endpoint {
    #[serde(rename = "serviceName", default)]
    pub service_name: String,
}
