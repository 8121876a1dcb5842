// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Downstream sink adapters.
//!
//! A sink registers a channel with the pipeline (see
//! [`crate::pipeline::PipelineBuilder::sink`]) and consumes finished traces
//! from it: shared, corrected, sorted-by-span-id slices it must not mutate.
//! Each adapter owns its downstream format and its batching cadence; it just
//! has to keep consuming, since a stalled sink eventually backpressures the
//! whole pipeline.

pub mod zipkin;

use std::sync::Arc;

use tokio::sync::mpsc;

use zipkin_relay_core::Span;

/// What a sink consumes: finished traces as shared read-only slices.
pub type TraceStream = mpsc::Receiver<Arc<[Span]>>;
