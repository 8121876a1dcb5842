// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Core value types for the zipkin-relay trace proxy.
//!
//! This crate holds everything the pipeline crates share:
//! - [`Id`], [`Timestamp`] and the [`Span`]/[`Trace`] records
//! - the bounded LRU [`intern::InternCache`] used on the ingestion hot path
//! - the compact [`codec`] used to ship single spans across the shard bus

#![deny(clippy::all)]
#![deny(unreachable_pub)]

pub mod codec;
pub mod id;
pub mod intern;
pub mod span;
pub mod timestamp;
pub mod trace;

pub use id::Id;
pub use intern::InternCache;
pub use span::{Span, Timings};
pub use timestamp::Timestamp;
pub use trace::Trace;
