// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # zipkin-relay
//!
//! An ingestion proxy for distributed-tracing spans. It accepts zipkin v1
//! and v2 JSON spans over HTTP, reassembles the spans of each trace in
//! memory, merges the client and server halves of each RPC, repairs clock
//! skew between them, and forwards finished traces to downstream collectors.
//!
//! An optional shard hop routes spans through a message bus partitioned by
//! trace id, so that several proxy instances behind a load balancer still
//! reassemble each trace on exactly one instance.
//!
//! The moving parts, in pipeline order:
//! - [`receiver`]: the HTTP collector endpoints
//! - [`jsoncodec`]: the v1/v2 wire decoders
//! - [`shard`]: bus producer/consumer contracts and tasks
//! - [`aggregator`]: the single task owning all in-flight trace state
//! - [`correct`]: root determination and clock-skew correction
//! - [`pipeline`]: channel wiring, converter and fan-out
//! - [`sink`]: downstream adapters

#![deny(clippy::all)]
#![deny(unreachable_pub)]

pub mod aggregator;
pub mod buffer;
pub mod config;
pub mod correct;
pub mod jsoncodec;
pub mod logger;
pub mod pipeline;
pub mod receiver;
pub mod shard;
pub mod sink;
pub mod stats;
