// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Proxy configuration, read from `RELAY_*` environment variables.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9411";
const DEFAULT_BUFFER_TIME_MS: u64 = 10_000;
const DEFAULT_MAX_TRACE_NODES: usize = 8_192;
const DEFAULT_MAX_INFLIGHT_SPANS: usize = 100_000;
const DEFAULT_INTERN_CACHE_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_BUS_TOPIC: &str = "zipkin-spans";
const DEFAULT_BUS_GROUP_ID: &str = "zipkin-relay";

/// Startup configuration error. Any of these makes the process exit
/// non-zero before the pipeline starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} requires RELAY_DOWNSTREAM_HOST to be set")]
    MissingDownstreamHost(&'static str),
}

/// Sharding hop settings; present only when bus addresses are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub addresses: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

/// Downstream sink destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,

    /// Idle interval after which a trace is considered complete.
    pub buffer_time: Duration,
    /// Absolute upper bound on trace lifetime in memory.
    pub max_age: Duration,
    /// Per-trace node count beyond which the trace is blacklisted.
    pub max_trace_nodes: usize,
    /// Global span cap triggering largest-trace eviction.
    pub max_inflight_spans: usize,

    pub intern_cache_bytes: usize,

    pub bus: Option<BusConfig>,
    pub downstream: Option<DownstreamConfig>,

    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let listen_addr = parse_var("RELAY_LISTEN_ADDR", DEFAULT_LISTEN_ADDR.parse().ok())?;

        let buffer_time_ms: u64 = parse_var("RELAY_BUFFER_TIME_MS", Some(DEFAULT_BUFFER_TIME_MS))?;
        let buffer_time = Duration::from_millis(buffer_time_ms);
        // the default max age keeps a straggling trace around for five buffer
        // windows before it is forcibly aged out
        let max_age =
            Duration::from_millis(parse_var("RELAY_MAX_AGE_MS", Some(buffer_time_ms * 5))?);

        let max_trace_nodes = parse_var("RELAY_MAX_TRACE_NODES", Some(DEFAULT_MAX_TRACE_NODES))?;
        let max_inflight_spans =
            parse_var("RELAY_MAX_INFLIGHT_SPANS", Some(DEFAULT_MAX_INFLIGHT_SPANS))?;
        let intern_cache_bytes =
            parse_var("RELAY_INTERN_CACHE_BYTES", Some(DEFAULT_INTERN_CACHE_BYTES))?;

        let bus = match env::var("RELAY_BUS_ADDRESSES") {
            Ok(addresses) if !addresses.trim().is_empty() => Some(BusConfig {
                addresses: addresses
                    .split(',')
                    .map(|addr| addr.trim().to_string())
                    .filter(|addr| !addr.is_empty())
                    .collect(),
                topic: env::var("RELAY_BUS_TOPIC")
                    .unwrap_or_else(|_| DEFAULT_BUS_TOPIC.to_string()),
                group_id: env::var("RELAY_BUS_GROUP_ID")
                    .unwrap_or_else(|_| DEFAULT_BUS_GROUP_ID.to_string()),
            }),
            _ => None,
        };

        let downstream = match env::var("RELAY_DOWNSTREAM_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(DownstreamConfig {
                host: host.trim().to_string(),
                port: parse_var("RELAY_DOWNSTREAM_PORT", Some(9411))?,
            }),
            _ => {
                if env::var("RELAY_DOWNSTREAM_PORT").is_ok() {
                    return Err(ConfigError::MissingDownstreamHost("RELAY_DOWNSTREAM_PORT"));
                }
                None
            }
        };

        let log_level = env::var("RELAY_LOG_LEVEL")
            .map(|level| level.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        Ok(Config {
            listen_addr,
            buffer_time,
            max_age,
            max_trace_nodes,
            max_inflight_spans,
            intern_cache_bytes,
            bus,
            downstream,
            log_level,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: raw,
        }),
        Err(_) => default.ok_or(ConfigError::InvalidValue {
            name,
            value: String::new(),
        }),
    }
}
