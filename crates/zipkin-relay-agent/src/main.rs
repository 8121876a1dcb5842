// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zipkin_relay_agent::aggregator::AggregatorConfig;
use zipkin_relay_agent::buffer::SpansBuffer;
use zipkin_relay_agent::config::Config;
use zipkin_relay_agent::pipeline::PipelineBuilder;
use zipkin_relay_agent::receiver::{self, ReceiverState};
use zipkin_relay_agent::shard::LoopbackBus;
use zipkin_relay_agent::sink::zipkin::ZipkinSink;
use zipkin_relay_agent::{logger, stats};

const SINK_CHANNEL_CAPACITY: usize = 512;
const RECENT_SPANS_CAPACITY: usize = 2_048;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            process::exit(1);
        }
    };

    logger::init(&config.log_level);

    if let Err(err) = run(config).await {
        tracing::error!("fatal: {err:#}");
        process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cache = Arc::new(zipkin_relay_core::InternCache::new(
        config.intern_cache_bytes,
    ));

    let mut builder = PipelineBuilder::new(
        AggregatorConfig {
            buffer_time: config.buffer_time,
            max_age: config.max_age,
            max_trace_nodes: config.max_trace_nodes,
            max_inflight_spans: config.max_inflight_spans,
        },
        cache.clone(),
    );

    if let Some(bus) = &config.bus {
        // the bus client itself lives outside this binary; library users
        // attach theirs via PipelineBuilder::bus. Standalone we fall back to
        // the in-process loopback, which shards correctly for one instance.
        warn!(
            topic = %bus.topic,
            group_id = %bus.group_id,
            "bus addresses configured, using in-process loopback; attach a real \
             bus client through the library API for multi-instance sharding"
        );
        let (publisher, bus_receiver) = LoopbackBus::new(1024);
        builder = builder.bus(Arc::new(publisher), Box::new(bus_receiver));
    }

    let mut sink_tasks: Vec<JoinHandle<()>> = Vec::new();

    if let Some(downstream) = &config.downstream {
        let sink = ZipkinSink::new(&downstream.host, downstream.port)
            .context("building downstream http client")?;
        let traces = builder.sink(SINK_CHANNEL_CAPACITY);
        sink_tasks.push(tokio::spawn(sink.run(traces)));
        info!(
            host = %downstream.host,
            port = downstream.port,
            "forwarding finished traces downstream"
        );
    } else {
        warn!("no downstream configured, finished traces are only buffered");
    }

    let recent_spans = Arc::new(SpansBuffer::new(RECENT_SPANS_CAPACITY));
    let traces = builder.sink(SINK_CHANNEL_CAPACITY);
    sink_tasks.push(tokio::spawn(recent_spans.clone().consume(traces)));

    let pipeline = builder.spawn();
    let handle = pipeline.handle();

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    info!(listen_addr = %config.listen_addr, "zipkin-relay starting");
    receiver::serve(
        config.listen_addr,
        ReceiverState {
            pipeline: handle,
            cache,
        },
        shutdown,
    )
    .await
    .context("http receiver failed")?;

    // the server is down; close the input so the aggregator flushes what it
    // has, then wait for the sinks to drain
    let final_stats: stats::StatsSnapshot = pipeline.handle().stats().snapshot();
    pipeline.shutdown().await;
    for task in sink_tasks {
        let _ = task.await;
    }

    info!(?final_stats, "clean shutdown");
    Ok(())
}
