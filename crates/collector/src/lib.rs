// Copyright (C) 2024-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{
    config::CollectorConfig,
    flow::{actor::FlowAssemblyActorHandle, assembler::FlowAssembler},
    sinks::{
        console::ConsoleSink,
        create_sink_channel,
        metrics::{BytesAccumulator, MetricsSink},
        storage::StorageSinkActorHandle,
        SinkFanout,
    },
    stats::{PipelineStats, SinkKind},
};
use futures_util::{stream::FuturesUnordered, StreamExt};
use homeflow_flow_pkt::TemplateStore;
use homeflow_flow_service::{flow_supervisor::FlowCollectorsSupervisorActorHandle, CollectorStats};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod config;
pub mod flow;
pub mod http;
pub mod sinks;
pub mod stats;

/// Extra time given to the storage sink on top of its request timeouts to
/// flush the last batch
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Upper bound for the sinks to stop. The storage sink may be waiting on an
/// insert when the shutdown starts, and its final flush is a second request.
fn drain_timeout(storage_timeout: Duration) -> Duration {
    storage_timeout * 2 + SHUTDOWN_GRACE
}

fn spawn_template_purge(store: TemplateStore, older_than: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(older_than);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let purged = store.purge_inactive(older_than);
            if !purged.is_empty() {
                info!(
                    "[TemplatePurge] Evicted templates of {} inactive exporters: {purged:?}",
                    purged.len()
                );
            }
        }
    })
}

/// Runs the collector until `shutdown` completes or a component stops on its
/// own.
///
/// Shutdown stops the socket actors first. Closing their subscription
/// channels cascades through flow assembly and the sinks, the storage sink
/// flushes its pending rows before it exits.
pub async fn init_flow_collection<S: Future<Output = ()>>(
    config: CollectorConfig,
    shutdown: S,
) -> anyhow::Result<()> {
    let store = TemplateStore::new();
    let decoder_stats = Arc::new(CollectorStats::new());
    let pipeline_stats = Arc::new(PipelineStats::new());
    let accumulator = BytesAccumulator::new();

    let supervisor_config = config
        .flow
        .supervisor_config(store.clone(), decoder_stats.clone());
    let (supervisor_join_handle, supervisor_handle) =
        FlowCollectorsSupervisorActorHandle::new(supervisor_config);

    let mut sink_handles: FuturesUnordered<JoinHandle<anyhow::Result<String>>> =
        FuturesUnordered::new();
    let mut fanout = SinkFanout::new(pipeline_stats.clone());
    if config.sinks.console.enabled {
        let (tx, rx) = create_sink_channel(config.sinks.buffer_size);
        let handle = ConsoleSink::spawn(rx);
        sink_handles.push(tokio::spawn(async move {
            handle.await??;
            Ok(SinkKind::Console.to_string())
        }));
        fanout = fanout.with_sink(SinkKind::Console, tx);
    }
    {
        let (tx, rx) = create_sink_channel(config.sinks.buffer_size);
        let handle = MetricsSink::spawn(rx, accumulator.clone());
        sink_handles.push(tokio::spawn(async move {
            handle.await?;
            Ok(SinkKind::Metrics.to_string())
        }));
        fanout = fanout.with_sink(SinkKind::Metrics, tx);
    }
    let storage_timeout = config
        .storage
        .as_ref()
        .map(|storage| storage.timeout)
        .unwrap_or_default();
    // Kept alive so the storage sink only stops once its flow channel closes
    let _storage_handle = match config.storage.clone() {
        Some(storage_config) => {
            let (tx, rx) = create_sink_channel(config.sinks.buffer_size);
            let (join_handle, handle) =
                StorageSinkActorHandle::new(storage_config, rx, pipeline_stats.clone())?;
            sink_handles.push(join_handle);
            fanout = fanout.with_sink(SinkKind::Storage, tx);
            Some(handle)
        }
        None => None,
    };

    let (flow_rx, _subscriptions) = supervisor_handle.subscribe(config.flow.buffer_size).await?;
    let assembler = FlowAssembler::new(config.flow.local_addresses.iter().copied());
    let (assembly_join_handle, _assembly_handle) =
        FlowAssemblyActorHandle::new(assembler, fanout, flow_rx, pipeline_stats.clone());

    let registry = Arc::new(http::metrics_registry(
        accumulator,
        decoder_stats,
        pipeline_stats,
    ));
    let mut metrics_handle = tokio::spawn(http::serve_metrics(config.metrics.clone(), registry));

    let purge_handle = config
        .flow
        .template_cache_purge_timeout
        .map(|older_than| spawn_template_purge(store, older_than));

    tokio::select! {
        _ = shutdown => {
            info!("Termination signal received, gracefully shutting down actors");
        }
        _ = supervisor_join_handle => {
            warn!("Flow collection is terminated, shutting down the collector");
        }
        ret = &mut metrics_handle => {
            match ret {
                Ok(Ok(())) => warn!("Metrics endpoint is terminated, shutting down the collector"),
                Ok(Err(err)) => error!("Metrics endpoint failed: {err}"),
                Err(err) => error!("Metrics endpoint panicked: {err}"),
            }
        }
    }

    if let Some(purge_handle) = purge_handle {
        purge_handle.abort();
    }
    if let Err(err) = supervisor_handle.shutdown().await {
        debug!("Flow supervisor is already stopped: {err}");
    }
    match assembly_join_handle.await {
        Ok(Ok(name)) => debug!("[{name}] stopped"),
        Ok(Err(err)) => error!("Flow assembly failed: {err}"),
        Err(err) => error!("Flow assembly panicked: {err}"),
    }

    let drain = async {
        while let Some(ret) = sink_handles.next().await {
            match ret {
                Ok(Ok(name)) => debug!("[{name}] sink stopped"),
                Ok(Err(err)) => error!("Sink failed: {err}"),
                Err(err) => error!("Sink panicked: {err}"),
            }
        }
    };
    if tokio::time::timeout(drain_timeout(storage_timeout), drain)
        .await
        .is_err()
    {
        warn!("Sinks did not stop in time, pending flows are lost");
    }
    metrics_handle.abort();
    Ok(())
}
