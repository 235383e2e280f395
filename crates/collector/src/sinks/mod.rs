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

//! Consumers of assembled flows.
//!
//! Each sink runs as its own task fed by a bounded channel. [SinkFanout]
//! never waits on a sink: a full queue drops the flow for that sink only.

pub mod console;
pub mod metrics;
pub mod storage;

use crate::{flow::Flow, stats::PipelineStats, stats::SinkKind};
use std::sync::Arc;
use tracing::warn;

pub type FlowSinkSender = async_channel::Sender<Arc<Flow>>;
pub type FlowSinkReceiver = async_channel::Receiver<Arc<Flow>>;

pub fn create_sink_channel(buffer_size: usize) -> (FlowSinkSender, FlowSinkReceiver) {
    async_channel::bounded(buffer_size)
}

#[derive(Debug)]
pub struct SinkFanout {
    sinks: Vec<(SinkKind, FlowSinkSender)>,
    stats: Arc<PipelineStats>,
}

impl SinkFanout {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        Self {
            sinks: Vec::new(),
            stats,
        }
    }

    pub fn with_sink(mut self, kind: SinkKind, tx: FlowSinkSender) -> Self {
        self.sinks.push((kind, tx));
        self
    }

    pub fn sinks(&self) -> impl Iterator<Item = SinkKind> + '_ {
        self.sinks.iter().map(|(kind, _)| *kind)
    }

    /// Hands the flow to every sink, returns the number of sinks that
    /// accepted it
    pub fn deliver(&self, flow: Flow) -> usize {
        let flow = Arc::new(flow);
        let mut delivered = 0;
        for (kind, tx) in &self.sinks {
            match tx.try_send(flow.clone()) {
                Ok(_) => delivered += 1,
                Err(async_channel::TrySendError::Full(_)) => {
                    warn!("[SinkFanout] {kind} sink is full, dropping flow");
                    self.stats.sink_dropped(*kind);
                }
                Err(async_channel::TrySendError::Closed(_)) => {
                    warn!("[SinkFanout] {kind} sink is closed, dropping flow");
                    self.stats.sink_dropped(*kind);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn test_flow() -> Flow {
        Flow {
            insertion_time: Utc.with_ymd_and_hms(2024, 7, 8, 10, 0, 0).unwrap(),
            client_mac: 0,
            client_addr: "192.168.1.50".parse().unwrap(),
            client_port: 51118,
            server_addr: "104.18.185.54".parse().unwrap(),
            server_port: 443,
            protocol: 6,
            packets: 27,
            bytes: 2245,
            is_download: false,
        }
    }

    #[test]
    fn test_deliver_to_all_sinks() {
        let stats = Arc::new(PipelineStats::new());
        let (console_tx, console_rx) = create_sink_channel(10);
        let (metrics_tx, metrics_rx) = create_sink_channel(10);
        let (storage_tx, storage_rx) = create_sink_channel(10);
        let fanout = SinkFanout::new(stats.clone())
            .with_sink(SinkKind::Console, console_tx)
            .with_sink(SinkKind::Metrics, metrics_tx)
            .with_sink(SinkKind::Storage, storage_tx);
        assert_eq!(fanout.deliver(test_flow()), 3);
        for rx in [console_rx, metrics_rx, storage_rx] {
            assert_eq!(rx.try_recv().unwrap().as_ref(), &test_flow());
        }
    }

    #[test]
    fn test_full_sink_does_not_block_others() {
        let stats = Arc::new(PipelineStats::new());
        let (console_tx, console_rx) = create_sink_channel(10);
        let (storage_tx, storage_rx) = create_sink_channel(1);
        let fanout = SinkFanout::new(stats.clone())
            .with_sink(SinkKind::Console, console_tx)
            .with_sink(SinkKind::Storage, storage_tx);
        assert_eq!(fanout.deliver(test_flow()), 2);
        assert_eq!(fanout.deliver(test_flow()), 1);
        assert_eq!(console_rx.len(), 2);
        assert_eq!(storage_rx.len(), 1);
        assert_eq!(stats.dropped(SinkKind::Storage), 1);
        assert_eq!(stats.dropped(SinkKind::Console), 0);
    }

    #[test]
    fn test_closed_sink_is_counted() {
        let stats = Arc::new(PipelineStats::new());
        let (metrics_tx, metrics_rx) = create_sink_channel(10);
        drop(metrics_rx);
        let fanout = SinkFanout::new(stats.clone()).with_sink(SinkKind::Metrics, metrics_tx);
        assert_eq!(fanout.deliver(test_flow()), 0);
        assert_eq!(stats.dropped(SinkKind::Metrics), 1);
    }
}
