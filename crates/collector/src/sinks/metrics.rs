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

//! Cumulative bytes per local client IP, exported as
//! `ipfix_bytes_received_total{local_ip="..."}`.

use crate::{flow::Flow, sinks::FlowSinkReceiver};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, MetricType},
};
use std::{
    collections::BTreeMap,
    net::IpAddr,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const BYTES_RECEIVED_METRIC: &str = "ipfix_bytes_received";

/// Process wide byte counters, read on every scrape of the metrics endpoint
#[derive(Debug, Clone, Default)]
pub struct BytesAccumulator {
    counters: Arc<RwLock<BTreeMap<IpAddr, u64>>>,
}

impl BytesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, flow: &Flow) {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(flow.client_addr).or_insert(0);
        *counter = counter.saturating_add(flow.bytes as u64);
    }

    pub fn snapshot(&self) -> BTreeMap<IpAddr, u64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Collector for BytesAccumulator {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        let mut family_encoder = encoder.encode_descriptor(
            BYTES_RECEIVED_METRIC,
            "Total number of bytes received by a local IP",
            None,
            MetricType::Counter,
        )?;
        for (local_ip, bytes) in self.snapshot() {
            let labels = vec![("local_ip", local_ip.to_string())];
            let metric_encoder = family_encoder.encode_family(&labels)?;
            ConstCounter::new(bytes).encode(metric_encoder)?;
        }
        Ok(())
    }
}

pub struct MetricsSink;

impl MetricsSink {
    pub fn spawn(flow_rx: FlowSinkReceiver, accumulator: BytesAccumulator) -> JoinHandle<()> {
        info!("[MetricsSink] Starting metrics sink");
        tokio::spawn(async move {
            while let Ok(flow) = flow_rx.recv().await {
                accumulator.add(&flow);
            }
            debug!("[MetricsSink] Flow channel is closed, shutting down");
        })
    }
}
