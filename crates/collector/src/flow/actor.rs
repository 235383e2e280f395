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

//! Actor turning the decoded packets of a flow subscription into [Flow]s and
//! handing them to the sinks.
//!
//! The actor stops when the subscription channel is closed, dropping the
//! [SinkFanout] closes the sink channels in turn.
//!
//! [Flow]: crate::flow::Flow

use crate::{
    flow::{assembler::FlowAssembler, mac_cache::ClientMacCache},
    sinks::SinkFanout,
    stats::PipelineStats,
};
use chrono::Utc;
use homeflow_flow_service::{FlowReceiver, FlowRequest};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, strum_macros::Display)]
pub(crate) enum FlowAssemblyActorCommand {
    Shutdown(mpsc::Sender<String>),
}

struct FlowAssemblyActor {
    name: String,
    assembler: FlowAssembler,
    mac_cache: ClientMacCache,
    fanout: SinkFanout,
    flow_rx: FlowReceiver,
    cmd_rx: mpsc::Receiver<FlowAssemblyActorCommand>,
    stats: Arc<PipelineStats>,
}

impl FlowAssemblyActor {
    fn process(&mut self, request: Arc<FlowRequest>) {
        let (peer, pkt) = request.as_ref();
        let now = Utc::now();
        for (set_id, record) in pkt.data_records() {
            // Options data describes the exporter, not traffic
            if !record.scope_fields().is_empty() {
                trace!(
                    "[{}] Skipping options record of set {} from {peer}",
                    self.name,
                    set_id.id()
                );
                self.stats.record_options();
                continue;
            }
            match self.assembler.assemble(record, now) {
                Ok(mut flow) => {
                    self.mac_cache.resolve(&mut flow);
                    self.fanout.deliver(flow);
                }
                Err(err) => {
                    trace!(
                        "[{}] Discarding record of set {} from {peer}: {err}",
                        self.name,
                        set_id.id()
                    );
                    self.stats.record_incomplete();
                }
            }
        }
    }

    async fn run(mut self) -> anyhow::Result<String> {
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    return match cmd {
                        None => {
                            debug!("[{}] Shutting down due to closed command stream", self.name);
                            Ok(self.name)
                        }
                        Some(FlowAssemblyActorCommand::Shutdown(tx)) => {
                            info!("[{}] Received shutdown command, shutting down", self.name);
                            let _ = tx.send(self.name.clone()).await;
                            Ok(self.name)
                        }
                    }
                }
                request = self.flow_rx.recv() => {
                    match request {
                        Ok(request) => self.process(request),
                        Err(_) => {
                            info!("[{}] Flow subscription is closed, shutting down", self.name);
                            return Ok(self.name);
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum FlowAssemblyActorHandleError {
    SendError,
    ReceiveError,
}

impl std::error::Error for FlowAssemblyActorHandleError {}

#[derive(Debug, Clone)]
pub struct FlowAssemblyActorHandle {
    name: String,
    cmd_tx: mpsc::Sender<FlowAssemblyActorCommand>,
}

impl FlowAssemblyActorHandle {
    pub fn new(
        assembler: FlowAssembler,
        fanout: SinkFanout,
        flow_rx: FlowReceiver,
        stats: Arc<PipelineStats>,
    ) -> (JoinHandle<anyhow::Result<String>>, Self) {
        let name = "FlowAssembly".to_string();
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        info!(
            "[{name}] Starting flow assembly for sinks: {:?}",
            fanout.sinks().collect::<Vec<_>>()
        );
        let actor = FlowAssemblyActor {
            name: name.clone(),
            assembler,
            mac_cache: ClientMacCache::default(),
            fanout,
            flow_rx,
            cmd_rx,
            stats,
        };
        let join_handle = tokio::spawn(actor.run());
        (join_handle, Self { name, cmd_tx })
    }

    pub const fn name(&self) -> &String {
        &self.name
    }

    pub async fn shutdown(&self) -> Result<String, FlowAssemblyActorHandleError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.cmd_tx
            .send(FlowAssemblyActorCommand::Shutdown(tx))
            .await
            .map_err(|_| FlowAssemblyActorHandleError::SendError)?;
        rx.recv()
            .await
            .ok_or(FlowAssemblyActorHandleError::ReceiveError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flow::Flow,
        sinks::{create_sink_channel, FlowSinkReceiver},
        stats::SinkKind,
    };
    use homeflow_flow_pkt::{
        codec::IpfixCodec,
        ipfix::{DataRecord, IpfixPacket, Set},
        DataSetId, Field, TemplateStore, IE,
    };
    use homeflow_flow_service::create_flow_channel;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    const ROUTER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 40000);

    /// Template 256 with seven fields and one data record using it
    const TEMPLATE_AND_DATA: [u8; 77] = [
        0x00, 0x0a, 0x00, 0x4d, // version 10, length 77
        0x65, 0x53, 0xf1, 0x00, // export time
        0x00, 0x00, 0x00, 0x00, // sequence
        0x00, 0x00, 0x00, 0x00, // observation domain
        0x00, 0x02, 0x00, 0x24, // template set
        0x01, 0x00, 0x00, 0x07, // template 256, 7 fields
        0x00, 0x08, 0x00, 0x04, 0x00, 0x0c, 0x00, 0x04, // IPv4 src/dst
        0x00, 0x07, 0x00, 0x02, 0x00, 0x0b, 0x00, 0x02, // ports
        0x00, 0x04, 0x00, 0x01, // protocol
        0x00, 0x02, 0x00, 0x04, 0x00, 0x01, 0x00, 0x04, // packets, octets
        0x01, 0x00, 0x00, 0x19, // data set 256
        0xc0, 0xa8, 0x01, 0x32, 0x68, 0x12, 0xb9, 0x36, // 192.168.1.50 -> 104.18.185.54
        0xc7, 0xae, 0x01, 0xbb, // 51118 -> 443
        0x06, // TCP
        0x00, 0x00, 0x00, 0x1b, 0x00, 0x00, 0x08, 0xc5, // 27 packets, 2245 octets
    ];

    struct TestPipeline {
        flow_tx: homeflow_flow_service::FlowSender,
        sinks: Vec<FlowSinkReceiver>,
        stats: Arc<PipelineStats>,
        join: JoinHandle<anyhow::Result<String>>,
        handle: FlowAssemblyActorHandle,
    }

    fn pipeline(local: &str) -> TestPipeline {
        let stats = Arc::new(PipelineStats::new());
        let mut fanout = SinkFanout::new(stats.clone());
        let mut sinks = vec![];
        for kind in [SinkKind::Console, SinkKind::Metrics, SinkKind::Storage] {
            let (tx, rx) = create_sink_channel(10);
            fanout = fanout.with_sink(kind, tx);
            sinks.push(rx);
        }
        let (flow_tx, flow_rx) = create_flow_channel(10);
        let assembler = FlowAssembler::new([local.parse().unwrap()]);
        let (join, handle) = FlowAssemblyActorHandle::new(assembler, fanout, flow_rx, stats.clone());
        TestPipeline {
            flow_tx,
            sinks,
            stats,
            join,
            handle,
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_template_and_data_reach_every_sink() {
        let pipeline = pipeline("192.168.1.50");
        let codec = IpfixCodec::new(ROUTER.ip(), TemplateStore::new());
        let pkt = codec.decode_datagram(&TEMPLATE_AND_DATA).unwrap();
        pipeline.flow_tx.send(Arc::new((ROUTER, pkt))).await.unwrap();
        drop(pipeline.flow_tx);
        assert_eq!(pipeline.join.await.unwrap().unwrap(), "FlowAssembly");

        for rx in &pipeline.sinks {
            let flow = rx.recv().await.unwrap();
            assert_eq!(
                flow.as_ref(),
                &Flow {
                    insertion_time: flow.insertion_time,
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
            );
            // the sink channel closes once the actor is gone
            assert!(rx.recv().await.is_err());
        }
        assert_eq!(pipeline.stats.records_incomplete(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_incomplete_records_are_counted() {
        let pipeline = pipeline("192.168.1.50");
        let record = DataRecord::new(
            Box::new([]),
            Box::new([(IE::octetDeltaCount, Field::Unsigned32(10))]),
        );
        let pkt = IpfixPacket::new(
            Utc::now(),
            0,
            0,
            Box::new([Set::Data {
                id: DataSetId::new(256).unwrap(),
                records: Box::new([record]),
            }]),
        );
        pipeline.flow_tx.send(Arc::new((ROUTER, pkt))).await.unwrap();
        drop(pipeline.flow_tx);
        pipeline.join.await.unwrap().unwrap();
        assert_eq!(pipeline.stats.records_incomplete(), 1);
        assert!(pipeline.sinks[0].recv().await.is_err());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_options_records_are_counted() {
        let pipeline = pipeline("192.168.1.50");
        let options = DataRecord::new(
            Box::new([(IE::ingressInterface, Field::Unsigned32(3))]),
            Box::new([
                (
                    IE::sourceIPv4Address,
                    Field::Ipv4Address(Ipv4Addr::new(192, 168, 1, 50)),
                ),
                (
                    IE::destinationIPv4Address,
                    Field::Ipv4Address(Ipv4Addr::new(104, 18, 185, 54)),
                ),
            ]),
        );
        let pkt = IpfixPacket::new(
            Utc::now(),
            0,
            0,
            Box::new([Set::Data {
                id: DataSetId::new(257).unwrap(),
                records: Box::new([options]),
            }]),
        );
        pipeline.flow_tx.send(Arc::new((ROUTER, pkt))).await.unwrap();
        drop(pipeline.flow_tx);
        pipeline.join.await.unwrap().unwrap();
        assert_eq!(pipeline.stats.records_options(), 1);
        assert_eq!(pipeline.stats.records_incomplete(), 0);
        assert!(pipeline.sinks[0].recv().await.is_err());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_shutdown() {
        let pipeline = pipeline("192.168.1.50");
        assert_eq!(pipeline.handle.shutdown().await.unwrap(), "FlowAssembly");
        assert_eq!(pipeline.join.await.unwrap().unwrap(), "FlowAssembly");
        assert!(pipeline.handle.shutdown().await.is_err());
    }
}
