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

//! Sends a template set and a data set, in one IPFIX message, to a collector.
//!
//! ```text
//! cargo run --example exporter -- 127.0.0.1:9995
//! ```

use chrono::Utc;
use futures::SinkExt;
use homeflow_flow_pkt::{
    codec::IpfixCodec,
    ie::{Field, IE},
    ipfix::{DataRecord, IpfixPacket, Set, TemplateRecord},
    DataSetId, FieldSpecifier, TemplateStore,
};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let collector: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9995".to_string())
        .parse()?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let codec = IpfixCodec::new(collector.ip(), TemplateStore::new());
    let mut framed = UdpFramed::new(socket, codec);

    let template = TemplateRecord::new(
        256,
        Box::new([
            FieldSpecifier::new(IE::sourceIPv4Address, 4)?,
            FieldSpecifier::new(IE::destinationIPv4Address, 4)?,
            FieldSpecifier::new(IE::sourceTransportPort, 2)?,
            FieldSpecifier::new(IE::destinationTransportPort, 2)?,
            FieldSpecifier::new(IE::protocolIdentifier, 1)?,
            FieldSpecifier::new(IE::packetDeltaCount, 4)?,
            FieldSpecifier::new(IE::octetDeltaCount, 4)?,
        ]),
    );
    let record = DataRecord::new(
        Box::new([]),
        Box::new([
            (
                IE::sourceIPv4Address,
                Field::Ipv4Address(Ipv4Addr::new(192, 168, 1, 50)),
            ),
            (
                IE::destinationIPv4Address,
                Field::Ipv4Address(Ipv4Addr::new(104, 18, 185, 54)),
            ),
            (IE::sourceTransportPort, Field::Unsigned16(51118)),
            (IE::destinationTransportPort, Field::Unsigned16(443)),
            (IE::protocolIdentifier, Field::Unsigned8(6)),
            (IE::packetDeltaCount, Field::Unsigned64(27)),
            (IE::octetDeltaCount, Field::Unsigned64(2245)),
        ]),
    );
    let pkt = IpfixPacket::new(
        Utc::now(),
        0,
        0,
        Box::new([
            Set::Template(Box::new([template])),
            Set::Data {
                id: DataSetId::new(256)?,
                records: Box::new([record]),
            },
        ]),
    );
    println!(
        "Sending IPFIX packet to {collector}: {}",
        serde_json::to_string(&pkt)?
    );
    framed.send((pkt, collector)).await?;
    Ok(())
}
