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

//! Mapping of a single [DataRecord] to a [Flow].
//!
//! Direction is decided against the configured local addresses:
//! - a local source is an upload.
//! - a local destination is a download.
//! - transit records follow the exporter's `flowDirection` when present
//!   (ingress is a download) and are uploads otherwise.

use crate::flow::Flow;
use chrono::{DateTime, Utc};
use homeflow_flow_pkt::{ipfix::DataRecord, IE};
use std::{collections::HashSet, net::IpAddr};

/// `flowDirection` value for ingress, egress is 1
const FLOW_DIRECTION_INGRESS: u64 = 0;

#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub enum AssemblyError {
    /// Neither an IPv4 nor an IPv6 source/destination pair is present
    #[strum(to_string = "incomplete record: no source/destination address pair")]
    IncompleteRecord,
}

impl std::error::Error for AssemblyError {}

#[derive(Debug, Clone, Default)]
pub struct FlowAssembler {
    local_addresses: HashSet<IpAddr>,
}

impl FlowAssembler {
    pub fn new(local_addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            local_addresses: local_addresses.into_iter().collect(),
        }
    }

    pub fn is_local(&self, addr: &IpAddr) -> bool {
        self.local_addresses.contains(addr)
    }

    /// Builds the [Flow] of a record. The client MAC is only filled for
    /// uploads, the source MAC of a download belongs to the remote side.
    pub fn assemble(
        &self,
        record: &DataRecord,
        insertion_time: DateTime<Utc>,
    ) -> Result<Flow, AssemblyError> {
        let (src_addr, dst_addr) = address_pair(record).ok_or(AssemblyError::IncompleteRecord)?;
        let src_port = port(record, IE::sourceTransportPort);
        let dst_port = port(record, IE::destinationTransportPort);
        let protocol = record
            .get(IE::protocolIdentifier)
            .and_then(|field| u8::try_from(field).ok())
            .unwrap_or(0);
        let packets = counter(record, IE::packetDeltaCount, IE::packetTotalCount);
        let bytes = counter(record, IE::octetDeltaCount, IE::octetTotalCount);

        let is_download = if self.is_local(&src_addr) {
            false
        } else if self.is_local(&dst_addr) {
            true
        } else {
            matches!(
                record.get(IE::flowDirection).and_then(|f| f.as_u64()),
                Some(FLOW_DIRECTION_INGRESS)
            )
        };

        let flow = if is_download {
            Flow {
                insertion_time,
                client_mac: 0,
                client_addr: dst_addr,
                client_port: dst_port,
                server_addr: src_addr,
                server_port: src_port,
                protocol,
                packets,
                bytes,
                is_download,
            }
        } else {
            Flow {
                insertion_time,
                client_mac: source_mac(record),
                client_addr: src_addr,
                client_port: src_port,
                server_addr: dst_addr,
                server_port: dst_port,
                protocol,
                packets,
                bytes,
                is_download,
            }
        };
        Ok(flow)
    }
}

/// First address pair carrying at least one specified address. Dual-stack
/// templates zero-fill the family a record doesn't use.
fn address_pair(record: &DataRecord) -> Option<(IpAddr, IpAddr)> {
    let pair = |src: IE, dst: IE| {
        let src = record.get(src).and_then(|f| f.as_ip())?;
        let dst = record.get(dst).and_then(|f| f.as_ip())?;
        (!src.is_unspecified() || !dst.is_unspecified()).then_some((src, dst))
    };
    pair(IE::sourceIPv4Address, IE::destinationIPv4Address)
        .or_else(|| pair(IE::sourceIPv6Address, IE::destinationIPv6Address))
}

fn port(record: &DataRecord, ie: IE) -> u16 {
    record
        .get(ie)
        .and_then(|field| u16::try_from(field).ok())
        .unwrap_or(0)
}

/// Delta counter, else total counter, saturated to 32 bits
fn counter(record: &DataRecord, delta: IE, total: IE) -> u32 {
    let value = record
        .get(delta)
        .or_else(|| record.get(total))
        .and_then(|f| f.as_u64())
        .unwrap_or(0);
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn source_mac(record: &DataRecord) -> u64 {
    record
        .get(IE::sourceMacAddress)
        .or_else(|| record.get(IE::postSourceMacAddress))
        .and_then(|f| f.as_mac())
        .unwrap_or(0)
}
