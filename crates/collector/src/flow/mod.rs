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

//! Turning decoded IPFIX data records into directional [Flow]s seen from the
//! home network side.

pub mod actor;
pub mod assembler;
pub mod mac_cache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One directional flow between a local client and a remote server.
///
/// The client is always the home network side: for uploads it is the
/// record's source, for downloads the record's destination.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Time the flow was assembled by the collector
    pub insertion_time: DateTime<Utc>,
    /// 48-bit MAC in the low bits, 0 when unknown
    pub client_mac: u64,
    pub client_addr: IpAddr,
    pub client_port: u16,
    pub server_addr: IpAddr,
    pub server_port: u16,
    pub protocol: u8,
    pub packets: u32,
    pub bytes: u32,
    pub is_download: bool,
}

impl Flow {
    pub const fn client_ipv4(&self) -> Ipv4Addr {
        match self.client_addr {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub const fn client_ipv6(&self) -> Ipv6Addr {
        match self.client_addr {
            IpAddr::V4(_) => Ipv6Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr,
        }
    }

    pub const fn server_ipv4(&self) -> Ipv4Addr {
        match self.server_addr {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub const fn server_ipv6(&self) -> Ipv6Addr {
        match self.server_addr {
            IpAddr::V4(_) => Ipv6Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr,
        }
    }
}

/// Formats a MAC held in the low 48 bits as `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: u64) -> String {
    let octets = mac.to_be_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        octets[2], octets[3], octets[4], octets[5], octets[6], octets[7]
    )
}
