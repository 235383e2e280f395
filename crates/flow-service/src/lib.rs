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

pub mod flow_actor;
pub mod flow_supervisor;

use homeflow_flow_pkt::ipfix::IpfixPacket;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

pub type ActorId = u32;
pub type SubscriberId = u32;
pub type FlowRequest = (SocketAddr, IpfixPacket);

pub type FlowSender = async_channel::Sender<Arc<FlowRequest>>;
pub type FlowReceiver = async_channel::Receiver<Arc<FlowRequest>>;

pub fn create_flow_channel(buffer_size: usize) -> (FlowSender, FlowReceiver) {
    async_channel::bounded(buffer_size)
}

#[derive(Debug, Clone)]
pub struct Subscription {
    actor_id: ActorId,
    id: SubscriberId,
}

impl Subscription {
    pub const fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub const fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Subscription {{ actor_id: {}, id: {} }}",
            self.actor_id, self.id
        )
    }
}

/// Decoder counters shared by every collector actor of a process.
///
/// Counters are monotonic, they're read with [CollectorStats::snapshot] when
/// the metrics endpoint is scraped.
#[derive(Debug, Default)]
pub struct CollectorStats {
    packets_received: AtomicU64,
    packets_decoded: AtomicU64,
    packets_malformed: AtomicU64,
    sets_dropped: AtomicU64,
    sets_skipped: AtomicU64,
    records_decoded: AtomicU64,
    subscriber_dropped: AtomicU64,
}

/// Point in time copy of [CollectorStats]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CollectorStatsSnapshot {
    pub packets_received: u64,
    pub packets_decoded: u64,
    pub packets_malformed: u64,
    /// Data sets dropped because their template is unknown
    pub sets_dropped: u64,
    /// Sets skipped for any other reason, reserved ids or malformed bodies
    pub sets_skipped: u64,
    pub records_decoded: u64,
    pub subscriber_dropped: u64,
}

impl CollectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Accounts the content of a decoded packet
    pub(crate) fn packet_decoded(&self, pkt: &IpfixPacket) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
        let records = pkt.data_records().count() as u64;
        self.records_decoded.fetch_add(records, Ordering::Relaxed);
        for skipped in pkt.skipped_sets() {
            if skipped.is_unresolved_template() {
                self.sets_dropped.fetch_add(1, Ordering::Relaxed);
            } else {
                self.sets_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn subscriber_dropped(&self) {
        self.subscriber_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CollectorStatsSnapshot {
        CollectorStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            sets_dropped: self.sets_dropped.load(Ordering::Relaxed),
            sets_skipped: self.sets_skipped.load(Ordering::Relaxed),
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            subscriber_dropped: self.subscriber_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Creates a UDP socket with `SO_REUSEPORT`, so several actors can share the
/// same listening address. When `device` is given the socket is bound to that
/// network interface.
pub fn new_udp_reuse_port(
    local_addr: SocketAddr,
    device: Option<String>,
) -> io::Result<tokio::net::UdpSocket> {
    let udp_sock = socket2::Socket::new(
        if local_addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        },
        socket2::Type::DGRAM,
        None,
    )?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    udp_sock.set_reuse_port(true)?;
    udp_sock.set_recv_buffer_size(1024 * 1024 * 4)?; // 4 MB
    #[cfg(unix)]
    udp_sock.set_cloexec(true)?;
    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    if let Some(device) = device.as_deref() {
        udp_sock.bind_device(Some(device.as_bytes()))?;
    }
    #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
    let _ = device;
    udp_sock.set_nonblocking(true)?;
    udp_sock.bind(&socket2::SockAddr::from(local_addr))?;
    let udp_sock: std::net::UdpSocket = udp_sock.into();
    udp_sock.try_into()
}
