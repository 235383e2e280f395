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

use crate::flow::Flow;
use std::{collections::HashMap, net::IpAddr};
use tracing::debug;

pub const DEFAULT_MAC_CACHE_CAPACITY: usize = 4096;

/// Remembers the MAC address each local client used on its last upload.
///
/// Download records carry the MAC of the remote side (usually the home
/// router), so the client MAC of a download is taken from here.
#[derive(Debug, Clone)]
pub struct ClientMacCache {
    capacity: usize,
    macs: HashMap<IpAddr, u64>,
}

impl Default for ClientMacCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAC_CACHE_CAPACITY)
    }
}

impl ClientMacCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            macs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.macs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macs.is_empty()
    }

    pub fn get(&self, addr: &IpAddr) -> Option<u64> {
        self.macs.get(addr).copied()
    }

    /// Learns from uploads and fills in the client MAC of downloads
    pub fn resolve(&mut self, flow: &mut Flow) {
        if flow.is_download {
            flow.client_mac = self.get(&flow.client_addr).unwrap_or(0);
            return;
        }
        if flow.client_mac == 0 {
            return;
        }
        if self.macs.len() >= self.capacity && !self.macs.contains_key(&flow.client_addr) {
            // Full, make room by dropping an arbitrary client
            let evicted = self.macs.keys().next().copied();
            if let Some(evicted) = evicted {
                debug!("MAC cache is full, forgetting client {evicted}");
                self.macs.remove(&evicted);
            }
        }
        self.macs.insert(flow.client_addr, flow.client_mac);
    }
}
