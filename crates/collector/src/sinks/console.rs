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

//! Human readable flow report, one line per flow:
//!
//! ```text
//! aa:bb:cc:dd:ee:ff | 192.168.1.50:51118 ... -> 104.18.185.54:443 ... : [0x06]         27 packets,       2245 bytes
//! ```

use crate::{
    flow::{format_mac, Flow},
    sinks::FlowSinkReceiver,
};
use std::io;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
};
use tracing::{debug, info};

pub struct ConsoleSink;

impl ConsoleSink {
    pub fn format(flow: &Flow) -> String {
        let client = format!("{}:{}", flow.client_addr, flow.client_port);
        let server = format!("{}:{}", flow.server_addr, flow.server_port);
        let arrow = if flow.is_download { "<-" } else { "->" };
        format!(
            "{} | {client:50} {arrow} {server:50} : [0x{:02x}] {:10} packets, {:10} bytes",
            format_mac(flow.client_mac),
            flow.protocol,
            flow.packets,
            flow.bytes,
        )
    }

    /// Reports every flow on stderr until the channel is closed
    pub fn spawn(flow_rx: FlowSinkReceiver) -> JoinHandle<io::Result<tokio::io::Stderr>> {
        Self::spawn_with_writer(flow_rx, tokio::io::stderr())
    }

    pub fn spawn_with_writer<W: AsyncWrite + Unpin + Send + 'static>(
        flow_rx: FlowSinkReceiver,
        writer: W,
    ) -> JoinHandle<io::Result<W>> {
        info!("[ConsoleSink] Starting console sink");
        tokio::spawn(Self::run(flow_rx, writer))
    }

    async fn run<W: AsyncWrite + Unpin>(flow_rx: FlowSinkReceiver, mut writer: W) -> io::Result<W> {
        while let Ok(flow) = flow_rx.recv().await {
            let mut line = Self::format(&flow);
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
        }
        writer.flush().await?;
        debug!("[ConsoleSink] Flow channel is closed, shutting down");
        Ok(writer)
    }
}
