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

//! Dumps every IPFIX message received as JSON, one line per message.
//!
//! ```text
//! cargo run --example dump-messages -- 0.0.0.0:4739 4
//! ```

use homeflow_flow_service::flow_supervisor::{
    BindingAddress, FlowCollectorsSupervisorActorHandle, SupervisorConfig,
};
use std::net::SocketAddr;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn main() -> Result<(), BoxError> {
    let mut args = std::env::args().skip(1);
    let socket_addr: SocketAddr = args.next().as_deref().unwrap_or("0.0.0.0:4739").parse()?;
    let num_workers: usize = args.next().as_deref().unwrap_or("2").parse()?;

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let config = SupervisorConfig {
            binding_addresses: vec![BindingAddress {
                socket_addr,
                num_workers,
                interface: None,
            }],
            ..Default::default()
        };
        let stats = config.stats.clone();
        let (join_handle, handle) = FlowCollectorsSupervisorActorHandle::new(config);
        let (messages, subscriptions) = handle.subscribe(64).await?;
        info!("Subscribed to {} workers", subscriptions.len());

        let printer = tokio::spawn(async move {
            while let Ok(message) = messages.recv().await {
                let (exporter, pkt) = message.as_ref();
                match serde_json::to_string(pkt) {
                    Ok(json) => println!("{exporter} {json}"),
                    Err(err) => warn!("Message of {exporter} is not printable: {err}"),
                }
            }
        });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => handle.shutdown().await?,
            _ = join_handle => warn!("Every worker stopped"),
        }
        printer.await?;
        info!("{:?}", stats.snapshot());
        Ok::<(), BoxError>(())
    })
}
