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

//! Batched inserts of flows into ClickHouse over its HTTP interface.
//!
//! Rows are buffered and sent as `JSONEachRow` when the batch is full, when
//! the flush interval elapses or when the sink stops. A batch ClickHouse
//! refuses is logged, counted and dropped.

use crate::{config::StorageConfig, flow::Flow, sinks::FlowSinkReceiver, stats::PipelineStats};
use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, Ipv6Addr},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// One row of the `ipfix` table, see `schema.sql`
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IpfixRow {
    /// Unix time in seconds
    #[serde(rename = "insertionTime")]
    pub insertion_time: i64,
    #[serde(rename = "clientMac")]
    pub client_mac: u64,
    #[serde(rename = "clientIPv4")]
    pub client_ipv4: Ipv4Addr,
    #[serde(rename = "clientIPv6")]
    pub client_ipv6: Ipv6Addr,
    #[serde(rename = "clientPort")]
    pub client_port: u16,
    #[serde(rename = "serverIPv4")]
    pub server_ipv4: Ipv4Addr,
    #[serde(rename = "serverIPv6")]
    pub server_ipv6: Ipv6Addr,
    #[serde(rename = "serverPort")]
    pub server_port: u16,
    pub protocol: u8,
    pub packets: u32,
    pub bytes: u32,
    pub is_download: bool,
}

impl From<&Flow> for IpfixRow {
    fn from(flow: &Flow) -> Self {
        Self {
            insertion_time: flow.insertion_time.timestamp(),
            client_mac: flow.client_mac,
            client_ipv4: flow.client_ipv4(),
            client_ipv6: flow.client_ipv6(),
            client_port: flow.client_port,
            server_ipv4: flow.server_ipv4(),
            server_ipv6: flow.server_ipv6(),
            server_port: flow.server_port,
            protocol: flow.protocol,
            packets: flow.packets,
            bytes: flow.bytes,
            is_download: flow.is_download,
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn insert_query(database: &str, table: &str) -> String {
    format!(
        "INSERT INTO {}.{} FORMAT JSONEachRow",
        quote_identifier(database),
        quote_identifier(table)
    )
}

/// Newline delimited JSON body of an insert
pub fn encode_rows(rows: &[IpfixRow]) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = Vec::with_capacity(rows.len() * 256);
    for row in rows {
        serde_json::to_writer(&mut body, row)?;
        body.push(b'\n');
    }
    Ok(body)
}

#[derive(Debug, strum_macros::Display)]
pub enum StorageSinkError {
    #[strum(to_string = "encoding rows failed: {0}")]
    Encoding(serde_json::Error),
    #[strum(to_string = "HTTP request failed: {0}")]
    Http(reqwest::Error),
    #[strum(to_string = "insert rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
}

impl std::error::Error for StorageSinkError {}

#[derive(Debug, Clone, strum_macros::Display)]
pub(crate) enum StorageSinkActorCommand {
    Shutdown(mpsc::Sender<String>),
}

struct StorageSinkActor {
    name: String,
    client: reqwest::Client,
    url: String,
    query: String,
    user: Option<String>,
    password: Option<String>,
    batch_size: usize,
    flush_interval: Duration,
    flow_rx: FlowSinkReceiver,
    cmd_rx: mpsc::Receiver<StorageSinkActorCommand>,
    buf: Vec<IpfixRow>,
    stats: Arc<PipelineStats>,
}

impl StorageSinkActor {
    fn new(
        name: String,
        client: reqwest::Client,
        config: StorageConfig,
        flow_rx: FlowSinkReceiver,
        cmd_rx: mpsc::Receiver<StorageSinkActorCommand>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            name,
            client,
            query: insert_query(&config.database, &config.table),
            url: config.url,
            user: config.user,
            password: config.password,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval.max(MIN_FLUSH_INTERVAL),
            flow_rx,
            cmd_rx,
            buf: Vec::with_capacity(config.batch_size),
            stats,
        }
    }

    async fn insert(&self, rows: &[IpfixRow]) -> Result<(), StorageSinkError> {
        let body = encode_rows(rows).map_err(StorageSinkError::Encoding)?;
        let mut request = self
            .client
            .post(self.url.as_str())
            .query(&[("query", self.query.as_str())])
            .body(body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        let response = request.send().await.map_err(StorageSinkError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(StorageSinkError::Rejected {
                status: status.as_u16(),
                reason: reason.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let rows = std::mem::take(&mut self.buf);
        debug!("[{}] Inserting {} rows", self.name, rows.len());
        match self.insert(&rows).await {
            Ok(()) => {
                self.stats.storage_rows_written(rows.len());
            }
            Err(err) => {
                error!(
                    "[{}] Dropping batch of {} rows, insert failed: {err}",
                    self.name,
                    rows.len()
                );
                self.stats.storage_flush_failed();
            }
        }
    }

    fn push(&mut self, flow: &Flow) -> bool {
        self.buf.push(IpfixRow::from(flow));
        self.buf.len() >= self.batch_size
    }

    async fn run(mut self) -> anyhow::Result<String> {
        let mut flush_timer = tokio::time::interval(self.flush_interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    return match cmd {
                        None => {
                            debug!("[{}] Shutting down due to closed command stream", self.name);
                            self.flush().await;
                            Ok(self.name)
                        }
                        Some(StorageSinkActorCommand::Shutdown(tx)) => {
                            info!("[{}] Received shutdown command, flushing pending rows", self.name);
                            while let Ok(flow) = self.flow_rx.try_recv() {
                                self.push(&flow);
                            }
                            self.flush().await;
                            let _ = tx.send(self.name.clone()).await;
                            Ok(self.name)
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    self.flush().await;
                }
                flow = self.flow_rx.recv() => {
                    match flow {
                        Ok(flow) => {
                            if self.push(&flow) {
                                self.flush().await;
                                flush_timer.reset();
                            }
                        }
                        Err(_) => {
                            info!("[{}] Flow channel is closed, flushing pending rows", self.name);
                            self.flush().await;
                            return Ok(self.name);
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum StorageSinkActorHandleError {
    SendError,
    ReceiveError,
}

impl std::error::Error for StorageSinkActorHandleError {}

#[derive(Debug, Clone)]
pub struct StorageSinkActorHandle {
    name: String,
    cmd_tx: mpsc::Sender<StorageSinkActorCommand>,
}

impl StorageSinkActorHandle {
    pub const fn name(&self) -> &String {
        &self.name
    }

    fn create_http_client(config: &StorageConfig) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
    }

    pub fn new(
        config: StorageConfig,
        flow_rx: FlowSinkReceiver,
        stats: Arc<PipelineStats>,
    ) -> Result<(JoinHandle<anyhow::Result<String>>, Self), reqwest::Error> {
        let name = "StorageSink".to_string();
        let client = Self::create_http_client(&config)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        info!(
            "[{name}] Starting ClickHouse writer to {} table {}.{}",
            config.url, config.database, config.table
        );
        let actor = StorageSinkActor::new(name.clone(), client, config, flow_rx, cmd_rx, stats);
        let join_handle = tokio::spawn(actor.run());
        Ok((join_handle, Self { name, cmd_tx }))
    }

    /// Flushes the pending rows and stops the writer
    pub async fn shutdown(&self) -> Result<String, StorageSinkActorHandleError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.cmd_tx
            .send(StorageSinkActorCommand::Shutdown(tx))
            .await
            .map_err(|_| StorageSinkActorHandleError::SendError)?;
        rx.recv()
            .await
            .ok_or(StorageSinkActorHandleError::ReceiveError)
    }
}
