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

use homeflow_flow_pkt::TemplateStore;
use homeflow_flow_service::{flow_supervisor, CollectorStats};
use serde_with::serde_as;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

const NUM_WORKERS_DEFAULT: usize = 1;

pub(crate) const fn default_num_workers() -> usize {
    NUM_WORKERS_DEFAULT
}

const SUBSCRIBER_TIMEOUT_DURATION_DEFAULT: Duration = Duration::from_millis(100);

pub(crate) const fn default_subscriber_timeout_duration() -> Duration {
    SUBSCRIBER_TIMEOUT_DURATION_DEFAULT
}

pub(crate) const fn default_cmd_size_buffer() -> usize {
    100
}

pub(crate) const fn default_buffer_size() -> usize {
    1_000
}

pub(crate) const fn default_true() -> bool {
    true
}

pub(crate) const fn default_metrics_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090)
}

pub(crate) fn default_metrics_path() -> String {
    "/metrics".to_string()
}

pub(crate) fn default_storage_url() -> String {
    "http://localhost:8123".to_string()
}

pub(crate) fn default_storage_database() -> String {
    "default".to_string()
}

pub(crate) fn default_storage_table() -> String {
    "ipfix".to_string()
}

pub(crate) const fn default_storage_flush_interval() -> Duration {
    Duration::from_secs(5)
}

pub(crate) const fn default_storage_timeout() -> Duration {
    Duration::from_secs(20)
}

pub(crate) const fn default_storage_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub flow: FlowConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_subscriber_timeout_duration")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub subscriber_timeout: Duration,

    /// Exporters silent for longer than this are evicted from the template
    /// store. Eviction is off when unset.
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>")]
    pub template_cache_purge_timeout: Option<Duration>,

    #[serde(default = "default_cmd_size_buffer")]
    pub cmd_buffer_size: usize,

    /// Size of the channel between the socket actors and flow assembly
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    pub listeners: Vec<Binding>,

    /// Addresses of the home network hosts, used to tell uploads from
    /// downloads
    #[serde(default)]
    pub local_addresses: Vec<IpAddr>,
}

impl FlowConfig {
    pub fn supervisor_config(
        &self,
        store: TemplateStore,
        stats: Arc<CollectorStats>,
    ) -> flow_supervisor::SupervisorConfig {
        flow_supervisor::SupervisorConfig {
            binding_addresses: self.listeners.iter().cloned().map(|x| x.into()).collect(),
            subscriber_timeout: self.subscriber_timeout,
            cmd_buffer_size: self.cmd_buffer_size,
            store,
            stats,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Binding {
    pub address: SocketAddr,
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub interface: Option<String>,
    #[serde(default = "default_num_workers")]
    pub workers: usize,
}

impl From<Binding> for flow_supervisor::BindingAddress {
    fn from(value: Binding) -> Self {
        flow_supervisor::BindingAddress {
            socket_addr: value.address,
            num_workers: value.workers,
            interface: value.interface,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SinksConfig {
    /// Capacity of each sink queue, flows are dropped when a sink falls
    /// behind
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub console: ConsoleSinkConfig,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            console: ConsoleSinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConsoleSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ConsoleSinkConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// ClickHouse HTTP interface settings
#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_url")]
    pub url: String,

    #[serde(default = "default_storage_database")]
    pub database: String,

    #[serde(default = "default_storage_table")]
    pub table: String,

    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub password: Option<String>,

    /// Number of rows buffered before an insert is issued
    #[serde(default = "default_buffer_size")]
    pub batch_size: usize,

    /// Max time a row waits in the buffer
    #[serde(default = "default_storage_flush_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub flush_interval: Duration,

    /// See [reqwest::ClientBuilder::timeout]
    #[serde(default = "default_storage_timeout")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub timeout: Duration,

    /// See [reqwest::ClientBuilder::connect_timeout]
    #[serde(default = "default_storage_connect_timeout")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            database: default_storage_database(),
            table: default_storage_table(),
            user: None,
            password: None,
            batch_size: default_buffer_size(),
            flush_interval: default_storage_flush_interval(),
            timeout: default_storage_timeout(),
            connect_timeout: default_storage_connect_timeout(),
        }
    }
}
