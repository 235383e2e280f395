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

//! Pull based metrics endpoint.
//!
//! All counters live in atomics owned by the pipeline stages, the registry
//! only holds collectors reading them on every scrape.

use crate::{
    config::MetricsConfig,
    sinks::metrics::BytesAccumulator,
    stats::{PipelineStats, SinkKind},
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use homeflow_flow_service::CollectorStats;
use prometheus_client::{
    collector::Collector,
    encoding::{text::encode, DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, MetricType},
    registry::Registry,
};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{error, info};

pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub const HEALTH_PATH: &str = "/healthz";

fn encode_counter(
    encoder: &mut DescriptorEncoder<'_>,
    name: &str,
    help: &str,
    value: u64,
) -> Result<(), std::fmt::Error> {
    let metric_encoder = encoder.encode_descriptor(name, help, None, MetricType::Counter)?;
    ConstCounter::new(value).encode(metric_encoder)
}

#[derive(Debug)]
struct DecoderStatsCollector(Arc<CollectorStats>);

impl Collector for DecoderStatsCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        let stats = self.0.snapshot();
        let counters = [
            (
                "ipfix_packets_received",
                "UDP datagrams read from the collector sockets",
                stats.packets_received,
            ),
            (
                "ipfix_packets_decoded",
                "IPFIX messages decoded",
                stats.packets_decoded,
            ),
            (
                "ipfix_packets_malformed",
                "Datagrams discarded for a malformed IPFIX message header",
                stats.packets_malformed,
            ),
            (
                "ipfix_sets_dropped",
                "Data sets dropped because their template is unknown",
                stats.sets_dropped,
            ),
            (
                "ipfix_sets_skipped",
                "Sets skipped for reserved ids or malformed bodies",
                stats.sets_skipped,
            ),
            (
                "ipfix_records_decoded",
                "Data records decoded",
                stats.records_decoded,
            ),
            (
                "ipfix_subscriber_dropped",
                "Decoded messages not delivered to a slow subscriber",
                stats.subscriber_dropped,
            ),
        ];
        for (name, help, value) in counters {
            encode_counter(&mut encoder, name, help, value)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PipelineStatsCollector(Arc<PipelineStats>);

impl Collector for PipelineStatsCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        encode_counter(
            &mut encoder,
            "ipfix_records_incomplete",
            "Data records discarded because no flow could be built from them",
            self.0.records_incomplete(),
        )?;
        encode_counter(
            &mut encoder,
            "ipfix_records_options",
            "Options data records, they describe the exporter and carry no flow",
            self.0.records_options(),
        )?;
        {
            let mut family_encoder = encoder.encode_descriptor(
                "ipfix_sink_dropped",
                "Flows dropped because a sink queue was full or closed",
                None,
                MetricType::Counter,
            )?;
            for sink in SinkKind::iter() {
                let labels = vec![("sink", sink.to_string())];
                let metric_encoder = family_encoder.encode_family(&labels)?;
                ConstCounter::new(self.0.dropped(sink)).encode(metric_encoder)?;
            }
        }
        encode_counter(
            &mut encoder,
            "ipfix_storage_rows_written",
            "Rows inserted into the flow storage",
            self.0.rows_written(),
        )?;
        encode_counter(
            &mut encoder,
            "ipfix_storage_flush_failures",
            "Storage batches dropped after a failed insert",
            self.0.flush_failures(),
        )
    }
}

pub fn metrics_registry(
    accumulator: BytesAccumulator,
    decoder_stats: Arc<CollectorStats>,
    pipeline_stats: Arc<PipelineStats>,
) -> Registry {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(accumulator));
    registry.register_collector(Box::new(DecoderStatsCollector(decoder_stats)));
    registry.register_collector(Box::new(PipelineStatsCollector(pipeline_stats)));
    registry
}

pub fn render_prometheus(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut body = String::new();
    encode(&mut body, registry)?;
    Ok(body)
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    match render_prometheus(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("[Metrics] Failed to encode metrics: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, strum_macros::Display)]
pub enum MetricsEndpointError {
    #[strum(to_string = "metrics path must start with '/': {0}")]
    InvalidPath(String),
    #[strum(to_string = "metrics path {0} collides with the health check")]
    ReservedPath(String),
}

impl std::error::Error for MetricsEndpointError {}

pub fn metrics_router(
    path: &str,
    registry: Arc<Registry>,
) -> Result<Router, MetricsEndpointError> {
    if !path.starts_with('/') {
        return Err(MetricsEndpointError::InvalidPath(path.to_string()));
    }
    if path == HEALTH_PATH {
        return Err(MetricsEndpointError::ReservedPath(path.to_string()));
    }
    Ok(Router::new()
        .route(path, get(metrics_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(registry))
}

/// Serves the metrics endpoint until the listener fails
pub async fn serve_metrics(config: MetricsConfig, registry: Arc<Registry>) -> anyhow::Result<()> {
    let router = metrics_router(&config.path, registry)?;
    let listener = tokio::net::TcpListener::bind(config.address).await?;
    info!(
        "[Metrics] Serving metrics on http://{}{}",
        listener.local_addr()?,
        config.path
    );
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use chrono::{TimeZone, Utc};

    fn registry() -> (BytesAccumulator, Arc<PipelineStats>, Registry) {
        let accumulator = BytesAccumulator::new();
        let pipeline_stats = Arc::new(PipelineStats::new());
        let registry = metrics_registry(
            accumulator.clone(),
            Arc::new(CollectorStats::new()),
            pipeline_stats.clone(),
        );
        (accumulator, pipeline_stats, registry)
    }

    #[test]
    fn test_render_prometheus() {
        let (accumulator, pipeline_stats, registry) = registry();
        accumulator.add(&Flow {
            insertion_time: Utc.with_ymd_and_hms(2024, 7, 8, 10, 0, 0).unwrap(),
            client_mac: 0,
            client_addr: "192.168.1.50".parse().unwrap(),
            client_port: 51118,
            server_addr: "104.18.185.54".parse().unwrap(),
            server_port: 443,
            protocol: 6,
            packets: 27,
            bytes: 2245,
            is_download: false,
        });
        pipeline_stats.sink_dropped(SinkKind::Storage);
        pipeline_stats.record_incomplete();

        let body = render_prometheus(&registry).unwrap();
        assert!(body.contains("ipfix_bytes_received_total{local_ip=\"192.168.1.50\"} 2245"));
        assert!(body.contains("ipfix_packets_received_total 0"));
        assert!(body.contains("ipfix_records_incomplete_total 1"));
        assert!(body.contains("ipfix_records_options_total 0"));
        assert!(body.contains("ipfix_sink_dropped_total{sink=\"storage\"} 1"));
        assert!(body.contains("ipfix_sink_dropped_total{sink=\"console\"} 0"));
        assert!(body.ends_with("# EOF\n"));
    }

    #[test]
    fn test_router_rejects_bad_paths() {
        let (_, _, registry) = registry();
        let registry = Arc::new(registry);
        assert!(matches!(
            metrics_router("metrics", registry.clone()),
            Err(MetricsEndpointError::InvalidPath(_))
        ));
        assert!(matches!(
            metrics_router(HEALTH_PATH, registry.clone()),
            Err(MetricsEndpointError::ReservedPath(_))
        ));
        assert!(metrics_router("/metrics", registry).is_ok());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_serve_metrics() {
        let (_, _, registry) = registry();
        let router = metrics_router("/metrics", Arc::new(registry)).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .unwrap(),
            OPENMETRICS_CONTENT_TYPE
        );
        assert!(response
            .text()
            .await
            .unwrap()
            .contains("# TYPE ipfix_packets_decoded counter"));

        let health = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");
    }
}
