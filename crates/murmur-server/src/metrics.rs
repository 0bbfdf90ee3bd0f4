//! Metrics collection and export for murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use murmur_core::OfflineNotifier;
use murmur_protocol::{CloseCode, Identity, ServerEvent};
use murmur_transport::{Transport, TransportError};
use std::net::SocketAddr;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "murmur_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "murmur_connections_active";
    pub const FRAMES_TOTAL: &str = "murmur_frames_total";
    pub const MESSAGES_BYTES: &str = "murmur_messages_bytes";
    pub const PUSHES_TOTAL: &str = "murmur_pushes_total";
    pub const OFFLINE_TOTAL: &str = "murmur_offline_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "murmur_evictions_total";
    pub const REJECTED_TOTAL: &str = "murmur_rejected_connections_total";
    pub const LATENCY_SECONDS: &str = "murmur_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of admitted connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Inbound frames by type");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Bytes of text frames by direction");
    metrics::describe_counter!(names::PUSHES_TOTAL, "Events pushed to clients by type");
    metrics::describe_counter!(
        names::OFFLINE_TOTAL,
        "Entries stored for a receiver that was offline"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections removed by the server rather than the client"
    );
    metrics::describe_counter!(
        names::REJECTED_TOTAL,
        "WebSocket upgrades refused for a missing or invalid credential"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record one decoded inbound frame.
pub fn record_frame(frame_type: &'static str, bytes: usize) {
    counter!(names::FRAMES_TOTAL, "type" => frame_type).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "inbound").increment(bytes as u64);
}

/// Record one pushed event.
pub fn record_push(event_type: &'static str, bytes: usize) {
    counter!(names::PUSHES_TOTAL, "type" => event_type).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "outbound").increment(bytes as u64);
}

pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

pub fn record_rejected_connection() {
    counter!(names::REJECTED_TOTAL).increment(1);
}

pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Transport wrapper that counts every event pushed through it.
pub struct MeteredTransport<T> {
    inner: T,
}

impl<T: Transport> MeteredTransport<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Transport> Transport for MeteredTransport<T> {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send_text(text).await
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        self.inner.close(code).await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        let text = murmur_protocol::encode(event)?;
        let bytes = text.len();
        self.inner.send_text(text).await?;
        record_push(event.type_name(), bytes);
        Ok(())
    }
}

/// Offline hook that counts entries left for the backlog.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsNotifier;

#[async_trait]
impl OfflineNotifier for MetricsNotifier {
    async fn notify_offline(&self, target: Identity, event: &ServerEvent) {
        counter!(names::OFFLINE_TOTAL, "type" => event.type_name()).increment(1);
        debug!(identity = target, event = event.type_name(), "Target offline, left in backlog");
    }
}
