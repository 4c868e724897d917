//! Prometheus metrics for the proxy.
//!
//! A `Recorder` trait with a no-op implementation keeps the disabled path
//! free of overhead; the Prometheus recorder emits through the `metrics`
//! facade and `create_recorder` installs the HTTP exporter when enabled.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::Error;

/// Interface shared by the noop and Prometheus recorders.
pub trait Recorder: Send + Sync {
    /// One processed item, labeled by governor mode.
    fn record_request(&self, tool: &str, server: &str, mode: &str);
    /// Token counts before and after condensing.
    fn record_tokens(&self, tool: &str, server: &str, input_tokens: usize, output_tokens: usize);
    /// output/input ratio per item (lower = better).
    fn record_compression_ratio(&self, tool: &str, server: &str, ratio: f64);
    /// Wall clock time per condensed item.
    fn record_processing_seconds(&self, tool: &str, server: &str, seconds: f64);
    /// One token-limit truncation event.
    fn record_truncation(&self, tool: &str, server: &str);
}

/// All methods are no-ops.
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record_request(&self, _tool: &str, _server: &str, _mode: &str) {}
    fn record_tokens(&self, _tool: &str, _server: &str, _input_tokens: usize, _output_tokens: usize) {}
    fn record_compression_ratio(&self, _tool: &str, _server: &str, _ratio: f64) {}
    fn record_processing_seconds(&self, _tool: &str, _server: &str, _seconds: f64) {}
    fn record_truncation(&self, _tool: &str, _server: &str) {}
}

/// Emits through the `metrics` facade; pair with the Prometheus exporter
/// installed by `create_recorder`.
pub struct PrometheusRecorder;

impl Recorder for PrometheusRecorder {
    fn record_request(&self, tool: &str, server: &str, mode: &str) {
        counter!(
            "requests_total",
            "tool" => tool.to_string(),
            "server" => server.to_string(),
            "mode" => mode.to_string()
        )
        .increment(1);
    }

    fn record_tokens(&self, tool: &str, server: &str, input_tokens: usize, output_tokens: usize) {
        counter!(
            "input_tokens_total",
            "tool" => tool.to_string(),
            "server" => server.to_string()
        )
        .increment(input_tokens as u64);
        counter!(
            "output_tokens_total",
            "tool" => tool.to_string(),
            "server" => server.to_string()
        )
        .increment(output_tokens as u64);
        if input_tokens > output_tokens {
            counter!(
                "saved_tokens_total",
                "tool" => tool.to_string(),
                "server" => server.to_string()
            )
            .increment((input_tokens - output_tokens) as u64);
        }
    }

    fn record_compression_ratio(&self, tool: &str, server: &str, ratio: f64) {
        histogram!(
            "compression_ratio",
            "tool" => tool.to_string(),
            "server" => server.to_string()
        )
        .record(ratio);
    }

    fn record_processing_seconds(&self, tool: &str, server: &str, seconds: f64) {
        histogram!(
            "processing_seconds",
            "tool" => tool.to_string(),
            "server" => server.to_string()
        )
        .record(seconds);
    }

    fn record_truncation(&self, tool: &str, server: &str) {
        counter!(
            "truncations_total",
            "tool" => tool.to_string(),
            "server" => server.to_string()
        )
        .increment(1);
    }
}

/// Start the exporter and return the recorder to use. Disabled metrics cost
/// nothing.
pub fn create_recorder(enabled: bool, host: &str, port: u16) -> Result<Arc<dyn Recorder>, Error> {
    if !enabled {
        return Ok(Arc::new(NoopRecorder));
    }

    let ip: IpAddr = host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(ip, port))
        .install()
        .map_err(|e| Error::BadConfig(format!("cannot start metrics exporter on port {port}: {e}")))?;
    Ok(Arc::new(PrometheusRecorder))
}
