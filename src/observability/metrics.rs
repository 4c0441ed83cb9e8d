//! # Metrics Collection
//!
//! Prometheus metrics for the configuration pipeline and the discovery
//! server. Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use ::tracing::info;
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::errors::{Error, Result};

pub const CONFIG_RELOADS: &str = "splitplane_config_reloads_total";
pub const SNAPSHOT_INSTALLS: &str = "splitplane_snapshot_installs_total";
pub const XDS_CONNECTIONS: &str = "splitplane_xds_connections";
pub const XDS_RESPONSES: &str = "splitplane_xds_responses_total";
pub const XDS_NACKS: &str = "splitplane_xds_nacks_total";

/// Record a re-read of the configuration file (`changed`, `unchanged`, `error`).
pub fn record_config_reload(outcome: &'static str) {
    counter!(CONFIG_RELOADS, "outcome" => outcome).increment(1);
}

/// Record a snapshot install attempt for a node.
pub fn record_snapshot_install(node_id: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(SNAPSHOT_INSTALLS, "node_id" => node_id.to_string(), "status" => status).increment(1);
}

/// Track an xDS stream opening or closing.
pub fn record_xds_connection(connected: bool) {
    if connected {
        gauge!(XDS_CONNECTIONS).increment(1.0);
    } else {
        gauge!(XDS_CONNECTIONS).decrement(1.0);
    }
}

pub fn record_xds_response(type_url: &str) {
    counter!(XDS_RESPONSES, "type_url" => type_url.to_string()).increment(1);
}

pub fn record_xds_nack(type_url: &str) {
    counter!(XDS_NACKS, "type_url" => type_url.to_string()).increment(1);
}

fn describe_metrics() {
    describe_counter!(
        CONFIG_RELOADS,
        Unit::Count,
        "Configuration file re-reads grouped by outcome"
    );
    describe_counter!(
        SNAPSHOT_INSTALLS,
        Unit::Count,
        "Snapshots installed into the discovery cache"
    );
    describe_gauge!(XDS_CONNECTIONS, Unit::Count, "Open xDS discovery streams");
    describe_counter!(XDS_RESPONSES, Unit::Count, "Discovery responses sent by resource type");
    describe_counter!(XDS_NACKS, Unit::Count, "Discovery responses rejected by Envoy");
}

/// Install the Prometheus exporter when an address is configured.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(address: Option<SocketAddr>) -> Result<()> {
    let Some(address) = address else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(address)
        .add_global_label("service", "splitplane")
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    describe_metrics();

    info!(metrics_addr = %address, "Metrics collection initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_a_noop() {
        record_config_reload("changed");
        record_snapshot_install("split", true);
        record_xds_connection(true);
        record_xds_connection(false);
        record_xds_response("type.googleapis.com/envoy.config.cluster.v3.Cluster");
        record_xds_nack("type.googleapis.com/envoy.config.listener.v3.Listener");
    }

    #[test]
    fn disabled_metrics_install_nothing() {
        assert!(init_metrics(None).is_ok());
    }
}
