//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.

use tracing_subscriber::EnvFilter;

/// Create a tracing span for xDS operations.
///
/// The single-argument form leaves `node_id` empty so it can be recorded once
/// the first discovery request identifies the node.
#[macro_export]
macro_rules! xds_span {
    ($operation:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = tracing::field::Empty,
            stream_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $node_id:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = %$node_id,
            stream_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = %$node_id,
            stream_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Default filter directive when `RUST_LOG` is not set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the `debug` flag. Installing twice is a
/// no-op so tests and embedders that already set a subscriber keep theirs.
pub fn init_logging(debug: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    // Subscriber already set elsewhere (e.g. integration tests); ignore.
    let _ = if json { builder.json().try_init() } else { builder.try_init() };
}

/// Log the effective settings at startup
pub fn log_settings(settings: &crate::config::Settings) {
    tracing::info!(
        conf = %settings.config_path.display(),
        node_id = %settings.node_id,
        https_port = settings.ports.https,
        http_port = settings.ports.http,
        grpc_address = %settings.grpc_address,
        metrics_enabled = settings.metrics_address.is_some(),
        "Splitplane control plane configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = xds_span!("stream_listeners");
        let _span = xds_span!("stream_clusters", "node-1");
        let _span = xds_span!("stream_aggregated", "node-1", type_url = "cds");
    }

    #[test]
    fn debug_flag_selects_directive() {
        assert_eq!(default_directive(true), "debug");
        assert_eq!(default_directive(false), "info");
    }

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(false, false);
        init_logging(true, true);
    }
}
