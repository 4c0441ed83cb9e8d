//! # Command Line Interface
//!
//! Process flags for the splitplane control plane. Every flag can also be
//! supplied through a `SPLITPLANE_*` environment variable.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "splitplane")]
#[command(about = "Envoy control plane splitting egress between a default and a bypass interface")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Path to the split configuration file
    #[arg(long, env = "SPLITPLANE_CONF")]
    pub conf: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "SPLITPLANE_DEBUG")]
    pub debug: bool,

    /// Node id of the Envoy instance to configure
    #[arg(long, env = "SPLITPLANE_ENVOY_ID", default_value = "split")]
    pub envoy_id: String,

    /// Port of the Envoy HTTPS listener
    #[arg(long, env = "SPLITPLANE_HTTPS_PORT", default_value_t = 10000)]
    pub https_port: u16,

    /// Port of the Envoy HTTP listener
    #[arg(long, env = "SPLITPLANE_HTTP_PORT", default_value_t = 10001)]
    pub http_port: u16,

    /// Listen address of the xDS gRPC server
    #[arg(long, env = "SPLITPLANE_GRPC", default_value = ":18000")]
    pub grpc: String,

    /// Clean up on exit
    #[arg(long, env = "SPLITPLANE_CLEANUP")]
    pub cleanup: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "SPLITPLANE_LOG_JSON")]
    pub log_json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "SPLITPLANE_METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args =
            Args::try_parse_from(["splitplane", "--conf", "/etc/split.yaml"]).expect("parse");
        assert_eq!(args.conf, Some(PathBuf::from("/etc/split.yaml")));
        assert_eq!(args.envoy_id, "split");
        assert_eq!(args.https_port, 10000);
        assert_eq!(args.http_port, 10001);
        assert_eq!(args.grpc, ":18000");
        assert!(!args.debug);
        assert!(!args.cleanup);
        assert!(args.metrics_addr.is_none());
    }

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "splitplane",
            "--conf",
            "split.yaml",
            "--debug",
            "--envoy-id",
            "edge",
            "--https-port",
            "8443",
            "--http-port",
            "8080",
            "--grpc",
            "127.0.0.1:9000",
            "--cleanup",
        ])
        .expect("parse");

        assert!(args.debug);
        assert!(args.cleanup);
        assert_eq!(args.envoy_id, "edge");
        assert_eq!(args.https_port, 8443);
        assert_eq!(args.http_port, 8080);
        assert_eq!(args.grpc, "127.0.0.1:9000");
    }

    #[test]
    fn rejects_non_numeric_ports() {
        assert!(Args::try_parse_from(["splitplane", "--https-port", "web"]).is_err());
    }
}
