//! # Process Settings
//!
//! Validated runtime settings derived from the command line.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use validator::Validate;

use crate::cli::Args;
use crate::errors::{Error, Result};

/// Ports of the two Envoy listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Validate)]
pub struct ListenerPorts {
    #[validate(range(min = 1, message = "HTTPS port must be between 1 and 65535"))]
    pub https: u16,

    #[validate(range(min = 1, message = "HTTP port must be between 1 and 65535"))]
    pub http: u16,
}

impl Default for ListenerPorts {
    fn default() -> Self {
        Self { https: 10000, http: 10001 }
    }
}

#[derive(Debug, Clone, Validate)]
pub struct Settings {
    /// Configuration file to watch
    pub config_path: PathBuf,

    /// Node id the snapshot is published under
    #[validate(length(min = 1, message = "Envoy id cannot be empty"))]
    pub node_id: String,

    #[validate(nested)]
    pub ports: ListenerPorts,

    /// xDS gRPC listen address
    pub grpc_address: SocketAddr,

    pub debug: bool,
    pub cleanup: bool,
    pub log_json: bool,
    pub metrics_address: Option<SocketAddr>,
}

impl Settings {
    pub fn from_args(args: Args) -> Result<Self> {
        let config_path = match args.conf {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => return Err(Error::config("a configuration file must be provided with --conf")),
        };

        let grpc_address = parse_address("--grpc", &args.grpc)?;
        let metrics_address = args
            .metrics_addr
            .as_deref()
            .map(|addr| parse_address("--metrics-addr", addr))
            .transpose()?;

        let settings = Self {
            config_path,
            node_id: args.envoy_id,
            ports: ListenerPorts { https: args.https_port, http: args.http_port },
            grpc_address,
            debug: args.debug,
            cleanup: args.cleanup,
            log_json: args.log_json,
            metrics_address,
        };
        settings.validate_all()?;
        Ok(settings)
    }

    /// Field validation plus cross-field checks
    pub fn validate_all(&self) -> Result<()> {
        Validate::validate(self)?;

        if self.ports.https == self.ports.http {
            return Err(Error::config("HTTPS and HTTP listener ports cannot be the same"));
        }

        Ok(())
    }
}

/// Expand a bare `:port` into an all-interfaces address.
pub fn normalize_bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

/// Parse `host:port`, resolving host names. IPv4 results are preferred.
fn parse_address(flag: &str, raw: &str) -> Result<SocketAddr> {
    let normalized = normalize_bind_address(raw);
    if let Ok(address) = normalized.parse::<SocketAddr>() {
        return Ok(address);
    }

    let resolved: Vec<SocketAddr> = normalized
        .to_socket_addrs()
        .map_err(|e| Error::config(format!("invalid address '{}' for {}: {}", raw, flag, e)))?
        .collect();

    resolved
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
        .ok_or_else(|| Error::config(format!("address '{}' for {} did not resolve", raw, flag)))
}
