//! # Configuration Source
//!
//! Loads the declarative split configuration and turns it into a
//! [`DesiredState`]: the IPv4 address of the bypass interface plus the
//! deduplicated list of domains that should leave through it.
//!
//! ```yaml
//! interface: wlan0
//! urls:
//!   - "*.bank.com"
//!   - "*.example.org"
//! ```

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::ConfigError;

/// On-disk configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SplitConfig {
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Canonical state derived from the configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub bypass_ip: Ipv4Addr,
    pub domains: Vec<String>,
    pub changed: bool,
}

impl DesiredState {
    pub fn new(bypass_ip: Ipv4Addr, domains: Vec<String>) -> Self {
        Self { bypass_ip, domains, changed: true }
    }

    /// Content equality, ignoring the `changed` bookkeeping flag.
    pub fn same_content(&self, other: &DesiredState) -> bool {
        self.bypass_ip == other.bypass_ip && self.domains == other.domains
    }
}

/// Resolves the address used as egress source for bypass traffic.
pub trait InterfaceResolver: Send + Sync + std::fmt::Debug {
    /// First IPv4 address bound to `name`, in the order the system reports them.
    fn first_ipv4(&self, name: &str) -> Result<Ipv4Addr, ConfigError>;
}

/// Resolver backed by the host's interface table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceResolver for SystemInterfaces {
    fn first_ipv4(&self, name: &str) -> Result<Ipv4Addr, ConfigError> {
        let interfaces = if_addrs::get_if_addrs().map_err(ConfigError::Enumerate)?;

        let mut found = false;
        for iface in interfaces.iter().filter(|iface| iface.name == name) {
            found = true;
            if let IpAddr::V4(ip) = iface.ip() {
                debug!(
                    interface = %name,
                    index = ?iface.index,
                    ip = %ip,
                    "Found interface IPv4 address"
                );
                return Ok(ip);
            }
        }

        if found {
            Err(ConfigError::NoAddressBound(name.to_string()))
        } else {
            Err(ConfigError::InterfaceNotFound(name.to_string()))
        }
    }
}

/// Resolver over a fixed interface table, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticInterfaces {
    interfaces: HashMap<String, Vec<Ipv4Addr>>,
}

impl StaticInterfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(mut self, name: impl Into<String>, addresses: Vec<Ipv4Addr>) -> Self {
        self.interfaces.insert(name.into(), addresses);
        self
    }
}

impl InterfaceResolver for StaticInterfaces {
    fn first_ipv4(&self, name: &str) -> Result<Ipv4Addr, ConfigError> {
        let addresses = self
            .interfaces
            .get(name)
            .ok_or_else(|| ConfigError::InterfaceNotFound(name.to_string()))?;
        addresses.first().copied().ok_or_else(|| ConfigError::NoAddressBound(name.to_string()))
    }
}

/// Reads and validates the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    resolver: Arc<dyn InterfaceResolver>,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>, resolver: Arc<dyn InterfaceResolver>) -> Self {
        Self { path: path.into(), resolver }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file and parse it.
    pub fn load(&self) -> Result<DesiredState, ConfigError> {
        debug!(path = %self.path.display(), "Parsing config file");
        let raw = std::fs::read(&self.path)
            .map_err(|source| ConfigError::Read { path: self.path.clone(), source })?;
        self.parse(&raw)
    }

    /// Parse a raw document into a desired state.
    pub fn parse(&self, raw: &[u8]) -> Result<DesiredState, ConfigError> {
        let document: serde_yaml::Value = serde_yaml::from_slice(raw)?;
        if document.is_null() {
            return Err(ConfigError::MalformedInput(serde::de::Error::custom(
                "configuration document is empty",
            )));
        }
        let config: SplitConfig = serde_yaml::from_value(document)?;
        debug!(interface = %config.interface, urls = ?config.urls, "Parsed configuration");

        if config.interface.is_empty() {
            return Err(ConfigError::MissingInterface);
        }

        let bypass_ip = self.resolver.first_ipv4(&config.interface)?;
        info!(interface = %config.interface, ip = %bypass_ip, "Using IP for bypass");

        // "at least one" is the operative threshold
        if config.urls.is_empty() {
            return Err(ConfigError::InsufficientDomains);
        }

        Ok(DesiredState::new(bypass_ip, dedup(config.urls)))
    }
}

/// Remove duplicates, keeping the first occurrence of each entry.
pub fn dedup(input: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(input.len());
    input.into_iter().filter(|entry| seen.insert(entry.clone())).collect()
}
