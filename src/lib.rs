//! # Splitplane
//!
//! An Envoy control plane that splits egress traffic between a default path
//! and a bypass path bound to a dedicated network interface.
//!
//! A small YAML file names the bypass interface and the domains that should
//! leave through it:
//!
//! ```yaml
//! interface: wlan0
//! urls:
//!   - "*.bank.com"
//! ```
//!
//! The file is watched for changes. Each real change is compiled into a fresh
//! set of clusters and listeners and published over xDS (ADS, CDS, LDS) to
//! the Envoy instance identified by the configured node id.
//!
//! ## Architecture
//!
//! ```text
//! file change -> ConfigWatcher -> handoff -> ControlLoop -> SnapshotCache -> xDS streams -> Envoy
//! ```

pub mod cli;
pub mod config;
pub mod control;
pub mod errors;
pub mod observability;
pub mod startup;
pub mod xds;

pub use config::{DesiredState, Settings};
pub use errors::{Error, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
