//! # xDS Control Plane
//!
//! Envoy resource construction and the discovery services that serve it.
//!
//! - [`domain_filter`] narrows configured domains to usable wildcard matchers
//! - [`cluster`] and [`listener`] turn logical specs into Envoy protobufs
//! - [`snapshot`] compiles a desired state into a versioned snapshot
//! - [`cache`] stores the latest snapshot per node
//! - [`services`] and [`server`] expose ADS, CDS and LDS over gRPC

pub mod cache;
pub mod cluster;
pub mod domain_filter;
pub mod listener;
pub mod resources;
pub mod server;
pub mod services;
pub mod snapshot;

pub use cache::{SnapshotCache, SnapshotSink};
pub use cluster::{ClusterSpec, DiscoveryMode};
pub use domain_filter::filter_wildcard_domains;
pub use listener::{FilterChainSpec, ListenerKind, ListenerSpec, VirtualHostSpec};
pub use services::SplitDiscoveryService;
pub use snapshot::{build_resources, next_version, ResourceSet, Snapshot};
