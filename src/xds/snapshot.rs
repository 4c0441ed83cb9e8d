//! # Snapshot Builder
//!
//! Compiles a [`DesiredState`] into the complete resource set served to Envoy
//! and wraps it into a versioned, immutable [`Snapshot`].
//!
//! The build is pure: equal inputs produce equal resources. Only the version
//! stamp differs between two builds of the same state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::{filter, Listener};
use envoy_types::pb::envoy::config::route::v3::{route, route_action};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{tcp_proxy, TcpProxy};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::debug;

use crate::config::{DesiredState, ListenerPorts};
use crate::errors::{Error, Result};
use crate::xds::cluster::{ClusterSpec, DiscoveryMode};
use crate::xds::domain_filter::filter_wildcard_domains;
use crate::xds::listener::{FilterChainSpec, ListenerKind, ListenerSpec, VirtualHostSpec};
use crate::xds::resources::{
    any_from_message, BYPASS_HTTP_CLUSTER, BYPASS_TLS_CLUSTER, CLUSTER_TYPE_URL,
    DEFAULT_HTTP_CLUSTER, DEFAULT_TLS_CLUSTER, HTTPS_LISTENER, HTTP_CONNECTION_MANAGER_TYPE_URL,
    HTTP_LISTENER, LISTENER_TYPE_URL, TCP_PROXY_TYPE_URL,
};

static VERSION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Envoy resources for one control cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    pub clusters: Vec<Cluster>,
    pub listeners: Vec<Listener>,
}

/// The four clusters: TLS and HTTP, each with a default and a bypass variant.
pub fn cluster_specs(state: &DesiredState) -> Vec<ClusterSpec> {
    vec![
        ClusterSpec::new(DEFAULT_TLS_CLUSTER, DiscoveryMode::OriginalDestination),
        ClusterSpec::new(BYPASS_TLS_CLUSTER, DiscoveryMode::OriginalDestination)
            .bound_to(state.bypass_ip),
        ClusterSpec::new(DEFAULT_HTTP_CLUSTER, DiscoveryMode::DynamicForwardProxy),
        ClusterSpec::new(BYPASS_HTTP_CLUSTER, DiscoveryMode::DynamicForwardProxy)
            .bound_to(state.bypass_ip),
    ]
}

/// The HTTPS and HTTP listeners. Bypass matchers are omitted when no domain
/// survives filtering.
pub fn listener_specs(state: &DesiredState, ports: ListenerPorts) -> Vec<ListenerSpec> {
    let bypass_domains = filter_wildcard_domains(state.domains.as_slice());
    debug!(domains = ?bypass_domains, "Using filtered bypass domains");

    let mut filter_chains = Vec::with_capacity(2);
    let mut virtual_hosts = Vec::with_capacity(2);

    if !bypass_domains.is_empty() {
        filter_chains.push(FilterChainSpec {
            server_names: bypass_domains.clone(),
            cluster: BYPASS_TLS_CLUSTER.to_string(),
        });
        virtual_hosts.push(VirtualHostSpec {
            name: "bypass".to_string(),
            domains: bypass_domains,
            cluster: BYPASS_HTTP_CLUSTER.to_string(),
        });
    }

    filter_chains.push(FilterChainSpec {
        server_names: Vec::new(),
        cluster: DEFAULT_TLS_CLUSTER.to_string(),
    });
    virtual_hosts.push(VirtualHostSpec {
        name: "default".to_string(),
        domains: vec!["*".to_string()],
        cluster: DEFAULT_HTTP_CLUSTER.to_string(),
    });

    vec![
        ListenerSpec {
            name: HTTPS_LISTENER.to_string(),
            port: ports.https,
            kind: ListenerKind::TcpSniSplit { filter_chains },
        },
        ListenerSpec {
            name: HTTP_LISTENER.to_string(),
            port: ports.http,
            kind: ListenerKind::HttpHostSplit { virtual_hosts },
        },
    ]
}

/// Compile the desired state into Envoy resources.
pub fn build_resources(state: &DesiredState, ports: ListenerPorts) -> ResourceSet {
    ResourceSet {
        clusters: cluster_specs(state).iter().map(ClusterSpec::to_envoy_cluster).collect(),
        listeners: listener_specs(state, ports)
            .iter()
            .map(ListenerSpec::to_envoy_listener)
            .collect(),
    }
}

/// A fresh, process-unique snapshot version.
///
/// An RFC 3339 UTC timestamp with nanosecond precision, suffixed with a
/// sequence number so two versions never collide.
pub fn next_version() -> String {
    let sequence = VERSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true), sequence)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    version: String,
    resources: ResourceSet,
}

impl Snapshot {
    pub fn new(version: impl Into<String>, resources: ResourceSet) -> Self {
        Self { version: version.into(), resources }
    }

    /// Build a snapshot stamped with [`next_version`].
    pub fn from_state(state: &DesiredState, ports: ListenerPorts) -> Self {
        Self::new(next_version(), build_resources(state, ports))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.resources.clusters
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.resources.listeners
    }

    /// Encoded resources of one type; empty for unsupported types.
    pub fn resources(&self, type_url: &str) -> Vec<Any> {
        match type_url {
            CLUSTER_TYPE_URL => {
                self.clusters().iter().map(|c| any_from_message(CLUSTER_TYPE_URL, c)).collect()
            }
            LISTENER_TYPE_URL => {
                self.listeners().iter().map(|l| any_from_message(LISTENER_TYPE_URL, l)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Check that resource names are unique per type and that every cluster
    /// a listener routes to is part of the snapshot.
    pub fn validate(&self) -> Result<()> {
        let mut clusters = HashSet::new();
        for cluster in self.clusters() {
            if !clusters.insert(cluster.name.as_str()) {
                return Err(Error::xds(format!(
                    "duplicate cluster '{}' in snapshot {}",
                    cluster.name, self.version
                )));
            }
        }

        let mut listeners = HashSet::new();
        for listener in self.listeners() {
            if !listeners.insert(listener.name.as_str()) {
                return Err(Error::xds(format!(
                    "duplicate listener '{}' in snapshot {}",
                    listener.name, self.version
                )));
            }

            for referenced in referenced_clusters(listener)? {
                if !clusters.contains(referenced.as_str()) {
                    return Err(Error::xds(format!(
                        "listener '{}' references unknown cluster '{}'",
                        listener.name, referenced
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Clusters referenced by TCP proxy filters and inline routes of a listener.
fn referenced_clusters(listener: &Listener) -> Result<Vec<String>> {
    let mut referenced = Vec::new();

    for chain in &listener.filter_chains {
        for network_filter in &chain.filters {
            let Some(filter::ConfigType::TypedConfig(any)) = &network_filter.config_type else {
                continue;
            };

            match any.type_url.as_str() {
                TCP_PROXY_TYPE_URL => {
                    let proxy = TcpProxy::decode(any.value.as_slice()).map_err(|e| {
                        Error::xds(format!("invalid tcp proxy in '{}': {}", listener.name, e))
                    })?;
                    if let Some(tcp_proxy::ClusterSpecifier::Cluster(name)) =
                        proxy.cluster_specifier
                    {
                        referenced.push(name);
                    }
                }
                HTTP_CONNECTION_MANAGER_TYPE_URL => {
                    let hcm = HttpConnectionManager::decode(any.value.as_slice()).map_err(|e| {
                        Error::xds(format!(
                            "invalid connection manager in '{}': {}",
                            listener.name, e
                        ))
                    })?;
                    if let Some(RouteSpecifier::RouteConfig(routes)) = hcm.route_specifier {
                        let actions = routes
                            .virtual_hosts
                            .into_iter()
                            .flat_map(|vhost| vhost.routes)
                            .filter_map(|r| r.action);
                        for action in actions {
                            if let route::Action::Route(route_action) = action {
                                if let Some(route_action::ClusterSpecifier::Cluster(name)) =
                                    route_action.cluster_specifier
                                {
                                    referenced.push(name);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(referenced)
}
