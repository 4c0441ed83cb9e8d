//! Cluster specs and their conversion to Envoy clusters.
//!
//! Both discovery modes defer endpoint selection to Envoy: TLS traffic keeps
//! its original destination, HTTP traffic is resolved per request through the
//! dynamic forward proxy DNS cache.

use std::net::Ipv4Addr;

use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, CustomClusterType, DiscoveryType, DnsLookupFamily, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{socket_address, BindConfig, SocketAddress};
use envoy_types::pb::envoy::extensions::clusters::dynamic_forward_proxy::v3::{
    cluster_config::ClusterImplementationSpecifier, ClusterConfig,
};
use envoy_types::pb::envoy::extensions::common::dynamic_forward_proxy::v3::DnsCacheConfig;
use envoy_types::pb::google::protobuf::Duration;
use tracing::debug;

use crate::xds::resources::{any_from_message, DFP_CLUSTER_TYPE_URL, DNS_CACHE_NAME};

pub const DYNAMIC_FORWARD_PROXY_CLUSTER: &str = "envoy.clusters.dynamic_forward_proxy";
const CONNECT_TIMEOUT_SECONDS: i64 = 5;

/// How a cluster finds its upstream endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Forward to the connection's original destination address
    OriginalDestination,
    /// Resolve the request host through the shared DNS cache
    DynamicForwardProxy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub name: String,
    pub discovery: DiscoveryMode,
    /// Source address for upstream connections; set only on bypass clusters
    pub bind_address: Option<Ipv4Addr>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>, discovery: DiscoveryMode) -> Self {
        Self { name: name.into(), discovery, bind_address: None }
    }

    pub fn bound_to(mut self, address: Ipv4Addr) -> Self {
        self.bind_address = Some(address);
        self
    }

    pub fn to_envoy_cluster(&self) -> Cluster {
        debug!(cluster = %self.name, discovery = ?self.discovery, "Building Envoy cluster");

        let cluster_discovery_type = match self.discovery {
            DiscoveryMode::OriginalDestination => {
                ClusterDiscoveryType::Type(DiscoveryType::OriginalDst as i32)
            }
            DiscoveryMode::DynamicForwardProxy => {
                let config = ClusterConfig {
                    cluster_implementation_specifier: Some(
                        ClusterImplementationSpecifier::DnsCacheConfig(dns_cache_config()),
                    ),
                    ..Default::default()
                };
                ClusterDiscoveryType::ClusterType(CustomClusterType {
                    name: DYNAMIC_FORWARD_PROXY_CLUSTER.to_string(),
                    typed_config: Some(any_from_message(DFP_CLUSTER_TYPE_URL, &config)),
                })
            }
        };

        Cluster {
            name: self.name.clone(),
            connect_timeout: Some(Duration { seconds: CONNECT_TIMEOUT_SECONDS, nanos: 0 }),
            cluster_discovery_type: Some(cluster_discovery_type),
            lb_policy: LbPolicy::ClusterProvided as i32,
            dns_lookup_family: DnsLookupFamily::V4Only as i32,
            upstream_bind_config: self.bind_address.map(bind_config),
            ..Default::default()
        }
    }
}

/// DNS cache shared by the HTTP clusters and the HTTP filter.
pub fn dns_cache_config() -> DnsCacheConfig {
    DnsCacheConfig {
        name: DNS_CACHE_NAME.to_string(),
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        ..Default::default()
    }
}

fn bind_config(address: Ipv4Addr) -> BindConfig {
    BindConfig {
        source_address: Some(SocketAddress {
            address: address.to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(0)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn original_destination_cluster() {
        let cluster =
            ClusterSpec::new("tls", DiscoveryMode::OriginalDestination).to_envoy_cluster();

        assert_eq!(cluster.name, "tls");
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::OriginalDst as i32))
        );
        assert_eq!(cluster.lb_policy, LbPolicy::ClusterProvided as i32);
        assert_eq!(cluster.dns_lookup_family, DnsLookupFamily::V4Only as i32);
        assert_eq!(cluster.connect_timeout.map(|d| d.seconds), Some(5));
        assert!(cluster.upstream_bind_config.is_none());
    }

    #[test]
    fn dynamic_forward_proxy_cluster_carries_dns_cache() {
        let cluster =
            ClusterSpec::new("http", DiscoveryMode::DynamicForwardProxy).to_envoy_cluster();

        let Some(ClusterDiscoveryType::ClusterType(custom)) = cluster.cluster_discovery_type else {
            panic!("expected a custom cluster type");
        };
        assert_eq!(custom.name, DYNAMIC_FORWARD_PROXY_CLUSTER);

        let any = custom.typed_config.expect("typed config");
        assert_eq!(any.type_url, DFP_CLUSTER_TYPE_URL);
        let config = ClusterConfig::decode(any.value.as_slice()).expect("decode");
        match config.cluster_implementation_specifier {
            Some(ClusterImplementationSpecifier::DnsCacheConfig(cache)) => {
                assert_eq!(cache.name, DNS_CACHE_NAME);
                assert_eq!(cache.dns_lookup_family, DnsLookupFamily::V4Only as i32);
            }
            other => panic!("unexpected implementation: {other:?}"),
        }
    }

    #[test]
    fn bound_cluster_sets_source_address_with_ephemeral_port() {
        let cluster = ClusterSpec::new("bypass", DiscoveryMode::OriginalDestination)
            .bound_to(Ipv4Addr::new(10, 0, 0, 5))
            .to_envoy_cluster();

        let source = cluster
            .upstream_bind_config
            .and_then(|bind| bind.source_address)
            .expect("source address");
        assert_eq!(source.address, "10.0.0.5");
        assert_eq!(source.port_specifier, Some(socket_address::PortSpecifier::PortValue(0)));
    }
}
