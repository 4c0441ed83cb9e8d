//! Listener specs and their conversion to Envoy listeners.
//!
//! Two listener shapes exist:
//! - a TLS listener that splits connections by SNI server name into TCP
//!   proxy filter chains, and
//! - an HTTP listener that splits requests by host header through virtual
//!   hosts of an inline route table.
//!
//! In both, ordering matters: specific matches are listed before the
//! unconditional fallback.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, listener_filter, Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::config::route::v3::{
    route, route_action::ClusterSpecifier as RouteClusterSpecifier, route_match::PathSpecifier,
    Route, RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::http::dynamic_forward_proxy::v3::{
    filter_config::ImplementationSpecifier, FilterConfig as DynamicForwardProxyConfig,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    http_filter, HttpConnectionManager, HttpFilter,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier as TcpClusterSpecifier, TcpProxy,
};
use envoy_types::pb::google::protobuf::{BoolValue, Duration};
use tracing::debug;

use crate::xds::cluster::dns_cache_config;
use crate::xds::resources::{
    any_from_message, DFP_FILTER_TYPE_URL, HTTP_CONNECTION_MANAGER_TYPE_URL, RESOURCE_PREFIX,
    ROUTER_TYPE_URL, TCP_PROXY_TYPE_URL, TLS_INSPECTOR_TYPE_URL,
};

pub const TCP_PROXY_FILTER: &str = "envoy.filters.network.tcp_proxy";
pub const HTTP_CONNECTION_MANAGER_FILTER: &str = "envoy.filters.network.http_connection_manager";
pub const TLS_INSPECTOR_FILTER: &str = "envoy.filters.listener.tls_inspector";
pub const DYNAMIC_FORWARD_PROXY_FILTER: &str = "envoy.filters.http.dynamic_forward_proxy";
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";

const LISTEN_ADDRESS: &str = "0.0.0.0";
const STREAM_IDLE_TIMEOUT_SECONDS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub name: String,
    pub port: u16,
    pub kind: ListenerKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerKind {
    /// Split TLS connections by server name; chains are matched in order
    TcpSniSplit { filter_chains: Vec<FilterChainSpec> },
    /// Split HTTP requests by host; virtual hosts are listed in order
    HttpHostSplit { virtual_hosts: Vec<VirtualHostSpec> },
}

/// A TCP proxy chain. Empty `server_names` means the chain matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChainSpec {
    pub server_names: Vec<String>,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHostSpec {
    pub name: String,
    pub domains: Vec<String>,
    pub cluster: String,
}

impl ListenerSpec {
    /// Names of every cluster this listener routes to, in chain/virtual host order.
    pub fn referenced_clusters(&self) -> Vec<&str> {
        match &self.kind {
            ListenerKind::TcpSniSplit { filter_chains } => {
                filter_chains.iter().map(|chain| chain.cluster.as_str()).collect()
            }
            ListenerKind::HttpHostSplit { virtual_hosts } => {
                virtual_hosts.iter().map(|vhost| vhost.cluster.as_str()).collect()
            }
        }
    }

    pub fn to_envoy_listener(&self) -> Listener {
        debug!(listener = %self.name, port = self.port, "Building Envoy listener");

        let address = Address {
            address: Some(AddressType::SocketAddress(SocketAddress {
                address: LISTEN_ADDRESS.to_string(),
                port_specifier: Some(socket_address::PortSpecifier::PortValue(u32::from(
                    self.port,
                ))),
                ..Default::default()
            })),
        };

        match &self.kind {
            ListenerKind::TcpSniSplit { filter_chains } => Listener {
                name: self.name.clone(),
                address: Some(address),
                use_original_dst: Some(BoolValue { value: true }),
                listener_filters: vec![tls_inspector()],
                filter_chains: filter_chains
                    .iter()
                    .map(FilterChainSpec::to_envoy_filter_chain)
                    .collect(),
                ..Default::default()
            },
            ListenerKind::HttpHostSplit { virtual_hosts } => Listener {
                name: self.name.clone(),
                address: Some(address),
                filter_chains: vec![http_filter_chain(virtual_hosts)],
                ..Default::default()
            },
        }
    }
}

impl FilterChainSpec {
    fn to_envoy_filter_chain(&self) -> FilterChain {
        let tcp_proxy = TcpProxy {
            stat_prefix: RESOURCE_PREFIX.to_string(),
            cluster_specifier: Some(TcpClusterSpecifier::Cluster(self.cluster.clone())),
            ..Default::default()
        };

        let filter_chain_match = if self.server_names.is_empty() {
            None
        } else {
            Some(FilterChainMatch { server_names: self.server_names.clone(), ..Default::default() })
        };

        FilterChain {
            filter_chain_match,
            filters: vec![Filter {
                name: TCP_PROXY_FILTER.to_string(),
                config_type: Some(filter::ConfigType::TypedConfig(any_from_message(
                    TCP_PROXY_TYPE_URL,
                    &tcp_proxy,
                ))),
            }],
            ..Default::default()
        }
    }
}

impl VirtualHostSpec {
    fn to_envoy_virtual_host(&self) -> VirtualHost {
        VirtualHost {
            name: self.name.clone(),
            domains: self.domains.clone(),
            routes: vec![Route {
                r#match: Some(RouteMatch {
                    path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
                    ..Default::default()
                }),
                action: Some(route::Action::Route(RouteAction {
                    cluster_specifier: Some(RouteClusterSpecifier::Cluster(self.cluster.clone())),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

fn tls_inspector() -> ListenerFilter {
    ListenerFilter {
        name: TLS_INSPECTOR_FILTER.to_string(),
        config_type: Some(listener_filter::ConfigType::TypedConfig(any_from_message(
            TLS_INSPECTOR_TYPE_URL,
            &TlsInspector::default(),
        ))),
        ..Default::default()
    }
}

fn http_filter_chain(virtual_hosts: &[VirtualHostSpec]) -> FilterChain {
    let dynamic_forward_proxy = DynamicForwardProxyConfig {
        implementation_specifier: Some(ImplementationSpecifier::DnsCacheConfig(dns_cache_config())),
        ..Default::default()
    };

    let hcm = HttpConnectionManager {
        stat_prefix: RESOURCE_PREFIX.to_string(),
        codec_type: CodecType::Auto as i32,
        stream_idle_timeout: Some(Duration { seconds: STREAM_IDLE_TIMEOUT_SECONDS, nanos: 0 }),
        http_filters: vec![
            HttpFilter {
                name: DYNAMIC_FORWARD_PROXY_FILTER.to_string(),
                config_type: Some(http_filter::ConfigType::TypedConfig(any_from_message(
                    DFP_FILTER_TYPE_URL,
                    &dynamic_forward_proxy,
                ))),
                ..Default::default()
            },
            HttpFilter {
                name: ROUTER_FILTER.to_string(),
                config_type: Some(http_filter::ConfigType::TypedConfig(any_from_message(
                    ROUTER_TYPE_URL,
                    &Router::default(),
                ))),
                ..Default::default()
            },
        ],
        route_specifier: Some(RouteSpecifier::RouteConfig(RouteConfiguration {
            name: format!("{}-routes", RESOURCE_PREFIX),
            virtual_hosts: virtual_hosts
                .iter()
                .map(VirtualHostSpec::to_envoy_virtual_host)
                .collect(),
            ..Default::default()
        })),
        ..Default::default()
    };

    FilterChain {
        filters: vec![Filter {
            name: HTTP_CONNECTION_MANAGER_FILTER.to_string(),
            config_type: Some(filter::ConfigType::TypedConfig(any_from_message(
                HTTP_CONNECTION_MANAGER_TYPE_URL,
                &hcm,
            ))),
        }],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn tls_spec() -> ListenerSpec {
        ListenerSpec {
            name: "tls".into(),
            port: 10000,
            kind: ListenerKind::TcpSniSplit {
                filter_chains: vec![
                    FilterChainSpec {
                        server_names: vec!["*.bank.com".into()],
                        cluster: "bypass".into(),
                    },
                    FilterChainSpec { server_names: Vec::new(), cluster: "default".into() },
                ],
            },
        }
    }

    fn http_spec() -> ListenerSpec {
        ListenerSpec {
            name: "http".into(),
            port: 10001,
            kind: ListenerKind::HttpHostSplit {
                virtual_hosts: vec![
                    VirtualHostSpec {
                        name: "bypass".into(),
                        domains: vec!["*.bank.com".into()],
                        cluster: "bypass-http".into(),
                    },
                    VirtualHostSpec {
                        name: "default".into(),
                        domains: vec!["*".into()],
                        cluster: "default-http".into(),
                    },
                ],
            },
        }
    }

    fn tcp_proxy_cluster(chain: &FilterChain) -> String {
        let Some(filter::ConfigType::TypedConfig(any)) = &chain.filters[0].config_type else {
            panic!("expected typed config");
        };
        assert_eq!(any.type_url, TCP_PROXY_TYPE_URL);
        match TcpProxy::decode(any.value.as_slice()).expect("decode").cluster_specifier {
            Some(TcpClusterSpecifier::Cluster(name)) => name,
            other => panic!("unexpected cluster specifier: {other:?}"),
        }
    }

    #[test]
    fn tls_listener_matches_server_names_before_fallback() {
        let listener = tls_spec().to_envoy_listener();

        assert_eq!(listener.use_original_dst, Some(BoolValue { value: true }));
        assert_eq!(listener.listener_filters.len(), 1);
        assert_eq!(listener.listener_filters[0].name, TLS_INSPECTOR_FILTER);

        assert_eq!(listener.filter_chains.len(), 2);
        let first = &listener.filter_chains[0];
        assert_eq!(
            first.filter_chain_match.as_ref().map(|m| m.server_names.clone()),
            Some(vec!["*.bank.com".to_string()])
        );
        assert_eq!(tcp_proxy_cluster(first), "bypass");

        let fallback = &listener.filter_chains[1];
        assert!(fallback.filter_chain_match.is_none());
        assert_eq!(tcp_proxy_cluster(fallback), "default");
    }

    #[test]
    fn listener_binds_all_interfaces_on_port() {
        let listener = tls_spec().to_envoy_listener();
        let Some(AddressType::SocketAddress(socket)) = listener.address.and_then(|a| a.address)
        else {
            panic!("expected socket address");
        };
        assert_eq!(socket.address, "0.0.0.0");
        assert_eq!(socket.port_specifier, Some(socket_address::PortSpecifier::PortValue(10000)));
    }

    #[test]
    fn http_listener_builds_connection_manager() {
        let listener = http_spec().to_envoy_listener();
        assert!(listener.use_original_dst.is_none());
        assert_eq!(listener.filter_chains.len(), 1);

        let filter = &listener.filter_chains[0].filters[0];
        assert_eq!(filter.name, HTTP_CONNECTION_MANAGER_FILTER);
        let Some(filter::ConfigType::TypedConfig(any)) = &filter.config_type else {
            panic!("expected typed config");
        };
        let hcm = HttpConnectionManager::decode(any.value.as_slice()).expect("decode");

        assert_eq!(hcm.stream_idle_timeout.map(|d| d.seconds), Some(300));
        let filter_names: Vec<_> = hcm.http_filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(filter_names, vec![DYNAMIC_FORWARD_PROXY_FILTER, ROUTER_FILTER]);

        let Some(RouteSpecifier::RouteConfig(routes)) = hcm.route_specifier else {
            panic!("expected inline route configuration");
        };
        let hosts: Vec<_> =
            routes.virtual_hosts.iter().map(|v| (v.name.as_str(), v.domains.clone())).collect();
        assert_eq!(
            hosts,
            vec![("bypass", vec!["*.bank.com".to_string()]), ("default", vec!["*".to_string()])]
        );
    }

    #[test]
    fn referenced_clusters_follow_declaration_order() {
        assert_eq!(tls_spec().referenced_clusters(), vec!["bypass", "default"]);
        assert_eq!(http_spec().referenced_clusters(), vec!["bypass-http", "default-http"]);
    }
}
