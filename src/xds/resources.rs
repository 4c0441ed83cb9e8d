//! Type URLs and helpers shared by the resource builders.

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

pub const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const DFP_FILTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.dynamic_forward_proxy.v3.FilterConfig";
pub const DFP_CLUSTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.clusters.dynamic_forward_proxy.v3.ClusterConfig";
pub const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";

/// Prefix for every resource name and stat prefix this control plane emits.
pub const RESOURCE_PREFIX: &str = "splitplane";

pub const DEFAULT_TLS_CLUSTER: &str = "splitplane-default-tls";
pub const DEFAULT_HTTP_CLUSTER: &str = "splitplane-default-http";
pub const BYPASS_TLS_CLUSTER: &str = "splitplane-bypass-tls";
pub const BYPASS_HTTP_CLUSTER: &str = "splitplane-bypass-http";
pub const HTTPS_LISTENER: &str = "splitplane-https-listener";
pub const HTTP_LISTENER: &str = "splitplane-http-listener";
pub const DNS_CACHE_NAME: &str = "splitplane-dns";

/// Every type this control plane serves, in push order.
pub const SUPPORTED_TYPE_URLS: [&str; 2] = [CLUSTER_TYPE_URL, LISTENER_TYPE_URL];

/// Pack a protobuf message into an `Any` with the given type URL.
pub fn any_from_message<M: Message>(type_url: &str, message: &M) -> Any {
    Any { type_url: type_url.to_string(), value: message.encode_to_vec() }
}

/// Short label for logs and metrics, e.g. `Cluster` for the cluster type URL.
pub fn short_type_name(type_url: &str) -> &str {
    type_url.rsplit('.').next().unwrap_or(type_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;

    #[test]
    fn any_round_trips_message_bytes() {
        let cluster = Cluster { name: DEFAULT_TLS_CLUSTER.to_string(), ..Default::default() };
        let any = any_from_message(CLUSTER_TYPE_URL, &cluster);

        assert_eq!(any.type_url, CLUSTER_TYPE_URL);
        let decoded = Cluster::decode(any.value.as_slice()).expect("decode");
        assert_eq!(decoded.name, DEFAULT_TLS_CLUSTER);
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name(CLUSTER_TYPE_URL), "Cluster");
        assert_eq!(short_type_name(LISTENER_TYPE_URL), "Listener");
        assert_eq!(short_type_name("plain"), "plain");
    }
}
