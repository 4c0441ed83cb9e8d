//! Discovery service implementations backed by the snapshot cache.

pub mod stream;

use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};
use uuid::Uuid;

use crate::xds::cache::SnapshotCache;
use crate::xds::resources::{CLUSTER_TYPE_URL, LISTENER_TYPE_URL, SUPPORTED_TYPE_URLS};

pub use stream::{run_stream_loop, DiscoveryResponseStream, StreamSession};

type DeltaStream =
    Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

/// ADS, CDS and LDS over one snapshot cache
#[derive(Debug, Clone)]
pub struct SplitDiscoveryService {
    cache: Arc<SnapshotCache>,
}

impl SplitDiscoveryService {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }

    /// Unary fetch of the current snapshot for the requesting node.
    pub fn fetch(
        &self,
        request: DiscoveryRequest,
        default_type_url: &'static str,
    ) -> std::result::Result<DiscoveryResponse, Status> {
        let node_id = request
            .node
            .as_ref()
            .map(|node| node.id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Status::invalid_argument("discovery request must identify a node"))?;

        let type_url = if request.type_url.is_empty() {
            default_type_url
        } else {
            request.type_url.as_str()
        };
        if !SUPPORTED_TYPE_URLS.contains(&type_url) {
            return Err(Status::invalid_argument(format!("unsupported resource type {}", type_url)));
        }

        let snapshot = self
            .cache
            .get_snapshot(node_id)
            .ok_or_else(|| Status::unavailable(format!("no snapshot for node {}", node_id)))?;

        debug!(
            node_id = %node_id,
            type_url = %type_url,
            version = %snapshot.version(),
            "Serving discovery fetch"
        );

        Ok(DiscoveryResponse {
            version_info: snapshot.version().to_string(),
            resources: snapshot.resources(type_url),
            type_url: type_url.to_string(),
            nonce: Uuid::new_v4().to_string(),
            ..Default::default()
        })
    }
}

fn delta_unimplemented() -> Status {
    Status::unimplemented("incremental xDS is not supported")
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for SplitDiscoveryService {
    type StreamAggregatedResourcesStream = DiscoveryResponseStream;
    type DeltaAggregatedResourcesStream = DeltaStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!(remote = ?request.remote_addr(), "New ADS stream connection established");
        Ok(Response::new(run_stream_loop(self.cache.clone(), request.into_inner(), None, "ADS")))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(delta_unimplemented())
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for SplitDiscoveryService {
    type StreamClustersStream = DiscoveryResponseStream;
    type DeltaClustersStream = DeltaStream;

    async fn stream_clusters(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamClustersStream>, Status> {
        info!(remote = ?request.remote_addr(), "New CDS stream connection established");
        Ok(Response::new(run_stream_loop(
            self.cache.clone(),
            request.into_inner(),
            Some(CLUSTER_TYPE_URL),
            "CDS",
        )))
    }

    async fn delta_clusters(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaClustersStream>, Status> {
        Err(delta_unimplemented())
    }

    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request.into_inner(), CLUSTER_TYPE_URL).map(Response::new)
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for SplitDiscoveryService {
    type StreamListenersStream = DiscoveryResponseStream;
    type DeltaListenersStream = DeltaStream;

    async fn stream_listeners(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamListenersStream>, Status> {
        info!(remote = ?request.remote_addr(), "New LDS stream connection established");
        Ok(Response::new(run_stream_loop(
            self.cache.clone(),
            request.into_inner(),
            Some(LISTENER_TYPE_URL),
            "LDS",
        )))
    }

    async fn delta_listeners(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaListenersStream>, Status> {
        Err(delta_unimplemented())
    }

    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request.into_inner(), LISTENER_TYPE_URL).map(Response::new)
    }
}
