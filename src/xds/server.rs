//! xDS gRPC server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::errors::{Error, Result};
use crate::xds::cache::SnapshotCache;
use crate::xds::services::SplitDiscoveryService;

/// Bind the discovery listener.
///
/// Binding happens up front so an unavailable address fails startup instead
/// of surfacing later from the serving task.
pub async fn bind(address: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(address).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            Error::transport(format!(
                "XDS server failed to bind to {}: port {} is already in use",
                address,
                address.port()
            ))
        } else {
            Error::transport(format!("XDS server failed to bind to {}: {}", address, e))
        }
    })
}

/// Serve ADS, CDS and LDS on `listener` until `shutdown_signal` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    cache: Arc<SnapshotCache>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    let service = SplitDiscoveryService::new(cache);

    info!(address = %local_addr, "XDS server listening");

    Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(service.clone()))
        .add_service(ClusterDiscoveryServiceServer::new(service.clone()))
        .add_service(ListenerDiscoveryServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown_signal)
        .await
        .map_err(|e| Error::transport(format!("XDS server failed: {}", e)))?;

    info!("XDS server stopped");
    Ok(())
}
