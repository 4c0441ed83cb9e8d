//! State of the World xDS stream handling.
//!
//! Every stream runs as a single task that selects between incoming
//! discovery requests and snapshot replacements for the stream's node:
//!
//! 1. **Initial request**: answered right away when a snapshot exists and its
//!    version differs from the request's `version_info`, otherwise held.
//! 2. **ACK/NACK**: a request echoing the last sent nonce. Neither causes a
//!    resend on its own; a response follows only if a newer snapshot exists.
//! 3. **Stale request**: a nonce other than the last one sent for that type
//!    is ignored.
//! 4. **Push**: when the node's snapshot is replaced, every subscribed type
//!    whose last sent version differs is pushed, clusters before listeners.

use std::collections::BTreeMap;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::observability::metrics;
use crate::xds::cache::{SnapshotCache, SnapshotReceiver};
use crate::xds::resources::{short_type_name, SUPPORTED_TYPE_URLS};
use crate::xds::snapshot::Snapshot;

pub type DiscoveryResponseStream = ReceiverStream<std::result::Result<DiscoveryResponse, Status>>;

/// Last version and nonce sent for one resource type
#[derive(Clone, Debug, Default)]
struct LastDiscoverySnapshot {
    version: Option<String>,
    nonce: Option<String>,
}

/// Per-stream protocol state, independent of transport.
#[derive(Debug)]
pub struct StreamSession {
    label: &'static str,
    default_type_url: Option<&'static str>,
    node_id: Option<String>,
    subscriptions: BTreeMap<String, LastDiscoverySnapshot>,
}

impl StreamSession {
    pub fn new(label: &'static str, default_type_url: Option<&'static str>) -> Self {
        Self { label, default_type_url, node_id: None, subscriptions: BTreeMap::new() }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Remember the node id from the first request that carries one.
    ///
    /// Returns the node id when it was learned by this call.
    pub fn observe_node(&mut self, request: &DiscoveryRequest) -> Option<String> {
        if self.node_id.is_some() {
            return None;
        }
        let id = request.node.as_ref().map(|node| node.id.clone()).filter(|id| !id.is_empty())?;
        self.node_id = Some(id.clone());
        Some(id)
    }

    /// Process one request against the current snapshot.
    pub fn handle_request(
        &mut self,
        request: DiscoveryRequest,
        snapshot: Option<&Snapshot>,
    ) -> Option<DiscoveryResponse> {
        let type_url = if request.type_url.is_empty() {
            match self.default_type_url {
                Some(default) => default.to_string(),
                None => {
                    warn!(
                        stream = %self.label,
                        "Discovery request without type URL on aggregated stream"
                    );
                    return None;
                }
            }
        } else {
            request.type_url.clone()
        };

        if !SUPPORTED_TYPE_URLS.contains(&type_url.as_str()) {
            warn!(
                stream = %self.label,
                type_url = %type_url,
                "Ignoring request for unsupported resource type"
            );
            return None;
        }

        let label = self.label;
        let last = self.subscriptions.entry(type_url.clone()).or_default();

        if !request.response_nonce.is_empty() {
            if last.nonce.as_deref() != Some(request.response_nonce.as_str()) {
                debug!(
                    stream = %label,
                    type_url = %type_url,
                    nonce = %request.response_nonce,
                    "Ignoring discovery request with stale nonce"
                );
                return None;
            }

            if let Some(error_detail) = request.error_detail.as_ref() {
                metrics::record_xds_nack(&type_url);
                warn!(
                    stream = %label,
                    type_url = %type_url,
                    nonce = %request.response_nonce,
                    rejected_version = ?last.version,
                    error_code = error_detail.code,
                    error_message = %error_detail.message,
                    "[NACK] Envoy rejected previous response"
                );
            } else {
                debug!(
                    stream = %label,
                    type_url = %type_url,
                    version = %request.version_info,
                    nonce = %request.response_nonce,
                    "[ACK] Envoy accepted previous response"
                );
            }

            return match snapshot {
                Some(snapshot) if last.version.as_deref() != Some(snapshot.version()) => {
                    Some(respond(label, &type_url, snapshot, last))
                }
                _ => None,
            };
        }

        match snapshot {
            Some(snapshot) if snapshot.version() != request.version_info => {
                Some(respond(label, &type_url, snapshot, last))
            }
            Some(_) => {
                debug!(
                    stream = %label,
                    type_url = %type_url,
                    version = %request.version_info,
                    "Envoy already has the current version"
                );
                last.version = Some(request.version_info);
                None
            }
            None => {
                debug!(stream = %label, type_url = %type_url, "No snapshot yet, holding request");
                None
            }
        }
    }

    /// Responses for every subscribed type that is behind `snapshot`.
    pub fn push(&mut self, snapshot: &Snapshot) -> Vec<DiscoveryResponse> {
        let label = self.label;
        self.subscriptions
            .iter_mut()
            .filter(|(_, last)| last.version.as_deref() != Some(snapshot.version()))
            .map(|(type_url, last)| respond(label, type_url, snapshot, last))
            .collect()
    }
}

fn respond(
    label: &str,
    type_url: &str,
    snapshot: &Snapshot,
    last: &mut LastDiscoverySnapshot,
) -> DiscoveryResponse {
    let response = DiscoveryResponse {
        version_info: snapshot.version().to_string(),
        resources: snapshot.resources(type_url),
        type_url: type_url.to_string(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    };

    info!(
        stream = %label,
        type_url = %short_type_name(type_url),
        version = %response.version_info,
        nonce = %response.nonce,
        resource_count = response.resources.len(),
        "Sending discovery response"
    );
    metrics::record_xds_response(type_url);

    last.version = Some(response.version_info.clone());
    last.nonce = Some(response.nonce.clone());
    response
}

async fn snapshot_changed(
    receiver: &mut Option<SnapshotReceiver>,
) -> Result<(), watch::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.changed().await,
        None => std::future::pending().await,
    }
}

/// Run a State of the World stream against the snapshot cache.
///
/// `default_type_url` is used for requests that leave `type_url` empty, as
/// single-type services (CDS, LDS) allow.
pub fn run_stream_loop<S>(
    cache: Arc<SnapshotCache>,
    mut in_stream: S,
    default_type_url: Option<&'static str>,
    label: &'static str,
) -> DiscoveryResponseStream
where
    S: Stream<Item = std::result::Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let span = crate::xds_span!(label);

    tokio::spawn(
        async move {
            let mut session = StreamSession::new(label, default_type_url);
            let mut snapshots: Option<SnapshotReceiver> = None;
            metrics::record_xds_connection(true);

            'stream: loop {
                tokio::select! {
                    request = in_stream.next() => {
                        let request = match request {
                            Some(Ok(request)) => request,
                            Some(Err(status)) => {
                                warn!(error = %status, "Error receiving discovery request");
                                break;
                            }
                            None => {
                                info!(
                                    node_id = ?session.node_id(),
                                    "Discovery stream ended by client"
                                );
                                break;
                            }
                        };

                        debug!(
                            type_url = %request.type_url,
                            version_info = %request.version_info,
                            nonce = %request.response_nonce,
                            "Received discovery request"
                        );

                        if let Some(node_id) = session.observe_node(&request) {
                            tracing::Span::current().record("node_id", node_id.as_str());
                            info!(node_id = %node_id, "New discovery stream established");
                            snapshots = Some(cache.subscribe(&node_id));
                        }

                        let Some(receiver) = snapshots.as_mut() else {
                            warn!("Discovery request without node id, ignoring");
                            continue;
                        };

                        let snapshot = receiver.borrow_and_update().clone();
                        let response = session.handle_request(request, snapshot.as_deref());
                        if let Some(response) = response {
                            if tx.send(Ok(response)).await.is_err() {
                                debug!("Discovery response receiver dropped");
                                break;
                            }
                        }
                    }
                    changed = snapshot_changed(&mut snapshots) => {
                        if changed.is_err() {
                            info!("Snapshot cache closed, ending discovery stream");
                            break;
                        }
                        let snapshot =
                            snapshots.as_mut().and_then(|r| r.borrow_and_update().clone());
                        let Some(snapshot) = snapshot else {
                            debug!("Snapshot cleared, holding subscriptions");
                            continue;
                        };

                        for response in session.push(&snapshot) {
                            if tx.send(Ok(response)).await.is_err() {
                                debug!("Discovery response receiver dropped");
                                break 'stream;
                            }
                        }
                    }
                }
            }

            drop(snapshots);
            if let Some(node_id) = session.node_id() {
                cache.release(node_id);
            }
            metrics::record_xds_connection(false);
        }
        .instrument(span),
    );

    ReceiverStream::new(rx)
}
