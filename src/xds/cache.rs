//! Per-node snapshot cache.
//!
//! Each node id owns a `watch` channel holding its latest snapshot. Installing
//! a snapshot replaces the channel value in one step, so discovery streams
//! observe either the previous or the new snapshot and never a mix.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::xds::snapshot::Snapshot;

pub type SnapshotReceiver = watch::Receiver<Option<Arc<Snapshot>>>;

/// Destination for snapshots produced by the control loop.
pub trait SnapshotSink: Send + Sync {
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct SnapshotCache {
    nodes: RwLock<HashMap<String, watch::Sender<Option<Arc<Snapshot>>>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot for `node_id`, if one was installed.
    pub fn get_snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(node_id).and_then(|sender| sender.borrow().clone())
    }

    /// Observe every snapshot replacement for `node_id`.
    ///
    /// Subscribing before the first install is allowed; the receiver then
    /// starts out holding `None`.
    pub fn subscribe(&self, node_id: &str) -> SnapshotReceiver {
        {
            let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(sender) = nodes.get(node_id) {
                return sender.subscribe();
            }
        }

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Forget `node_id` when it holds no snapshot and nobody watches it.
    ///
    /// Discovery streams call this on exit so node ids that never received a
    /// snapshot do not accumulate. Returns whether the entry was removed.
    pub fn release(&self, node_id: &str) -> bool {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let idle = nodes
            .get(node_id)
            .is_some_and(|sender| sender.receiver_count() == 0 && sender.borrow().is_none());
        if idle {
            nodes.remove(node_id);
            debug!(node_id = %node_id, "Released idle node");
        }
        idle
    }

    /// Number of node ids with a snapshot or a live subscriber.
    pub fn tracked_nodes(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop the snapshot for `node_id`. Subscribers see `None` until the next install.
    pub fn clear_snapshot(&self, node_id: &str) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = nodes.get(node_id) {
            sender.send_replace(None);
            if sender.receiver_count() == 0 {
                nodes.remove(node_id);
            }
            info!(node_id = %node_id, "Cleared snapshot");
        }
    }

    /// Node ids with an installed snapshot.
    pub fn node_ids(&self) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = nodes
            .iter()
            .filter(|(_, sender)| sender.borrow().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl SnapshotSink for SnapshotCache {
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()> {
        if node_id.is_empty() {
            return Err(Error::xds("cannot install a snapshot for an empty node id"));
        }
        snapshot.validate().map_err(|e| match e {
            Error::Xds { message, .. } => Error::xds_with_node(message, node_id),
            other => other,
        })?;

        let version = snapshot.version().to_string();
        let snapshot = Arc::new(snapshot);

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let sender = nodes.entry(node_id.to_string()).or_insert_with(|| watch::channel(None).0);
        sender.send_replace(Some(snapshot));

        debug!(
            node_id = %node_id,
            version = %version,
            subscribers = sender.receiver_count(),
            "Installed snapshot"
        );
        Ok(())
    }
}
