//! # Control Loop
//!
//! Consumes desired states from the watcher one at a time, compiles each into
//! a snapshot and installs it for the configured node.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{DesiredState, HandoffReceiver, ListenerPorts};
use crate::errors::Result;
use crate::observability::metrics;
use crate::xds::cache::SnapshotSink;
use crate::xds::snapshot::Snapshot;

pub struct ControlLoop {
    node_id: String,
    ports: ListenerPorts,
    sink: Arc<dyn SnapshotSink>,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("node_id", &self.node_id)
            .field("ports", &self.ports)
            .finish()
    }
}

impl ControlLoop {
    pub fn new(
        node_id: impl Into<String>,
        ports: ListenerPorts,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self { node_id: node_id.into(), ports, sink }
    }

    /// Build and install a snapshot for `state`, returning its version.
    pub fn apply(&self, state: &DesiredState) -> Result<String> {
        let snapshot = Snapshot::from_state(state, self.ports);
        let version = snapshot.version().to_string();

        match self.sink.set_snapshot(&self.node_id, snapshot) {
            Ok(()) => {
                metrics::record_snapshot_install(&self.node_id, true);
                Ok(version)
            }
            Err(e) => {
                metrics::record_snapshot_install(&self.node_id, false);
                Err(e)
            }
        }
    }

    /// Apply states until the watcher side closes, answering each with
    /// whether its snapshot was installed.
    pub async fn run(self, mut states: HandoffReceiver<DesiredState, bool>) {
        while let Some((state, reply)) = states.recv().await {
            info!(ip = %state.bypass_ip, urls = ?state.domains, "Received new config");

            let installed = match self.apply(&state) {
                Ok(version) => {
                    info!(node_id = %self.node_id, version = %version, "Installed new snapshot");
                    true
                }
                Err(e) => {
                    error!(node_id = %self.node_id, error = %e, "Failed to update envoy config");
                    false
                }
            };
            reply.send(installed);
        }
        info!("Config watcher closed, stopping control loop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::handoff;
    use crate::errors::Error;
    use crate::xds::cache::SnapshotCache;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        installs: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl SnapshotSink for RecordingSink {
        fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()> {
            if self.fail {
                return Err(Error::xds_with_node("rejected", node_id));
            }
            let install = (node_id.to_string(), snapshot.version().to_string());
            self.installs.lock().expect("lock").push(install);
            Ok(())
        }
    }

    fn state(domains: &[&str]) -> DesiredState {
        let domains = domains.iter().map(|d| d.to_string()).collect();
        DesiredState::new(Ipv4Addr::new(10, 0, 0, 5), domains)
    }

    #[test]
    fn apply_installs_into_cache() {
        let cache = Arc::new(SnapshotCache::new());
        let control = ControlLoop::new("split", ListenerPorts::default(), cache.clone());

        let version = control.apply(&state(&["*.bank.com"])).expect("apply");
        let installed = cache.get_snapshot("split").expect("snapshot");
        assert_eq!(installed.version(), version);
        assert_eq!(installed.clusters().len(), 4);
    }

    #[test]
    fn apply_surfaces_sink_errors() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let control = ControlLoop::new("split", ListenerPorts::default(), sink);
        assert!(matches!(control.apply(&state(&["*.a.com"])), Err(Error::Xds { .. })));
    }

    #[tokio::test]
    async fn run_installs_each_state_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let control = ControlLoop::new("split", ListenerPorts::default(), sink.clone());
        let (tx, rx) = handoff::channel();

        let task = tokio::spawn(control.run(rx));
        assert_eq!(tx.send(state(&["*.a.com"])).await, Ok(true));
        assert_eq!(tx.send(state(&["*.b.com"])).await, Ok(true));
        drop(tx);
        task.await.expect("join");

        let installs = sink.installs.lock().expect("lock");
        assert_eq!(installs.len(), 2);
        assert!(installs.iter().all(|(node, _)| node == "split"));
        assert_ne!(installs[0].1, installs[1].1);
    }

    #[tokio::test]
    async fn run_continues_after_install_failure() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let control = ControlLoop::new("split", ListenerPorts::default(), sink);
        let (tx, rx) = handoff::channel();

        let task = tokio::spawn(control.run(rx));
        assert_eq!(tx.send(state(&["*.a.com"])).await, Ok(false));
        assert_eq!(tx.send(state(&["*.b.com"])).await, Ok(false), "loop still consuming");
        drop(tx);
        task.await.expect("join");
    }
}
