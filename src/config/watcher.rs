//! Configuration file watcher.
//!
//! The watcher owns the last known [`DesiredState`]. It parses the file once
//! at construction (an error there is fatal to startup), hands the initial
//! state to the control loop unconditionally, and afterwards re-parses on
//! every file change notification, forwarding the state only when its
//! content actually changed.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::handoff::{HandoffClosed, HandoffSender};
use crate::config::source::{ConfigSource, DesiredState};
use crate::errors::Result;
use crate::observability::metrics;

#[derive(Debug)]
pub struct ConfigWatcher {
    source: ConfigSource,
    current: DesiredState,
}

impl ConfigWatcher {
    /// Parse the configuration once; the watcher cannot exist without a valid state.
    pub fn new(source: ConfigSource) -> Result<Self> {
        info!(path = %source.path().display(), "Starting config watcher");
        let current = source.load()?;
        Ok(Self { source, current })
    }

    pub fn current(&self) -> &DesiredState {
        &self.current
    }

    /// Replace the current state if `update` differs in content.
    ///
    /// Returns whether a change was recorded. An identical update leaves the
    /// current state, including its `changed` flag, untouched.
    pub fn apply_update(&mut self, update: DesiredState) -> bool {
        debug!(ip = %update.bypass_ip, urls = ?update.domains, "Idempotently applying update");

        if update.same_content(&self.current) {
            return false;
        }

        if update.bypass_ip != self.current.bypass_ip {
            debug!(previous = %self.current.bypass_ip, "Bypass IP changed");
        }
        if update.domains != self.current.domains {
            debug!(previous = ?self.current.domains, "URLs changed");
        }

        self.current = DesiredState { changed: true, ..update };
        true
    }

    /// Re-read the file after a change notification.
    ///
    /// Returns the state to emit, or `None` when the file failed to parse or
    /// did not change.
    pub fn reload(&mut self) -> Option<DesiredState> {
        match self.source.load() {
            Ok(update) => {
                self.apply_update(update);
                if self.current.changed {
                    metrics::record_config_reload("changed");
                    Some(self.current.clone())
                } else {
                    metrics::record_config_reload("unchanged");
                    debug!("No change detected");
                    None
                }
            }
            Err(err) => {
                metrics::record_config_reload("error");
                warn!(
                    error = %err,
                    "Error parsing the configuration file, using the previous version"
                );
                None
            }
        }
    }

    /// Watch the configuration file and forward changed states until the
    /// control side goes away.
    pub async fn run(self, out: HandoffSender<DesiredState, bool>) -> Result<()> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let path = self.source.path().to_path_buf();

        let mut fs_watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Received file watch error"),
            })?;
        fs_watcher.watch(&path, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Starting a watch on the configuration file");

        let result = self.run_with_events(UnboundedReceiverStream::new(event_rx), out).await;
        drop(fs_watcher);
        result
    }

    /// Drive the watch loop from an arbitrary stream of change notifications.
    ///
    /// The control side answers each handed-off state with whether its
    /// snapshot was installed. `changed` is only cleared on success, so a
    /// failed install is retried on the next notification even when the file
    /// content is the same.
    pub async fn run_with_events<S>(
        mut self,
        mut events: S,
        out: HandoffSender<DesiredState, bool>,
    ) -> Result<()>
    where
        S: Stream<Item = ()> + Unpin,
    {
        debug!(state = ?self.current, "Sending the initial parsed state");
        if !self.forward(&out).await {
            info!("Control loop closed before the initial state was delivered");
            return Ok(());
        }

        while events.next().await.is_some() {
            if self.reload().is_some() {
                debug!(state = ?self.current, "Sending the parsed state");
                if !self.forward(&out).await {
                    info!("Control loop closed, stopping config watcher");
                    return Ok(());
                }
            }
        }

        error!("File change notifications ended");
        Err(crate::Error::internal("file change notification stream ended"))
    }

    /// Hand the current state over. Returns `false` once the control side is gone.
    async fn forward(&mut self, out: &HandoffSender<DesiredState, bool>) -> bool {
        match out.send(self.current.clone()).await {
            Ok(true) => {
                self.current.changed = false;
                true
            }
            Ok(false) => {
                warn!("Snapshot was not installed, retrying on the next change notification");
                true
            }
            Err(HandoffClosed) => false,
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::handoff::{self, HandoffReceiver};
    use crate::config::source::StaticInterfaces;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tracing_test::traced_test;

    fn resolver() -> Arc<StaticInterfaces> {
        Arc::new(
            StaticInterfaces::new()
                .with_interface("eth0", vec![Ipv4Addr::new(10, 0, 0, 5)])
                .with_interface("eth1", vec![Ipv4Addr::new(192, 168, 7, 2)]),
        )
    }

    fn write_config(file: &mut NamedTempFile, contents: &str) {
        let handle = file.as_file_mut();
        handle.set_len(0).expect("truncate");
        std::io::Seek::rewind(handle).expect("rewind");
        handle.write_all(contents.as_bytes()).expect("write");
        handle.flush().expect("flush");
    }

    fn watcher_for(contents: &str) -> (ConfigWatcher, NamedTempFile) {
        let mut file = NamedTempFile::new().expect("temp file");
        write_config(&mut file, contents);
        let source = ConfigSource::new(file.path(), resolver());
        (ConfigWatcher::new(source).expect("initial parse"), file)
    }

    #[test]
    fn initial_parse_failure_is_fatal() {
        let mut file = NamedTempFile::new().expect("temp file");
        write_config(&mut file, "urls: [a.com]\n");
        let source = ConfigSource::new(file.path(), resolver());
        assert!(ConfigWatcher::new(source).is_err());
    }

    #[test]
    fn apply_update_ignores_identical_content() {
        let (mut watcher, _file) = watcher_for("interface: eth0\nurls: [a.com]\n");
        watcher.current.changed = false;

        let same = DesiredState::new(Ipv4Addr::new(10, 0, 0, 5), vec!["a.com".into()]);
        assert!(!watcher.apply_update(same));
        assert!(!watcher.current().changed);
    }

    #[test]
    fn apply_update_records_ip_or_domain_changes() {
        let (mut watcher, _file) = watcher_for("interface: eth0\nurls: [a.com]\n");
        watcher.current.changed = false;

        let new_ip = DesiredState::new(Ipv4Addr::new(10, 0, 0, 9), vec!["a.com".into()]);
        assert!(watcher.apply_update(new_ip));
        assert!(watcher.current().changed);
        assert_eq!(watcher.current().bypass_ip, Ipv4Addr::new(10, 0, 0, 9));

        watcher.current.changed = false;
        let reordered =
            DesiredState::new(Ipv4Addr::new(10, 0, 0, 9), vec!["b.com".into(), "a.com".into()]);
        assert!(watcher.apply_update(reordered));
        assert_eq!(watcher.current().domains, vec!["b.com", "a.com"]);
    }

    #[test]
    #[traced_test]
    fn reload_keeps_previous_state_on_parse_error() {
        let (mut watcher, mut file) = watcher_for("interface: eth0\nurls: [a.com]\n");
        watcher.current.changed = false;
        let before = watcher.current().clone();

        write_config(&mut file, "interface: wlan9\nurls: [a.com]\n");
        assert!(watcher.reload().is_none());
        assert_eq!(watcher.current(), &before);
        assert!(logs_contain("using the previous version"));
    }

    /// Change notifications that rewrite the file right before each one is
    /// delivered, so every reload reads exactly the content of its step.
    fn edits(path: &Path, steps: Vec<&'static str>) -> impl Stream<Item = ()> + Unpin {
        let path = path.to_path_buf();
        tokio_stream::iter(steps).map(move |contents| {
            std::fs::write(&path, contents).expect("rewrite config");
        })
    }

    async fn take(rx: &mut HandoffReceiver<DesiredState, bool>, installed: bool) -> DesiredState {
        let (state, reply) = rx.recv().await.expect("state handed off");
        reply.send(installed);
        state
    }

    #[tokio::test]
    async fn emits_initial_state_then_only_real_changes() {
        let (watcher, file) = watcher_for("interface: eth0\nurls: [a.com, a.com]\n");
        let (out_tx, mut out_rx) = handoff::channel();
        let events = edits(
            file.path(),
            vec![
                // same content, different layout
                "interface: eth0\nurls:\n  - a.com\n",
                "interface: [eth0]\n",
                "interface: eth1\nurls: [a.com, b.com]\n",
            ],
        );

        let task = tokio::spawn(watcher.run_with_events(events, out_tx));

        let initial = take(&mut out_rx, true).await;
        assert_eq!(initial.domains, vec!["a.com"]);
        assert!(initial.changed);

        let next = take(&mut out_rx, true).await;
        assert_eq!(next.bypass_ip, Ipv4Addr::new(192, 168, 7, 2));
        assert_eq!(next.domains, vec!["a.com", "b.com"]);

        let result = task.await.expect("join");
        assert!(result.is_err(), "ending the notification stream stops the watcher");
        assert!(out_rx.recv().await.is_none(), "no other state was handed off");
    }

    #[tokio::test]
    async fn failed_install_is_retried_on_next_notification() {
        let contents = "interface: eth0\nurls: [a.com]\n";
        let (watcher, file) = watcher_for(contents);
        let (out_tx, mut out_rx) = handoff::channel();
        let events = edits(file.path(), vec![contents, contents]);

        let task = tokio::spawn(watcher.run_with_events(events, out_tx));

        let rejected = take(&mut out_rx, false).await;
        let retried = take(&mut out_rx, true).await;
        assert!(retried.same_content(&rejected));

        assert!(task.await.expect("join").is_err());
        assert!(out_rx.recv().await.is_none(), "installed state is not sent again");
    }

    #[tokio::test]
    async fn stops_when_control_side_closes() {
        let (watcher, _file) = watcher_for("interface: eth0\nurls: [a.com]\n");
        let (out_tx, out_rx) = handoff::channel::<DesiredState, bool>();
        drop(out_rx);

        let result = watcher.run_with_events(tokio_stream::pending::<()>(), out_tx).await;
        assert!(result.is_ok());
    }
}
