//! Startup sequence for the splitplane control plane
//!
//! Everything that can fail fatally happens before serving: metrics exporter
//! installation, the initial configuration parse, and binding the discovery
//! listener. After that the watch task, the control task and the gRPC server
//! run until the shutdown signal fires.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{
    handoff, ConfigSource, ConfigWatcher, InterfaceResolver, Settings, SystemInterfaces,
};
use crate::control::ControlLoop;
use crate::errors::Result;
use crate::observability::{init_metrics, log_settings};
use crate::xds::{server, SnapshotCache};

/// Run with the host's interfaces until ctrl-c.
pub async fn run(settings: Settings) -> Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping xDS server");
    };
    run_with(&settings, Arc::new(SystemInterfaces), shutdown).await
}

pub async fn run_with<F>(
    settings: &Settings,
    resolver: Arc<dyn InterfaceResolver>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    log_settings(settings);
    if settings.cleanup {
        info!("Cleanup requested; no external state is created, nothing to remove on exit");
    }

    init_metrics(settings.metrics_address)?;

    let watcher = ConfigWatcher::new(ConfigSource::new(&settings.config_path, resolver))?;
    let listener = server::bind(settings.grpc_address).await?;

    let cache = Arc::new(SnapshotCache::new());
    let (states_tx, states_rx) = handoff::channel();
    let control = ControlLoop::new(settings.node_id.clone(), settings.ports, cache.clone());

    let control_task = tokio::spawn(control.run(states_rx));
    let watch_task = tokio::spawn(async move {
        if let Err(e) = watcher.run(states_tx).await {
            error!(error = %e, "Config watcher stopped");
        }
    });

    let result = server::serve(listener, cache, shutdown).await;

    watch_task.abort();
    control_task.abort();
    result
}
