//! Hub process lifecycle: assemble collaborators, start the bridge and the
//! dispatch loop, bootstrap, and tear everything down on a signal.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use chainwatch_tasks::{MemoryStore, TaskStore, spawn_persister};

use crate::bridge;
use crate::cli::{self, HubOpts};
use crate::file_store::JsonFileStore;
use crate::hub::{Hub, HubServices};
use crate::transport::ProbeTransport;

const PERSIST_DRAIN: Duration = Duration::from_secs(5);

/// Run the hub until ctrl-c, SIGTERM, or a fatal dispatch error.
pub async fn run_hub(opts: HubOpts, socket_path: &str) -> anyhow::Result<()> {
    let store: Arc<dyn TaskStore> = if opts.ephemeral {
        tracing::info!("ephemeral run: nothing is persisted");
        Arc::new(MemoryStore::new())
    } else {
        let dir = opts.data_dir.clone().unwrap_or_else(cli::default_data_dir);
        Arc::new(JsonFileStore::open(dir).await?)
    };
    let transport = Arc::new(ProbeTransport::new(
        opts.endpoints,
        Duration::from_millis(opts.probe_timeout_ms),
    ));
    let hub = Arc::new(Hub::new(
        HubServices::reference(Arc::clone(&store), transport),
        Duration::from_secs(opts.tick_secs.max(1)),
    ));

    let (store_sink, persister) = spawn_persister(store);
    hub.registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .add_sink(Arc::new(store_sink));

    // Start window bridge
    let listener = bridge::bind(socket_path).await?;
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let server_handle = tokio::spawn(bridge::serve(listener, Arc::clone(&hub), inbound_tx));

    // Start dispatch loop
    let dispatch_hub = Arc::clone(&hub);
    let dispatch_handle = tokio::spawn(async move { dispatch_hub.run(inbound_rx).await });

    let online = !opts.offline;
    let init_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        match init_hub.bootstrap().initialize(online).await {
            Ok(report) => tracing::info!(
                "initialized: {} ran, {} skipped, {} failed{}",
                report.ran.len(),
                report.skipped.len(),
                report.failed.len(),
                if report.aborted { " (aborted)" } else { "" }
            ),
            Err(e) => tracing::error!("initialize failed: {e}"),
        }
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    };

    let outcome = tokio::select! {
        () = shutdown => Ok(()),
        joined = dispatch_handle => match joined {
            Ok(Ok(())) => {
                tracing::warn!("dispatch loop exited unexpectedly");
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("dispatch loop stopped: {e}")),
            Err(e) => Err(e.into()),
        },
        joined = server_handle => {
            match joined {
                Ok(Err(e)) => tracing::error!("window bridge error: {e}"),
                _ => tracing::warn!("window bridge exited unexpectedly"),
            }
            Ok(())
        }
    };

    hub.shutdown().await;
    if tokio::time::timeout(PERSIST_DRAIN, persister).await.is_err() {
        tracing::warn!("persister did not drain within {PERSIST_DRAIN:?}");
    }

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("hub stopped");
    outcome
}
