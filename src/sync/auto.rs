use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::engine::PhaseChange;
use super::executor::SyncExecutor;

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Listens to the source engine's phase changes and syncs every linked target.
pub struct AutoSyncController {
    executor: Arc<SyncExecutor>,
    worker: Option<Worker>,
}

impl AutoSyncController {
    pub fn new(executor: Arc<SyncExecutor>) -> Self {
        Self {
            executor,
            worker: None,
        }
    }

    pub fn executor(&self) -> &Arc<SyncExecutor> {
        &self.executor
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Subscribe to phase changes. Must be called inside a Tokio runtime.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            warn!("Auto sync already running");
            return;
        }

        // Subscribe before returning so no change published afterwards is missed.
        let changes = self.executor.source_engine().subscribe();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(listen(Arc::clone(&self.executor), changes, shutdown_rx));

        self.executor.set_running(true);
        self.worker = Some(Worker { shutdown, handle });
        info!("Auto sync started");
    }

    /// Stop listening. A sync already in progress finishes first.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            warn!("Auto sync is not running");
            return;
        };

        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "Auto sync listener ended abnormally");
        }
        self.executor.set_running(false);
        info!("Auto sync stopped");
    }
}

impl Drop for AutoSyncController {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(true);
            self.executor.set_running(false);
        }
    }
}

async fn listen(
    executor: Arc<SyncExecutor>,
    mut changes: broadcast::Receiver<PhaseChange>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    executor.propagate(&change).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auto sync lagged behind phase changes");
                }
                Err(RecvError::Closed) => {
                    warn!("Phase change stream closed");
                    break;
                }
            },
        }
    }
}
