//! Process-level owner of the scheduler and the reconciliation worker

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::reconciler::{ReconcileError, ReconcileReport, Reconciler};
use crate::config::SentinelConfig;
use crate::scheduler::JobScheduler;
use crate::services::{
    AlertsService, DefinitionsEvent, DefinitionsService, EventType, MetricsService,
};

/// Definitions changes that can alter the desired condition set
const WATCHED_EVENTS: [EventType; 3] = [
    EventType::TriggerCreate,
    EventType::TriggerUpdate,
    EventType::TriggerRemove,
];

/// Runs external metrics conditions for as long as it is alive
///
/// Change notifications are funnelled into a single worker task that
/// reconciles once per batch of pending notifications.
pub struct MetricsManager {
    reconciler: Arc<Reconciler>,
    worker: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MetricsManager {
    /// Subscribe to definitions changes, run the bootstrap reconciliation
    /// and start the reconciliation worker
    pub async fn start(
        config: &SentinelConfig,
        definitions: Arc<dyn DefinitionsService>,
        metrics: Arc<dyn MetricsService>,
        alerts: Arc<dyn AlertsService>,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new(config.pool_size));
        let reconciler = Arc::new(Reconciler::new(
            config,
            Arc::clone(&definitions),
            metrics,
            alerts,
            scheduler,
        ));

        // Subscribe before bootstrapping so no change slips between the two
        let events = definitions.subscribe(&WATCHED_EVENTS, config.notification_buffer);

        if let Err(e) = reconciler.reconcile().await {
            tracing::warn!(error = %e, "Bootstrap reconciliation failed, waiting for changes");
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let worker = tokio::spawn(run_worker(Arc::clone(&reconciler), events, shutdown_rx));

        tracing::info!(pool_size = config.pool_size, "External metrics manager started");
        Self {
            reconciler,
            worker: Some(worker),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Reconcile now, outside of any change notification
    pub async fn refresh(&self) -> Result<ReconcileReport, ReconcileError> {
        self.reconciler.reconcile().await
    }

    /// Stop the worker, cancel every job and stop the pool
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Reconciliation worker ended abnormally");
            }
        }
        self.reconciler.shutdown().await;
        tracing::info!("External metrics manager stopped");
    }
}

async fn run_worker(
    reconciler: Arc<Reconciler>,
    mut events: mpsc::Receiver<DefinitionsEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!(
                        "Definitions notifications closed, reconciliation worker exiting"
                    );
                    break;
                };

                let mut pending = 1;
                while events.try_recv().is_ok() {
                    pending += 1;
                }
                tracing::debug!(
                    trigger_id = %event.trigger_id,
                    event_type = ?event.event_type,
                    pending = pending,
                    "Definitions changed"
                );

                // The next change retries
                if let Err(e) = reconciler.reconcile().await {
                    tracing::debug!(error = %e, pending = pending, "Reconciliation abandoned");
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Reconciliation worker shutting down");
                break;
            }
        }
    }
}
