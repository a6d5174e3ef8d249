//! Drain worker.
//!
//! Each worker loops over: take a batch, register unseen metric names,
//! upload what is registered. RPC failures are logged and counted and never
//! end the loop; only a shutdown sentinel does.

use super::client::{IngestClient, RegistrationOutcome};
use super::queue::{QueueReceiver, Take};
use super::registry::RegistrationCache;
use super::stats::UploadStats;
use crate::core::{OutgoingPoint, RelayError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Where a worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    BatchCollecting,
    Registering,
    Uploading,
    Terminated,
}

/// One consumer of the upload queue.
pub struct DrainWorker<C> {
    id: usize,
    receiver: QueueReceiver,
    cache: Arc<RegistrationCache>,
    stats: Arc<UploadStats>,
    client: C,
    batch_size: usize,
    state: WorkerState,
}

impl<C: IngestClient> DrainWorker<C> {
    pub fn new(
        id: usize,
        receiver: QueueReceiver,
        cache: Arc<RegistrationCache>,
        stats: Arc<UploadStats>,
        client: C,
        batch_size: usize,
    ) -> Self {
        Self {
            id,
            receiver,
            cache,
            stats,
            client,
            batch_size: batch_size.max(1),
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::trace!(worker = self.id, from = ?self.state, to = ?next, "drain worker state");
        self.state = next;
    }

    /// Run until a sentinel is consumed. Returns the client so callers can
    /// inspect or reuse it.
    pub async fn run(mut self) -> C {
        tracing::debug!(worker = self.id, "drain worker started");

        loop {
            self.transition(WorkerState::Idle);

            let batch = match self.receiver.take_batch(self.batch_size).await {
                Take::Batch(batch) => batch,
                Take::Shutdown => break,
            };
            self.transition(WorkerState::BatchCollecting);

            if let Err(e) = self.process_batch(batch).await {
                match e {
                    RelayError::ProtocolViolation { .. } => {
                        tracing::error!(worker = self.id, error = %e, "batch dropped");
                    },
                    _ => {
                        tracing::warn!(
                            worker = self.id,
                            category = e.category(),
                            error = %e,
                            "batch failed"
                        );
                    },
                }
            }
        }

        self.transition(WorkerState::Terminated);
        tracing::debug!(worker = self.id, "drain worker terminated");
        self.client
    }

    /// Register and upload one batch.
    pub async fn process_batch(&mut self, batch: Vec<OutgoingPoint>) -> Result<()> {
        self.transition(WorkerState::Registering);
        let failed = self.register(&batch).await?;

        let points: Vec<OutgoingPoint> = if failed.is_empty() {
            batch
        } else {
            batch
                .into_iter()
                .filter(|point| !failed.contains(point.metric()))
                .collect()
        };

        if points.is_empty() {
            return Ok(());
        }

        self.transition(WorkerState::Uploading);
        self.stats.record_rpc_call();
        match self.client.add_datapoints(&points).await {
            Ok(()) => {
                self.stats.add_points_written(points.len());
                tracing::debug!(worker = self.id, points = points.len(), "datapoints uploaded");
                Ok(())
            },
            Err(e) => {
                self.stats.record_rpc_error();
                if e.is_transport() {
                    self.client.disconnect();
                }
                Err(e)
            },
        }
    }

    /// Register every name in `batch` the cache has not seen. Returns the
    /// names whose registration failed.
    async fn register(&mut self, batch: &[OutgoingPoint]) -> Result<HashSet<String>> {
        let mut cache = self.cache.lock().await;

        let pending = cache.unseen(batch);
        if pending.is_empty() {
            return Ok(HashSet::new());
        }

        self.stats.record_rpc_call();
        let outcomes = match self.client.register_metrics(&pending).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                // Every pending name fails; already registered names still upload.
                self.stats.record_rpc_error();
                self.client.disconnect();
                tracing::warn!(
                    worker = self.id,
                    category = e.category(),
                    error = %e,
                    pending = pending.len(),
                    "metric registration failed"
                );
                return Ok(pending.into_iter().map(|r| r.metric).collect());
            },
        };

        if outcomes.len() != pending.len() {
            self.stats.record_rpc_error();
            return Err(RelayError::ProtocolViolation {
                expected: pending.len(),
                actual: outcomes.len(),
            });
        }

        let mut failed = HashSet::new();
        for (registration, outcome) in pending.into_iter().zip(outcomes) {
            if outcome.is_registered() {
                if outcome == RegistrationOutcome::AlreadyExists {
                    tracing::debug!(metric = %registration.metric, "metric already registered");
                }
                if cache.insert(registration.metric) {
                    self.stats.record_metric_registered();
                }
            } else {
                tracing::warn!(metric = %registration.metric, "metric registration failed");
                failed.insert(registration.metric);
            }
        }

        Ok(failed)
    }
}
