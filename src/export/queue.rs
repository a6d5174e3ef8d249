//! Bounded upload queue.
//!
//! Producers never wait: a point that does not fit is dropped and counted.
//! Workers share one receiver and pull batches from it in FIFO order.

use super::stats::UploadStats;
use crate::core::{OutgoingPoint, RelayError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Mutex;

/// What travels through the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// A point to upload
    Point(OutgoingPoint),
    /// Tells exactly one worker to terminate
    Shutdown,
}

/// Result of one batch take.
#[derive(Debug, PartialEq)]
pub enum Take {
    /// At least one point, in dequeue order
    Batch(Vec<OutgoingPoint>),
    /// A sentinel was consumed or every sender is gone
    Shutdown,
}

/// Producer side of the upload queue.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    tx: mpsc::Sender<QueueItem>,
    rx: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    closed: Arc<AtomicBool>,
    stats: Arc<UploadStats>,
}

impl UploadQueue {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize, stats: Arc<UploadStats>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: Arc::new(AtomicBool::new(false)),
            stats,
        }
    }

    /// Enqueue without waiting. Returns false if the point was dropped
    /// because the queue is full or closed.
    pub fn put(&self, point: OutgoingPoint) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.stats.add_points_dropped(1);
            return false;
        }

        match self.tx.try_send(QueueItem::Point(point)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.add_points_dropped(1);
                tracing::trace!("upload queue full, dropping point");
                false
            },
            Err(TrySendError::Closed(_)) => {
                self.stats.add_points_dropped(1);
                false
            },
        }
    }

    /// Enqueue many points, returning how many were accepted.
    pub fn put_all(&self, points: impl IntoIterator<Item = OutgoingPoint>) -> usize {
        points.into_iter().map(|p| self.put(p)).filter(|accepted| *accepted).count()
    }

    /// Close the queue to new points and enqueue one sentinel per worker.
    ///
    /// Sentinels wait for space so that every worker receives exactly one.
    pub async fn shutdown(&self, workers: usize) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.stop_workers(workers).await
    }

    /// Enqueue one sentinel per worker without closing the queue.
    pub(crate) async fn stop_workers(&self, workers: usize) -> Result<()> {
        for _ in 0..workers {
            self.tx
                .send(QueueItem::Shutdown)
                .await
                .map_err(|_| RelayError::QueueClosed)?;
        }

        tracing::debug!(workers, "shutdown sentinels enqueued");
        Ok(())
    }

    /// True once [`shutdown`](Self::shutdown) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Items currently waiting, sentinels included
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Consumer handle for a worker
    pub fn receiver(&self) -> QueueReceiver {
        QueueReceiver {
            rx: Arc::clone(&self.rx),
        }
    }
}

/// Consumer side shared by all workers.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
}

impl QueueReceiver {
    /// Wait for one item, then drain without waiting up to `limit` points.
    ///
    /// The receiver lock is held for the whole take, so a batch is a
    /// contiguous run of the queue. A sentinel dequeued after the first
    /// point ends the take and the points already collected are abandoned.
    pub async fn take_batch(&self, limit: usize) -> Take {
        let mut rx = self.rx.lock().await;

        let first = match rx.recv().await {
            Some(QueueItem::Point(point)) => point,
            Some(QueueItem::Shutdown) | None => return Take::Shutdown,
        };

        let mut batch = Vec::with_capacity(limit.min(1024));
        batch.push(first);

        while batch.len() < limit {
            match rx.try_recv() {
                Ok(QueueItem::Point(point)) => batch.push(point),
                Ok(QueueItem::Shutdown) => {
                    tracing::debug!(abandoned = batch.len(), "sentinel dequeued mid-batch");
                    return Take::Shutdown;
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        Take::Batch(batch)
    }
}
