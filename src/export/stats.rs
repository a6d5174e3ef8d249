//! Upload pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the write path, the queue and every worker.
#[derive(Debug, Default)]
pub struct UploadStats {
    write_calls: AtomicU64,
    points_written: AtomicU64,
    metrics_registered: AtomicU64,
    rpc_calls: AtomicU64,
    rpc_errors: AtomicU64,
    points_dropped: AtomicU64,
}

/// Point-in-time copy of [`UploadStats`] plus the queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStatsSnapshot {
    pub write_calls: u64,
    pub points_written: u64,
    pub metrics_registered: u64,
    pub rpc_calls: u64,
    pub rpc_errors: u64,
    pub points_dropped: u64,
    pub queue_size: u64,
}

impl UploadStats {
    pub fn record_write_call(&self) {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_points_written(&self, n: usize) {
        self.points_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_metric_registered(&self) {
        self.metrics_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_call(&self) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_error(&self) {
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_points_dropped(&self, n: usize) {
        self.points_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Dropped points so far
    pub fn points_dropped(&self) -> u64 {
        self.points_dropped.load(Ordering::Relaxed)
    }

    /// Read every counter. The queue depth is owned by the queue, so the
    /// caller supplies it.
    pub fn snapshot(&self, queue_size: usize) -> UploadStatsSnapshot {
        UploadStatsSnapshot {
            write_calls: self.write_calls.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            metrics_registered: self.metrics_registered.load(Ordering::Relaxed),
            rpc_calls: self.rpc_calls.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
            queue_size: queue_size as u64,
        }
    }
}
