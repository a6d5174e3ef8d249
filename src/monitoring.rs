//! Self-monitoring.
//!
//! On every flush tick the upload pipeline reports its own counters as
//! ordinary computed metrics under a private namespace, so they travel the
//! same write path and queue as everything else.

use crate::core::{ComputedMetric, MetricType};
use crate::export::UploadStatsSnapshot;

/// Emits pipeline counters as computed metrics.
#[derive(Debug, Clone)]
pub struct SelfMonitor {
    namespace: String,
}

impl SelfMonitor {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// One metric per counter plus the current queue depth.
    pub fn metrics(&self, stats: &UploadStatsSnapshot, timestamp_ms: i64) -> Vec<ComputedMetric> {
        let cumulative = [
            ("write_calls", stats.write_calls),
            ("points_written", stats.points_written),
            ("metrics_registered", stats.metrics_registered),
            ("rpc_calls", stats.rpc_calls),
            ("rpc_errors", stats.rpc_errors),
            ("points_dropped", stats.points_dropped),
        ];

        cumulative
            .into_iter()
            .map(|(name, value)| (name, value, MetricType::CumulativeCounter))
            .chain(std::iter::once((
                "queue_size",
                stats.queue_size,
                MetricType::Gauge,
            )))
            .map(|(name, value, metric_type)| {
                let mut metric = ComputedMetric::new(
                    format!("{}.{}", self.namespace, name),
                    value as f64,
                    metric_type,
                );
                metric.timestamp = timestamp_ms;
                metric
            })
            .collect()
    }
}
