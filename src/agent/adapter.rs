//! Snapshot adapter: aggregated metrics to outgoing points.

use crate::core::{MetricType, OutgoingPoint, Tags};
use crate::metrics::{AggregatedMetric, AggregatedValue, Snapshot};
use chrono::{DateTime, Utc};

/// Point options shared by every metric of one snapshot.
#[derive(Debug, Clone, Default)]
pub struct PointTemplate {
    /// Source for every point, if any
    pub source: Option<String>,
    /// Base dimensions; sample tags override them
    pub dimensions: Tags,
}

/// Convert a whole snapshot. Every point is stamped with the flush time.
pub fn snapshot_points(snapshot: &Snapshot, template: &PointTemplate) -> Vec<OutgoingPoint> {
    let timestamp = DateTime::<Utc>::from(snapshot.flushed_at).timestamp_millis();

    let mut points = Vec::with_capacity(snapshot.len());
    for metric in &snapshot.metrics {
        metric_points(metric, template, timestamp, &mut points);
    }
    points
}

fn metric_points(
    metric: &AggregatedMetric,
    template: &PointTemplate,
    timestamp: i64,
    out: &mut Vec<OutgoingPoint>,
) {
    let mut dimensions = template.dimensions.clone();
    dimensions.extend(metric.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

    let point = |name: String, value: f64, metric_type: MetricType| {
        let point = OutgoingPoint::new(name, value, metric_type)
            .with_timestamp(timestamp)
            .with_dimensions(dimensions.clone());
        match &template.source {
            Some(source) => point.with_source(source.clone()),
            None => point,
        }
    };

    match &metric.value {
        AggregatedValue::Counter(sum) => {
            out.push(point(metric.name.clone(), *sum, MetricType::Counter));
        },
        AggregatedValue::Gauge(value) => {
            out.push(point(metric.name.clone(), *value, MetricType::Gauge));
        },
        AggregatedValue::Set(cardinality) => {
            out.push(point(metric.name.clone(), *cardinality as f64, MetricType::Gauge));
        },
        AggregatedValue::Histogram(summary) => {
            for (suffix, value) in summary.components() {
                let metric_type = if suffix == "count" {
                    MetricType::Counter
                } else {
                    MetricType::Gauge
                };
                out.push(point(format!("{}.{}", metric.name, suffix), value, metric_type));
            }
        },
    }
}
