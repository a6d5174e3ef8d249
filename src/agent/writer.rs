//! Computed-metric write path.
//!
//! Turns a [`ComputedMetric`] handed in by the embedding process into an
//! [`OutgoingPoint`]: names are cleaned, filtered and stamped before the
//! point is queued.

use crate::core::config::{AggregationConfig, WriterConfig};
use crate::core::{ComputedMetric, OutgoingPoint, RelayError, Result};
use regex::Regex;

/// Source used when neither the configuration nor the metric names one.
pub const DEFAULT_SOURCE: &str = "statsd-relay";

/// Keep `[A-Za-z0-9._:-]`, turn spaces into `_`, drop everything else.
pub fn whitelist(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-') => Some(c),
            _ => None,
        })
        .collect()
}

/// Naming and filtering rules for computed metrics.
#[derive(Debug)]
pub struct MetricWriter {
    source: Option<String>,
    include: Vec<Regex>,
    lower_case: bool,
    ignore_timestamps: bool,
}

impl MetricWriter {
    pub fn new(aggregation: &AggregationConfig, writer: &WriterConfig) -> Result<Self> {
        let include = writer
            .include_regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| RelayError::config(format!("invalid include_regex {pattern}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: aggregation.source.clone(),
            include,
            lower_case: writer.lower_case,
            ignore_timestamps: writer.ignore_timestamps,
        })
    }

    /// Build the point, or `None` if the metric is skipped.
    pub fn prepare(&self, metric: ComputedMetric) -> Option<OutgoingPoint> {
        if metric.value.is_nan() {
            tracing::debug!(metric = %metric.name, "skipping NaN value");
            return None;
        }

        let source = self
            .source
            .as_deref()
            .or(metric.host.as_deref())
            .unwrap_or(DEFAULT_SOURCE);

        let mut name = whitelist(&metric.name);
        let mut source = whitelist(source);
        if self.lower_case {
            name = name.to_lowercase();
            source = source.to_lowercase();
        }

        if name.is_empty() {
            tracing::debug!(metric = %metric.name, "skipping metric with no usable name");
            return None;
        }

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&name)) {
            tracing::trace!(metric = %name, "metric not included");
            return None;
        }

        let timestamp = if self.ignore_timestamps {
            0
        } else {
            metric.timestamp
        };

        Some(
            OutgoingPoint::new(name, metric.value, metric.metric_type)
                .with_source(source)
                .with_timestamp(timestamp)
                .with_dimensions(metric.dimensions),
        )
    }
}
