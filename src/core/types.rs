use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag set attached to a sample. Ordered so that equal tag sets compare and
/// hash identically regardless of the order they arrived on the wire.
pub type Tags = BTreeMap<String, String>;

/// The four statsd metric families. Timers are histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Summed per bucket window
    Counter,
    /// Last value, carried across flushes
    Gauge,
    /// Distribution of raw values (`h` and `ms`)
    Histogram,
    /// Distinct membership tokens
    Set,
}

impl MetricKind {
    /// Returns the lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Set => "set",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gauge reading: either a replacement or an adjustment of the stored value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GaugeValue {
    /// Replace the stored value
    Absolute(f64),
    /// Add to the stored value (`+N` / `-N` on the wire)
    Delta(f64),
}

/// Kind-specific payload of a decoded sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    /// Counter increment before sample-rate correction
    Counter(f64),
    /// Gauge reading
    Gauge(GaugeValue),
    /// One observed histogram or timer value
    Histogram(f64),
    /// Opaque set member
    Set(String),
}

impl SampleValue {
    /// The metric family this value belongs to
    pub fn kind(&self) -> MetricKind {
        match self {
            SampleValue::Counter(_) => MetricKind::Counter,
            SampleValue::Gauge(_) => MetricKind::Gauge,
            SampleValue::Histogram(_) => MetricKind::Histogram,
            SampleValue::Set(_) => MetricKind::Set,
        }
    }
}

/// One decoded statsd line.
///
/// Samples are ephemeral: the listener builds them and hands them straight to
/// the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Metric name as sent by the client
    pub name: String,
    /// Kind-specific value
    pub value: SampleValue,
    /// Probability in `(0, 1]` that the client actually sent this sample
    pub sample_rate: f64,
    /// Sanitized tags
    pub tags: Tags,
}

impl MetricSample {
    /// Create a sample with rate 1 and no tags
    pub fn new(name: impl Into<String>, value: SampleValue) -> Self {
        Self {
            name: name.into(),
            value,
            sample_rate: 1.0,
            tags: Tags::new(),
        }
    }

    /// Counter increment
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, SampleValue::Counter(value))
    }

    /// Absolute gauge reading
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, SampleValue::Gauge(GaugeValue::Absolute(value)))
    }

    /// Histogram or timer observation
    pub fn histogram(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, SampleValue::Histogram(value))
    }

    /// Set membership
    pub fn set(name: impl Into<String>, member: impl Into<String>) -> Self {
        Self::new(name, SampleValue::Set(member.into()))
    }

    /// Set the sample rate
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The metric family of this sample
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// Declared metric type sent to the ingest API on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    /// Point-in-time value
    Gauge,
    /// Delta count over the reporting interval
    Counter,
    /// Monotonically increasing total
    CumulativeCounter,
}

impl MetricType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "GAUGE",
            MetricType::Counter => "COUNTER",
            MetricType::CumulativeCounter => "CUMULATIVE_COUNTER",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point waiting to be uploaded.
///
/// Built once by the snapshot adapter or the write path and moved into the
/// upload queue; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingPoint {
    source: Option<String>,
    metric: String,
    value: f64,
    metric_type: MetricType,
    timestamp: i64,
    dimensions: Tags,
}

impl OutgoingPoint {
    /// Create a point without source, timestamp or dimensions
    pub fn new(metric: impl Into<String>, value: f64, metric_type: MetricType) -> Self {
        Self {
            source: None,
            metric: metric.into(),
            value,
            metric_type,
            timestamp: 0,
            dimensions: Tags::new(),
        }
    }

    /// Attach a source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the timestamp in milliseconds since the epoch; 0 means unset
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    /// Replace the dimensions
    pub fn with_dimensions(mut self, dimensions: Tags) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Source the point is reported for
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Metric name
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Numeric value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Declared type
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Timestamp in milliseconds, 0 if unset
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Dimensions excluding the source
    pub fn dimensions(&self) -> &Tags {
        &self.dimensions
    }
}

impl fmt::Display for OutgoingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.source.as_deref().unwrap_or("-"),
            self.metric,
            self.value,
            self.metric_type,
            self.timestamp
        )
    }
}

/// A metric computed by the embedding process and handed to the write path.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedMetric {
    /// Host the value was measured on, used as source fallback
    pub host: Option<String>,
    /// Metric name
    pub name: String,
    /// Value; NaN values are skipped
    pub value: f64,
    /// Declared type
    pub metric_type: MetricType,
    /// Milliseconds since the epoch, 0 if unknown
    pub timestamp: i64,
    /// Extra dimensions
    pub dimensions: Tags,
}

impl ComputedMetric {
    /// Create a computed metric without host, timestamp or dimensions
    pub fn new(name: impl Into<String>, value: f64, metric_type: MetricType) -> Self {
        Self {
            host: None,
            name: name.into(),
            value,
            metric_type,
            timestamp: 0,
            dimensions: Tags::new(),
        }
    }
}
