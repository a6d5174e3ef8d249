//! Configuration management for the relay.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults
//!
//! A single [`Config`] value is built once at startup and shared by
//! reference with every component.

use crate::core::{RelayError, Result, Tags};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default statsd port
pub const DEFAULT_STATSD_PORT: u16 = 8125;

/// Complete configuration for the relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP listener configuration
    pub listener: ListenerConfig,
    /// Bucket aggregation configuration
    pub aggregation: AggregationConfig,
    /// Ingest upload configuration
    pub upload: UploadConfig,
    /// Computed-metric write path configuration
    pub writer: WriterConfig,
    /// Self-monitoring configuration
    pub monitoring: MonitoringConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// UDP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Run the statsd listener at all
    pub enabled: bool,
    /// Host or IP to bind
    pub bind_address: String,
    /// UDP port, 0 picks an ephemeral port
    pub port: u16,
    /// Largest datagram read in one receive
    pub max_packet_size: usize,
    /// Longest single wait for a datagram before re-checking for stop
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Forward every raw datagram to this `host[:port]`
    pub forward_to: Option<String>,
}

/// Bucket aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Bucket window; the flush timer fires at this period
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Drop gauges not updated within this window; carried forever if unset
    #[serde(with = "humantime_serde")]
    pub gauge_expiry: Option<Duration>,
    /// Source reported with every aggregated point
    pub source: Option<String>,
    /// Dimensions added to every aggregated point; sample tags win on conflict
    pub dimensions: Tags,
}

/// Ingest upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the ingest API
    pub ingest_url: String,
    /// API token sent as `X-SF-TOKEN`
    pub api_token: String,
    /// Number of drain workers
    pub flushing_threads: usize,
    /// Upload queue capacity
    pub max_queue_size: usize,
    /// Most points uploaded in one batch
    pub queue_flush_size: usize,
    /// Per-request HTTP timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// User-Agent product name; the crate version is appended
    pub user_agent: String,
}

/// Computed-metric write path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Only metrics matching one of these patterns are written; empty keeps all
    pub include_regex: Vec<String>,
    /// Lower-case metric names
    pub lower_case: bool,
    /// Send timestamp 0 and let the ingest API stamp arrival time
    pub ignore_timestamps: bool,
}

/// Self-monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Emit pipeline counters on every flush
    pub self_monitor: bool,
    /// Metric name prefix for pipeline counters
    pub namespace: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_STATSD_PORT,
            max_packet_size: 65535,
            poll_timeout: Duration::from_secs(5),
            forward_to: None,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            interval: Duration::from_secs(10),
            gauge_expiry: None,
            source: None,
            dimensions: Tags::new(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            ingest_url: "https://ingest.signalfx.com".to_string(),
            api_token: String::new(),
            flushing_threads: 2,
            max_queue_size: 20_000,
            queue_flush_size: 5_000,
            timeout: Duration::from_secs(60),
            user_agent: "statsd-relay".to_string(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            include_regex: Vec::new(),
            lower_case: false,
            ignore_timestamps: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            self_monitor: true,
            namespace: "statsd_relay".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.listener.max_packet_size == 0 {
            return Err(RelayError::config("max_packet_size must be greater than 0"));
        }

        if self.listener.poll_timeout.is_zero() {
            return Err(RelayError::config("poll_timeout must be greater than 0"));
        }

        if self.aggregation.interval.is_zero() {
            return Err(RelayError::config("aggregation interval must be greater than 0"));
        }

        if self.upload.flushing_threads == 0 {
            return Err(RelayError::config("flushing_threads must be greater than 0"));
        }

        if self.upload.max_queue_size == 0 {
            return Err(RelayError::config("max_queue_size must be greater than 0"));
        }

        if self.upload.queue_flush_size == 0 {
            return Err(RelayError::config("queue_flush_size must be greater than 0"));
        }

        self.ingest_url()?;

        for pattern in &self.writer.include_regex {
            regex::Regex::new(pattern).map_err(|e| {
                RelayError::config(format!("Invalid include_regex '{}': {}", pattern, e))
            })?;
        }

        if self.monitoring.self_monitor && self.monitoring.namespace.is_empty() {
            return Err(RelayError::config("monitoring namespace cannot be empty"));
        }

        Ok(())
    }

    /// Parse and check the ingest URL
    pub fn ingest_url(&self) -> Result<reqwest::Url> {
        let url = reqwest::Url::parse(&self.upload.ingest_url).map_err(|e| {
            RelayError::config(format!(
                "The ingest URL is not correct ({}): {}",
                e, self.upload.ingest_url
            ))
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(RelayError::config(format!(
                "The ingest URL must be http(s) with a host: {}",
                self.upload.ingest_url
            )));
        }

        Ok(url)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        let debug = self.config.debug;
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| RelayError::config(format!("Failed to parse YAML config: {}", e)))?;
        self.config.debug = debug;
        Ok(self)
    }

    /// Set the listener bind address
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.listener.bind_address = address.into();
        self
    }

    /// Set the listener port
    pub fn port(mut self, port: u16) -> Self {
        self.config.listener.port = port;
        self
    }

    /// Enable or disable the UDP listener
    pub fn listener_enabled(mut self, enabled: bool) -> Self {
        self.config.listener.enabled = enabled;
        self
    }

    /// Set the listener poll timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.listener.poll_timeout = timeout;
        self
    }

    /// Forward raw datagrams to another statsd
    pub fn forward_to(mut self, target: impl Into<String>) -> Self {
        self.config.listener.forward_to = Some(target.into());
        self
    }

    /// Set the aggregation interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.aggregation.interval = interval;
        self
    }

    /// Expire gauges not updated within the given window
    pub fn gauge_expiry(mut self, expiry: Duration) -> Self {
        self.config.aggregation.gauge_expiry = Some(expiry);
        self
    }

    /// Set the reported source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.config.aggregation.source = Some(source.into());
        self
    }

    /// Set the ingest URL
    pub fn ingest_url(mut self, url: impl Into<String>) -> Self {
        self.config.upload.ingest_url = url.into();
        self
    }

    /// Set the API token
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.upload.api_token = token.into();
        self
    }

    /// Set the number of drain workers
    pub fn flushing_threads(mut self, threads: usize) -> Self {
        self.config.upload.flushing_threads = threads;
        self
    }

    /// Set the upload queue capacity
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.upload.max_queue_size = size;
        self
    }

    /// Set the per-batch ceiling
    pub fn queue_flush_size(mut self, size: usize) -> Self {
        self.config.upload.queue_flush_size = size;
        self
    }

    /// Enable or disable self-monitoring
    pub fn self_monitor(mut self, enabled: bool) -> Self {
        self.config.monitoring.self_monitor = enabled;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
