//! Configuration system tests.

use statsd_relay::core::config::LogLevel;
use statsd_relay::core::{Config, ConfigBuilder, RelayError};
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(config.listener.enabled);
    assert_eq!(config.listener.bind_address, "0.0.0.0");
    assert_eq!(config.listener.port, 8125);
    assert_eq!(config.aggregation.interval, Duration::from_secs(10));
    assert_eq!(config.aggregation.gauge_expiry, None);
    assert_eq!(config.upload.ingest_url, "https://ingest.signalfx.com");
    assert_eq!(config.upload.flushing_threads, 2);
    assert_eq!(config.upload.max_queue_size, 20_000);
    assert_eq!(config.upload.queue_flush_size, 5_000);
    assert_eq!(config.upload.timeout, Duration::from_secs(60));
    assert!(config.monitoring.self_monitor);
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .bind_address("localhost")
        .port(9125)
        .poll_timeout(Duration::from_millis(100))
        .forward_to("10.1.2.3")
        .interval(Duration::from_secs(1))
        .gauge_expiry(Duration::from_secs(30))
        .source("web-1")
        .ingest_url("http://127.0.0.1:8080")
        .api_token("secret")
        .flushing_threads(4)
        .max_queue_size(100)
        .queue_flush_size(10)
        .self_monitor(false)
        .debug(true)
        .build()
        .unwrap();

    assert_eq!(config.listener.bind_address, "localhost");
    assert_eq!(config.listener.port, 9125);
    assert_eq!(config.listener.poll_timeout, Duration::from_millis(100));
    assert_eq!(config.listener.forward_to.as_deref(), Some("10.1.2.3"));
    assert_eq!(config.aggregation.interval, Duration::from_secs(1));
    assert_eq!(config.aggregation.gauge_expiry, Some(Duration::from_secs(30)));
    assert_eq!(config.aggregation.source.as_deref(), Some("web-1"));
    assert_eq!(config.upload.api_token, "secret");
    assert_eq!(config.upload.flushing_threads, 4);
    assert_eq!(config.upload.max_queue_size, 100);
    assert_eq!(config.upload.queue_flush_size, 10);
    assert!(!config.monitoring.self_monitor);
    assert!(config.debug);
    assert_eq!(config.ingest_url().unwrap().port(), Some(8080));
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
listener:
  enabled: false
  port: 18125
aggregation:
  interval: 30s
  source: "batch-host"
  dimensions:
    cluster: "east"
upload:
  api_token: "from-file"
  max_queue_size: 500
  timeout: 2m
writer:
  include_regex: ["^cpu\\.", "^mem\\."]
  lower_case: true
  ignore_timestamps: false
monitoring:
  namespace: "relay"
logging:
  level: debug
  structured: true
"#;

    let config = ConfigBuilder::new()
        .debug(true)
        .from_yaml(yaml)
        .unwrap()
        .build()
        .unwrap();

    assert!(!config.listener.enabled);
    assert_eq!(config.listener.port, 18125);
    assert_eq!(config.listener.bind_address, "0.0.0.0");
    assert_eq!(config.aggregation.interval, Duration::from_secs(30));
    assert_eq!(config.aggregation.source.as_deref(), Some("batch-host"));
    assert_eq!(
        config.aggregation.dimensions.get("cluster").map(String::as_str),
        Some("east")
    );
    assert_eq!(config.upload.api_token, "from-file");
    assert_eq!(config.upload.max_queue_size, 500);
    assert_eq!(config.upload.timeout, Duration::from_secs(120));
    assert_eq!(config.writer.include_regex.len(), 2);
    assert!(config.writer.lower_case);
    assert!(!config.writer.ignore_timestamps);
    assert_eq!(config.monitoring.namespace, "relay");
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert!(config.logging.structured);
    // Debug is a runtime flag and survives loading a file.
    assert!(config.debug);
}

#[test]
fn test_config_validation() {
    let zero = |builder: ConfigBuilder| matches!(builder.build(), Err(RelayError::Config(_)));

    assert!(zero(ConfigBuilder::new().flushing_threads(0)));
    assert!(zero(ConfigBuilder::new().max_queue_size(0)));
    assert!(zero(ConfigBuilder::new().queue_flush_size(0)));
    assert!(zero(ConfigBuilder::new().interval(Duration::ZERO)));
    assert!(zero(ConfigBuilder::new().poll_timeout(Duration::ZERO)));
    assert!(zero(ConfigBuilder::new().ingest_url("")));
    assert!(zero(ConfigBuilder::new().ingest_url("file:///tmp/ingest")));

    let mut config = Config::default();
    config.writer.include_regex = vec!["[unclosed".to_string()];
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.monitoring.namespace.clear();
    assert!(config.validate().is_err());
    config.monitoring.self_monitor = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_yaml() {
    let result = ConfigBuilder::new().from_yaml("listener: [not, a, map]");
    assert!(matches!(result, Err(RelayError::Config(_))));

    let result = ConfigBuilder::new().from_yaml("aggregation:\n  interval: soon\n");
    assert!(result.is_err());
}

#[test]
fn test_log_level_strings() {
    assert_eq!(LogLevel::Trace.as_str(), "trace");
    assert_eq!(LogLevel::Warn.as_str(), "warn");
    assert_eq!(LogLevel::Error.as_str(), "error");
}
