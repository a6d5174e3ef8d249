//! Command-line interface for statsd-relay.
//!
//! Run `statsd-relay --token <TOKEN>` to listen on UDP 8125 and upload to
//! the default ingest endpoint.

use crate::agent::Agent;
use crate::core::config::ConfigBuilder;
use crate::core::{Config, RelayError, Result};
use clap::Parser;
use std::path::PathBuf;

/// Statsd listener and aggregator that uploads to a metrics ingest API
#[derive(Parser, Debug)]
#[command(name = "statsd-relay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/statsd-relay/config.yaml)
    #[arg(short, long, env = "STATSD_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// UDP port for statsd
    #[arg(short, long, env = "STATSD_RELAY_PORT")]
    pub port: Option<u16>,

    /// Address to bind the statsd listener on
    #[arg(long, env = "STATSD_RELAY_BIND")]
    pub bind: Option<String>,

    /// Base URL of the ingest API
    #[arg(long, env = "STATSD_RELAY_INGEST_URL")]
    pub ingest_url: Option<String>,

    /// API token for the ingest API
    #[arg(long, env = "STATSD_RELAY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Number of upload workers
    #[arg(long, env = "STATSD_RELAY_THREADS")]
    pub threads: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, env = "STATSD_RELAY_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables
    /// 2. Config file
    /// 3. Defaults
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("statsd-relay").join("config.yaml"))
                .filter(|path| path.exists()),
        };

        if let Some(path) = config_path {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                RelayError::config(format!("Failed to read config file {}: {e}", path.display()))
            })?;
            builder = builder.from_yaml(&content)?;
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(bind) = &self.bind {
            builder = builder.bind_address(bind.clone());
        }
        if let Some(url) = &self.ingest_url {
            builder = builder.ingest_url(url.clone());
        }
        if let Some(token) = &self.token {
            builder = builder.api_token(token.clone());
        }
        if let Some(threads) = self.threads {
            builder = builder.flushing_threads(threads);
        }
        if self.debug {
            builder = builder.debug(true);
        }

        builder.build()
    }

    /// Initialize logging. `RUST_LOG` wins, then `--debug`, then
    /// `STATSD_RELAY_LOG_LEVEL`, then the configured level.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = if self.debug || config.debug {
            "debug".to_string()
        } else {
            std::env::var("STATSD_RELAY_LOG_LEVEL")
                .unwrap_or_else(|_| config.logging.level.as_str().to_string())
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| RelayError::config(format!("Failed to initialize logging: {e}")))?;

        Ok(())
    }
}

/// Execute the relay.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!(
            "  Listener: {}:{} (enabled: {})",
            config.listener.bind_address, config.listener.port, config.listener.enabled
        );
        println!("  Ingest URL: {}", config.upload.ingest_url);
        println!("  Workers: {}", config.upload.flushing_threads);
        println!("  Queue size: {}", config.upload.max_queue_size);
        println!("  Flush interval: {:?}", config.aggregation.interval);
        return Ok(());
    }

    cli.init_logging(&config)?;

    if config.upload.api_token.is_empty() {
        tracing::warn!("no API token configured; the ingest API will likely reject uploads");
    }

    let mut agent = Agent::configure(config)?;
    agent.start().await?;

    if let Some(fault) = agent.upload_fault() {
        tracing::error!(error = %fault, "running without upload path");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping...");

    agent.shutdown().await
}
