//! statsd-relay - embeddable statsd aggregation agent.
//!
//! Listens for statsd datagrams over UDP, aggregates them into fixed
//! windows, and uploads the results to a metrics ingest API through a
//! bounded queue drained by a pool of workers.
//!
//! # Features
//!
//! - **Statsd wire protocol**: counters, gauges (absolute and delta),
//!   timers, histograms and sets, with sample rates and `#tag:value` tags
//! - **Correct aggregation**: rate-corrected counters, carried-forward
//!   gauges, max/median/avg/count/p95 for timers and histograms
//! - **Never blocks on the network**: a full upload queue drops and counts
//! - **One registration per metric**: names are registered once and cached
//!
//! # Architecture
//!
//! - `receiver`: UDP listener
//! - `metrics`: wire decoder and bucket aggregator
//! - `export`: upload queue, drain workers, registration cache, ingest client
//! - `agent`: lifecycle wiring for embedding processes
//! - `monitoring`: pipeline self-monitoring
//! - `core`: domain types, configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use statsd_relay::core::ConfigBuilder;
//! use statsd_relay::Agent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new().api_token("secret").build()?;
//!     let mut agent = Agent::configure(config)?;
//!     agent.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     agent.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod agent;
pub mod cli;
pub mod core;
pub mod export;
pub mod metrics;
pub mod monitoring;
pub mod receiver;

// Re-export core types for convenience
pub use crate::agent::Agent;
pub use crate::core::{Config, RelayError, Result};
