//! Upload pipeline.
//!
//! Points enter a bounded [`UploadQueue`] without ever blocking the
//! producer. A fixed set of [`DrainWorker`]s pulls batches, registers metric
//! names the [`RegistrationCache`] has not seen, and uploads the rest through
//! an [`IngestClient`].

pub mod client;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod worker;

pub use client::{
    HttpIngestClient, IngestClient, MetricRegistration, RegistrationOutcome, SOURCE_DIMENSION,
};
pub use queue::{QueueItem, QueueReceiver, Take, UploadQueue};
pub use registry::RegistrationCache;
pub use stats::{UploadStats, UploadStatsSnapshot};
pub use worker::{DrainWorker, WorkerState};
