//! Statsd decoding and bucket aggregation.
//!
//! The listener hands raw datagrams to [`decode_packet`]; the resulting
//! samples are folded by [`BucketAggregator`] until the next flush.

pub mod aggregator;
pub mod parser;
pub mod types;

pub use aggregator::BucketAggregator;
pub use parser::{decode_line, decode_packet, DecodeError, DecodedPacket};
pub use types::{AggregatedMetric, AggregatedValue, HistogramSummary, Snapshot};
