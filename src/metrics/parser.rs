//! Statsd wire protocol decoder using nom.
//!
//! One datagram carries one sample per line:
//!
//! ```text
//! name:value|type[|@rate][|#tag:val,tag:val,...]
//! ```
//!
//! A bad line is dropped with a diagnostic; it never affects the other lines
//! of the same datagram.

use crate::core::{GaugeValue, MetricSample, SampleValue, Tags};
use nom::{
    bytes::complete::{take_till, take_till1},
    character::complete::char,
    combinator::all_consuming,
    multi::many0,
    sequence::{preceded, tuple},
    IResult,
};
use thiserror::Error;

/// Characters that may not appear in a dimension key or value downstream.
const RESERVED_TAG_CHARS: &[char] = &['[', ']', ',', '=', ':'];

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("wrong field count in line '{0}'")]
    FieldCount(String),

    #[error("empty metric name in line '{0}'")]
    EmptyName(String),

    #[error("non-numeric value '{value}' for metric '{metric}'")]
    InvalidValue { metric: String, value: String },

    #[error("unknown metric type '{0}'")]
    UnknownType(String),

    #[error("invalid sample rate '{rate}' for metric '{metric}'")]
    InvalidSampleRate { metric: String, rate: String },
}

/// Result of decoding one datagram.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodedPacket {
    /// Samples in line order
    pub samples: Vec<MetricSample>,
    /// Lines that were rejected
    pub dropped: usize,
}

/// Line split into its raw fields, before any type interpretation.
#[derive(Debug)]
struct RawLine<'a> {
    name: &'a str,
    value: &'a str,
    kind: &'a str,
    segments: Vec<&'a str>,
}

fn raw_line(input: &str) -> IResult<&str, RawLine<'_>> {
    let (input, (name, _, value, _, kind, segments)) = tuple((
        take_till(|c: char| c == ':'),
        char(':'),
        take_till1(|c: char| c == '|'),
        char('|'),
        take_till1(|c: char| c == '|'),
        many0(preceded(char('|'), take_till(|c: char| c == '|'))),
    ))(input)?;

    Ok((
        input,
        RawLine {
            name,
            value,
            kind,
            segments,
        },
    ))
}

/// Decode a whole datagram. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_packet(packet: &[u8]) -> DecodedPacket {
    let text = String::from_utf8_lossy(packet);
    let mut decoded = DecodedPacket::default();

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match decode_line(line) {
            Ok(sample) => decoded.samples.push(sample),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed statsd line");
                decoded.dropped += 1;
            },
        }
    }

    decoded
}

/// Decode a single line.
pub fn decode_line(line: &str) -> Result<MetricSample, DecodeError> {
    let (_, raw) = all_consuming(raw_line)(line)
        .map_err(|_| DecodeError::FieldCount(line.to_string()))?;

    if raw.name.is_empty() {
        return Err(DecodeError::EmptyName(line.to_string()));
    }

    let value = parse_value(raw.name, raw.value, raw.kind)?;
    let mut sample = MetricSample::new(raw.name, value);

    for segment in raw.segments {
        if let Some(rate) = segment.strip_prefix('@') {
            sample.sample_rate = parse_rate(raw.name, rate)?;
        } else if let Some(tags) = segment.strip_prefix('#') {
            sample.tags = parse_tags(tags, raw.name);
        }
    }

    // Rate only corrects volume for counters and histogram counts.
    if matches!(sample.value, SampleValue::Gauge(_) | SampleValue::Set(_)) {
        sample.sample_rate = 1.0;
    }

    Ok(sample)
}

fn parse_value(metric: &str, value: &str, kind: &str) -> Result<SampleValue, DecodeError> {
    let number = || -> Result<f64, DecodeError> {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DecodeError::InvalidValue {
                metric: metric.to_string(),
                value: value.to_string(),
            })
    };

    match kind {
        "c" => Ok(SampleValue::Counter(number()?)),
        "g" => {
            let parsed = number()?;
            if value.starts_with('+') || value.starts_with('-') {
                Ok(SampleValue::Gauge(GaugeValue::Delta(parsed)))
            } else {
                Ok(SampleValue::Gauge(GaugeValue::Absolute(parsed)))
            }
        },
        "h" | "ms" => Ok(SampleValue::Histogram(number()?)),
        "s" => Ok(SampleValue::Set(value.to_string())),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn parse_rate(metric: &str, rate: &str) -> Result<f64, DecodeError> {
    rate.parse::<f64>()
        .ok()
        .filter(|r| *r > 0.0 && *r <= 1.0)
        .ok_or_else(|| DecodeError::InvalidSampleRate {
            metric: metric.to_string(),
            rate: rate.to_string(),
        })
}

/// Parse the comma-separated tag list. Bare labels and malformed tokens are
/// dropped individually.
pub fn parse_tags(list: &str, metric: &str) -> Tags {
    let mut tags = Tags::new();

    for token in list.split(',') {
        match token.split_once(':') {
            None if token.is_empty() => {
                tracing::warn!(metric, "dropping empty statsd tag");
            },
            None => {
                tracing::info!(
                    label = token,
                    metric,
                    "dropping label because statsd labels are not supported"
                );
            },
            Some(("", _)) => {
                tracing::warn!(tag = token, metric, "dropping malformed statsd tag");
            },
            Some((key, value)) => {
                tags.insert(sanitize_tag(key), sanitize_tag(value));
            },
        }
    }

    tags
}

/// Replace characters reserved by the ingest dimension syntax with `_`.
pub fn sanitize_tag(raw: &str) -> String {
    raw.chars()
        .map(|c| if RESERVED_TAG_CHARS.contains(&c) { '_' } else { c })
        .collect()
}
