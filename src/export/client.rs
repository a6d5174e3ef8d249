//! Ingest API client.
//!
//! Two RPCs: bulk metric registration and bulk datapoint upload, both JSON
//! over HTTP. The underlying connection pool is built on first use and
//! thrown away after a transport failure, so the next call reconnects.

use crate::core::config::UploadConfig;
use crate::core::{MetricType, OutgoingPoint, RelayError, Result};
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Dimension that carries the point source on the wire.
pub const SOURCE_DIMENSION: &str = "sf_source";

const CONFLICT: u16 = 409;

/// One entry of a bulk registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRegistration {
    #[serde(rename = "sf_metric")]
    pub metric: String,
    #[serde(rename = "sf_metricType")]
    pub metric_type: MetricType,
}

impl MetricRegistration {
    pub fn new(metric: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            metric: metric.into(),
            metric_type,
        }
    }
}

/// Per-item result of a bulk registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Newly created
    Registered,
    /// The endpoint already knew the metric
    AlreadyExists,
    /// Rejected; retried when the name next appears
    Failed,
}

impl RegistrationOutcome {
    /// Whether the metric may now be uploaded
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered | Self::AlreadyExists)
    }
}

/// The two ingest RPCs.
#[async_trait]
pub trait IngestClient: Send {
    /// Register metrics in bulk. The result is positional; a length that
    /// differs from the request is a protocol violation the caller handles.
    async fn register_metrics(
        &mut self,
        metrics: &[MetricRegistration],
    ) -> Result<Vec<RegistrationOutcome>>;

    /// Upload datapoints in bulk. All or nothing.
    async fn add_datapoints(&mut self, points: &[OutgoingPoint]) -> Result<()>;

    /// Discard the current connection; the next call reconnects.
    fn disconnect(&mut self);
}

#[derive(Debug, Serialize)]
struct DatapointBody<'a> {
    metric: &'a str,
    value: f64,
    #[serde(skip_serializing_if = "is_unset")]
    timestamp: i64,
    dimensions: BTreeMap<&'a str, &'a str>,
}

fn is_unset(timestamp: &i64) -> bool {
    *timestamp == 0
}

impl<'a> From<&'a OutgoingPoint> for DatapointBody<'a> {
    fn from(point: &'a OutgoingPoint) -> Self {
        // Explicit dimensions win over the source.
        let mut dimensions: BTreeMap<&str, &str> = point
            .source()
            .map(|source| (SOURCE_DIMENSION, source))
            .into_iter()
            .collect();
        dimensions.extend(
            point
                .dimensions()
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        Self {
            metric: point.metric(),
            value: point.value(),
            timestamp: point.timestamp(),
            dimensions,
        }
    }
}

/// Interpret a 200 registration body. `None` means the body was not a JSON
/// array at all.
fn parse_registration_body(body: &[u8]) -> Option<Vec<RegistrationOutcome>> {
    let items: Vec<serde_json::Value> = serde_json::from_slice(body).ok()?;

    Some(
        items
            .iter()
            .map(|item| match item.get("code") {
                Some(code) if code.as_u64() == Some(u64::from(CONFLICT)) => {
                    RegistrationOutcome::AlreadyExists
                },
                Some(_) => RegistrationOutcome::Failed,
                None => RegistrationOutcome::Registered,
            })
            .collect(),
    )
}

/// HTTP implementation of [`IngestClient`].
#[derive(Debug)]
pub struct HttpIngestClient {
    base_url: String,
    token: String,
    user_agent: String,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl HttpIngestClient {
    /// Create a client for `base_url`. No connection is made yet.
    pub fn new(base_url: &reqwest::Url, config: &UploadConfig) -> Self {
        Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            user_agent: format!("{}/{}", config.user_agent, env!("CARGO_PKG_VERSION")),
            timeout: config.timeout,
            client: None,
        }
    }

    /// Build the connection pool now and resolve the endpoint host, so an
    /// unusable endpoint is reported at startup instead of on first upload.
    pub async fn connect(&mut self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| RelayError::config(format!("invalid ingest URL {}: {e}", self.base_url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::config(format!("ingest URL has no host: {}", self.base_url)))?;
        let port = url.port_or_known_default().unwrap_or(443);

        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| RelayError::network(format!("cannot resolve ingest host {host}: {e}")))?;
        if addrs.next().is_none() {
            return Err(RelayError::network(format!("ingest host {host} has no address")));
        }

        self.client()?;
        Ok(())
    }

    /// Whether a connection pool is currently held
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn client(&mut self) -> Result<reqwest::Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "X-SF-TOKEN",
            header::HeaderValue::from_str(&self.token)
                .map_err(|e| RelayError::config(format!("API token is not a valid header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .build()?;

        tracing::debug!(url = %self.base_url, "ingest connection established");
        self.client = Some(client.clone());
        Ok(client)
    }

    async fn post<T: Serialize + ?Sized>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let client = self.client()?;
        let url = format!("{}{}", self.base_url, path);

        let result = async {
            let response = client.post(&url).json(body).send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes.to_vec()))
        }
        .await;

        result.map_err(|e| {
            self.disconnect();
            RelayError::Http(e)
        })
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn register_metrics(
        &mut self,
        metrics: &[MetricRegistration],
    ) -> Result<Vec<RegistrationOutcome>> {
        let (status, body) = self.post("/metric?bulkupdate=true", metrics).await?;

        let outcomes = if status == StatusCode::OK {
            parse_registration_body(&body)
        } else {
            None
        };

        match outcomes {
            Some(outcomes) => Ok(outcomes),
            None => {
                tracing::warn!(
                    status = status.as_u16(),
                    body = %String::from_utf8_lossy(&body),
                    "metric registration rejected"
                );
                self.disconnect();
                Ok(vec![RegistrationOutcome::Failed; metrics.len()])
            },
        }
    }

    async fn add_datapoints(&mut self, points: &[OutgoingPoint]) -> Result<()> {
        let body: Vec<DatapointBody<'_>> = points.iter().map(DatapointBody::from).collect();
        let (status, response) = self.post("/datapoint", &body).await?;

        let accepted = status == StatusCode::OK
            && serde_json::from_slice::<String>(&response).is_ok_and(|body| body == "OK");

        if accepted {
            Ok(())
        } else {
            Err(RelayError::upload(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&response)
            )))
        }
    }

    fn disconnect(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!(url = %self.base_url, "ingest connection discarded");
        }
    }
}
