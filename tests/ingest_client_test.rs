//! HTTP ingest client against a mock ingest API.

mod common;

use common::{bodies, RegistrationResponder};
use pretty_assertions::assert_eq;
use statsd_relay::core::config::UploadConfig;
use statsd_relay::core::{MetricType, OutgoingPoint, RelayError, Tags};
use statsd_relay::export::{HttpIngestClient, IngestClient, MetricRegistration, RegistrationOutcome};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpIngestClient {
    let url = reqwest::Url::parse(&server.uri()).unwrap();
    let config = UploadConfig {
        api_token: "test-token".to_string(),
        ..UploadConfig::default()
    };
    HttpIngestClient::new(&url, &config)
}

#[tokio::test]
async fn test_registration_request_and_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/metric"))
        .and(header("X-SF-TOKEN", "test-token"))
        .and(header("Content-Type", "application/json"))
        .respond_with(RegistrationResponder::conflicting(&["b"]))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let outcomes = client
        .register_metrics(&[
            MetricRegistration::new("a", MetricType::Gauge),
            MetricRegistration::new("b", MetricType::Counter),
        ])
        .await
        .unwrap();

    assert_eq!(
        outcomes,
        vec![RegistrationOutcome::Registered, RegistrationOutcome::AlreadyExists]
    );
    assert!(client.is_connected());

    let sent = bodies(&server, "/metric").await;
    assert_eq!(
        sent[0],
        vec![
            serde_json::json!({"sf_metric": "a", "sf_metricType": "GAUGE"}),
            serde_json::json!({"sf_metric": "b", "sf_metricType": "COUNTER"}),
        ]
    );

    let requests = server.received_requests().await.unwrap();
    let user_agent = requests[0].headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(user_agent.starts_with("statsd-relay/"));
}

#[tokio::test]
async fn test_registration_non_200_fails_every_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/metric"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let outcomes = client
        .register_metrics(&[
            MetricRegistration::new("a", MetricType::Gauge),
            MetricRegistration::new("b", MetricType::Gauge),
        ])
        .await
        .unwrap();

    assert_eq!(outcomes, vec![RegistrationOutcome::Failed; 2]);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_registration_short_response_is_returned_as_is() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{}])))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let outcomes = client
        .register_metrics(&[
            MetricRegistration::new("a", MetricType::Gauge),
            MetricRegistration::new("b", MetricType::Gauge),
        ])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
}

#[tokio::test]
async fn test_datapoint_upload_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/datapoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let mut dimensions = Tags::new();
    dimensions.insert("country".to_string(), "china".to_string());
    let points = vec![
        OutgoingPoint::new("users.online", 1.0, MetricType::Counter)
            .with_source("web-1")
            .with_dimensions(dimensions),
        OutgoingPoint::new("fuel.level", 0.5, MetricType::Gauge).with_timestamp(1_000),
    ];

    let mut client = client_for(&server);
    client.add_datapoints(&points).await.unwrap();

    let sent = bodies(&server, "/datapoint").await;
    assert_eq!(
        sent[0],
        vec![
            serde_json::json!({
                "metric": "users.online",
                "value": 1.0,
                "dimensions": {"country": "china", "sf_source": "web-1"}
            }),
            serde_json::json!({
                "metric": "fuel.level",
                "value": 0.5,
                "timestamp": 1000,
                "dimensions": {}
            }),
        ]
    );
}

#[tokio::test]
async fn test_datapoint_upload_requires_ok_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/datapoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json("NOPE"))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let err = client
        .add_datapoints(&[OutgoingPoint::new("m", 1.0, MetricType::Gauge)])
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Upload(_)));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_transport_error_discards_connection() {
    // Nothing listens on the discard port.
    let url = reqwest::Url::parse("http://127.0.0.1:9").unwrap();
    let mut client = HttpIngestClient::new(&url, &UploadConfig::default());

    let err = client
        .add_datapoints(&[OutgoingPoint::new("m", 1.0, MetricType::Gauge)])
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connect_resolves_host() {
    let server = MockServer::start().await;
    let mut client = client_for(&server);
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let url = reqwest::Url::parse("http://ingest.invalid").unwrap();
    let mut client = HttpIngestClient::new(&url, &UploadConfig::default());
    assert!(client.connect().await.is_err());
}
