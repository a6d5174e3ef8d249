//! Common test utilities and fixtures.

#![allow(dead_code)]

use serde_json::Value;
use statsd_relay::core::{Config, ConfigBuilder};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Config pointing at a mock ingest server, listening on an ephemeral port
/// and never flushing on its own.
pub fn test_config(ingest_url: &str) -> ConfigBuilder {
    ConfigBuilder::new()
        .bind_address("127.0.0.1")
        .port(0)
        .poll_timeout(Duration::from_millis(50))
        .interval(Duration::from_secs(3600))
        .ingest_url(ingest_url)
        .api_token("test-token")
        .self_monitor(false)
}

pub fn build(builder: ConfigBuilder) -> Config {
    builder.build().expect("test config should be valid")
}

/// Answers a bulk registration positionally: `409` for names in
/// `conflicting`, `400` for names in `failing`, success otherwise.
#[derive(Clone, Default)]
pub struct RegistrationResponder {
    pub conflicting: HashSet<String>,
    pub failing: HashSet<String>,
}

impl RegistrationResponder {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn conflicting(names: &[&str]) -> Self {
        Self {
            conflicting: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Respond for RegistrationResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let items: Vec<Value> = serde_json::from_slice(&request.body).unwrap_or_default();
        let outcomes: Vec<Value> = items
            .iter()
            .map(|item| {
                let name = item["sf_metric"].as_str().unwrap_or_default();
                if self.failing.contains(name) {
                    serde_json::json!({"code": 400, "message": "invalid metric"})
                } else if self.conflicting.contains(name) {
                    serde_json::json!({"code": 409, "message": "already exists"})
                } else {
                    serde_json::json!({"sf_metric": name})
                }
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(outcomes)
    }
}

/// Mount registration and datapoint endpoints that accept everything the
/// responder allows.
pub async fn mount_ingest(server: &MockServer, responder: RegistrationResponder) {
    Mock::given(method("POST"))
        .and(path("/metric"))
        .and(query_param("bulkupdate", "true"))
        .respond_with(responder)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/datapoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json("OK"))
        .mount(server)
        .await;
}

/// JSON bodies of every request the server received on `endpoint`.
pub async fn bodies(server: &MockServer, endpoint: &str) -> Vec<Vec<Value>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .map(|r| serde_json::from_slice(&r.body).expect("JSON array body"))
        .collect()
}

/// Every uploaded datapoint, flattened across requests.
pub async fn uploaded_points(server: &MockServer) -> Vec<Value> {
    bodies(server, "/datapoint").await.into_iter().flatten().collect()
}

/// Every metric name sent for registration, flattened across requests.
pub async fn registered_names(server: &MockServer) -> Vec<String> {
    bodies(server, "/metric")
        .await
        .into_iter()
        .flatten()
        .filter_map(|item| item["sf_metric"].as_str().map(str::to_string))
        .collect()
}

pub async fn send_datagram(target: SocketAddr, payload: &str) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(payload.as_bytes(), target).await.unwrap();
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
