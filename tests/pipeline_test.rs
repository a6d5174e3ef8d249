//! End-to-end: UDP datagrams in, registrations and datapoints out.

mod common;

use common::{
    build, mount_ingest, registered_names, send_datagram, test_config, uploaded_points,
    wait_until, RegistrationResponder,
};
use serde_json::Value;
use statsd_relay::core::{ComputedMetric, MetricType};
use statsd_relay::Agent;
use std::collections::HashSet;
use wiremock::MockServer;

fn value_of(points: &[Value], metric: &str) -> Option<f64> {
    points
        .iter()
        .find(|p| p["metric"] == metric)
        .and_then(|p| p["value"].as_f64())
}

async fn started_agent(server: &MockServer, threads: usize) -> Agent {
    let config = build(test_config(&server.uri()).flushing_threads(threads));
    let mut agent = Agent::configure(config).unwrap();
    agent.start().await.unwrap();
    assert!(agent.upload_fault().is_none());
    agent
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_datagrams_are_aggregated_and_uploaded() {
    let server = MockServer::start().await;
    mount_ingest(&server, RegistrationResponder::default()).await;
    let mut agent = started_agent(&server, 2).await;
    let addr = agent.listener_addr().unwrap();

    send_datagram(
        addr,
        "page.views:1|c\npage.views:1|c|@0.5\nsong.length:240|h|@0.5\n\
         users.uniques:1234|s\nusers.online:1|c|#country:china\nusers.online:1|c|#badlabel\nbroken",
    )
    .await;
    wait_until("listener to decode the datagram", || async {
        agent.listener_stats().is_some_and(|s| s.lines_decoded == 6)
    })
    .await;

    // page.views, five song.length sub-metrics, users.uniques and two
    // users.online buckets.
    assert_eq!(agent.flush(), 9);
    wait_until("points to be written", || async { agent.stats().points_written == 9 }).await;

    let points = uploaded_points(&server).await;
    assert_eq!(value_of(&points, "page.views"), Some(3.0));
    assert_eq!(value_of(&points, "song.length.max"), Some(240.0));
    assert_eq!(value_of(&points, "song.length.median"), Some(240.0));
    assert_eq!(value_of(&points, "song.length.avg"), Some(240.0));
    assert_eq!(value_of(&points, "song.length.count"), Some(2.0));
    assert_eq!(value_of(&points, "song.length.95percentile"), Some(240.0));
    assert_eq!(value_of(&points, "users.uniques"), Some(1.0));

    let online: Vec<_> = points.iter().filter(|p| p["metric"] == "users.online").collect();
    assert_eq!(online.len(), 2);
    assert!(online
        .iter()
        .any(|p| p["dimensions"]["country"] == "china" && p["value"] == 1.0));
    assert!(online.iter().any(|p| p["dimensions"].get("country").is_none()));
    assert!(points.iter().all(|p| p["timestamp"].as_i64().unwrap_or(0) > 0));

    agent.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_metric_registered_once() {
    let server = MockServer::start().await;
    mount_ingest(&server, RegistrationResponder::default()).await;
    let mut agent = started_agent(&server, 3).await;

    for round in 1..=3u64 {
        agent.submit_packet(b"hits:1|c\nfuel.level:0.5|g");
        agent.flush();
        wait_until("round to upload", || async {
            agent.stats().points_written == 2 * round
        })
        .await;
    }

    let names = registered_names(&server).await;
    assert_eq!(names.len(), 2);
    assert_eq!(
        names.into_iter().collect::<HashSet<_>>(),
        HashSet::from(["hits".to_string(), "fuel.level".to_string()])
    );
    assert_eq!(agent.registered_metrics().await, 2);
    assert_eq!(agent.stats().metrics_registered, 2);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_conflict_is_registered_and_uploaded() {
    let server = MockServer::start().await;
    mount_ingest(&server, RegistrationResponder::conflicting(&["hits"])).await;
    let mut agent = started_agent(&server, 1).await;

    agent.submit_packet(b"hits:5|c");
    agent.flush();
    wait_until("upload", || async { agent.stats().points_written == 1 }).await;

    assert_eq!(value_of(&uploaded_points(&server).await, "hits"), Some(5.0));
    assert_eq!(agent.stats().metrics_registered, 1);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_registration_uploads_the_rest() {
    let server = MockServer::start().await;
    mount_ingest(&server, RegistrationResponder::failing(&["bad.metric"])).await;
    let mut agent = started_agent(&server, 1).await;

    agent.submit_packet(b"bad.metric:1|c\ngood.metric:2|c");
    agent.flush();
    wait_until("upload", || async { agent.stats().points_written == 1 }).await;

    let points = uploaded_points(&server).await;
    assert_eq!(points.len(), 1);
    assert_eq!(value_of(&points, "good.metric"), Some(2.0));
    assert_eq!(agent.registered_metrics().await, 1);

    // The failed name is offered again on its next appearance.
    agent.submit_packet(b"bad.metric:1|c");
    agent.flush();
    wait_until("second registration", || async {
        registered_names(&server).await.len() == 3
    })
    .await;

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_computed_metrics_and_self_monitoring() {
    let server = MockServer::start().await;
    mount_ingest(&server, RegistrationResponder::default()).await;

    let config = build(
        test_config(&server.uri())
            .flushing_threads(1)
            .self_monitor(true)
            .source("relay-test"),
    );
    let mut agent = Agent::configure(config).unwrap();
    agent.start().await.unwrap();

    let mut metric = ComputedMetric::new("disk used", 42.0, MetricType::Gauge);
    metric.host = Some("db-1".to_string());
    assert!(agent.write(metric));

    agent.flush();
    // One written metric plus seven self-monitoring metrics.
    wait_until("upload", || async { agent.stats().points_written == 8 }).await;

    let points = uploaded_points(&server).await;
    let disk = points.iter().find(|p| p["metric"] == "disk_used").unwrap();
    assert_eq!(disk["dimensions"]["sf_source"], "relay-test");
    assert!(disk.get("timestamp").is_none());

    let monitored: Vec<_> = points
        .iter()
        .filter_map(|p| p["metric"].as_str())
        .filter(|m| m.starts_with("statsd_relay."))
        .collect();
    assert_eq!(monitored.len(), 7);
    assert!(monitored.contains(&"statsd_relay.queue_size"));

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_workers_and_listener() {
    let server = MockServer::start().await;
    mount_ingest(&server, RegistrationResponder::default()).await;
    let mut agent = started_agent(&server, 3).await;
    let addr = agent.listener_addr().unwrap();

    agent.shutdown().await.unwrap();
    assert!(!agent.is_running());
    assert!(agent.listener_addr().is_none());

    // Nothing consumes the queue any more and nothing reaches the server.
    assert!(!agent.write(ComputedMetric::new("late", 1.0, MetricType::Gauge)));
    assert_eq!(agent.stats().points_dropped, 1);
    assert!(server.received_requests().await.unwrap().is_empty());

    // The port is free again.
    let rebound = tokio::net::UdpSocket::bind(addr).await;
    assert!(rebound.is_ok());
}
