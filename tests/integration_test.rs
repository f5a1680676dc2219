//! Integration tests for the capture, mock, forward, and replay paths

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::Response;
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::net::TcpListener;

use hooksink::config::{ForwardConfig, LimitsConfig, Mode, ReplayConfig, ServerConfig};
use hooksink::dispatch::{DispatchPool, OutboundClient, OutboundRequest};
use hooksink::event::Event;
use hooksink::forward::DeliveryOutcome;
use hooksink::replay::ReplaySession;
use hooksink::server::Server;
use hooksink::storage::{load_events, EventLogWriter};

/// Requests observed by a loopback target
#[derive(Default)]
struct TargetLog {
    hits: AtomicUsize,
    requests: Mutex<Vec<(String, String, String)>>,
}

/// Spawn a loopback target that records (method, path, body) and answers 200
async fn spawn_target() -> (String, Arc<TargetLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(TargetLog::default());
    let log_server = Arc::clone(&log);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let log = Arc::clone(&log_server);
            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let log = Arc::clone(&log);
                    async move {
                        let method = req.method().to_string();
                        let path = req.uri().path().to_string();
                        let body = http_body_util::BodyExt::collect(req.into_body())
                            .await
                            .map(|b| String::from_utf8_lossy(&b.to_bytes()).into_owned())
                            .unwrap_or_default();

                        log.hits.fetch_add(1, Ordering::SeqCst);
                        log.requests.lock().unwrap().push((method, path, body));

                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("ok"))))
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (format!("http://{addr}"), log)
}

/// Build, bind, and spawn a hooksink server; returns its base URL
async fn spawn_server(config: ServerConfig) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::build(config).unwrap();

    let handle = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    (format!("http://{addr}"), handle)
}

fn listen_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 1, // replaced by the test listener
        mode: Mode::Listen,
        save_path: None,
        mock_spec: None,
        forward: None,
        pretty: false,
        quiet: true,
        exit_after: None,
        limits: LimitsConfig::default(),
    }
}

fn post_json(url: &str, body: &str) -> OutboundRequest {
    OutboundRequest {
        method: "POST".to_string(),
        url: url.to_string(),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Bytes::from(body.to_string()),
    }
}

fn get(url: &str) -> OutboundRequest {
    OutboundRequest {
        method: "GET".to_string(),
        url: url.to_string(),
        headers: vec![],
        body: Bytes::new(),
    }
}

async fn wait_for_hits(log: &TargetLog, expected: usize) {
    for _ in 0..200 {
        if log.hits.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} hits, saw {}",
        log.hits.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_capture_and_save_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let save_path = temp_dir.path().join("events.jsonl");

    let mut config = listen_config();
    config.save_path = Some(save_path.clone());
    let (base, _handle) = spawn_server(config).await;

    let client = OutboundClient::new();
    let response = client
        .send(&post_json(
            &format!("{base}/webhook/github?delivery=1"),
            r#"{"action": "opened"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let ack: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(ack, serde_json::json!({"status": "received"}));

    let events = load_events(&save_path).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].method, "POST");
    assert_eq!(events[0].path, "/webhook/github");
    assert_eq!(
        events[0].query,
        vec![("delivery".to_string(), "1".to_string())]
    );
    assert_eq!(events[0].json, Some(serde_json::json!({"action": "opened"})));
    assert_eq!(events[0].raw, None);

    // Health endpoint reports the capture
    let health = client.send(&get(&format!("{base}/health"))).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&health.body).unwrap();
    assert_eq!(health["events_received"], 1);
}

#[tokio::test]
async fn test_forward_relays_captured_requests() {
    let (target, log) = spawn_target().await;

    let mut config = listen_config();
    config.forward = Some(ForwardConfig {
        target_url: target,
        max_retries: 1,
        base_delay_ms: 10,
    });
    let (base, _handle) = spawn_server(config).await;

    let client = OutboundClient::new();
    let response = client
        .send(&post_json(&format!("{base}/hook"), r#"{"n": 42}"#))
        .await
        .unwrap();

    // Ack is immediate regardless of forwarding
    assert_eq!(response.status, 200);

    wait_for_hits(&log, 1).await;
    let requests = log.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "POST");
    assert_eq!(requests[0].1, "/hook");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&requests[0].2).unwrap(),
        serde_json::json!({"n": 42})
    );
}

#[tokio::test]
async fn test_mock_mode_scripted_responses() {
    let temp_dir = TempDir::new().unwrap();
    let spec_path = temp_dir.path().join("spec.json");
    std::fs::write(
        &spec_path,
        r#"{
            "defaults": {"status": 404, "body": {"error": "no route"}},
            "routes": {
                "/webhook": {
                    "POST": {"status": 201, "body": {"created": true}}
                },
                "/api/*": {
                    "ANY": [
                        {"status": 200, "body": {"try": 1}},
                        {"status": 503, "body": {"try": 2}}
                    ]
                }
            }
        }"#,
    )
    .unwrap();

    let mut config = listen_config();
    config.mode = Mode::Mock;
    config.mock_spec = Some(spec_path);
    let (base, _handle) = spawn_server(config).await;

    let client = OutboundClient::new();

    // Literal route, method-specific
    let response = client
        .send(&post_json(&format!("{base}/webhook"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&response.body).unwrap(),
        serde_json::json!({"created": true})
    );

    // Wildcard sequence cycles 200, 503, 200
    let statuses: Vec<u16> = {
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = client
                .send(&get(&format!("{base}/api/users")))
                .await
                .unwrap();
            statuses.push(response.status);
        }
        statuses
    };
    assert_eq!(statuses, vec![200, 503, 200]);

    // No match falls back to defaults
    let response = client.send(&get(&format!("{base}/other"))).await.unwrap();
    assert_eq!(response.status, 404);

    // Stats reflect the calls; reset clears them
    let stats = client
        .send(&get(&format!("{base}/__mock__/stats")))
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&stats.body).unwrap();
    assert_eq!(stats["total_calls"], 5);
    assert_eq!(stats["call_counts"]["GET /api/users"], 3);

    let reset = client
        .send(&OutboundRequest {
            method: "POST".to_string(),
            url: format!("{base}/__mock__/reset"),
            headers: vec![],
            body: Bytes::new(),
        })
        .await
        .unwrap();
    assert_eq!(reset.status, 200);

    let stats = client
        .send(&get(&format!("{base}/__mock__/stats")))
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&stats.body).unwrap();
    assert_eq!(stats["total_calls"], 0);

    // Reset also rewinds sequences
    let response = client
        .send(&get(&format!("{base}/api/users")))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_mock_delay_does_not_serialize_requests() {
    let temp_dir = TempDir::new().unwrap();
    let spec_path = temp_dir.path().join("spec.json");
    std::fs::write(
        &spec_path,
        r#"{
            "routes": {
                "/slow": {"ANY": {"status": 200, "delay": 1.0}},
                "/fast": {"ANY": {"status": 200}}
            }
        }"#,
    )
    .unwrap();

    let mut config = listen_config();
    config.mode = Mode::Mock;
    config.mock_spec = Some(spec_path);
    let (base, _handle) = spawn_server(config).await;

    let slow_base = base.clone();
    let slow = tokio::spawn(async move {
        let client = OutboundClient::new();
        client.send(&get(&format!("{slow_base}/slow"))).await
    });

    // The delayed response must not hold up an unrelated request
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = std::time::Instant::now();
    let client = OutboundClient::new();
    let fast = client.send(&get(&format!("{base}/fast"))).await.unwrap();

    assert_eq!(fast.status, 200);
    assert!(started.elapsed() < Duration::from_millis(500));

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.status, 200);
}

#[tokio::test]
async fn test_replay_saved_log_against_target() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("events.jsonl");

    let writer = EventLogWriter::open(&log_path).unwrap();
    for path in ["/a", "/b", "/c"] {
        let event = Event::from_parts(
            "POST",
            path,
            vec![("content-type".to_string(), "application/json".to_string())],
            vec![],
            br#"{"replayed": true}"#,
            "127.0.0.1",
        );
        writer.append(&event).unwrap();
    }

    let (target, log) = spawn_target().await;
    let config = ReplayConfig {
        events_file: log_path,
        target_url: Some(target),
        rate: 1.0,
        max_rps: None,
        fixed_delay_ms: None,
        once: true,
        max_retries: 1,
        base_delay_ms: 10,
        limits: LimitsConfig::default(),
    };

    let pool = DispatchPool::new(&config.limits);
    let session = ReplaySession::from_config(&config, &pool).unwrap();
    assert_eq!(session.event_count(), 3);

    let mut rx = session.start();
    let mut delivered = 0;
    while let Some(report) = rx.recv().await {
        assert!(matches!(
            report.outcome,
            Some(DeliveryOutcome::Delivered { status: 200, .. })
        ));
        delivered += 1;
    }
    assert_eq!(delivered, 3);

    wait_for_hits(&log, 3).await;
    let requests = log.requests.lock().unwrap();
    let mut paths: Vec<&str> = requests.iter().map(|(_, path, _)| path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, vec!["/a", "/b", "/c"]);
}

#[tokio::test]
async fn test_exit_after_shuts_the_server_down() {
    let mut config = listen_config();
    config.exit_after = Some(2);
    let (base, handle) = spawn_server(config).await;

    let client = OutboundClient::new();
    client
        .send(&post_json(&format!("{base}/hook"), "{}"))
        .await
        .unwrap();
    client
        .send(&post_json(&format!("{base}/hook"), "{}"))
        .await
        .unwrap();

    // The server task ends on its own after the second event
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not shut down")
        .unwrap();
}

#[tokio::test]
async fn test_raw_body_capture_and_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let save_path = temp_dir.path().join("events.jsonl");

    let mut config = listen_config();
    config.save_path = Some(save_path.clone());
    let (base, _handle) = spawn_server(config).await;

    let client = OutboundClient::new();
    client
        .send(&OutboundRequest {
            method: "POST".to_string(),
            url: format!("{base}/raw"),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Bytes::from("just text"),
        })
        .await
        .unwrap();

    let events = load_events(&save_path).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].json, None);
    assert_eq!(events[0].raw, Some("just text".to_string()));

    // Saved record parses back identically
    let line = serde_json::to_string(&events[0]).unwrap();
    let reparsed: Event = serde_json::from_str(&line).unwrap();
    assert_eq!(reparsed, events[0]);
}
