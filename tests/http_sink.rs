//! HTTP sink contract, exercised against a live in-process endpoint.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;

use gpuscout::record::SerialReading;
use gpuscout::sink::http::HttpSink;
use gpuscout::sink::{Sink, SinkSettings};

#[derive(Clone, Default)]
struct Received {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

async fn collect(
    State(state): State<Received>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    state.requests.lock().unwrap().push((headers, body));
    StatusCode::OK
}

async fn ok() -> StatusCode {
    StatusCode::OK
}

async fn fail() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

fn reading(gpu: &str) -> SerialReading {
    SerialReading {
        cluster: "test-cluster".into(),
        node: "n1".into(),
        machine: "i-abc".into(),
        source: "gpu-operator/ndp-xyz".into(),
        chassis: "1660323002015".into(),
        gpu: gpu.into(),
        time: Utc::now(),
    }
}

#[tokio::test]
async fn http_sink_honors_the_wire_contract() {
    let received = Received::default();
    let app = Router::new()
        // axum's `get` also answers the HEAD health probe.
        .route("/records", post(collect).get(ok))
        .route("/broken", post(fail).get(ok))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Sink config comes from the environment, like in the deployment.
    std::env::set_var("HTTP_ENDPOINT", format!("http://{addr}/records"));
    std::env::set_var("HTTP_AUTH_TOKEN", "test-token");
    let sink = HttpSink::from_env(&SinkSettings::default()).unwrap();

    sink.health().await.unwrap();
    sink.write(&[reading("g-1"), reading("g-2")]).await.unwrap();
    sink.write(&[]).await.unwrap(); // empty batches are a no-op
    sink.close().await.unwrap();

    let requests = received.requests.lock().unwrap();
    assert_eq!(requests.len(), 1, "empty batch must not hit the wire");

    let (headers, body) = &requests[0];
    assert_eq!(headers.get("x-records-count").unwrap(), "2");
    assert_eq!(headers.get("authorization").unwrap(), "Bearer test-token");
    assert!(headers.contains_key("x-timestamp"));

    let records = body.as_array().expect("body is a JSON array");
    assert_eq!(records.len(), 2);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record["cluster"], "test-cluster");
        assert_eq!(record["source"], "gpu-operator/ndp-xyz");
        assert_eq!(record["gpu"], format!("g-{}", i + 1));
    }
    drop(requests);

    // Non-2xx responses surface as sink errors.
    std::env::set_var("HTTP_ENDPOINT", format!("http://{addr}/broken"));
    let broken = HttpSink::from_env(&SinkSettings::default()).unwrap();
    let err = broken.write(&[reading("g-1")]).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}
