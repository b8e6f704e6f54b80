mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::*;
use gec_gateway::sse::parse_events;
use gec_gateway::Config;
use serde_json::json;

#[tokio::test]
async fn test_stream_event_order_and_headers() {
    let (app, state) = mock_app(test_config());
    let text = "сәлам дөнья, бу бик озын җөмлә, аны берничә кисәккә бүләргә кирәк";

    let response = send(&app, json_post("/v1/correct/stream", "10.0.0.1", json!({"text": text}))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let events = parse_events(&body_string(response).await).unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names.first(), Some(&"meta"));
    assert_eq!(names.last(), Some(&"done"));
    assert!(names[1..names.len() - 1].iter().all(|name| *name == "delta"));
    assert!(names.len() > 3);

    let request_id = events[0].data["request_id"].clone();
    assert!(events.iter().all(|e| e.data["request_id"] == request_id));
    assert_eq!(events[0].data["model_backend"], "mock");

    let streamed: String = events
        .iter()
        .filter(|e| e.name == "delta")
        .map(|e| e.data["text"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, "Сәлам дөнья, бу бик озын җөмлә, аны берничә кисәккә бүләргә кирәк");

    eventually(|| state.metrics.counters().streams_done == 1).await;
    assert_eq!(state.streams.active_total(), 0);
}

#[tokio::test]
async fn test_stream_result_is_cached_for_sync_endpoint() {
    let (app, state) = mock_app(test_config());

    let response = send(&app, json_post("/v1/correct/stream", "10.0.0.1", json!({"text": "сәлам"}))).await;
    body_string(response).await;
    eventually(|| !state.cache.is_empty()).await;

    let body = body_json(send(&app, json_post("/v1/correct", "10.0.0.1", json!({"text": "сәлам"}))).await).await;

    assert_eq!(body["corrected_text"], "Сәлам");
    assert_eq!(body["meta"]["latency_ms"], 0);
}

#[tokio::test]
async fn test_idle_stream_emits_heartbeat() {
    let config = Config {
        heartbeat_ms: 20,
        ..test_config()
    };
    let adapter = SlowAdapter {
        pause: Duration::from_millis(150),
    };
    let (app, _) = app_with(config, Arc::new(adapter));

    let response = send(&app, json_post("/v1/correct/stream", "10.0.0.1", json!({"text": "сәлам"}))).await;
    let body = body_string(response).await;

    assert!(body.contains(": ping\n\n"));
    let events = parse_events(&body).unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["meta", "delta", "done"]);
}

#[tokio::test]
async fn test_concurrent_stream_ceiling_is_per_client() {
    let config = Config {
        max_concurrent_streams: 1,
        ..test_config()
    };
    let adapter = SlowAdapter {
        pause: Duration::from_millis(200),
    };
    let (app, state) = app_with(config, Arc::new(adapter));
    let request = |client: &str| json_post("/v1/correct/stream", client, json!({"text": "бер ике өч"}));

    let open = send(&app, request("10.0.0.1")).await;
    assert_eq!(open.status(), StatusCode::OK);

    let refused = send(&app, request("10.0.0.1")).await;
    assert_eq!(refused.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body_json(refused).await,
        json!({"error": "rate_limited", "message": "too_many_streams"})
    );

    let other = send(&app, request("10.0.0.2")).await;
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(state.metrics.counters().rate_limited, 1);

    body_string(open).await;
    body_string(other).await;
    eventually(|| state.streams.active_total() == 0).await;

    assert_eq!(send(&app, request("10.0.0.1")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_dropped_client_releases_slot() {
    let config = Config {
        max_concurrent_streams: 1,
        ..test_config()
    };
    let adapter = SlowAdapter {
        pause: Duration::from_millis(100),
    };
    let (app, state) = app_with(config, Arc::new(adapter));

    let response = send(
        &app,
        json_post("/v1/correct/stream", "10.0.0.1", json!({"text": "бер ике өч дүрт биш алты"})),
    )
    .await;
    assert_eq!(state.streams.open_for("10.0.0.1"), 1);
    drop(response);

    eventually(|| state.streams.open_for("10.0.0.1") == 0).await;

    let counters = state.metrics.counters();
    assert_eq!(counters.streams_started, 1);
    assert_eq!(counters.streams_cancelled, 1);
    assert_eq!(counters.streams_done, 0);
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_backend_failure_ends_stream_with_error_event() {
    let (app, state) = app_with(test_config(), Arc::new(FailingAdapter));

    let response = send(&app, json_post("/v1/correct/stream", "10.0.0.1", json!({"text": "сәлам"}))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(!body.contains("secret upstream detail"));

    let events = parse_events(&body).unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["meta", "delta", "error"]);
    assert_eq!(events[2].data["type"], "server_error");
    assert_eq!(events[2].data["request_id"], events[0].data["request_id"]);

    eventually(|| state.metrics.counters().streams_error == 1).await;
    assert_eq!(state.streams.active_total(), 0);
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_stream_validation_happens_before_streaming() {
    let (app, state) = mock_app(test_config());

    let response = send(&app, json_post("/v1/correct/stream", "10.0.0.1", json!({"text": " "}))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "invalid_input", "message": "empty"}));
    assert_eq!(state.metrics.counters().streams_started, 0);
}

#[tokio::test]
async fn test_streams_share_rate_limit_with_sync_endpoint() {
    let config = Config {
        rate_limit_per_minute: 1,
        ..test_config()
    };
    let (app, _) = mock_app(config);

    let first = send(&app, json_post("/v1/correct", "10.0.0.1", json!({"text": "а"}))).await;
    let second = send(&app, json_post("/v1/correct/stream", "10.0.0.1", json!({"text": "б"}))).await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(second).await, json!({"error": "rate_limited"}));
}
