#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use futures_util::stream::{self, StreamExt};
use gec_gateway::adapters::{CorrectionAdapter, FragmentStream, MockAdapter};
use gec_gateway::{create_app, AppState, Config, CorrectionError, SharedState};
use tower::ServiceExt;

pub fn test_config() -> Config {
    Config {
        rate_limit_per_minute: 1_000,
        rate_limit_per_day: 10_000,
        ..Config::default()
    }
}

pub fn app_with(config: Config, adapter: Arc<dyn CorrectionAdapter>) -> (Router, SharedState) {
    let state = Arc::new(AppState::with_adapter(config, adapter).unwrap());
    (create_app(state.clone()), state)
}

pub fn mock_app(config: Config) -> (Router, SharedState) {
    app_with(config, Arc::new(MockAdapter))
}

pub fn json_post(uri: &str, client: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Waits until `check` holds, polling every few milliseconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

/// Backend whose every call fails.
pub struct FailingAdapter;

#[async_trait]
impl CorrectionAdapter for FailingAdapter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn correct(&self, _text: &str, _lang: &str, _request_id: &str) -> Result<String, CorrectionError> {
        Err(CorrectionError::Upstream {
            status: 503,
            message: "secret upstream detail".to_string(),
        })
    }

    fn correct_stream(&self, _text: &str, _lang: &str, _request_id: &str) -> FragmentStream {
        Box::pin(stream::iter(vec![
            Ok("Сәлам".to_string()),
            Err(CorrectionError::Upstream {
                status: 503,
                message: "secret upstream detail".to_string(),
            }),
        ]))
    }
}

/// Backend that echoes the text in fixed fragments after a pause.
pub struct SlowAdapter {
    pub pause: Duration,
}

#[async_trait]
impl CorrectionAdapter for SlowAdapter {
    fn name(&self) -> &str {
        "slow"
    }

    async fn correct(&self, text: &str, _lang: &str, _request_id: &str) -> Result<String, CorrectionError> {
        tokio::time::sleep(self.pause).await;
        Ok(text.to_string())
    }

    fn correct_stream(&self, text: &str, _lang: &str, _request_id: &str) -> FragmentStream {
        let pause = self.pause;
        let pieces: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        Box::pin(stream::iter(pieces).then(move |piece| async move {
            tokio::time::sleep(pause).await;
            Ok(piece)
        }))
    }
}
