use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::adapters::{build_adapter, CorrectionAdapter};
use crate::cache::{fingerprint, ResponseCache};
use crate::config::Config;
use crate::error::{ApiError, ServerError};
use crate::metrics::{Endpoint, Metrics, METRICS_CONTENT_TYPE};
use crate::middleware::client_ip;
use crate::rate_limiter::SlidingLimiter;
use crate::response::{
    CorrectResponse, HealthResponse, LimitsReport, StatusResponse, VersionResponse,
};
use crate::streams::StreamSlots;
use crate::validation::RequestValidator;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything a handler needs, built once per server process.
pub struct AppState {
    pub config: Config,
    pub adapter: Arc<dyn CorrectionAdapter>,
    pub cache: ResponseCache,
    pub limiter: SlidingLimiter,
    pub streams: StreamSlots,
    pub metrics: Metrics,
    started_at: Instant,
}

impl AppState {
    /// Build state with the backend selected in `config`.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let adapter = build_adapter(&config)?;
        Self::with_adapter(config, adapter)
    }

    /// Build state around an explicit backend.
    pub fn with_adapter(config: Config, adapter: Arc<dyn CorrectionAdapter>) -> Result<Self, ServerError> {
        Ok(Self {
            cache: ResponseCache::new(config.cache_ttl()),
            limiter: SlidingLimiter::new(config.rate_limit_per_minute, config.rate_limit_per_day),
            streams: StreamSlots::new(),
            metrics: Metrics::new()?,
            started_at: Instant::now(),
            adapter,
            config,
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse::ok())
}

pub async fn version(State(state): State<SharedState>) -> impl IntoResponse {
    Json(VersionResponse {
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
        git: state.config.git_sha.clone(),
    })
}

pub async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    let config = &state.config;
    Json(StatusResponse::new(
        state.uptime_seconds(),
        state.streams.active_total(),
        state.metrics.counters(),
        LimitsReport {
            max_concurrent_streams: config.max_concurrent_streams,
            rate_limit_per_minute: config.rate_limit_per_minute,
            rate_limit_per_day: config.rate_limit_per_day,
            max_chars: config.max_chars,
            max_body_bytes: config.max_body_bytes,
        },
    ))
}

pub async fn metrics(State(state): State<SharedState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Synchronous correction endpoint
pub async fn correct(State(state): State<SharedState>, request: Request) -> Response {
    let started = Instant::now();
    state.metrics.request_received();

    let (response, outcome) = match process_correct(&state, request, started).await {
        Ok((body, outcome)) => (Json(body).into_response(), outcome),
        Err(err) => (err.clone().into_response(), err.outcome()),
    };

    state
        .metrics
        .request_finished(Endpoint::Correct, outcome, Some(started.elapsed()));
    response
}

async fn process_correct(
    state: &AppState,
    request: Request,
    started: Instant,
) -> Result<(CorrectResponse, &'static str), ApiError> {
    let (parts, body) = request.into_parts();
    let input = RequestValidator::correction_request(&parts.headers, body, state.config.limits()).await?;

    let client = client_ip(&parts.headers, &parts.extensions);
    if !state.limiter.allow(&client) {
        debug!(client = %client, "rate limited");
        return Err(ApiError::RateLimited);
    }

    let request_id = new_request_id();
    let key = fingerprint(&input.text, &input.lang);
    if let Some(hit) = state.cache.get(&key) {
        debug!(request_id = %request_id, "cache hit");
        return Ok((CorrectResponse::new(request_id, hit.value, hit.backend, 0), "cache"));
    }

    let corrected = match state.adapter.correct(&input.text, &input.lang, &request_id).await {
        Ok(corrected) => corrected,
        Err(err) => {
            state.metrics.upstream_failure(err.kind());
            error!(request_id = %request_id, kind = err.kind(), error = %err, "correction failed");
            return Err(ApiError::Server { request_id });
        }
    };

    let backend = state.adapter.name();
    state.cache.set(key, corrected.clone(), backend);
    let latency_ms = started.elapsed().as_millis() as u64;
    Ok((CorrectResponse::new(request_id, corrected, backend, latency_ms), "ok"))
}
