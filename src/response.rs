use serde::Serialize;

use crate::metrics::CounterSnapshot;

#[derive(Debug, Serialize)]
pub struct CorrectResponse {
    pub request_id: String,
    pub corrected_text: String,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub model_backend: String,
    pub latency_ms: u64,
}

impl CorrectResponse {
    pub fn new(
        request_id: String,
        corrected_text: String,
        model_backend: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            request_id,
            corrected_text,
            meta: ResponseMeta {
                model_backend: model_backend.into(),
                latency_ms,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub service: String,
    pub version: String,
    pub git: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub active_streams: usize,
    pub requests_total: u64,
    pub invalid_requests_total: u64,
    pub rate_limited_total: u64,
    pub errors_total: u64,
    pub cache_hits_total: u64,
    pub streams: StreamTotals,
    pub limits: LimitsReport,
}

#[derive(Debug, Serialize)]
pub struct StreamTotals {
    pub started: u64,
    pub done: u64,
    pub cancelled: u64,
    pub error: u64,
}

#[derive(Debug, Serialize)]
pub struct LimitsReport {
    pub max_concurrent_streams: usize,
    pub rate_limit_per_minute: usize,
    pub rate_limit_per_day: usize,
    pub max_chars: usize,
    pub max_body_bytes: usize,
}

impl StatusResponse {
    pub fn new(
        uptime_seconds: u64,
        active_streams: usize,
        counters: CounterSnapshot,
        limits: LimitsReport,
    ) -> Self {
        Self {
            status: "ok",
            uptime_seconds,
            active_streams,
            requests_total: counters.requests,
            invalid_requests_total: counters.invalid,
            rate_limited_total: counters.rate_limited,
            errors_total: counters.errors,
            cache_hits_total: counters.cache_hits,
            streams: StreamTotals {
                started: counters.streams_started,
                done: counters.streams_done,
                cancelled: counters.streams_cancelled,
                error: counters.streams_error,
            },
            limits,
        }
    }
}
