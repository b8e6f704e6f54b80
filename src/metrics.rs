//! Request and stream accounting.
//!
//! Two views of the same events: prometheus collectors rendered at
//! `/metrics`, and plain counters reported by `/status`. Both live in one
//! [`Metrics`] value owned by the application state; nothing is registered
//! globally, so every app instance (and every test) starts from zero.
//!
//! Metric names are prefixed with `gec_`. Counters end in `_total`,
//! histograms are in seconds.

use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const METRICS_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Which endpoint a request hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Correct,
    Stream,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Correct => "correct",
            Endpoint::Stream => "stream",
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Ok,
    Cancelled,
    Error,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Ok => "ok",
            StreamOutcome::Cancelled => "cancelled",
            StreamOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub requests: AtomicU64,
    pub invalid: AtomicU64,
    pub rate_limited: AtomicU64,
    pub errors: AtomicU64,
    pub cache_hits: AtomicU64,
    pub streams_started: AtomicU64,
    pub streams_done: AtomicU64,
    pub streams_cancelled: AtomicU64,
    pub streams_error: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub invalid: u64,
    pub rate_limited: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub streams_started: u64,
    pub streams_done: u64,
    pub streams_cancelled: u64,
    pub streams_error: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CounterSnapshot {
            requests: load(&self.requests),
            invalid: load(&self.invalid),
            rate_limited: load(&self.rate_limited),
            errors: load(&self.errors),
            cache_hits: load(&self.cache_hits),
            streams_started: load(&self.streams_started),
            streams_done: load(&self.streams_done),
            streams_cancelled: load(&self.streams_cancelled),
            streams_error: load(&self.streams_error),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Metrics {
    registry: Registry,
    counters: Counters,
    requests_total: IntCounterVec,
    streams_active: IntGauge,
    streams_total: IntCounterVec,
    cache_hits_total: IntCounter,
    upstream_failures_total: IntCounterVec,
    request_latency: HistogramVec,
    stream_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("gec_requests_total", "Total API requests"),
            &["endpoint", "outcome"],
        )?;
        let streams_active = IntGauge::new("gec_streams_active", "Active streaming responses")?;
        let streams_total = IntCounterVec::new(
            Opts::new("gec_streams_total", "Completed streaming responses"),
            &["outcome"],
        )?;
        let cache_hits_total = IntCounter::new("gec_cache_hits_total", "Cache hits")?;
        let upstream_failures_total = IntCounterVec::new(
            Opts::new("gec_upstream_failures_total", "Correction backend failures"),
            &["kind"],
        )?;
        let request_latency = HistogramVec::new(
            HistogramOpts::new("gec_request_latency_seconds", "Request latency in seconds")
                .buckets(exponential_buckets(0.005, 2.0, 12)?),
            &["endpoint"],
        )?;
        let stream_duration = Histogram::with_opts(
            HistogramOpts::new("gec_stream_duration_seconds", "Stream duration in seconds")
                .buckets(exponential_buckets(0.05, 2.0, 12)?),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(streams_active.clone()))?;
        registry.register(Box::new(streams_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(upstream_failures_total.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(stream_duration.clone()))?;

        Ok(Self {
            registry,
            counters: Counters::default(),
            requests_total,
            streams_active,
            streams_total,
            cache_hits_total,
            upstream_failures_total,
            request_latency,
            stream_duration,
        })
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn request_received(&self) {
        bump(&self.counters.requests);
    }

    /// Count a finished request under `outcome` and, for the synchronous
    /// endpoint, observe its latency.
    pub fn request_finished(&self, endpoint: Endpoint, outcome: &str, elapsed: Option<Duration>) {
        match outcome {
            "invalid_input" => bump(&self.counters.invalid),
            "rate_limited" => bump(&self.counters.rate_limited),
            "error" => bump(&self.counters.errors),
            "cache" => {
                bump(&self.counters.cache_hits);
                self.cache_hits_total.inc();
            }
            _ => {}
        }
        self.requests_total
            .with_label_values(&[endpoint.as_str(), outcome])
            .inc();
        if let Some(elapsed) = elapsed {
            self.request_latency
                .with_label_values(&[endpoint.as_str()])
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn upstream_failure(&self, kind: &str) {
        self.upstream_failures_total.with_label_values(&[kind]).inc();
    }

    pub fn stream_started(&self) {
        bump(&self.counters.streams_started);
        self.streams_active.inc();
    }

    pub fn stream_finished(&self, outcome: StreamOutcome, elapsed: Duration) {
        match outcome {
            StreamOutcome::Ok => bump(&self.counters.streams_done),
            StreamOutcome::Cancelled => bump(&self.counters.streams_cancelled),
            StreamOutcome::Error => {
                bump(&self.counters.streams_error);
                bump(&self.counters.errors);
            }
        }
        self.requests_total
            .with_label_values(&[Endpoint::Stream.as_str(), outcome.as_str()])
            .inc();
        self.streams_total.with_label_values(&[outcome.as_str()]).inc();
        self.stream_duration.observe(elapsed.as_secs_f64());
        self.streams_active.dec();
    }

    /// Render all collectors in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_outcomes_are_counted_once() {
        let metrics = Metrics::new().unwrap();
        metrics.request_received();
        metrics.request_finished(Endpoint::Correct, "ok", Some(Duration::from_millis(5)));
        metrics.request_received();
        metrics.request_finished(Endpoint::Correct, "cache", Some(Duration::ZERO));
        metrics.request_received();
        metrics.request_finished(Endpoint::Stream, "invalid_input", None);

        let snapshot = metrics.counters();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.invalid, 1);
        assert_eq!(snapshot.errors, 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("gec_requests_total{endpoint=\"correct\",outcome=\"ok\"} 1"));
        assert!(text.contains("gec_cache_hits_total 1"));
    }

    #[test]
    fn test_stream_lifecycle() {
        let metrics = Metrics::new().unwrap();
        metrics.stream_started();
        metrics.stream_started();
        metrics.stream_finished(StreamOutcome::Ok, Duration::from_millis(10));
        metrics.stream_finished(StreamOutcome::Error, Duration::from_millis(10));

        let snapshot = metrics.counters();
        assert_eq!(snapshot.streams_started, 2);
        assert_eq!(snapshot.streams_done, 1);
        assert_eq!(snapshot.streams_error, 1);
        assert_eq!(snapshot.errors, 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("gec_streams_active 0"));
        assert!(text.contains("gec_streams_total{outcome=\"error\"} 1"));
    }

    #[test]
    fn test_separate_instances_do_not_share_state() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.upstream_failure("exhausted");
        assert!(first.render().unwrap().contains("gec_upstream_failures_total{kind=\"exhausted\"} 1"));
        assert!(!second.render().unwrap().contains("kind=\"exhausted\""));
    }
}
