//! Incremental correction endpoint.
//!
//! An admitted request becomes a [`StreamSession`] running on its own task.
//! The session writes encoded events into a bounded channel whose receiving
//! end is the response body, so a client disconnect shows up as a closed
//! channel. Event order is `meta`, any number of `delta` events with idle
//! heartbeats in between, then exactly one of `done` or `error`.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::cache::fingerprint;
use crate::error::{ApiError, CorrectionError};
use crate::handlers::{new_request_id, SharedState};
use crate::metrics::{Endpoint, StreamOutcome};
use crate::middleware::client_ip;
use crate::sse::{heartbeat, StreamEvent};
use crate::streams::StreamSlot;
use crate::validation::{CorrectionRequest, RequestValidator};

/// Encoded events buffered ahead of the client.
const EVENT_BUFFER: usize = 16;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Streaming correction endpoint
pub async fn correct_stream(State(state): State<SharedState>, request: Request) -> Response {
    state.metrics.request_received();

    let session = match admit(&state, request).await {
        Ok(session) => session,
        Err(err) => {
            state
                .metrics
                .request_finished(Endpoint::Stream, err.outcome(), None);
            return err.into_response();
        }
    };

    let (tx, rx) = mpsc::channel::<Bytes>(EVENT_BUFFER);
    tokio::spawn(session.run(tx));

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

/// Validation, rate limiting and the per-client stream ceiling.
async fn admit(state: &SharedState, request: Request) -> Result<StreamSession, ApiError> {
    let (parts, body) = request.into_parts();
    let input = RequestValidator::correction_request(&parts.headers, body, state.config.limits()).await?;

    let client = client_ip(&parts.headers, &parts.extensions);
    if !state.limiter.allow(&client) {
        debug!(client = %client, "rate limited");
        return Err(ApiError::RateLimited);
    }

    let slot = state
        .streams
        .try_acquire(&client, state.config.max_concurrent_streams)
        .ok_or_else(|| {
            debug!(client = %client, "too many open streams");
            ApiError::TooManyStreams
        })?;

    Ok(StreamSession::new(state.clone(), input, slot))
}

/// Why the fragment loop stopped.
#[derive(Debug)]
enum Termination {
    Done,
    Cancelled,
    Failed(CorrectionError),
}

/// Counts a stream's terminal outcome exactly once. If the session is torn
/// down without reaching a verdict, it is counted as cancelled.
struct OutcomeLedger {
    state: SharedState,
    started: Instant,
    recorded: bool,
}

impl OutcomeLedger {
    fn open(state: SharedState) -> Self {
        state.metrics.stream_started();
        Self {
            state,
            started: Instant::now(),
            recorded: false,
        }
    }

    fn record(&mut self, outcome: StreamOutcome) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        self.state
            .metrics
            .stream_finished(outcome, self.started.elapsed());
    }
}

impl Drop for OutcomeLedger {
    fn drop(&mut self) {
        self.record(StreamOutcome::Cancelled);
    }
}

pub struct StreamSession {
    state: SharedState,
    request_id: String,
    input: CorrectionRequest,
    ledger: OutcomeLedger,
    // Released when the session is dropped, whichever way it ends.
    slot: StreamSlot,
}

impl StreamSession {
    fn new(state: SharedState, input: CorrectionRequest, slot: StreamSlot) -> Self {
        Self {
            ledger: OutcomeLedger::open(state.clone()),
            request_id: new_request_id(),
            state,
            input,
            slot,
        }
    }

    pub async fn run(mut self, tx: mpsc::Sender<Bytes>) {
        let request_id = self.request_id.clone();
        match self.drive(&tx).await {
            Termination::Done => {
                info!(request_id = %request_id, "stream done");
                self.ledger.record(StreamOutcome::Ok);
            }
            Termination::Cancelled => {
                info!(request_id = %request_id, client = %self.slot.client(), "stream cancelled");
                let event = StreamEvent::Error {
                    request_id,
                    kind: "cancelled",
                    message: "client_disconnected".to_string(),
                };
                // The client is usually gone already.
                let _ = tx.try_send(event.encode());
                self.ledger.record(StreamOutcome::Cancelled);
            }
            Termination::Failed(err) => {
                self.state.metrics.upstream_failure(err.kind());
                warn!(request_id = %request_id, kind = err.kind(), error = %err, "stream failed");
                let event = StreamEvent::Error {
                    request_id,
                    kind: "server_error",
                    message: err.public_message().to_string(),
                };
                let _ = tx.send(event.encode()).await;
                self.ledger.record(StreamOutcome::Error);
            }
        }
    }

    async fn drive(&self, tx: &mpsc::Sender<Bytes>) -> Termination {
        let adapter = &self.state.adapter;
        let request_id = &self.request_id;

        let meta = StreamEvent::Meta {
            request_id: request_id.clone(),
            model_backend: adapter.name().to_string(),
        };
        if tx.send(meta.encode()).await.is_err() {
            return Termination::Cancelled;
        }

        let mut fragments = adapter.correct_stream(&self.input.text, &self.input.lang, request_id);
        let interval = self.state.config.heartbeat();
        let mut corrected = String::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return Termination::Cancelled,
                next = tokio::time::timeout(interval, fragments.next()) => next,
            };

            let frame = match next {
                Err(_idle) => heartbeat(),
                Ok(Some(Ok(fragment))) => {
                    corrected.push_str(&fragment);
                    StreamEvent::Delta {
                        request_id: request_id.clone(),
                        text: fragment,
                    }
                    .encode()
                }
                Ok(Some(Err(err))) => return Termination::Failed(err),
                Ok(None) => {
                    if !corrected.is_empty() {
                        self.state.cache.set(
                            fingerprint(&self.input.text, &self.input.lang),
                            corrected,
                            adapter.name(),
                        );
                    }
                    let done = StreamEvent::Done {
                        request_id: request_id.clone(),
                        latency_ms: self.ledger.started.elapsed().as_millis() as u64,
                    };
                    return match tx.send(done.encode()).await {
                        Ok(()) => Termination::Done,
                        Err(_) => Termination::Cancelled,
                    };
                }
            };

            if tx.send(frame).await.is_err() {
                return Termination::Cancelled;
            }
        }
    }
}
