//! Server-sent event framing for the streaming endpoint.
//!
//! Every event is written as `event: <name>\ndata: <json>\n\n`. The JSON
//! payload is kept on one line; any line break that reaches the encoder is
//! collapsed to a space so a payload can never inject extra framing.

use bytes::Bytes;
use serde_json::{json, Value};

/// Idle keep-alive line. A comment, not a named event.
pub const HEARTBEAT: &str = ": ping\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Meta {
        request_id: String,
        model_backend: String,
    },
    Delta {
        request_id: String,
        text: String,
    },
    Done {
        request_id: String,
        latency_ms: u64,
    },
    Error {
        request_id: String,
        kind: &'static str,
        message: String,
    },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Meta { .. } => "meta",
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            StreamEvent::Meta {
                request_id,
                model_backend,
            } => json!({"request_id": request_id, "model_backend": model_backend}),
            StreamEvent::Delta { request_id, text } => json!({"request_id": request_id, "text": text}),
            StreamEvent::Done {
                request_id,
                latency_ms,
            } => json!({"request_id": request_id, "latency_ms": latency_ms}),
            StreamEvent::Error {
                request_id,
                kind,
                message,
            } => json!({"request_id": request_id, "type": kind, "message": message}),
        }
    }

    pub fn encode(&self) -> Bytes {
        let data = single_line(&self.payload().to_string());
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

pub fn heartbeat() -> Bytes {
    Bytes::from_static(HEARTBEAT.as_bytes())
}

fn single_line(data: &str) -> String {
    data.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// One parsed event from an encoded stream body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub name: String,
    pub data: Value,
}

/// Split an encoded body back into named events, skipping comments.
///
/// Returns `None` if any frame is not exactly one `event:` line followed by
/// one `data:` line with a JSON payload.
pub fn parse_events(body: &str) -> Option<Vec<ParsedEvent>> {
    let mut events = Vec::new();
    for frame in body.split("\n\n").filter(|frame| !frame.is_empty()) {
        if frame.starts_with(':') {
            continue;
        }
        let mut lines = frame.split('\n');
        let name = lines.next()?.strip_prefix("event: ")?;
        let data = lines.next()?.strip_prefix("data: ")?;
        if lines.next().is_some() {
            return None;
        }
        events.push(ParsedEvent {
            name: name.to_string(),
            data: serde_json::from_str(data).ok()?,
        });
    }
    Some(events)
}
