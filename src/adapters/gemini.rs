//! HTTP client for the Generative Language API.
//!
//! Streaming uses `:streamGenerateContent?alt=sse`. Each stream is read by a
//! dedicated worker task that pushes fragments into a bounded channel and
//! finishes with exactly one terminal item, either `Finished` or `Failed`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::remote::{GenerativeBackend, FRAGMENT_BUFFER};
use super::{FragmentStream, Result};
use crate::error::CorrectionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, if it has any.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|part| part.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Item handed from a stream worker to its consumer.
#[derive(Debug)]
enum WorkerItem {
    Fragment(String),
    Failed(CorrectionError),
    Finished,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        Self::with_timeouts(base_url, model, REQUEST_TIMEOUT, READ_TIMEOUT)
    }

    /// `request_timeout` bounds a whole `generateContent` call. Streams are
    /// only bounded by `read_timeout` between reads.
    pub fn with_timeouts(
        base_url: &str,
        model: &str,
        request_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            request_timeout,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method)
    }

    async fn post(
        &self,
        url: &str,
        key: &str,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let mut request = self.http.post(url).header("x-goog-api-key", key).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(classify_failure(status, message))
    }

    async fn run_stream_worker(self, key: String, prompt: String, tx: mpsc::Sender<WorkerItem>) {
        let result = tokio::select! {
            _ = tx.closed() => return,
            result = self.pump_stream(&key, &prompt, &tx) => result,
        };
        let terminal = match result {
            Ok(true) => WorkerItem::Finished,
            Ok(false) => WorkerItem::Failed(CorrectionError::EmptyResponse),
            Err(err) => WorkerItem::Failed(err),
        };
        let _ = tx.send(terminal).await;
    }

    /// Forward upstream fragments; returns whether any text was produced.
    async fn pump_stream(&self, key: &str, prompt: &str, tx: &mpsc::Sender<WorkerItem>) -> Result<bool> {
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        let response = self.post(&url, key, prompt, None).await?;

        let mut bytes = response.bytes_stream();
        let mut lines = SseLines::default();
        let mut produced = false;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for payload in lines.push(&chunk) {
                if let Some(text) = parse_event(&payload)? {
                    produced = true;
                    if tx.send(WorkerItem::Fragment(text)).await.is_err() {
                        return Ok(produced);
                    }
                }
            }
        }
        if let Some(payload) = lines.finish() {
            if let Some(text) = parse_event(&payload)? {
                produced = true;
                let _ = tx.send(WorkerItem::Fragment(text)).await;
            }
        }

        Ok(produced)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, key: &str, prompt: &str) -> Result<String> {
        let response = self
            .post(&self.url("generateContent"), key, prompt, Some(self.request_timeout))
            .await?;
        let body: GenerateResponse = response.json().await?;
        body.text().ok_or(CorrectionError::EmptyResponse)
    }

    fn stream(&self, key: &str, prompt: &str) -> FragmentStream {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(self.clone().run_stream_worker(key.to_string(), prompt.to_string(), tx));

        Box::pin(stream::unfold(Some(rx), |state| async move {
            let mut rx = state?;
            match rx.recv().await {
                Some(WorkerItem::Fragment(text)) => Some((Ok(text), Some(rx))),
                Some(WorkerItem::Failed(err)) => Some((Err(err), None)),
                Some(WorkerItem::Finished) => None,
                None => Some((
                    Err(CorrectionError::Stream("stream worker stopped without finishing".to_string())),
                    None,
                )),
            }
        }))
    }
}

fn classify_failure(status: u16, message: String) -> CorrectionError {
    if status == 429 || message.contains("RESOURCE_EXHAUSTED") {
        CorrectionError::QuotaRejected(format!("status {}", status))
    } else {
        CorrectionError::Upstream { status, message }
    }
}

fn parse_event(payload: &str) -> Result<Option<String>> {
    let event: GenerateResponse = serde_json::from_str(payload)
        .map_err(|e| CorrectionError::Stream(format!("malformed upstream event: {}", e)))?;
    Ok(event.text())
}

/// Splits an SSE byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix("data:")?.trim_start();
    (!payload.is_empty()).then(|| payload.to_string())
}
