//! Deterministic backends that need no upstream service.
//!
//! Streaming is simulated by cutting the final text into fixed-size chunks
//! released with a small delay, which is enough to exercise the streaming
//! protocol end to end.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{chunk_text, normalize, CorrectionAdapter, FragmentStream, Result};

fn synthetic_stream(text: String, chunk_size: usize, delay: Duration) -> FragmentStream {
    let chunks = chunk_text(&text, chunk_size);
    Box::pin(stream::iter(chunks).then(move |chunk| async move {
        tokio::time::sleep(delay).await;
        Ok(chunk)
    }))
}

/// Whitespace cleanup and capitalization only.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockAdapter;

impl MockAdapter {
    const CHUNK: usize = 28;
    const DELAY: Duration = Duration::from_millis(120);
}

#[async_trait]
impl CorrectionAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn correct(&self, text: &str, _lang: &str, _request_id: &str) -> Result<String> {
        Ok(normalize(text))
    }

    fn correct_stream(&self, text: &str, _lang: &str, _request_id: &str) -> FragmentStream {
        synthetic_stream(normalize(text), Self::CHUNK, Self::DELAY)
    }
}

/// Stand-in for a prompt-template pipeline; tags output with the template version.
#[derive(Debug, Clone)]
pub struct PromptAdapter {
    prompt_version: String,
}

impl PromptAdapter {
    const CHUNK: usize = 28;
    const DELAY: Duration = Duration::from_millis(120);

    pub fn new(prompt_version: impl Into<String>) -> Self {
        Self {
            prompt_version: prompt_version.into(),
        }
    }

    fn render(&self, text: &str) -> String {
        format!("{} [prompt:{}]", normalize(text), self.prompt_version)
    }
}

#[async_trait]
impl CorrectionAdapter for PromptAdapter {
    fn name(&self) -> &str {
        "prompt"
    }

    async fn correct(&self, text: &str, _lang: &str, _request_id: &str) -> Result<String> {
        Ok(self.render(text))
    }

    fn correct_stream(&self, text: &str, _lang: &str, _request_id: &str) -> FragmentStream {
        synthetic_stream(self.render(text), Self::CHUNK, Self::DELAY)
    }
}

/// Stand-in for an on-host model.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    const CHUNK: usize = 32;
    const DELAY: Duration = Duration::from_millis(100);

    fn render(text: &str) -> String {
        format!("{} [local-model]", normalize(text))
    }
}

#[async_trait]
impl CorrectionAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    async fn correct(&self, text: &str, _lang: &str, _request_id: &str) -> Result<String> {
        Ok(Self::render(text))
    }

    fn correct_stream(&self, text: &str, _lang: &str, _request_id: &str) -> FragmentStream {
        synthetic_stream(Self::render(text), Self::CHUNK, Self::DELAY)
    }
}
