//! Correction backends.
//!
//! Handlers only see [`CorrectionAdapter`]; which implementation sits behind
//! it is decided once at startup by [`build_adapter`].

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use crate::config::{Config, ModelBackend};
use crate::error::CorrectionError;

pub mod gemini;
pub mod local;
pub mod remote;

pub use gemini::GeminiClient;
pub use local::{LocalAdapter, MockAdapter, PromptAdapter};
pub use remote::{GenerativeBackend, RemoteAdapter};

pub type Result<T> = std::result::Result<T, CorrectionError>;

/// Lazily produced pieces of a corrected text. Concatenated in order they
/// form the full correction; an `Err` item ends the sequence.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Default language when a request does not name one.
pub const DEFAULT_LANG: &str = "tt";

#[async_trait]
pub trait CorrectionAdapter: Send + Sync {
    /// Backend identity reported to clients and stored with cache entries.
    fn name(&self) -> &str;

    /// Correct `text` in one shot.
    async fn correct(&self, text: &str, lang: &str, request_id: &str) -> Result<String>;

    /// Correct `text` as a sequence of fragments. Each call starts a new,
    /// independent correction.
    fn correct_stream(&self, text: &str, lang: &str, request_id: &str) -> FragmentStream;
}

/// Construct the adapter selected by `config.model_backend`.
pub fn build_adapter(config: &Config) -> Result<Arc<dyn CorrectionAdapter>> {
    let adapter: Arc<dyn CorrectionAdapter> = match config.model_backend {
        ModelBackend::Mock => Arc::new(MockAdapter),
        ModelBackend::Local => Arc::new(LocalAdapter),
        ModelBackend::Prompt => Arc::new(PromptAdapter::new(config.prompt_version.clone())),
        ModelBackend::Gemini => {
            let keys = config.api_keys();
            if keys.is_empty() {
                tracing::warn!("gemini backend selected but GEMINI_API_KEYS is empty; requests will fail");
            }
            let client = GeminiClient::new(&config.gemini_base_url, &config.gemini_model)?;
            Arc::new(RemoteAdapter::new("gemini", client, keys))
        }
    };

    tracing::info!(backend = adapter.name(), "correction backend ready");
    Ok(adapter)
}

/// Collapse runs of whitespace and capitalize the first letter.
pub fn normalize(text: &str) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split `text` into pieces of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Instruction sent to generative backends.
pub fn build_prompt(text: &str, lang: &str, request_id: &str) -> String {
    format!(
        "You are a grammar and spelling correction assistant for Tatar text.\n\
         Return only the corrected text. Do not add explanations or extra formatting.\n\
         Preserve punctuation, line breaks, and the original meaning.\n\
         Preserve the original casing unless a correction requires changing it.\n\
         Language: {lang}\n\
         Request-ID: {request_id}\n\n\
         Text:\n{text}"
    )
}
