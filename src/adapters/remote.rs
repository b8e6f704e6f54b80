//! Quota-aware wrapper around a generative backend.
//!
//! Every attempt borrows a key from the [`KeyPool`]. A quota rejection marks
//! that key exhausted and the attempt is repeated with the next key, at most
//! once per configured key. Any other failure is returned as is.
//!
//! Streaming follows the same rotation until the first fragment of an
//! attempt reaches the caller. From then on a quota rejection cannot be
//! retried, because output already delivered cannot be taken back.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{build_prompt, CorrectionAdapter, FragmentStream, Result};
use crate::error::CorrectionError;
use crate::key_pool::{mask_key, KeyPool};

/// Fragments buffered between the rotation task and the consumer.
pub const FRAGMENT_BUFFER: usize = 32;

/// A remote text generator that authenticates with one key per call.
#[async_trait]
pub trait GenerativeBackend: Send + Sync + 'static {
    async fn generate(&self, key: &str, prompt: &str) -> Result<String>;

    fn stream(&self, key: &str, prompt: &str) -> FragmentStream;
}

pub struct RemoteAdapter<B> {
    name: String,
    backend: Arc<B>,
    pool: Arc<KeyPool>,
}

impl<B: GenerativeBackend> RemoteAdapter<B> {
    pub fn new<I, S>(name: impl Into<String>, backend: B, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            backend: Arc::new(backend),
            pool: Arc::new(KeyPool::new(keys)),
        }
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }
}

/// Record a quota rejection and decide whether rotation may continue.
fn note_rejection(pool: &KeyPool, key: &str, err: &CorrectionError) -> Result<()> {
    let exhausted_all = pool.mark_exhausted(key);
    warn!(key = %mask_key(key), error = %err, exhausted_all, "upstream key hit its quota");
    if exhausted_all {
        return Err(CorrectionError::Exhausted(CorrectionError::ALL_KEYS_EXHAUSTED));
    }
    Ok(())
}

#[async_trait]
impl<B: GenerativeBackend> CorrectionAdapter for RemoteAdapter<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correct(&self, text: &str, lang: &str, request_id: &str) -> Result<String> {
        if !self.pool.has_keys() {
            return Err(CorrectionError::Exhausted(CorrectionError::NO_KEYS));
        }

        let prompt = build_prompt(text, lang, request_id);
        for attempt in 0..self.pool.key_count() {
            let key = self.pool.pick()?;
            debug!(request_id, attempt, key = %mask_key(&key), "calling upstream");
            match self.backend.generate(&key, &prompt).await {
                Ok(corrected) => return Ok(corrected),
                Err(err) if err.is_quota() => note_rejection(&self.pool, &key, &err)?,
                Err(err) => return Err(err),
            }
        }

        Err(CorrectionError::Exhausted(CorrectionError::ALL_KEYS_EXHAUSTED))
    }

    fn correct_stream(&self, text: &str, lang: &str, request_id: &str) -> FragmentStream {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let backend = Arc::clone(&self.backend);
        let pool = Arc::clone(&self.pool);
        let prompt = build_prompt(text, lang, request_id);
        let request_id = request_id.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(request_id = %request_id, "consumer dropped the stream");
                }
                result = rotate_stream(backend.as_ref(), &pool, &prompt, &request_id, &tx) => {
                    if let Err(err) = result {
                        let _ = tx.send(Err(err)).await;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Drive streaming attempts until one finishes, forwarding fragments to `tx`.
///
/// Returns `Ok` once a stream completes or the consumer goes away.
async fn rotate_stream<B: GenerativeBackend>(
    backend: &B,
    pool: &KeyPool,
    prompt: &str,
    request_id: &str,
    tx: &mpsc::Sender<Result<String>>,
) -> Result<()> {
    if !pool.has_keys() {
        return Err(CorrectionError::Exhausted(CorrectionError::NO_KEYS));
    }

    for attempt in 0..pool.key_count() {
        let key = pool.pick()?;
        debug!(request_id, attempt, key = %mask_key(&key), "opening upstream stream");

        let mut fragments = backend.stream(&key, prompt);
        let mut yielded = false;
        let mut failure = None;

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    yielded = true;
                    if tx.send(Ok(fragment)).await.is_err() {
                        debug!(request_id, "consumer dropped the stream");
                        return Ok(());
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        match failure {
            None if yielded => return Ok(()),
            None => return Err(CorrectionError::EmptyResponse),
            Some(err) if err.is_quota() => {
                note_rejection(pool, &key, &err)?;
                if yielded {
                    return Err(err);
                }
            }
            Some(err) => return Err(err),
        }
    }

    Err(CorrectionError::Exhausted(CorrectionError::ALL_KEYS_EXHAUSTED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted backend: per key, a list of stream items, or a terminal error.
    #[derive(Default)]
    struct StubBackend {
        responses: HashMap<String, Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl StubBackend {
        fn with(mut self, key: &str, items: Vec<Result<String>>) -> Self {
            self.responses.insert(key.to_string(), items);
            self
        }
    }

    #[async_trait]
    impl GenerativeBackend for StubBackend {
        async fn generate(&self, key: &str, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = self.responses.get(key).cloned().unwrap_or_default();
            items.into_iter().collect::<Result<Vec<_>>>().map(|parts| parts.concat())
        }

        fn stream(&self, key: &str, _prompt: &str) -> FragmentStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = self.responses.get(key).cloned().unwrap_or_default();
            Box::pin(stream::iter(items))
        }
    }

    fn quota() -> CorrectionError {
        CorrectionError::QuotaRejected("429".to_string())
    }

    async fn drain(stream: FragmentStream) -> (String, Option<CorrectionError>) {
        let mut text = String::new();
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => text.push_str(&fragment),
                Err(err) => return (text, Some(err)),
            }
        }
        (text, None)
    }

    #[tokio::test]
    async fn test_rotates_keys_on_rate_limit() {
        let backend = StubBackend::default()
            .with("k1", vec![Err(quota())])
            .with("k2", vec![Ok("ok".to_string())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1", "k2"]);

        let result = adapter.correct("hello", "tt", "rid").await.unwrap();
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn test_raises_when_all_keys_exhausted() {
        let backend = StubBackend::default().with("k1", vec![Err(quota())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1"]);

        let err = adapter.correct("hello", "tt", "rid").await.unwrap_err();
        assert!(matches!(err, CorrectionError::Exhausted(_)));
        // The pool healed itself for the next caller.
        assert_eq!(adapter.pool().pick().unwrap(), "k1");
    }

    #[tokio::test]
    async fn test_non_quota_errors_are_not_retried() {
        let backend = StubBackend::default()
            .with("k1", vec![Err(CorrectionError::Upstream { status: 500, message: "boom".into() })])
            .with("k2", vec![Ok("ok".to_string())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1", "k2"]);

        let err = adapter.correct("hello", "tt", "rid").await.unwrap_err();
        assert!(matches!(err, CorrectionError::Upstream { status: 500, .. }));
        assert_eq!(adapter.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_keys_is_exhausted() {
        let adapter = RemoteAdapter::new("gemini", StubBackend::default(), Vec::<String>::new());
        let err = adapter.correct("hello", "tt", "rid").await.unwrap_err();
        assert!(matches!(err, CorrectionError::Exhausted(_)));

        let (_, err) = drain(adapter.correct_stream("hello", "tt", "rid")).await;
        assert!(matches!(err, Some(CorrectionError::Exhausted(_))));
    }

    #[tokio::test]
    async fn test_stream_rotates_keys_before_first_fragment() {
        let backend = StubBackend::default()
            .with("k1", vec![Err(quota())])
            .with("k2", vec![Ok("stream-".to_string()), Ok("ok".to_string())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1", "k2"]);

        let (text, err) = drain(adapter.correct_stream("hello", "tt", "rid")).await;
        assert_eq!(text, "stream-ok");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_stream_raises_when_all_keys_exhausted() {
        let backend = StubBackend::default().with("k1", vec![Err(quota())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1"]);

        let (text, err) = drain(adapter.correct_stream("hello", "tt", "rid")).await;
        assert!(text.is_empty());
        assert!(matches!(err, Some(CorrectionError::Exhausted(_))));
    }

    #[tokio::test]
    async fn test_stream_does_not_rotate_after_partial_output() {
        let backend = StubBackend::default()
            .with("k1", vec![Ok("part".to_string()), Err(quota())])
            .with("k2", vec![Ok("other".to_string())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1", "k2"]);

        let (text, err) = drain(adapter.correct_stream("hello", "tt", "rid")).await;
        assert_eq!(text, "part");
        assert!(matches!(err, Some(CorrectionError::QuotaRejected(_))));
        assert_eq!(adapter.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_partial_output_on_last_key_is_exhausted() {
        let backend = StubBackend::default().with("k1", vec![Ok("part".to_string()), Err(quota())]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1"]);

        let (text, err) = drain(adapter.correct_stream("hello", "tt", "rid")).await;
        assert_eq!(text, "part");
        assert!(matches!(err, Some(CorrectionError::Exhausted(_))));
    }

    /// Opens streams that never produce anything.
    struct SilentBackend;

    #[async_trait]
    impl GenerativeBackend for SilentBackend {
        async fn generate(&self, _key: &str, _prompt: &str) -> Result<String> {
            std::future::pending().await
        }

        fn stream(&self, _key: &str, _prompt: &str) -> FragmentStream {
            Box::pin(stream::pending())
        }
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_silent_stream() {
        let adapter = RemoteAdapter::new("gemini", SilentBackend, ["k1"]);

        let fragments = adapter.correct_stream("hello", "tt", "rid");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&adapter.backend), 2);

        drop(fragments);
        for _ in 0..100 {
            if Arc::strong_count(&adapter.backend) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&adapter.backend), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_is_a_failure() {
        let backend = StubBackend::default().with("k1", vec![]);
        let adapter = RemoteAdapter::new("gemini", backend, ["k1", "k2"]);

        let (_, err) = drain(adapter.correct_stream("hello", "tt", "rid")).await;
        assert!(matches!(err, Some(CorrectionError::EmptyResponse)));
    }
}
