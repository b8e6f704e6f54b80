//! Round-robin rotation over upstream API keys.
//!
//! Keys whose quota was rejected are skipped until every key has been
//! rejected, at which point the pool forgets all exhaustion marks and starts
//! over from the first key: provider quotas refresh eventually, so the pool
//! reports `Exhausted` once and then becomes usable again.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::CorrectionError;

#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    exhausted: HashSet<usize>,
    /// Index the next pick starts from.
    cursor: usize,
}

impl KeyPool {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|key| key.as_ref().trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        Self {
            keys,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Hand out the next usable key.
    ///
    /// Fails with `Exhausted` when no key is configured or every key is
    /// marked exhausted; in the latter case the marks are cleared so the
    /// following call succeeds again.
    pub fn pick(&self) -> Result<String, CorrectionError> {
        if self.keys.is_empty() {
            return Err(CorrectionError::Exhausted(CorrectionError::NO_KEYS));
        }

        let mut state = self.lock();
        let Some(index) = self.next_available(&state, state.cursor) else {
            state.exhausted.clear();
            state.cursor = 0;
            return Err(CorrectionError::Exhausted(CorrectionError::ALL_KEYS_EXHAUSTED));
        };

        state.cursor = (index + 1) % self.keys.len();
        Ok(self.keys[index].clone())
    }

    /// Record a quota rejection for `key`.
    ///
    /// Returns `true` when this was the last usable key. The pool has then
    /// already been reset and the caller should give up for now. Unknown
    /// keys are ignored.
    pub fn mark_exhausted(&self, key: &str) -> bool {
        let Some(index) = self.keys.iter().position(|candidate| candidate == key) else {
            return false;
        };

        let mut state = self.lock();
        state.exhausted.insert(index);

        if state.exhausted.len() >= self.keys.len() {
            state.exhausted.clear();
            state.cursor = 0;
            return true;
        }

        if let Some(next) = self.next_available(&state, state.cursor) {
            state.cursor = next;
        }
        false
    }

    /// First non-exhausted index at or after `start`, wrapping around.
    fn next_available(&self, state: &PoolState, start: usize) -> Option<usize> {
        let len = self.keys.len();
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|index| !state.exhausted.contains(index))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Short, log-safe rendering of a key.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
