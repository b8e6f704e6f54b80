use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-client accounting of open streaming responses.
#[derive(Debug, Clone, Default)]
pub struct StreamSlots {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl StreamSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for `client` unless it already holds `max` open streams.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn try_acquire(&self, client: &str, max: usize) -> Option<StreamSlot> {
        let mut counts = self.lock();
        let count = counts.entry(client.to_string()).or_insert(0);
        if *count >= max {
            return None;
        }
        *count += 1;

        Some(StreamSlot {
            client: client.to_string(),
            slots: self.clone(),
        })
    }

    pub fn open_for(&self, client: &str) -> usize {
        self.lock().get(client).copied().unwrap_or(0)
    }

    pub fn active_total(&self) -> usize {
        self.lock().values().sum()
    }

    fn release(&self, client: &str) {
        let mut counts = self.lock();
        if let Some(count) = counts.get_mut(client) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(client);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An open stream's claim on its client's slot budget.
#[derive(Debug)]
pub struct StreamSlot {
    client: String,
    slots: StreamSlots,
}

impl StreamSlot {
    pub fn client(&self) -> &str {
        &self.client
    }
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.slots.release(&self.client);
    }
}
