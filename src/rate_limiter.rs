use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);

/// Every this many calls, clients whose windows have emptied are dropped.
const SWEEP_EVERY: u64 = 1024;

/// Per-client sliding-window limiter with a minute and a day window.
///
/// Timestamps are pruned lazily on each call; there is no background sweep.
/// A client is only tracked while it has a timestamp inside the day window.
#[derive(Debug)]
pub struct SlidingLimiter {
    per_minute: usize,
    per_day: usize,
    state: Mutex<LimiterState>,
}

#[derive(Debug, Default)]
struct LimiterState {
    clients: HashMap<String, ClientWindows>,
    calls: u64,
}

#[derive(Debug, Default)]
struct ClientWindows {
    minute: VecDeque<Duration>,
    day: VecDeque<Duration>,
}

impl ClientWindows {
    fn prune(&mut self, now: Duration) {
        prune(&mut self.minute, now, MINUTE);
        prune(&mut self.day, now, DAY);
    }

    fn is_idle(&self) -> bool {
        self.minute.is_empty() && self.day.is_empty()
    }
}

impl LimiterState {
    fn sweep(&mut self, now: Duration) {
        self.clients.retain(|_, client| {
            client.prune(now);
            !client.is_idle()
        });
    }
}

impl SlidingLimiter {
    pub fn new(per_minute: usize, per_day: usize) -> Self {
        Self {
            per_minute,
            per_day,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn per_minute(&self) -> usize {
        self.per_minute
    }

    pub fn per_day(&self) -> usize {
        self.per_day
    }

    /// Admit a request from `key` at the current wall-clock time.
    pub fn allow(&self, key: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.allow_at(key, now)
    }

    /// Admit a request from `key` at `now` (time since the Unix epoch).
    ///
    /// A timestamp exactly one window old is still counted.
    pub fn allow_at(&self, key: &str, now: Duration) -> bool {
        let mut state = self.lock();
        state.calls = state.calls.wrapping_add(1);
        if state.calls % SWEEP_EVERY == 0 {
            state.sweep(now);
        }

        let client = state.clients.entry(key.to_string()).or_default();
        client.prune(now);

        if client.minute.len() >= self.per_minute || client.day.len() >= self.per_day {
            if client.is_idle() {
                state.clients.remove(key);
            }
            return false;
        }

        client.minute.push_back(now);
        client.day.push_back(now);
        true
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.lock().clients.len()
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn prune(timestamps: &mut VecDeque<Duration>, now: Duration, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while timestamps.front().is_some_and(|t| *t < cutoff) {
        timestamps.pop_front();
    }
}
