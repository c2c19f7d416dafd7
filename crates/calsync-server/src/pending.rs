//! Outstanding OAuth consent requests, keyed by CSRF state.
//!
//! A state is issued with the consent URL and consumed by the callback.
//! Entries expire after a fixed TTL and are swept on every insert. The map is
//! capped; when full, the oldest entry is evicted to make room.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// How long a consent request stays valid.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Most consent requests held at once.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

#[derive(Debug, Clone)]
struct PendingEntry {
    user_id: String,
    expires_at: Instant,
}

impl PendingEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct PendingAuthorizations {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: DEFAULT_MAX_PENDING,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Caps the number of outstanding states; at least one is kept.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Records `state` as issued for `user_id`.
    pub fn insert(&self, state: impl Into<String>, user_id: impl Into<String>) {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        if entries.len() < before {
            trace!(removed = before - entries.len(), "swept expired consent states");
        }
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                    warn!(capacity = self.capacity, "too many pending consents, evicted the oldest");
                }
                None => break,
            }
        }
        entries.insert(
            state.into(),
            PendingEntry {
                user_id: user_id.into(),
                expires_at: now + self.ttl,
            },
        );
    }

    /// Consumes `state`, returning its user if it was issued and is still live.
    pub fn take(&self, state: &str) -> Option<String> {
        let entry = self.lock().remove(state)?;
        if entry.is_expired(Instant::now()) {
            debug!("consent state expired");
            return None;
        }
        Some(entry.user_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry>> {
        // A poisoned map only loses pending consents; keep serving.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
