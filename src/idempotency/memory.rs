use crate::error::Result;
use crate::idempotency::storage::{KeyTtl, ReservationStore, DELAY_DELETE_QUEUE, RESERVED_VALUE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    queue: HashMap<String, i64>,
}

impl State {
    /// Returns the live entry for `key`, evicting it first if it has expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).map_or(false, |e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

/// Single-process reservation store with the same semantics as the Redis
/// store: atomic set-if-absent, lazily expiring TTLs and a scored cleanup
/// queue. Suitable for tests and for services running a single instance.
#[derive(Debug, Default)]
pub struct MemoryReservationStore {
    state: Mutex<State>,
}

impl MemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes a key with no expiry, as a writer that bypassed the reserve
    /// path would.
    pub fn insert_persistent(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().live(key, Instant::now()).map(|e| e.value.clone())
    }

    /// Queued cleanup tasks as `(key, due_at_millis)`, earliest first.
    pub fn queued(&self) -> Vec<(String, i64)> {
        let state = self.lock();
        let mut tasks: Vec<(String, i64)> = state
            .queue
            .iter()
            .map(|(k, score)| (k.clone(), *score))
            .collect();
        tasks.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        tasks
    }
}

#[async_trait]
impl ReservationStore for MemoryReservationStore {
    async fn try_reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.lock();
        if state.live(key, now).is_some() {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: RESERVED_VALUE.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut state = self.lock();
        if let Some(entry) = state.live(key, now) {
            entry.value = String::new();
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn delete_now(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.lock();
        let existed = state.live(key, now).is_some();
        state.entries.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock().live(key, Instant::now()).is_some())
    }

    async fn schedule_delete(&self, key: &str, due_at_millis: i64) -> Result<()> {
        self.lock().queue.insert(key.to_string(), due_at_millis);
        Ok(())
    }

    async fn drain_due(&self, now_millis: i64) -> Result<Vec<String>> {
        Ok(self
            .queued()
            .into_iter()
            .filter(|(_, due)| *due <= now_millis)
            .map(|(key, _)| key)
            .collect())
    }

    async fn remove_from_queue(&self, key: &str) -> Result<bool> {
        Ok(self.lock().queue.remove(key).is_some())
    }

    async fn remove_due_from_queue(&self, key: &str, due_by_millis: i64) -> Result<bool> {
        let mut state = self.lock();
        match state.queue.get(key).copied() {
            Some(due) if due <= due_by_millis => {
                state.queue.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut state = self.lock();
        state.entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix) && k.as_str() != DELAY_DELETE_QUEUE)
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = Instant::now();
        let mut state = self.lock();
        Ok(match state.live(key, now) {
            None => KeyTtl::Absent,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expiring(at.saturating_duration_since(now)),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
