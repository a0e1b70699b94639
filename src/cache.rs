use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Arc<Value>,
    pub timestamp: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Bounded, insertion-ordered key/value store. When full, the oldest
/// inserted key is evicted. Reads never reorder anything, and stale
/// entries are kept around so callers can fall back to them.
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    max_entries: usize,
    ttl: Duration,
}

/// Per-key line of `/cache-status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryStatus {
    pub key: String,
    pub age: String,
    pub expires_in: String,
    pub expired: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStatus {
    pub size: usize,
    pub entries: Vec<EntryStatus>,
}

pub type SharedCache = Arc<Mutex<CacheStore>>;

impl CacheStore {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    /// Only returns the entry while it is younger than the TTL.
    pub fn get_fresh(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl))
            .cloned()
    }

    pub fn put(&mut self, key: impl Into<String>, data: Value) {
        let key = key.into();

        if self.entries.contains_key(&key) {
            // Overwrite counts as a fresh insertion
            self.order.retain(|k| k != &key);
        } else if self.entries.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                tracing::debug!(key = %oldest, "evicting oldest cache entry");
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                data: Arc::new(data),
                timestamp: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn status(&self) -> CacheStatus {
        let ttl_ms = self.ttl.as_millis() as i128;
        let entries = self
            .keys()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, entry)))
            .map(|(key, entry)| {
                let age_ms = entry.age().as_millis() as i128;
                let expiry_ms = ttl_ms - age_ms;
                EntryStatus {
                    key: key.to_string(),
                    age: format!("{}s", round_secs(age_ms)),
                    expires_in: format!("{}s", round_secs(expiry_ms)),
                    expired: expiry_ms <= 0,
                }
            })
            .collect();

        CacheStatus {
            size: self.len(),
            entries,
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

fn round_secs(ms: i128) -> i128 {
    // rounds half away from zero
    if ms >= 0 {
        (ms + 500) / 1000
    } else {
        (ms - 500) / 1000
    }
}

/// Locks the shared store. A poisoned lock only means another task
/// panicked mid-request; the map itself is still consistent.
pub fn lock(cache: &SharedCache) -> MutexGuard<'_, CacheStore> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
