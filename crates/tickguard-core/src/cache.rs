//! In-memory quote cache with a stale-read path.
//!
//! Entries are never dropped for age alone. An expired entry stops being
//! served as fresh but stays readable through [`QuoteCache::get_stale`] until
//! capacity pressure evicts it (least recently used first) or the cache is
//! cleared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::{Quote, Symbol};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CAPACITY: usize = 256;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(Quote),
    Stale(Quote),
    Miss,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    fetched_at: Instant,
    expires_at: Instant,
    last_used: u64,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<Symbol, CacheEntry>,
    tick: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &Symbol) -> Option<&CacheEntry> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.map.get_mut(key)?;
        entry.last_used = tick;
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<Symbol> {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())?;
        self.map.remove(&victim);
        Some(victim)
    }
}

/// Thread-safe, bounded quote cache.
#[derive(Debug, Clone)]
pub struct QuoteCache {
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<CacheInner>>,
}

impl QuoteCache {
    pub fn new(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            clock,
            inner: Arc::new(Mutex::new(CacheInner {
                map: HashMap::new(),
                tick: 0,
            })),
        }
    }

    /// A cache that stores nothing.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::ZERO, 1, clock)
    }

    pub fn is_disabled(&self) -> bool {
        self.ttl == Duration::ZERO
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &Symbol) -> CacheLookup {
        let now = self.clock.now();
        let mut store = self.inner.lock().await;
        match store.touch(key) {
            Some(entry) if now < entry.expires_at => CacheLookup::Fresh(entry.quote.clone()),
            Some(entry) => CacheLookup::Stale(entry.quote.clone()),
            None => CacheLookup::Miss,
        }
    }

    /// Returns the entry for `key` regardless of expiry.
    pub async fn get_stale(&self, key: &Symbol) -> Option<Quote> {
        let mut store = self.inner.lock().await;
        store.touch(key).map(|entry| entry.quote.clone())
    }

    /// Age of the entry for `key`, if present.
    pub async fn age(&self, key: &Symbol) -> Option<Duration> {
        let store = self.inner.lock().await;
        store
            .map
            .get(key)
            .map(|entry| self.clock.elapsed_since(entry.fetched_at))
    }

    /// Stores `quote` under `key`, stamping it with the current time.
    ///
    /// No-op when the cache is disabled.
    pub async fn put(&self, key: Symbol, quote: Quote) {
        if self.is_disabled() {
            return;
        }

        let fetched_at = self.clock.now();
        let mut store = self.inner.lock().await;
        if !store.map.contains_key(&key) && store.map.len() >= self.capacity {
            if let Some(evicted) = store.evict_lru() {
                debug!(symbol = %evicted, "cache evicted least recently used entry");
            }
        }

        store.tick += 1;
        let entry = CacheEntry {
            quote,
            fetched_at,
            expires_at: fetched_at + self.ttl,
            last_used: store.tick,
        };
        store.map.insert(key, entry);
    }

    /// Removes every entry and returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut store = self.inner.lock().await;
        let purged = store.map.len();
        store.map.clear();
        purged
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
