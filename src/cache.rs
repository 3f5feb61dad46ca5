//! TTL-bounded cache for query results and object metadata
//!
//! A statement opts in with a text prefix: `CACHE GLOBAL` shares the entry
//! across every caller, `CACHE SESSION` scopes it to one session. Entries
//! expire a fixed time after creation, and an aggregate weight budget evicts
//! the oldest entries once exceeded.
//!
//! Concurrent first access to an unseen key runs the computation exactly
//! once; every other caller waits for it and observes the same value.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::Result;

/// Cache scope selected by the statement's hint prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Global,
    Session,
}

/// Split a leading `CACHE GLOBAL` / `CACHE SESSION` hint off the statement text
pub fn strip_cache_hint(text: &str) -> (Option<CacheScope>, &str) {
    let trimmed = text.trim_start();
    let Some(rest) = strip_keyword(trimmed, "CACHE") else {
        return (None, text);
    };
    if let Some(statement) = strip_keyword(rest, "GLOBAL") {
        return (Some(CacheScope::Global), statement);
    }
    if let Some(statement) = strip_keyword(rest, "SESSION") {
        return (Some(CacheScope::Session), statement);
    }
    (None, text)
}

/// Strip `keyword` followed by whitespace, ignoring ASCII case
fn strip_keyword<'t>(text: &'t str, keyword: &str) -> Option<&'t str> {
    let head = text.get(..keyword.len())?;
    let tail = &text[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && tail.starts_with(char::is_whitespace) {
        Some(tail.trim_start())
    } else {
        None
    }
}

/// Collapse whitespace runs outside string literals and trim the ends
pub fn normalize_statement(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pending_space = false;
    for c in text.trim().chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '\'' {
                in_string = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '\'' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

/// Build the cache key for a normalized, parameter-substituted statement
pub fn cache_key(scope: CacheScope, session_id: &str, normalized: &str) -> String {
    match scope {
        CacheScope::Global => normalized.to_string(),
        CacheScope::Session => format!("{}:{}", session_id, normalized),
    }
}

/// Source of the current instant, injectable for deterministic expiry tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Approximate storage cost of a cached value
pub trait CacheWeight {
    fn weight(&self) -> usize;
}

impl<T: CacheWeight> CacheWeight for Arc<T> {
    fn weight(&self) -> usize {
        self.as_ref().weight()
    }
}

/// One key's slot. The value is written once, under the slot's own lock.
struct CacheEntry<V> {
    created_at: Instant,
    seq: u64,
    value: Mutex<Option<V>>,
}

struct CacheSlot<V> {
    entry: Arc<CacheEntry<V>>,
    weight: usize,
}

struct CacheState<V> {
    slots: HashMap<String, CacheSlot<V>>,
    /// Keys in creation order, tagged with the sequence number of the entry
    /// they were created for; stale tags are skipped
    order: VecDeque<(String, u64)>,
    total_weight: usize,
    next_seq: u64,
}

impl<V> CacheState<V> {
    fn remove(&mut self, key: &str) {
        if let Some(slot) = self.slots.remove(key) {
            self.total_weight -= slot.weight;
        }
    }

    fn is_current(&self, key: &str, seq: u64) -> bool {
        self.slots
            .get(key)
            .map(|slot| slot.entry.seq == seq)
            .unwrap_or(false)
    }

    /// Drop expired entries from the front of the creation order
    fn purge_expired(&mut self, now: Instant, ttl: Duration) {
        while let Some((key, seq)) = self.order.front().cloned() {
            if !self.is_current(&key, seq) {
                self.order.pop_front();
                continue;
            }
            let expired = self
                .slots
                .get(&key)
                .map(|slot| now.duration_since(slot.entry.created_at) >= ttl)
                .unwrap_or(true);
            if !expired {
                break;
            }
            debug!(key = %key, "cache entry expired");
            self.order.pop_front();
            self.remove(&key);
        }
    }

    /// Evict the oldest entries until the weight fits, never touching `keep`
    fn enforce_budget(&mut self, max_weight: usize, keep: &str) {
        let mut retained = VecDeque::new();
        while self.total_weight > max_weight {
            let Some((key, seq)) = self.order.pop_front() else {
                break;
            };
            if !self.is_current(&key, seq) {
                continue;
            }
            if key == keep {
                retained.push_back((key, seq));
                continue;
            }
            debug!(key = %key, "cache entry evicted for size");
            self.remove(&key);
        }
        while let Some(item) = retained.pop_back() {
            self.order.push_front(item);
        }
    }
}

/// Thread-safe TTL cache with at-most-once computation per key
pub struct Cache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
    max_weight: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + CacheWeight> Cache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                order: VecDeque::new(),
                total_weight: 0,
                next_seq: 0,
            }),
            ttl: config.ttl(),
            max_weight: config.max_weight,
            clock,
        }
    }

    /// Return the cached value for `key`, computing and storing it if absent
    /// or expired. Failed computations are not stored.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let entry = {
            let mut state = self.state.lock();
            let now = self.clock.now();
            state.purge_expired(now, self.ttl);

            let live = state
                .slots
                .get(key)
                .filter(|slot| now.duration_since(slot.entry.created_at) < self.ttl)
                .map(|slot| slot.entry.clone());
            match live {
                Some(entry) => entry,
                None => {
                    state.remove(key);
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    let entry = Arc::new(CacheEntry {
                        created_at: now,
                        seq,
                        value: Mutex::new(None),
                    });
                    state.slots.insert(
                        key.to_string(),
                        CacheSlot {
                            entry: entry.clone(),
                            weight: 0,
                        },
                    );
                    state.order.push_back((key.to_string(), seq));
                    entry
                }
            }
        };

        let mut value = entry.value.lock();
        if let Some(existing) = value.as_ref() {
            debug!(key = %key, "cache hit");
            return Ok(existing.clone());
        }

        debug!(key = %key, "cache miss");
        match compute() {
            Ok(computed) => {
                *value = Some(computed.clone());
                drop(value);
                self.account(key, entry.seq, computed.weight());
                Ok(computed)
            }
            Err(e) => {
                drop(value);
                let mut state = self.state.lock();
                if state.is_current(key, entry.seq) {
                    state.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Return a live, already computed value
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = {
            let state = self.state.lock();
            let now = self.clock.now();
            state
                .slots
                .get(key)
                .filter(|slot| now.duration_since(slot.entry.created_at) < self.ttl)
                .map(|slot| slot.entry.clone())?
        };
        let value = entry.value.lock();
        value.clone()
    }

    pub fn invalidate(&self, key: &str) {
        self.state.lock().remove(key);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.order.clear();
        state.total_weight = 0;
    }

    /// Number of stored entries, including ones still being computed
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_weight(&self) -> usize {
        self.state.lock().total_weight
    }

    fn account(&self, key: &str, seq: u64, weight: usize) {
        let mut state = self.state.lock();
        if !state.is_current(key, seq) {
            return;
        }
        if let Some(slot) = state.slots.get_mut(key) {
            slot.weight = weight;
        }
        state.total_weight += weight;
        state.enforce_budget(self.max_weight, key);
    }
}
