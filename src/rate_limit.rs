/// Rate Limiting System
///
/// Fixed-window counters keyed by operation + identifier. Sensitive endpoints
/// check a named policy before any business logic runs; a background sweep
/// removes expired windows so low-traffic keys do not accumulate.
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Rate limit policy for a single operation
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests allowed within the window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: i64,
}

/// Login attempts, keyed by IP
pub const LOGIN: RateLimitConfig = RateLimitConfig {
    max_requests: 10,
    window_secs: 60,
};

/// Password reset requests, keyed by `email:ip`
pub const PASSWORD_RESET: RateLimitConfig = RateLimitConfig {
    max_requests: 3,
    window_secs: 3600,
};

/// Email verification requests, keyed by email
pub const EMAIL_VERIFICATION: RateLimitConfig = RateLimitConfig {
    max_requests: 3,
    window_secs: 3600,
};

/// General API traffic, keyed by IP
pub const API_GENERAL: RateLimitConfig = RateLimitConfig {
    max_requests: 100,
    window_secs: 60,
};

/// Strict API traffic, keyed by IP
pub const API_STRICT: RateLimitConfig = RateLimitConfig {
    max_requests: 10,
    window_secs: 60,
};

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Seconds until the window resets, floored at zero
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(0) as u64
    }
}

/// A single key's counter within its window
#[derive(Debug, Clone, Copy)]
pub struct CounterEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Counter storage behind the limiter
///
/// The in-memory implementation below serves a single-process deployment;
/// multi-instance deployments can provide a shared store instead. `increment`
/// must be atomic: concurrent calls on one key may never lose an update.
pub trait CounterStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CounterEntry>;
    fn put(&self, key: &str, entry: CounterEntry);
    /// Atomically bump the counter for `key`, starting a fresh window at
    /// `now + window_secs` when the entry is absent or expired.
    fn increment(&self, key: &str, now: DateTime<Utc>, window_secs: i64) -> CounterEntry;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// In-process counter store backed by a locked map
#[derive(Default)]
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn get(&self, key: &str) -> Option<CounterEntry> {
        self.entries.lock().unwrap().get(key).copied()
    }

    fn put(&self, key: &str, entry: CounterEntry) {
        self.entries.lock().unwrap().insert(key.to_string(), entry);
    }

    fn increment(&self, key: &str, now: DateTime<Utc>, window_secs: i64) -> CounterEntry {
        // Read-modify-write under one lock acquisition
        let mut entries = self.entries.lock().unwrap();
        let entry = match entries.get(key) {
            Some(entry) if entry.reset_at > now => CounterEntry {
                count: entry.count + 1,
                reset_at: entry.reset_at,
            },
            _ => CounterEntry {
                count: 1,
                reset_at: now + Duration::seconds(window_secs),
            },
        };
        entries.insert(key.to_string(), entry);
        entry
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryCounterStore::new()),
        }
    }

    pub fn with_store(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Record a request against `key` and decide whether it is allowed.
    ///
    /// A missing or expired entry starts a fresh window with count 1. This
    /// never fails; callers always get a structured decision.
    pub fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = Utc::now();
        let entry = self.store.increment(key, now, config.window_secs);

        RateLimitDecision {
            allowed: entry.count <= config.max_requests,
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        }
    }

    /// Current state of `key` without counting a request.
    ///
    /// Returns `None` for absent or expired keys; an expired entry is removed
    /// on the way out.
    pub fn status(&self, key: &str, config: &RateLimitConfig) -> Option<RateLimitDecision> {
        let now = Utc::now();

        match self.store.get(key) {
            Some(entry) if entry.reset_at > now => Some(RateLimitDecision {
                allowed: entry.count <= config.max_requests,
                limit: config.max_requests,
                remaining: config.max_requests.saturating_sub(entry.count),
                reset_at: entry.reset_at,
            }),
            Some(_) => {
                self.store.remove(key);
                None
            }
            None => None,
        }
    }

    /// Delete the entry for `key` unconditionally
    pub fn reset(&self, key: &str) {
        self.store.remove(key);
    }

    /// Remove every entry whose window has passed. Returns the number swept.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut swept = 0;

        for key in self.store.keys() {
            if let Some(entry) = self.store.get(&key) {
                if entry.reset_at <= now {
                    self.store.remove(&key);
                    swept += 1;
                }
            }
        }

        swept
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a compound key of operation plus identifier(s)
pub fn compound_key(operation: &str, parts: &[&str]) -> String {
    format!("{}:{}", operation, parts.join(":"))
}
