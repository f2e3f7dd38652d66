//! Rate limiting and throttling.
//!
//! Sliding window rate limiter keyed by caller. Stale timestamps are pruned
//! lazily on every access; whole keys are swept by [`SlidingWindowLimiter::cleanup_expired`]
//! (driven by the maintenance service) and, once `max_keys` is reached, the
//! least recently touched key is evicted to make room.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::Message;
use crate::types::{self, Error};

/// Derives the limiter key from a message.
pub type KeyGenerator = Arc<dyn Fn(&Message) -> String + Send + Sync>;

/// Key messages by their producing actor.
pub fn key_by_producer(message: &Message) -> String {
    message.produced_by().unwrap_or("anonymous").to_string()
}

/// Sliding window configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SlidingWindowConfig {
    /// Window length.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub window: Duration,

    /// Requests admitted per key within one window.
    pub max_requests: u32,

    /// Tracked keys before the least recently used one is evicted.
    pub max_keys: usize,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            max_keys: 10_000,
        }
    }
}

/// Admission status for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// When the oldest surviving request leaves the window.
    pub reset_time: DateTime<Utc>,
    pub window_ms: u64,
}

/// Sliding window for tracking requests.
#[derive(Debug)]
struct SlidingWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl SlidingWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamps: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Drop timestamps that are a full window old or older.
    fn prune(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        let cutoff = now - window;
        while let Some(&ts) = self.timestamps.front() {
            if ts <= cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-key sliding window rate limiter.
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    window: chrono::Duration,
    key_generator: KeyGenerator,
    windows: Mutex<HashMap<String, SlidingWindow>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: SlidingWindowConfig) -> Self {
        let window = chrono::Duration::from_std(config.window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            config,
            window,
            key_generator: Arc::new(key_by_producer),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    /// Admit a request for `key` now.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Utc::now())
    }

    /// Admit a message, keyed by the configured key generator.
    pub fn allow_message(&self, message: &Message) -> bool {
        let key = (self.key_generator)(message);
        self.allow(&key)
    }

    /// Admit a request for `key` at `now`.
    ///
    /// A denied request is not recorded.
    pub fn allow_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock();

        if !windows.contains_key(key) && windows.len() >= self.config.max_keys {
            evict_least_recent(&mut windows);
        }

        let window = windows
            .entry(key.to_string())
            .or_insert_with(|| SlidingWindow::new(now));
        window.prune(now, self.window);
        window.last_seen = now;

        if window.timestamps.len() >= self.config.max_requests as usize {
            tracing::debug!(
                "rate_limited: key={} limit={} window_ms={}",
                key,
                self.config.max_requests,
                self.config.window.as_millis()
            );
            return false;
        }

        window.timestamps.push_back(now);
        true
    }

    /// Check and record, surfacing a denial as [`Error::RateLimited`].
    pub fn check(&self, key: &str) -> types::Result<()> {
        if self.allow(key) {
            Ok(())
        } else {
            Err(Error::rate_limited(format!(
                "{} requests per {}ms exceeded for {}",
                self.config.max_requests,
                self.config.window.as_millis(),
                key
            )))
        }
    }

    pub fn status(&self, key: &str) -> RateLimitStatus {
        self.status_at(key, Utc::now())
    }

    pub fn status_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitStatus {
        let mut windows = self.windows.lock();
        let (used, oldest) = match windows.get_mut(key) {
            Some(window) => {
                window.prune(now, self.window);
                (window.timestamps.len(), window.timestamps.front().copied())
            }
            None => (0, None),
        };

        RateLimitStatus {
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(used as u32),
            reset_time: oldest.map(|ts| ts + self.window).unwrap_or(now),
            window_ms: self.config.window.as_millis() as u64,
        }
    }

    /// Forget all history for `key`.
    pub fn reset(&self, key: &str) {
        self.windows.lock().remove(key);
    }

    pub fn key_count(&self) -> usize {
        self.windows.lock().len()
    }

    /// Remove keys whose entire window is stale. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| {
            window.prune(now, self.window);
            !window.timestamps.is_empty()
        });
        before - windows.len()
    }
}

fn evict_least_recent(windows: &mut HashMap<String, SlidingWindow>) {
    let oldest = windows
        .iter()
        .min_by_key(|(_, w)| w.last_seen)
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        tracing::debug!("rate_limit_key_evicted: key={}", key);
        windows.remove(&key);
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .field("keys", &self.key_count())
            .finish_non_exhaustive()
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(SlidingWindowConfig::default())
    }
}
