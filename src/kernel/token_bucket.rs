//! Token bucket admission control.
//!
//! Each key owns a bucket of `capacity` tokens refilled continuously at
//! `refill_rate` tokens per second. Refill is computed lazily on access:
//! `tokens = min(capacity, tokens + elapsed_seconds * refill_rate)`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::rate_limiter::{key_by_producer, KeyGenerator};
use crate::envelope::Message;
use crate::types::{Error, Result};

/// Token bucket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TokenBucketConfig {
    /// Maximum tokens a bucket holds (and starts with).
    pub capacity: u32,

    /// Tokens added per second.
    pub refill_rate: f64,

    /// Tracked keys before the least recently used one is evicted.
    pub max_keys: usize,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate: 1.0,
            max_keys: 10_000,
        }
    }
}

/// Bucket status for one key, after refill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketStatus {
    pub capacity: u32,
    pub available: f64,
    pub refill_rate: f64,
    /// Milliseconds until at least one whole token is available.
    pub next_token_in_ms: u64,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn full(capacity: f64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>, capacity: f64, refill_rate: f64) {
        // A clock that steps backwards adds nothing.
        if now <= self.last_refill {
            return;
        }
        let elapsed_secs = (now - self.last_refill)
            .to_std()
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        self.tokens = (self.tokens + elapsed_secs * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Per-key token bucket limiter.
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    key_generator: KeyGenerator,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            config,
            key_generator: Arc::new(key_by_producer),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.capacity)
    }

    /// Take one token for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, 1, Utc::now())
    }

    /// Take `cost` tokens for `key`.
    pub fn allow_cost(&self, key: &str, cost: u32) -> bool {
        self.allow_at(key, cost, Utc::now())
    }

    /// Take one token for the message's key.
    pub fn allow_message(&self, message: &Message) -> bool {
        let key = (self.key_generator)(message);
        self.allow(&key)
    }

    /// Take `cost` tokens for `key` at `now`.
    ///
    /// On denial the bucket keeps its (refilled) balance untouched.
    pub fn allow_at(&self, key: &str, cost: u32, now: DateTime<Utc>) -> bool {
        let capacity = self.capacity();
        let mut buckets = self.buckets.lock();

        if !buckets.contains_key(key) && buckets.len() >= self.config.max_keys {
            evict_least_recent(&mut buckets);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(capacity, now));
        bucket.refill(now, capacity, self.config.refill_rate);

        let cost = f64::from(cost);
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            tracing::debug!(
                "token_bucket_denied: key={} cost={} available={:.3}",
                key,
                cost,
                bucket.tokens
            );
            false
        }
    }

    /// Take `cost` tokens, surfacing a denial as [`Error::RateLimited`].
    pub fn check(&self, key: &str, cost: u32) -> Result<()> {
        if self.allow_cost(key, cost) {
            Ok(())
        } else {
            Err(Error::rate_limited(format!(
                "token bucket for {} cannot cover cost {}",
                key, cost
            )))
        }
    }

    pub fn status(&self, key: &str) -> TokenBucketStatus {
        self.status_at(key, Utc::now())
    }

    pub fn status_at(&self, key: &str, now: DateTime<Utc>) -> TokenBucketStatus {
        let capacity = self.capacity();
        let available = match self.buckets.lock().get_mut(key) {
            Some(bucket) => {
                bucket.refill(now, capacity, self.config.refill_rate);
                bucket.tokens
            }
            None => capacity,
        };

        let next_token_in_ms = if available >= 1.0 {
            0
        } else if self.config.refill_rate > 0.0 {
            ((1.0 - available) / self.config.refill_rate * 1000.0).ceil() as u64
        } else {
            u64::MAX
        };

        TokenBucketStatus {
            capacity: self.config.capacity,
            available,
            refill_rate: self.config.refill_rate,
            next_token_in_ms,
        }
    }

    pub fn reset(&self, key: &str) {
        self.buckets.lock().remove(key);
    }

    pub fn key_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Drop buckets that have refilled to capacity; a fresh bucket is identical.
    pub fn cleanup_idle(&self) -> usize {
        self.cleanup_idle_at(Utc::now())
    }

    pub fn cleanup_idle_at(&self, now: DateTime<Utc>) -> usize {
        let capacity = self.capacity();
        let refill_rate = self.config.refill_rate;
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.refill(now, capacity, refill_rate);
            bucket.tokens < capacity
        });
        before - buckets.len()
    }
}

fn evict_least_recent(buckets: &mut HashMap<String, Bucket>) {
    let oldest = buckets
        .iter()
        .min_by_key(|(_, b)| b.last_refill)
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        tracing::debug!("token_bucket_evicted: key={}", key);
        buckets.remove(&key);
    }
}

impl fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .field("keys", &self.key_count())
            .finish_non_exhaustive()
    }
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new(TokenBucketConfig::default())
    }
}
