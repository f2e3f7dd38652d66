//! Kernel - the reusable protection and admission layer every actor depends on.
//!
//! The Kernel bundles one dispatcher, one sliding-window limiter, one token
//! bucket and one credential manager built from a single [`Config`], and
//! hands out circuit breakers per protected operation. Each subsystem is a
//! plain struct behind an `Arc`; none of them runs its own task except the
//! optional [`MaintenanceService`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub mod circuit_breaker;
pub mod cleanup;
pub mod rate_limiter;
pub mod recovery;
pub mod token_bucket;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use cleanup::{MaintenanceConfig, MaintenanceService, MaintenanceStats};
pub use rate_limiter::{
    key_by_producer, KeyGenerator, RateLimitStatus, SlidingWindowConfig, SlidingWindowLimiter,
};
pub use recovery::with_recovery_async;
pub use token_bucket::{TokenBucketConfig, TokenBucketLimiter, TokenBucketStatus};

use crate::credentials::CredentialManager;
use crate::dispatch::{DispatchGuards, Dispatcher};
use crate::registry::EventRegistry;
use crate::types::{Config, Result};

/// Wired kernel components.
#[derive(Debug)]
pub struct Kernel {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<SlidingWindowLimiter>,
    token_bucket: Arc<TokenBucketLimiter>,
    credentials: Arc<CredentialManager>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Kernel {
    /// Validate `config` and build every component.
    ///
    /// Without a registry the dispatcher runs in skip-validation mode. The
    /// credential manager is initialized with the configured seed (or random
    /// material).
    pub fn new(config: Config, registry: Option<Arc<dyn EventRegistry>>) -> Result<Self> {
        config.validate()?;

        let dispatcher = match registry {
            Some(registry) => Dispatcher::new(registry, config.dispatcher.clone()),
            None => Dispatcher::without_registry(config.dispatcher.clone()),
        };
        let credentials = CredentialManager::new(config.credentials.clone())?;
        credentials.initialize(None);

        tracing::info!(
            "kernel_started: registry={} default_category={}",
            dispatcher.registry().is_some(),
            config.dispatcher.default_category
        );

        Ok(Self {
            rate_limiter: Arc::new(SlidingWindowLimiter::new(config.rate_limiter.clone())),
            token_bucket: Arc::new(TokenBucketLimiter::new(config.token_bucket.clone())),
            dispatcher: Arc::new(dispatcher),
            credentials: Arc::new(credentials),
            breakers: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn rate_limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.rate_limiter
    }

    pub fn token_bucket(&self) -> &Arc<TokenBucketLimiter> {
        &self.token_bucket
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Breaker for the operation `name`, created on first use with the
    /// configured defaults. The same name always yields the same breaker.
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.config.circuit_breaker.clone()))
            })
            .clone()
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<CircuitBreakerSnapshot> = self
            .breakers
            .lock()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Guards combining the breaker for `operation` with both shared limiters.
    pub fn guards(&self, operation: &str) -> DispatchGuards {
        DispatchGuards::none()
            .with_circuit_breaker(self.circuit_breaker(operation))
            .with_rate_limiter(self.rate_limiter.clone())
            .with_token_bucket(self.token_bucket.clone())
    }

    /// Maintenance service over this kernel's limiters and credentials.
    /// Not started.
    pub fn maintenance(&self) -> MaintenanceService {
        MaintenanceService::new(self.config.maintenance.clone())
            .with_rate_limiter(self.rate_limiter.clone())
            .with_token_bucket(self.token_bucket.clone())
            .with_credentials(self.credentials.clone())
    }
}
