//! Background maintenance for long-running kernels.
//!
//! MaintenanceService periodically:
//! - Drops sliding-window keys whose whole window is stale
//! - Drops token buckets that have refilled to capacity
//! - Rotates the signing secret once the rotation interval has passed
//! - Evicts retired secrets past their expiry
//!
//! Every phase is optional; the service only touches what it was given.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::rate_limiter::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::credentials::CredentialManager;

/// Configuration for the maintenance loop.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often a cycle runs.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub interval: Duration,

    /// Rotate the signing secret when due.
    pub rotate_secrets: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            rotate_secrets: true,
        }
    }
}

/// Statistics from one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    /// Stale sliding-window keys removed
    pub rate_windows_cleaned: usize,
    /// Full token buckets removed
    pub buckets_cleaned: usize,
    /// 1 when the signing secret was rotated
    pub secrets_rotated: usize,
    /// Retired, expired secrets evicted
    pub secrets_removed: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct Targets {
    rate_limiter: Option<Arc<SlidingWindowLimiter>>,
    token_bucket: Option<Arc<TokenBucketLimiter>>,
    credentials: Option<Arc<CredentialManager>>,
}

/// Handles the periodic sweep.
#[derive(Debug)]
pub struct MaintenanceService {
    config: MaintenanceConfig,
    targets: Targets,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl MaintenanceService {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            config,
            targets: Targets::default(),
            stop_tx: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<SlidingWindowLimiter>) -> Self {
        self.targets.rate_limiter = Some(limiter);
        self
    }

    pub fn with_token_bucket(mut self, limiter: Arc<TokenBucketLimiter>) -> Self {
        self.targets.token_bucket = Some(limiter);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialManager>) -> Self {
        self.targets.credentials = Some(credentials);
        self
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Start the loop in the background and return immediately.
    ///
    /// The first cycle runs right away. Calling `start` again stops the
    /// previous loop first.
    pub fn start(&mut self) -> JoinHandle<()> {
        self.stop();

        let targets = self.targets.clone();
        let config = self.config.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_cycle_with(&targets, &config, Utc::now());
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("maintenance_service_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run a single cycle now.
    pub fn run_cycle(&self) -> MaintenanceStats {
        self.run_cycle_at(Utc::now())
    }

    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> MaintenanceStats {
        Self::run_cycle_with(&self.targets, &self.config, now)
    }

    fn run_cycle_with(
        targets: &Targets,
        config: &MaintenanceConfig,
        now: DateTime<Utc>,
    ) -> MaintenanceStats {
        let mut stats = MaintenanceStats::default();

        if let Some(limiter) = &targets.rate_limiter {
            stats.rate_windows_cleaned = limiter.cleanup_expired_at(now);
        }

        if let Some(limiter) = &targets.token_bucket {
            stats.buckets_cleaned = limiter.cleanup_idle_at(now);
        }

        if let Some(credentials) = &targets.credentials {
            // An uninitialized manager is left alone; rotation would silently
            // create its first secret.
            if config.rotate_secrets
                && credentials.active_secret_id().is_some()
                && credentials.rotate_if_due_at(now).is_some()
            {
                stats.secrets_rotated = 1;
            }
            stats.secrets_removed = credentials.remove_expired_at(now);
        }

        stats.completed_at = Some(now);
        tracing::debug!(
            "maintenance_cycle_completed: rate_windows={}, buckets={}, rotated={}, secrets_removed={}",
            stats.rate_windows_cleaned,
            stats.buckets_cleaned,
            stats.secrets_rotated,
            stats.secrets_removed,
        );
        stats
    }
}

impl Drop for MaintenanceService {
    fn drop(&mut self) {
        self.stop();
    }
}
