//! Message dispatcher - classifies raw events and delivers them to actors.
//!
//! Every dispatch runs the same pipeline, with behaviour keyed off the
//! message category:
//!
//! | step | Command / Query | Notification |
//! |---|---|---|
//! | actor does not consume the type | `NotHandled` error | `{ignored: true}` success |
//! | payload fails its schema | `ValidationFailed` error | warn and proceed |
//! | handler | command / query handler | notification handler |
//! | emitted events | propagated (queries: always dropped) | propagated |
//! | handler error | propagated | logged, `{success: false}` |
//!
//! Exactly one outcome metric is recorded per dispatch, on every path.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::envelope::{Message, MessageCategory, MetricDirection, RawEvent};
use crate::kernel::circuit_breaker::CircuitBreaker;
use crate::kernel::rate_limiter::SlidingWindowLimiter;
use crate::kernel::recovery::with_recovery_async;
use crate::kernel::token_bucket::TokenBucketLimiter;
use crate::registry::{EventRegistry, MetricEntry};
use crate::types::{Error, Result};

mod actor;

pub use actor::{Actor, HandlerOutput};

// =============================================================================
// Configuration & results
// =============================================================================

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Category used when neither the registry nor the event metadata names one.
    pub default_category: MessageCategory,

    /// Dispatched messages kept for inspection (0 disables the log).
    pub history_capacity: usize,

    /// Validate payloads against the registry schema.
    pub validate_payloads: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_category: MessageCategory::Command,
            history_capacity: 1000,
            validate_payloads: true,
        }
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub success: bool,
    pub result: Value,
    /// Child messages built from the handler's emitted events.
    pub events: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn succeeded(result: Value, events: Vec<Message>) -> Self {
        Self {
            success: true,
            result,
            events,
            ..Self::default()
        }
    }

    /// Notification delivered to an actor that does not consume it.
    pub fn ignored() -> Self {
        Self {
            success: true,
            result: json!({ "ignored": true }),
            ignored: true,
            ..Self::default()
        }
    }

    /// Shielded notification failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Optional per-call protection supplied by the calling actor.
#[derive(Debug, Clone, Default)]
pub struct DispatchGuards {
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub rate_limiter: Option<Arc<SlidingWindowLimiter>>,
    pub token_bucket: Option<Arc<TokenBucketLimiter>>,
}

impl DispatchGuards {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<SlidingWindowLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_token_bucket(mut self, limiter: Arc<TokenBucketLimiter>) -> Self {
        self.token_bucket = Some(limiter);
        self
    }

    fn admit(&self, message: &Message) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.allow_message(message) {
                return Err(Error::rate_limited(format!(
                    "request window exhausted for {}",
                    message.event_type()
                )));
            }
        }
        if let Some(limiter) = &self.token_bucket {
            if !limiter.allow_message(message) {
                return Err(Error::rate_limited(format!(
                    "token bucket empty for {}",
                    message.event_type()
                )));
            }
        }
        Ok(())
    }
}

/// Dispatch counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub commands_dispatched: u64,
    pub queries_dispatched: u64,
    pub notifications_dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub ignored: u64,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes messages to registered actors.
///
/// The registry is an explicit dependency; without one the dispatcher runs in
/// skip-validation mode and classifies by metadata or the default category.
pub struct Dispatcher {
    registry: Option<Arc<dyn EventRegistry>>,
    config: DispatcherConfig,
    actors: Arc<RwLock<HashMap<String, Arc<dyn Actor>>>>,
    history: Arc<RwLock<VecDeque<Message>>>,
    stats: Arc<RwLock<DispatchStats>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn EventRegistry>, config: DispatcherConfig) -> Self {
        Self::build(Some(registry), config)
    }

    /// Dispatcher with no registry: no validation, no metrics.
    pub fn without_registry(config: DispatcherConfig) -> Self {
        Self::build(None, config)
    }

    fn build(registry: Option<Arc<dyn EventRegistry>>, config: DispatcherConfig) -> Self {
        Self {
            registry,
            config,
            actors: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(DispatchStats::default())),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> Option<&Arc<dyn EventRegistry>> {
        self.registry.as_ref()
    }

    // =========================================================================
    // Actors
    // =========================================================================

    /// Register an actor under its id. Returns the actor it replaced, if any.
    pub async fn register_actor(&self, actor: Arc<dyn Actor>) -> Option<Arc<dyn Actor>> {
        let id = actor.id().to_string();
        tracing::debug!("Registered actor: {}", id);
        self.actors.write().await.insert(id, actor)
    }

    pub async fn unregister_actor(&self, actor_id: &str) -> Option<Arc<dyn Actor>> {
        tracing::debug!("Unregistered actor: {}", actor_id);
        self.actors.write().await.remove(actor_id)
    }

    pub async fn actor(&self, actor_id: &str) -> Option<Arc<dyn Actor>> {
        self.actors.read().await.get(actor_id).cloned()
    }

    pub async fn actor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Wrap a raw event into a message.
    ///
    /// Category precedence: registry definition, then the category carried in
    /// the event metadata, then the configured default.
    pub async fn classify(&self, raw: RawEvent) -> Message {
        let registered = match &self.registry {
            Some(registry) => registry
                .get_definition(&raw.event_type)
                .await
                .map(|definition| definition.category),
            None => None,
        };
        let category = registered
            .or_else(|| raw.metadata.as_ref().and_then(|m| m.category))
            .unwrap_or(self.config.default_category);
        Message::from_wire(raw, category)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch `message` to `actor` without guards.
    pub async fn dispatch(&self, message: Message, actor: Arc<dyn Actor>) -> Result<DispatchOutcome> {
        self.dispatch_guarded(message, actor, &DispatchGuards::none())
            .await
    }

    /// Dispatch `message` to `actor`, wrapping the handler in `guards`.
    ///
    /// Notifications never return `Err`.
    pub async fn dispatch_guarded(
        &self,
        message: Message,
        actor: Arc<dyn Actor>,
        guards: &DispatchGuards,
    ) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let category = message.category();
        self.remember(&message).await;

        let result = self.process(&message, &actor, guards).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (success, error_message) = match &result {
            Ok(outcome) => (outcome.success, outcome.error.clone()),
            Err(err) => (false, Some(err.to_string())),
        };
        self.record_metric(&message, actor.id(), success, duration_ms, error_message)
            .await;

        let result = match result {
            Err(err) if !category.propagates_errors() => {
                tracing::warn!(
                    "notification_failed: event_type={} actor={} error={}",
                    message.event_type(),
                    actor.id(),
                    err
                );
                Ok(DispatchOutcome::failed(err.to_string()))
            }
            other => other,
        };

        self.count(category, &result).await;
        result
    }

    async fn process(
        &self,
        message: &Message,
        actor: &Arc<dyn Actor>,
        guards: &DispatchGuards,
    ) -> Result<DispatchOutcome> {
        let event_type = message.event_type();
        let category = message.category();

        if !actor.handles(event_type) {
            if category.propagates_errors() {
                return Err(Error::not_handled(event_type, actor.id()));
            }
            tracing::debug!(
                "notification_ignored: event_type={} actor={}",
                event_type,
                actor.id()
            );
            return Ok(DispatchOutcome::ignored());
        }

        if let (true, Some(registry)) = (self.config.validate_payloads, &self.registry) {
            let report = registry.validate_payload(event_type, message.payload()).await;
            if !report.valid {
                if category.propagates_errors() {
                    return Err(Error::validation_failed(event_type, report.errors));
                }
                tracing::warn!(
                    "notification_payload_invalid: event_type={} actor={} errors={}",
                    event_type,
                    actor.id(),
                    report.errors.join("; ")
                );
            }
        }

        guards.admit(message)?;

        let handler = invoke(Arc::clone(actor), message.clone());
        let output = match &guards.circuit_breaker {
            Some(breaker) => breaker.execute(move || handler).await?,
            None => handler.await?,
        };

        if category == MessageCategory::Query {
            if !output.events.is_empty() {
                tracing::debug!(
                    "query_events_dropped: event_type={} actor={} count={}",
                    event_type,
                    actor.id(),
                    output.events.len()
                );
            }
            return Ok(DispatchOutcome::succeeded(output.result, Vec::new()));
        }

        let mut events = Vec::with_capacity(output.events.len());
        for raw in output.events {
            let child = self
                .classify(raw)
                .await
                .caused_by(message)
                .with_producer(actor.id());
            events.push(child);
        }
        Ok(DispatchOutcome::succeeded(output.result, events))
    }

    async fn record_metric(
        &self,
        message: &Message,
        actor_id: &str,
        success: bool,
        duration_ms: u64,
        error_message: Option<String>,
    ) {
        let Some(registry) = &self.registry else {
            return;
        };
        registry
            .record_metric(MetricEntry {
                event_name: message.event_type().to_string(),
                actor_id: actor_id.to_string(),
                direction: MetricDirection::Consumed,
                success,
                duration_ms,
                error_message,
                correlation_id: message.correlation_id().clone(),
                recorded_at: Utc::now(),
            })
            .await;
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Deliver to a single actor: the message's target, else the first consumer.
    pub async fn send(&self, message: Message, guards: &DispatchGuards) -> Result<DispatchOutcome> {
        let target = match message.target_actor() {
            Some(id) => self.actor(id).await,
            None => self.consumers_of(message.event_type()).await.into_iter().next(),
        };

        match target {
            Some(actor) => self.dispatch_guarded(message, actor, guards).await,
            None if !message.category().propagates_errors() => {
                tracing::debug!("notification_unrouted: event_type={}", message.event_type());
                Ok(DispatchOutcome::ignored())
            }
            None => Err(Error::not_handled(
                message.event_type(),
                message.target_actor().unwrap_or("<no consumer>"),
            )),
        }
    }

    /// Classify a raw event and [`send`](Self::send) it.
    pub async fn receive(&self, raw: RawEvent, guards: &DispatchGuards) -> Result<DispatchOutcome> {
        let message = self.classify(raw).await;
        self.send(message, guards).await
    }

    /// Fan a message out to every registered consumer of its type.
    ///
    /// Each consumer receives a copy targeted at it; results are returned per
    /// actor id in delivery order.
    pub async fn publish(
        &self,
        message: Message,
        guards: &DispatchGuards,
    ) -> Vec<(String, Result<DispatchOutcome>)> {
        let consumers = self.consumers_of(message.event_type()).await;
        let mut results = Vec::with_capacity(consumers.len());

        for actor in consumers {
            let id = actor.id().to_string();
            let copy = message.clone().with_target(id.clone());
            results.push((id, self.dispatch_guarded(copy, actor, guards).await));
        }

        tracing::debug!(
            "Published event type={} to {} consumers",
            message.event_type(),
            results.len()
        );
        results
    }

    /// Registry consumer list restricted to registered actors; without a
    /// registry, every actor that consumes the type (ordered by id).
    async fn consumers_of(&self, event_type: &str) -> Vec<Arc<dyn Actor>> {
        match &self.registry {
            Some(registry) => {
                let ids = registry.get_consumers(event_type).await;
                let actors = self.actors.read().await;
                ids.iter().filter_map(|id| actors.get(id).cloned()).collect()
            }
            None => {
                let actors = self.actors.read().await;
                let mut matching: Vec<Arc<dyn Actor>> = actors
                    .values()
                    .filter(|actor| actor.handles(event_type))
                    .cloned()
                    .collect();
                matching.sort_by(|a, b| a.id().cmp(b.id()));
                matching
            }
        }
    }

    // =========================================================================
    // History & statistics
    // =========================================================================

    async fn remember(&self, message: &Message) {
        if self.config.history_capacity == 0 {
            return;
        }
        let mut history = self.history.write().await;
        if history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(message.clone());
    }

    /// The most recent `limit` dispatched messages, oldest first.
    pub async fn recent_messages(&self, limit: usize) -> Vec<Message> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    async fn count(&self, category: MessageCategory, result: &Result<DispatchOutcome>) {
        let mut stats = self.stats.write().await;
        match category {
            MessageCategory::Command => stats.commands_dispatched += 1,
            MessageCategory::Query => stats.queries_dispatched += 1,
            MessageCategory::Notification => stats.notifications_dispatched += 1,
        }
        match result {
            Ok(outcome) if outcome.ignored => stats.ignored += 1,
            Ok(outcome) if outcome.success => stats.succeeded += 1,
            _ => stats.failed += 1,
        }
    }

    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = DispatchStats::default();
    }
}

/// Owned handler future, so it can run on a breaker task.
fn invoke(
    actor: Arc<dyn Actor>,
    message: Message,
) -> impl Future<Output = Result<HandlerOutput>> + Send + 'static {
    async move {
        let operation = format!("{}:{}", actor.id(), message.event_type());
        let handler = async {
            match message.category() {
                MessageCategory::Command => actor.handle_command(&message).await,
                MessageCategory::Query => actor.handle_query(&message).await,
                MessageCategory::Notification => actor.handle_notification(&message).await,
            }
        };
        with_recovery_async(handler, &operation).await
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("has_registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
