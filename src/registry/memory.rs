//! In-process registry backed by compiled JSON Schemas.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{EventDefinition, EventRegistry, MetricEntry, ValidationReport};
use crate::types::{Error, Result};

/// Default number of metric entries retained for inspection.
const DEFAULT_METRIC_CAPACITY: usize = 10_000;

struct RegisteredEvent {
    definition: EventDefinition,
    validator: Arc<jsonschema::Validator>,
}

impl fmt::Debug for RegisteredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredEvent")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Registry that keeps definitions, consumers and metrics in memory.
///
/// Schemas are compiled once at registration so malformed schemas are
/// rejected up front instead of at dispatch time.
#[derive(Debug)]
pub struct InMemoryRegistry {
    definitions: RwLock<HashMap<String, RegisteredEvent>>,
    consumers: RwLock<HashMap<String, Vec<String>>>,
    metrics: RwLock<VecDeque<MetricEntry>>,
    metric_capacity: usize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::with_metric_capacity(DEFAULT_METRIC_CAPACITY)
    }

    pub fn with_metric_capacity(metric_capacity: usize) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            consumers: RwLock::new(HashMap::new()),
            metrics: RwLock::new(VecDeque::new()),
            metric_capacity: metric_capacity.max(1),
        }
    }

    /// Register (or replace) an event definition.
    pub async fn register(&self, definition: EventDefinition) -> Result<()> {
        let validator = jsonschema::validator_for(&definition.payload_schema).map_err(|e| {
            Error::config(format!(
                "invalid payload schema for {}: {}",
                definition.name, e
            ))
        })?;

        tracing::debug!(
            "Registered event definition name={} category={} version={}",
            definition.name,
            definition.category,
            definition.version
        );

        self.definitions.write().await.insert(
            definition.name.clone(),
            RegisteredEvent {
                definition,
                validator: Arc::new(validator),
            },
        );
        Ok(())
    }

    /// Declare `actor_id` as a consumer of `event_type`.
    pub async fn add_consumer(&self, event_type: &str, actor_id: &str) {
        let mut consumers = self.consumers.write().await;
        let entry = consumers.entry(event_type.to_string()).or_default();
        if !entry.iter().any(|c| c == actor_id) {
            entry.push(actor_id.to_string());
        }
    }

    pub async fn remove_consumer(&self, event_type: &str, actor_id: &str) {
        if let Some(entry) = self.consumers.write().await.get_mut(event_type) {
            entry.retain(|c| c != actor_id);
        }
    }

    /// Snapshot of recorded metrics, oldest first.
    pub async fn metrics(&self) -> Vec<MetricEntry> {
        self.metrics.read().await.iter().cloned().collect()
    }

    pub async fn clear_metrics(&self) {
        self.metrics.write().await.clear();
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRegistry for InMemoryRegistry {
    async fn get_definition(&self, event_type: &str) -> Option<EventDefinition> {
        self.definitions
            .read()
            .await
            .get(event_type)
            .map(|r| r.definition.clone())
    }

    async fn get_consumers(&self, event_type: &str) -> Vec<String> {
        self.consumers
            .read()
            .await
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    async fn validate_payload(&self, event_type: &str, payload: &Value) -> ValidationReport {
        let validator = match self.definitions.read().await.get(event_type) {
            Some(registered) => registered.validator.clone(),
            None => {
                return ValidationReport::invalid(vec![format!(
                    "no definition registered for {}",
                    event_type
                )])
            }
        };

        let errors: Vec<String> = validator
            .iter_errors(payload)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{}: {}", path, err)
                }
            })
            .collect();

        if errors.is_empty() {
            ValidationReport::valid()
        } else {
            ValidationReport::invalid(errors)
        }
    }

    async fn record_metric(&self, entry: MetricEntry) {
        let mut metrics = self.metrics.write().await;
        if metrics.len() >= self.metric_capacity {
            metrics.pop_front();
        }
        metrics.push_back(entry);
    }
}
