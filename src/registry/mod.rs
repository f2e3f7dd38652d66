//! Event-definition registry collaborator.
//!
//! The registry owns event definitions (payload schema, category, producer)
//! and consumer lists, and accepts outcome metrics. The kernel only reads
//! definitions; it never mutates them. Dispatchers take the registry as an
//! explicit constructor dependency so several isolated runtimes can live in
//! one process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{MessageCategory, MetricDirection};
use crate::types::CorrelationId;

mod memory;

pub use memory::InMemoryRegistry;

/// Registered event type, consumed read-only by the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub name: String,
    pub category: MessageCategory,
    /// JSON Schema for the payload.
    pub payload_schema: Value,
    pub producer_actor: String,
    pub version: String,
}

/// Result of validating a payload against its definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Outcome metric recorded once per dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub event_name: String,
    pub actor_id: String,
    pub direction: MetricDirection,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub correlation_id: CorrelationId,
    pub recorded_at: DateTime<Utc>,
}

/// Registry collaborator interface.
///
/// Calls may suspend (the registry can be I/O-bound); implementations must
/// be safe to share across tasks.
#[async_trait]
pub trait EventRegistry: Send + Sync {
    async fn get_definition(&self, event_type: &str) -> Option<EventDefinition>;

    async fn get_consumers(&self, event_type: &str) -> Vec<String>;

    async fn validate_payload(&self, event_type: &str, payload: &Value) -> ValidationReport;

    async fn record_metric(&self, entry: MetricEntry);
}
