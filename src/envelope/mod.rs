//! Message envelope - a validated, categorized event on its way to an actor.
//!
//! Raw events arrive in the JSON wire shape
//! `{type, payload, metadata?: {id, category, correlationId, ...}}` and are
//! wrapped into a [`Message`] once their category is known. The category is
//! fixed at construction; everything downstream (authorization, validation
//! strictness, which handler runs, whether errors propagate) keys off it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CorrelationId, MessageId};

pub mod enums;

pub use enums::*;

/// Retry budget for messages that do not carry one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Optional envelope metadata carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<MessageCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<MessageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_actor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Inbound event before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default = "empty_object")]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Classified message envelope.
///
/// Serializes to the same wire shape it was read from, with every metadata
/// field populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "RawEvent")]
pub struct Message {
    id: MessageId,
    event_type: String,
    payload: Value,
    category: MessageCategory,
    correlation_id: CorrelationId,
    causation_id: Option<MessageId>,
    timestamp: DateTime<Utc>,
    produced_by: Option<String>,
    target_actor: Option<String>,
    retry_count: u32,
    max_retries: u32,
}

impl Message {
    /// Wrap a payload into a fresh envelope that starts its own correlation chain.
    pub fn new(event_type: impl Into<String>, payload: Value, category: MessageCategory) -> Self {
        let id = MessageId::new();
        let correlation_id = CorrelationId::from(&id);
        Self {
            id,
            event_type: event_type.into(),
            payload,
            category,
            correlation_id,
            causation_id: None,
            timestamp: Utc::now(),
            produced_by: None,
            target_actor: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Wrap a raw event, keeping whatever metadata it already carries.
    ///
    /// `category` is the resolved category; a category in the raw metadata is
    /// only a hint for the classifier and is not consulted here.
    pub fn from_wire(raw: RawEvent, category: MessageCategory) -> Self {
        let meta = raw.metadata.unwrap_or_default();
        let id = meta.id.unwrap_or_default();
        let correlation_id = meta
            .correlation_id
            .unwrap_or_else(|| CorrelationId::from(&id));
        Self {
            id,
            event_type: raw.event_type,
            payload: raw.payload,
            category,
            correlation_id,
            causation_id: meta.causation_id,
            timestamp: meta.timestamp.unwrap_or_else(Utc::now),
            produced_by: meta.produced_by,
            target_actor: meta.target_actor,
            retry_count: meta.retry_count.unwrap_or(0),
            max_retries: meta.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }

    pub fn to_wire(&self) -> RawEvent {
        RawEvent {
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            metadata: Some(MessageMetadata {
                id: Some(self.id.clone()),
                category: Some(self.category),
                correlation_id: Some(self.correlation_id.clone()),
                causation_id: self.causation_id.clone(),
                timestamp: Some(self.timestamp),
                produced_by: self.produced_by.clone(),
                target_actor: self.target_actor.clone(),
                retry_count: Some(self.retry_count),
                max_retries: Some(self.max_retries),
            }),
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_target(mut self, actor: impl Into<String>) -> Self {
        self.target_actor = Some(actor.into());
        self
    }

    pub fn with_producer(mut self, actor: impl Into<String>) -> Self {
        self.produced_by = Some(actor.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Join the parent's correlation chain, recording the parent as cause.
    pub fn caused_by(mut self, parent: &Message) -> Self {
        self.correlation_id = parent.correlation_id.clone();
        self.causation_id = Some(parent.id.clone());
        self
    }

    /// Next delivery attempt, or `None` once the retry budget is spent.
    ///
    /// The attempt is a new envelope instance (fresh id and timestamp) in the
    /// same correlation chain.
    pub fn retry(&self) -> Option<Message> {
        if !self.can_retry() {
            return None;
        }
        let mut next = self.clone();
        next.id = MessageId::new();
        next.timestamp = Utc::now();
        next.retry_count += 1;
        Some(next)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn category(&self) -> MessageCategory {
        self.category
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&MessageId> {
        self.causation_id.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn produced_by(&self) -> Option<&str> {
        self.produced_by.as_deref()
    }

    pub fn target_actor(&self) -> Option<&str> {
        self.target_actor.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl From<Message> for RawEvent {
    fn from(message: Message) -> Self {
        message.to_wire()
    }
}
