//! Core enumerations for envelopes and dispatch.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message category. Fixed at construction and fully determines dispatch semantics.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageCategory {
    /// May mutate actor state and emit events; failures propagate.
    #[default]
    Command,
    /// Read-only; never emits events; failures propagate.
    Query,
    /// Fire-and-forget; failures are logged, never propagated.
    Notification,
}

impl MessageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageCategory::Command => "command",
            MessageCategory::Query => "query",
            MessageCategory::Notification => "notification",
        }
    }

    /// Whether handler and validation errors reach the dispatch caller.
    pub fn propagates_errors(self) -> bool {
        !matches!(self, MessageCategory::Notification)
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a recorded metric relative to the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    Produced,
    Consumed,
}
