//! Actor handler contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Message, RawEvent};
use crate::types::Result;

/// What a handler returns: a result value plus any events it emits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutput {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

impl HandlerOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            events: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: RawEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// An independently deployable business module.
///
/// One handler per message category. Only events listed in
/// [`consumes`](Actor::consumes) are ever delivered to an actor.
#[async_trait]
pub trait Actor: Send + Sync {
    fn id(&self) -> &str;

    /// Event types this actor accepts.
    fn consumes(&self) -> &[String];

    fn handles(&self, event_type: &str) -> bool {
        self.consumes().iter().any(|e| e == event_type)
    }

    /// May mutate state and emit events.
    async fn handle_command(&self, message: &Message) -> Result<HandlerOutput>;

    /// Read-only. Emitted events are discarded by the dispatcher.
    async fn handle_query(&self, message: &Message) -> Result<HandlerOutput>;

    /// Fire-and-forget. Defaults to the command handler.
    async fn handle_notification(&self, message: &Message) -> Result<HandlerOutput> {
        self.handle_command(message).await
    }
}
