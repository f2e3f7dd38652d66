//! Core types for the actor kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (MessageId, CorrelationId, SecretId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration for every kernel component

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig};
pub use errors::{CredentialError, Error, Result};
pub use ids::{CorrelationId, MessageId, SecretId};
