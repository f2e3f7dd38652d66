//! # Actor Kernel - shared runtime for message-driven business actors
//!
//! Independent actors (authentication, billing, notifications) talk through
//! typed messages. This crate is the small kernel they all reuse:
//! - Message envelopes classified as Command / Query / Notification
//! - A dispatcher that validates payloads against an event registry, invokes
//!   actor handlers and records one outcome metric per dispatch
//! - Circuit breakers for flaky downstream operations
//! - Sliding-window and token-bucket rate limiters
//! - A credential manager that issues, rotates and verifies signed sessions
//!
//! ## Architecture
//!
//! ```text
//!   RawEvent ─► classify ─► Message ─► Dispatcher ──► Actor handler
//!                  ▲                      │  ▲            │
//!                  │                      │  └─ guards ───┘
//!             EventRegistry ◄── metric ───┘  (breaker, limiters)
//! ```
//!
//! Every component is passive and process-local; [`kernel::Kernel`] wires
//! them from one [`Config`].

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod credentials;
pub mod dispatch;
pub mod envelope;
pub mod kernel;
pub mod registry;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use credentials::{Claims, CredentialConfig, CredentialManager};
pub use dispatch::{Actor, DispatchGuards, DispatchOutcome, Dispatcher, HandlerOutput};
pub use envelope::{Message, MessageCategory, RawEvent};
pub use kernel::Kernel;
pub use registry::{EventDefinition, EventRegistry, InMemoryRegistry};
pub use types::{Config, CredentialError, Error, Result};
