//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// With a `uuid` prefix literal it also generates `new()` and `Default`.
macro_rules! define_id {
    ($name:ident, uuid = $prefix:literal) => {
        define_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!(
                    "{}{}",
                    $prefix,
                    uuid::Uuid::new_v4().simple()
                ))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(MessageId, uuid = "msg_");
define_id!(CorrelationId, uuid = "cor_");
define_id!(SecretId, uuid = "key_");

impl From<&MessageId> for CorrelationId {
    /// A message that starts a conversation correlates to itself.
    fn from(id: &MessageId) -> Self {
        Self(id.0.clone())
    }
}
