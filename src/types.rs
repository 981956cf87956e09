//! Core identifier types for the office session hub
//!
//! Sessions, agents and tasks are all identified by opaque strings supplied
//! by the event producer. Wrapping them in newtypes prevents mixing an agent
//! id with a session id at a call site.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw id. Emptiness is checked by the event validator,
            /// not here.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Opaque session identifier assigned by the producer
    SessionId
);
string_id!(
    /// Agent identifier, unique within a session
    AgentId
);
string_id!(
    /// Todo or background task identifier
    TaskId
);

/// Id of the main agent every session starts with
pub const BOSS_AGENT_ID: &str = "main";

impl AgentId {
    /// The session's main ("boss") agent
    pub fn boss() -> Self {
        Self::new(BOSS_AGENT_ID)
    }
}
