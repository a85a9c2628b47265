//! Gadget event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::gadget::FunctionSet;

/// Gadget event enumeration
///
/// Serialized as `{ "event": "gadget.functions_applied", "data": { ... } }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// A function change request was accepted
    #[serde(rename = "gadget.functions_changing")]
    FunctionsChanging { functions: FunctionSet },

    /// Applied state changed (pull-up confirmed or FunctionFS daemon went away)
    #[serde(rename = "gadget.functions_applied")]
    FunctionsApplied {
        functions: FunctionSet,
        applied: bool,
    },

    /// A function change request failed
    #[serde(rename = "gadget.functions_failed")]
    FunctionsFailed {
        functions: FunctionSet,
        reason: String,
    },

    /// Gadget was reset (pulled down and up again)
    #[serde(rename = "gadget.reset")]
    GadgetReset,

    /// Error notification
    #[serde(rename = "error")]
    Error { message: String },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::FunctionsChanging { .. } => "gadget.functions_changing",
            Self::FunctionsApplied { .. } => "gadget.functions_applied",
            Self::FunctionsFailed { .. } => "gadget.functions_failed",
            Self::GadgetReset => "gadget.reset",
            Self::Error { .. } => "error",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// `*` matches everything, `gadget.*` matches a prefix.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
