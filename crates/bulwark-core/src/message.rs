//! Plain-language messages for handled errors.

use serde::{Deserialize, Serialize};

use crate::errors::Severity;

/// What the user is told about a handled error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Severity-tiered headline
    pub summary: String,

    /// Whether automatic recovery worked
    pub recovery_note: String,

    /// Suggested next step
    pub next_step: String,
}

impl UserMessage {
    /// Render as a single paragraph.
    pub fn render(&self) -> String {
        format!("{} {} {}", self.summary, self.recovery_note, self.next_step)
    }
}

/// Facts the message is built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFacts {
    pub recovered: bool,
    pub queued_offline: bool,
    pub fallback_available: bool,
}

/// Build the user-facing message for a handled error.
pub fn user_message(severity: Severity, facts: MessageFacts) -> UserMessage {
    let summary = match severity {
        Severity::Critical => "A critical error occurred and some data may be at risk.",
        Severity::High => "A serious problem interrupted this action.",
        Severity::Medium => "Something went wrong with this request.",
        Severity::Low => "A small problem occurred.",
    };

    let recovery_note = if facts.queued_offline {
        "You appear to be offline, so the action was saved and will run when the connection returns."
    } else if facts.recovered {
        "It was recovered automatically."
    } else {
        "Automatic recovery did not succeed."
    };

    let next_step = if facts.recovered || facts.queued_offline {
        "No action is needed."
    } else if severity == Severity::Critical {
        "Please save your work, restart the application and contact support if it happens again."
    } else if facts.fallback_available {
        "Please try again; another provider is available."
    } else {
        "Please check your connection and provider settings, then try again."
    };

    UserMessage {
        summary: summary.to_string(),
        recovery_note: recovery_note.to_string(),
        next_step: next_step.to_string(),
    }
}
