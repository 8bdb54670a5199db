//! Edit-capture boundary: change events and workstation identity.
//!
//! The editor glue observes document mutations and turns each one into a
//! [`ChangeEvent`] — the payload of a `change` wire frame. This module does
//! not hook any editor itself; it only shapes what the hooks produce.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Where the edits come from: the editor flavor plus the machine name.
///
/// Resolved once at startup and reused for every change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workstation {
    /// Editor/platform label supplied by the embedding plugin.
    pub environment: String,
    /// OS hostname, or `"Unknown-Computer"` when it cannot be resolved.
    pub computer_name: String,
}

impl Workstation {
    pub fn new(environment: impl Into<String>, computer_name: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            computer_name: computer_name.into(),
        }
    }

    /// Resolve the computer name from the OS hostname.
    pub fn detect(environment: impl Into<String>) -> Self {
        let computer_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "Unknown-Computer".to_string());
        Self::new(environment, computer_name)
    }
}

impl Default for Workstation {
    fn default() -> Self {
        Self::detect("Unknown")
    }
}

/// Zero-based line/character span of a single edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditRange {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

impl EditRange {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start_line,
            start_character,
            end_line,
            end_character,
        }
    }
}

/// One code edit, shaped exactly like the `data` object of a `change` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub document_uri: String,
    /// ISO-8601 UTC, millisecond precision, `Z` suffix.
    pub timestamp: String,
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
    /// The inserted/replacement text. May be empty (pure deletion).
    pub text: String,
    pub environment: String,
    pub computer_name: String,
}

impl ChangeEvent {
    /// Record an edit happening now.
    pub fn record(
        document_uri: impl Into<String>,
        range: EditRange,
        text: impl Into<String>,
        workstation: &Workstation,
    ) -> Self {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        Self::with_timestamp(document_uri, timestamp, range, text, workstation)
    }

    /// Record an edit with an explicit timestamp (replays, tests).
    pub fn with_timestamp(
        document_uri: impl Into<String>,
        timestamp: impl Into<String>,
        range: EditRange,
        text: impl Into<String>,
        workstation: &Workstation,
    ) -> Self {
        Self {
            document_uri: document_uri.into(),
            timestamp: timestamp.into(),
            start_line: range.start_line,
            start_character: range.start_character,
            end_line: range.end_line,
            end_character: range.end_character,
            text: text.into(),
            environment: workstation.environment.clone(),
            computer_name: workstation.computer_name.clone(),
        }
    }
}
