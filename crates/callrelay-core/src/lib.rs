//! Core types and error definitions for callrelay.
//!
//! This crate provides the types shared by the session and gateway crates:
//! error handling, the speaker-tagged transcript, call placement input, and
//! normalization of raw telephony provider statuses.
//!
//! # Main types
//!
//! - [`RelayError`]: Unified error enum for all callrelay subsystems.
//! - [`RelayResult`]: Convenience alias for `Result<T, RelayError>`.
//! - [`Speaker`]: Who produced an utterance (subject or agent).
//! - [`TranscriptEntry`]: A single utterance in a call transcript.
//! - [`CallConfig`]: Per-call placement input.
//! - [`CallOutcome`]: Normalized final status reported to the webhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for callrelay.
///
/// Each variant corresponds to a failure class of a single call; none of
/// them is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A required field was missing or invalid when a call was created.
    #[error("Config error: {0}")]
    Config(String),

    /// A telephony, model, or observer link failed to open or dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A session with the same call id is already registered.
    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    /// The webhook endpoint could not be reached or answered non-2xx.
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

// --- Transcript types ---

/// The party that produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The person who was called.
    Subject,
    /// The AI agent.
    Agent,
}

/// A single utterance. Order is the order of appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
}

impl TranscriptEntry {
    /// Creates an utterance by the called subject.
    pub fn subject(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Subject,
            text: text.into(),
        }
    }

    /// Creates an utterance by the agent.
    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            text: text.into(),
        }
    }
}

// --- Placement ---

/// Everything needed to bridge one call, resolved at placement time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallConfig {
    /// Identifier of the person being called.
    pub subject_id: String,
    /// Optional identifier of the call setting/script used by the caller.
    pub setting_id: Option<String>,
    /// Instruction sent to the model as the opening user turn.
    pub instruction: Option<String>,
    /// Credential for the realtime model endpoint.
    pub credential: String,
    /// Where the final call report is posted.
    pub webhook_url: Option<String>,
    /// Outbound identity allocated to this call, if any.
    pub caller_number: Option<String>,
}

impl CallConfig {
    /// Checks the fields that must be present before a session is created.
    pub fn validate(&self) -> RelayResult<()> {
        if self.subject_id.trim().is_empty() {
            return Err(RelayError::Config("subject id is required".into()));
        }
        if self.credential.trim().is_empty() {
            return Err(RelayError::Config("model credential is required".into()));
        }
        Ok(())
    }
}

// --- Call outcome ---

/// Final call status as reported to the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    /// The call connected.
    Completed,
    /// The call could not be established or was canceled.
    Failed,
    /// The line was busy.
    Busy,
    /// Nobody picked up.
    NoAnswer,
}

impl CallOutcome {
    /// Maps a raw provider status to an outcome.
    ///
    /// Returns `None` for statuses the provider is not known to send; callers
    /// treat those as [`CallOutcome::Failed`].
    pub fn from_provider_status(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "answered" | "in-progress" | "completed" => Some(Self::Completed),
            "failed" | "canceled" => Some(Self::Failed),
            "busy" => Some(Self::Busy),
            "no-answer" => Some(Self::NoAnswer),
            _ => None,
        }
    }

    /// Wire label of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Busy => "busy",
            Self::NoAnswer => "no-answer",
        }
    }
}

/// Returns true for provider statuses after which no more media will flow.
pub fn is_terminal_status(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "completed" | "failed" | "canceled" | "busy" | "no-answer"
    )
}

/// Wall-clock helper so every crate stamps times the same way.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
