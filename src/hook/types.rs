//! # Hook Types
//!
//! Messages, results and errors shared by the webhook engines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Soft, non-fatal diagnostic returned by a webhook for one file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub filename: String,
    pub message: String,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.filename, self.message)
    }
}

/// Aggregate outcome of one validation or mutation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookResult {
    /// `true` iff `messages` is empty
    pub success: bool,
    pub messages: Vec<Message>,
}

impl HookResult {
    #[must_use]
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            success: messages.is_empty(),
            messages,
        }
    }

    /// Messages joined into a single line for status and events
    #[must_use]
    pub fn summary(&self) -> String {
        summarize(&self.messages)
    }
}

/// Join messages as `file: message; file: message`
#[must_use]
pub fn summarize(messages: &[Message]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Which engine a pipeline run belongs to; used in logs and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Validation,
    Mutation,
    Metadata,
}

impl HookKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Validation => "validation",
            HookKind::Mutation => "mutation",
            HookKind::Metadata => "metadata",
        }
    }
}

/// Fatal errors raised by the hook pipeline
///
/// Any of these aborts the whole run; soft rejections are reported as [`Message`]s instead.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("while reading file {file}: {source}")]
    ReadFile {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("while writing file {file}: {source}")]
    WriteFile {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("while calling {url} for file {file}: {source}")]
    Transport {
        url: String,
        file: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid status code {status} from {url} for file {file}: {body}")]
    UnexpectedStatus {
        url: String,
        file: String,
        status: u16,
        body: String,
    },
    #[error("while parsing response for file {file}: {source}")]
    InvalidResponse {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid filter {filter:?} for service {service}: {source}")]
    InvalidFilter {
        service: String,
        filter: String,
        #[source]
        source: regex::Error,
    },
    #[error("rejected: {}", summarize(.0))]
    Rejected(Vec<Message>),
    #[error("hook processing cancelled")]
    Cancelled,
    #[error("hook worker stopped before reporting a result")]
    WorkerLost,
}
