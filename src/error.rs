use std::time::Duration;

use thiserror::Error;

use crate::promotion::{AbortCause, Stage, WorkflowMode};
use crate::status::PipelineStatus;

#[derive(Error, Debug)]
pub enum CIRelayError {
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error(
        "Timed out after {elapsed:?} waiting for {subject} (last status: {})",
        display_or_none(.last_status)
    )]
    Timeout {
        subject: String,
        elapsed: Duration,
        last_status: Option<PipelineStatus>,
    },

    #[error("Wait for {subject} was cancelled")]
    Cancelled { subject: String },

    #[error("Request to {endpoint} failed after {attempts} attempts")]
    TransportFault {
        endpoint: String,
        attempts: u32,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(
        "{mode} workflow for '{environment}' aborted at {stage} (last completed: {}): {cause}",
        display_or_none(.last_completed)
    )]
    WorkflowAborted {
        environment: String,
        mode: WorkflowMode,
        stage: Stage,
        last_completed: Option<Stage>,
        cause: AbortCause,
    },

    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CIRelayError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a failed status fetch is worth repeating on the next poll.
    ///
    /// Missing resources and bad configuration will not fix themselves between polls.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportFault { .. } | Self::Network(_) => true,
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CIRelayError>;

fn display_or_none<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Converts a `NotFound` error into `Ok(None)`, leaving every other outcome untouched.
pub(crate) fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
