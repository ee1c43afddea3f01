//! Provider-agnostic pipeline model.
//!
//! Every provider façade converts its raw run payload into these types; nothing
//! downstream of a façade inspects provider-native fields.

use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Canonical run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
    Unknown,
}

impl PipelineStatus {
    /// Success, failure and cancellation are final; nothing else is.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    Manual,
    /// A push to a branch, including Azure's individual and batched CI.
    Push,
    PullRequest,
    Schedule,
    Api,
    Unknown,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manual => "MANUAL",
            Self::Push => "PUSH",
            Self::PullRequest => "PULL_REQUEST",
            Self::Schedule => "SCHEDULE",
            Self::Api => "API",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Which kind of run a caller is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PullRequest,
    Push,
    #[default]
    Any,
}

impl EventType {
    pub fn accepts(self, trigger: TriggerReason) -> bool {
        match self {
            Self::PullRequest => trigger == TriggerReason::PullRequest,
            Self::Push => trigger == TriggerReason::Push,
            Self::Any => true,
        }
    }
}

/// What a run is being looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineRef {
    PullRequest {
        number: u64,
        /// Head commit of the pull request, when known; narrows the search.
        head_sha: Option<String>,
    },
    Branch(String),
    Commit(String),
}

impl fmt::Display for PipelineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullRequest { number, .. } => write!(f, "pull request #{number}"),
            Self::Branch(branch) => write!(f, "branch {branch}"),
            Self::Commit(sha) => write!(f, "commit {sha}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Azure,
    Jenkins,
    Github,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Azure => "azure",
            Self::Jenkins => "jenkins",
            Self::Github => "github",
        };
        f.write_str(name)
    }
}

/// Provider-qualified run identifier, displayed as `provider:definition/run`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    pub provider: ProviderKind,
    /// Pipeline definition, workflow or job identifier on the provider side.
    pub definition: String,
    pub run: String,
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.provider, self.definition, self.run)
    }
}

/// A single observed pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: RunId,
    /// Provider run or build number; higher is more recent.
    pub number: u64,
    pub name: String,
    pub repository: String,
    pub status: PipelineStatus,
    pub trigger: TriggerReason,
    pub started_at: Option<DateTime<Utc>>,
    /// Only set once the run is terminal.
    pub finished_at: Option<DateTime<Utc>>,
    pub commit_sha: Option<String>,
    pub web_url: String,
}

impl Pipeline {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One row of a provider's status table. `None` matches any value.
#[derive(Debug, Clone, Copy)]
pub struct StatusRule {
    pub state: Option<&'static str>,
    pub result: Option<&'static str>,
    pub status: PipelineStatus,
}

impl StatusRule {
    pub const fn new(
        state: Option<&'static str>,
        result: Option<&'static str>,
        status: PipelineStatus,
    ) -> Self {
        Self {
            state,
            result,
            status,
        }
    }

    fn matches(&self, state: &str, result: Option<&str>) -> bool {
        let state_ok = self.state.map_or(true, |s| s.eq_ignore_ascii_case(state));
        let result_ok = match (self.result, result) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        };
        state_ok && result_ok
    }
}

/// Maps a provider state/result pair through `table`, first matching row wins.
///
/// Pairs the table does not list resolve to `Unknown`.
pub fn normalize_status(table: &[StatusRule], state: &str, result: Option<&str>) -> PipelineStatus {
    table
        .iter()
        .find(|rule| rule.matches(state, result))
        .map_or(PipelineStatus::Unknown, |rule| rule.status)
}

/// Picks the most recently finished pipeline.
///
/// Runs that have not finished yet count as newer than any finished run; ties are
/// broken by run number.
pub fn most_recent(pipelines: Vec<Pipeline>) -> Option<Pipeline> {
    pipelines
        .into_iter()
        .max_by_key(|p| (p.finished_at.is_none(), p.finished_at, p.number))
}
