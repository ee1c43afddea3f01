use chrono::{DateTime, Utc};
use serde::Deserialize;

/// GitHub Actions workflow definition.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubWorkflow {
    /// Unique identifier for the workflow
    pub id: u64,
    /// Display name from the workflow file
    pub name: String,
    /// Path to the workflow file (e.g., ".github/workflows/ci.yml")
    pub path: String,
}

/// GitHub Actions workflow run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubWorkflowRun {
    /// Unique identifier for the workflow run
    pub id: u64,
    /// Name of the workflow
    pub name: Option<String>,
    /// Workflow this run belongs to
    #[serde(default)]
    pub workflow_id: u64,
    /// Head branch or tag name
    pub head_branch: Option<String>,
    /// SHA of the head commit
    #[serde(default)]
    pub head_sha: String,
    /// Run number
    #[serde(default)]
    pub run_number: u64,
    /// Event that triggered the run
    #[serde(default)]
    pub event: String,
    /// Status of the run (queued, in_progress, completed, ...)
    pub status: Option<String>,
    /// Conclusion of the run (success, failure, etc.)
    pub conclusion: Option<String>,
    /// Pull requests associated with the head branch
    #[serde(default)]
    pub pull_requests: Vec<GitHubPullRequestRef>,
    /// Commit that triggered a push run
    pub head_commit: Option<GitHubCommit>,
    /// User who triggered the run
    pub triggering_actor: Option<GitHubActor>,
    /// Repository the run belongs to
    pub repository: Option<GitHubRepositoryRef>,
    /// When the run was created
    pub created_at: Option<DateTime<Utc>>,
    /// When the current attempt started
    pub run_started_at: Option<DateTime<Utc>>,
    /// When the run was last updated
    pub updated_at: Option<DateTime<Utc>>,
    /// Web URL of the run
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequestRef {
    pub number: u64,
    pub head: GitHubHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubHead {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubActor {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepositoryRef {
    pub name: String,
    pub full_name: String,
}

/// Response from GitHub API for workflows.
#[derive(Debug, Deserialize)]
pub(super) struct WorkflowsResponse {
    pub workflows: Vec<GitHubWorkflow>,
}

/// Response from GitHub API for workflow runs.
#[derive(Debug, Deserialize)]
pub(super) struct WorkflowRunsResponse {
    pub workflow_runs: Vec<GitHubWorkflowRun>,
}
