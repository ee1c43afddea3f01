use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::auth::Token;
use crate::error::{CIRelayError, Result};
use crate::http::{ApiClient, Auth, RetryPolicy};

use super::types::{GitHubWorkflow, GitHubWorkflowRun, WorkflowRunsResponse, WorkflowsResponse};

const MAX_PAGE_SIZE: usize = 100;

/// Filters for listing workflow runs. Unset fields are not sent.
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub branch: Option<String>,
    pub head_sha: Option<String>,
    pub event: Option<String>,
    /// Run status filter (`queued`, `in_progress`, ...)
    pub status: Option<&'static str>,
    pub per_page: usize,
}

/// GitHub API client for fetching workflow data.
#[derive(Clone)]
pub struct GitHubClient {
    api: ApiClient,
    /// Repository owner
    owner: String,
    /// Repository name
    repo: String,
}

impl GitHubClient {
    /// Create a new GitHub API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitHub API base URL (e.g., "https://api.github.com")
    /// * `repository` - Repository path in format "owner/repo"
    /// * `token` - Optional GitHub personal access token
    pub fn new(
        base_url: &str,
        repository: &str,
        token: Option<Token>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let (owner, repo) = split_repository(repository)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let auth = token.map_or(Auth::None, Auth::Bearer);
        let api = ApiClient::with_headers(base_url, auth, retry, headers)?;

        Ok(Self { api, owner, repo })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("repos/{}/{}/{rest}", self.owner, self.repo)
    }

    pub async fn list_workflows(&self) -> Result<Vec<GitHubWorkflow>> {
        let mut url = self.api.endpoint(&self.repo_path("actions/workflows"))?;
        url.query_pairs_mut()
            .append_pair("per_page", &MAX_PAGE_SIZE.to_string());
        let response: WorkflowsResponse = self.api.get_json(url).await?;
        Ok(response.workflows)
    }

    /// Fetch the most recent runs of a workflow, newest first.
    pub async fn list_runs(
        &self,
        workflow_id: &str,
        query: &RunQuery,
    ) -> Result<Vec<GitHubWorkflowRun>> {
        let mut url = self
            .api
            .endpoint(&self.repo_path(&format!("actions/workflows/{workflow_id}/runs")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("per_page", &query.per_page.clamp(1, MAX_PAGE_SIZE).to_string());
            if let Some(branch) = &query.branch {
                pairs.append_pair("branch", branch);
            }
            if let Some(head_sha) = &query.head_sha {
                pairs.append_pair("head_sha", head_sha);
            }
            if let Some(event) = &query.event {
                pairs.append_pair("event", event);
            }
            if let Some(status) = query.status {
                pairs.append_pair("status", status);
            }
        }

        let response: WorkflowRunsResponse = self.api.get_json(url).await?;
        Ok(response.workflow_runs)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<GitHubWorkflowRun> {
        let url = self
            .api
            .endpoint(&self.repo_path(&format!("actions/runs/{run_id}")))?;
        self.api.get_json(url).await
    }
}

pub(crate) fn split_repository(repository: &str) -> Result<(String, String)> {
    match repository.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok(((*owner).to_string(), (*repo).to_string()))
        }
        _ => Err(CIRelayError::Config(format!(
            "Repository must be in format 'owner/repo', got '{repository}'"
        ))),
    }
}
