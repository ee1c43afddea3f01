use std::collections::HashSet;

use async_trait::async_trait;
use futures::future::try_join_all;
use log::{debug, info};

use crate::auth::Token;
use crate::config::GitHubConfig;
use crate::error::{CIRelayError, Result};
use crate::http::RetryPolicy;
use crate::locator::sha_matches;
use crate::providers::{locate_commit, non_terminal, select_for_event, CiProvider};
use crate::status::{EventType, Pipeline, PipelineRef, ProviderKind, RunId};

use super::client::{GitHubClient, RunQuery};
use super::mapping::{classify_trigger, normalize};
use super::types::GitHubWorkflowRun;

/// Statuses GitHub reports for runs that have not finished.
const IN_FLIGHT_STATUSES: &[&str] = &["queued", "in_progress", "waiting", "pending"];
const MAX_IN_FLIGHT_PAGE: usize = 100;

/// Façade over GitHub Actions workflow runs.
pub struct GitHubProvider {
    /// GitHub API client
    client: GitHubClient,
    /// Runs inspected per lookup
    history_depth: usize,
}

impl GitHubProvider {
    /// Create a new GitHub Actions provider.
    ///
    /// # Errors
    ///
    /// Returns `CIRelayError::Config` if no repository is configured or it is not in
    /// `owner/repo` form.
    pub fn new(config: &GitHubConfig, retry: RetryPolicy) -> Result<Self> {
        let repository = config
            .repository
            .as_deref()
            .ok_or_else(|| CIRelayError::Config("github.repository is not set".into()))?;
        let token = config.token.as_deref().map(Token::from);
        let client = GitHubClient::new(&config.base_url, repository, token, retry)?;

        Ok(Self {
            client,
            history_depth: config.history_depth.max(1),
        })
    }

    fn to_pipeline(&self, run: &GitHubWorkflowRun) -> Pipeline {
        let status = normalize(run);
        Pipeline {
            id: RunId {
                provider: ProviderKind::Github,
                definition: run.workflow_id.to_string(),
                run: run.id.to_string(),
            },
            number: run.run_number,
            name: run.name.clone().unwrap_or_default(),
            repository: run
                .repository
                .as_ref()
                .map_or_else(|| self.client.repo().to_string(), |r| r.name.clone()),
            status,
            trigger: classify_trigger(run),
            started_at: run.run_started_at.or(run.created_at),
            finished_at: if status.is_terminal() {
                run.updated_at
            } else {
                None
            },
            commit_sha: Some(run.head_sha.clone()).filter(|sha| !sha.is_empty()),
            web_url: run.html_url.clone(),
        }
    }

    fn query(&self) -> RunQuery {
        RunQuery {
            per_page: self.history_depth,
            ..RunQuery::default()
        }
    }
}

fn belongs_to_pull_request(run: &GitHubWorkflowRun, number: u64, head_sha: Option<&str>) -> bool {
    run.pull_requests.iter().any(|pr| pr.number == number)
        || head_sha.is_some_and(|sha| sha_matches(&run.head_sha, sha))
}

#[async_trait]
impl CiProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    /// Matches a workflow by display name or by workflow file name.
    async fn resolve_pipeline_id(&self, name: &str) -> Result<Option<String>> {
        let workflows = self.client.list_workflows().await?;
        let found = workflows.into_iter().find(|workflow| {
            workflow.name == name
                || workflow.path.rsplit('/').next() == Some(name)
                || workflow.id.to_string() == name
        });
        Ok(found.map(|workflow| workflow.id.to_string()))
    }

    async fn get_pipeline_for_event(
        &self,
        name: &str,
        reference: &PipelineRef,
        event: EventType,
    ) -> Result<Option<Pipeline>> {
        let Some(workflow_id) = self.resolve_pipeline_id(name).await? else {
            info!("Workflow '{name}' not found");
            return Ok(None);
        };

        let mut query = self.query();
        match reference {
            PipelineRef::Commit(sha) => {
                // The API only filters on full SHAs; short ones go through the locator.
                if sha.len() == 40 {
                    query.head_sha = Some(sha.clone());
                }
                let runs = self.client.list_runs(&workflow_id, &query).await?;
                let found = locate_commit(&runs, sha, self.history_depth, event, classify_trigger);
                return Ok(found.map(|run| self.to_pipeline(run)));
            }
            PipelineRef::Branch(branch) => query.branch = Some(branch.clone()),
            PipelineRef::PullRequest { head_sha, .. } => {
                query.head_sha = head_sha.clone().filter(|sha| sha.len() == 40);
            }
        }

        let runs = self.client.list_runs(&workflow_id, &query).await?;
        debug!("Workflow {workflow_id} returned {} runs for {reference}", runs.len());

        let candidates = runs
            .iter()
            .filter(|run| match reference {
                PipelineRef::PullRequest { number, head_sha } => {
                    belongs_to_pull_request(run, *number, head_sha.as_deref())
                }
                _ => true,
            })
            .map(|run| self.to_pipeline(run))
            .collect();

        Ok(select_for_event(candidates, event))
    }

    async fn fetch_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let run = self.client.get_run(&pipeline.id.run).await?;
        Ok(self.to_pipeline(&run))
    }

    /// Asks for each in-flight status separately, so old queued runs are not cut off
    /// by the page size.
    async fn list_in_flight(&self, pipeline_id: &str) -> Result<Vec<Pipeline>> {
        let pages = try_join_all(IN_FLIGHT_STATUSES.iter().map(|status| {
            let query = RunQuery {
                status: Some(*status),
                per_page: MAX_IN_FLIGHT_PAGE,
                ..RunQuery::default()
            };
            async move { self.client.list_runs(pipeline_id, &query).await }
        }))
        .await?;

        let mut seen = HashSet::new();
        let pipelines = pages
            .iter()
            .flatten()
            .filter(|run| seen.insert(run.id))
            .map(|run| self.to_pipeline(run))
            .collect();
        Ok(non_terminal(pipelines))
    }
}
