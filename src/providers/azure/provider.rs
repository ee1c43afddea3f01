use async_trait::async_trait;
use log::{debug, info};

use crate::auth::Token;
use crate::config::AzureConfig;
use crate::error::{CIRelayError, Result};
use crate::http::RetryPolicy;
use crate::locator::{sha_matches, CommitEvidence};
use crate::providers::{locate_commit, non_terminal, select_for_event, CiProvider};
use crate::status::{EventType, Pipeline, PipelineRef, ProviderKind, RunId};

use super::client::{AzureClient, BuildQuery};
use super::mapping::{classify_trigger, normalize, pull_request_number};
use super::types::AzureBuild;

/// Façade over Azure Pipelines builds.
pub struct AzureProvider {
    client: AzureClient,
    project: String,
    /// Builds inspected per lookup
    history_depth: usize,
}

impl AzureProvider {
    /// # Errors
    ///
    /// Returns `CIRelayError::Config` when the organization, project or token is missing.
    pub fn new(config: &AzureConfig, retry: RetryPolicy) -> Result<Self> {
        let required = |value: &Option<String>, key: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| CIRelayError::Config(format!("azure.{key} is not set")))
        };
        let organization = required(&config.organization, "organization")?;
        let project = required(&config.project, "project")?;
        let token = Token::from(required(&config.token, "token")?);

        let client = AzureClient::new(&config.base_url, &organization, &project, token, retry)?;
        Ok(Self {
            client,
            project,
            history_depth: config.history_depth.max(1),
        })
    }

    fn to_pipeline(&self, build: &AzureBuild) -> Pipeline {
        let status = normalize(build);
        let definition = build.definition.as_ref();
        Pipeline {
            id: RunId {
                provider: ProviderKind::Azure,
                definition: definition.map(|d| d.id.to_string()).unwrap_or_default(),
                run: build.id.to_string(),
            },
            number: build.id,
            name: definition.map(|d| d.name.clone()).unwrap_or_default(),
            repository: build
                .repository
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_else(|| self.project.clone()),
            status,
            trigger: classify_trigger(build),
            started_at: build.start_time.or(build.queue_time),
            finished_at: if status.is_terminal() {
                build.finish_time
            } else {
                None
            },
            commit_sha: build.source_version.clone(),
            web_url: build
                .links
                .web
                .as_ref()
                .map(|link| link.href.clone())
                .unwrap_or_default(),
        }
    }

    fn query(&self) -> BuildQuery {
        BuildQuery {
            top: self.history_depth,
            ..BuildQuery::default()
        }
    }

    /// Grants a pipeline use of an agent queue and a variable group.
    ///
    /// Both grants are independent, so they are issued together.
    pub async fn authorize_pipeline(
        &self,
        pipeline_id: u64,
        queue_id: u64,
        variable_group_id: u64,
    ) -> Result<()> {
        tokio::try_join!(
            self.client.authorize_resource("queue", queue_id, pipeline_id),
            self.client
                .authorize_resource("variablegroup", variable_group_id, pipeline_id),
        )?;
        Ok(())
    }
}

/// `refs/heads/` is implied for bare branch names.
fn qualify_branch(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

#[async_trait]
impl CiProvider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn resolve_pipeline_id(&self, name: &str) -> Result<Option<String>> {
        let definitions = self.client.list_definitions(name).await?;
        Ok(definitions
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .map(|d| d.id.to_string()))
    }

    async fn get_pipeline_for_event(
        &self,
        name: &str,
        reference: &PipelineRef,
        event: EventType,
    ) -> Result<Option<Pipeline>> {
        let Some(definition_id) = self.resolve_pipeline_id(name).await? else {
            info!("Build definition '{name}' not found in {}", self.project);
            return Ok(None);
        };

        let mut query = self.query();
        match reference {
            PipelineRef::Commit(sha) => {
                let builds = self.client.list_builds(&definition_id, &query).await?;
                let found =
                    locate_commit(&builds, sha, self.history_depth, event, classify_trigger);
                return Ok(found.map(|build| self.to_pipeline(build)));
            }
            PipelineRef::Branch(branch) => query.branch_name = Some(qualify_branch(branch)),
            PipelineRef::PullRequest { number, .. } => {
                query.branch_name = Some(format!("refs/pull/{number}/merge"));
            }
        }

        let builds = self.client.list_builds(&definition_id, &query).await?;
        debug!(
            "Definition {definition_id} returned {} builds for {reference}",
            builds.len()
        );

        let candidates = builds
            .iter()
            .filter(|build| match reference {
                // A merge ref is reused across pushes; only the current head counts.
                PipelineRef::PullRequest {
                    head_sha: Some(sha),
                    ..
                } => build
                    .pull_request_commits()
                    .iter()
                    .any(|candidate| sha_matches(candidate, sha)),
                PipelineRef::PullRequest { number, .. } => {
                    pull_request_number(build) == Some(*number)
                }
                _ => true,
            })
            .map(|build| self.to_pipeline(build))
            .collect();

        Ok(select_for_event(candidates, event))
    }

    async fn fetch_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let build = self.client.get_build(&pipeline.id.run).await?;
        Ok(self.to_pipeline(&build))
    }

    async fn list_in_flight(&self, pipeline_id: &str) -> Result<Vec<Pipeline>> {
        let query = BuildQuery::in_flight(self.history_depth);
        let builds = self.client.list_builds(pipeline_id, &query).await?;
        Ok(non_terminal(
            builds.iter().map(|build| self.to_pipeline(build)).collect(),
        ))
    }
}
