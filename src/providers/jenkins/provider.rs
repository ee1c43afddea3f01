use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::auth::Token;
use crate::config::JenkinsConfig;
use crate::error::{optional, CIRelayError, Result};
use crate::http::RetryPolicy;
use crate::locator::{sha_matches, CommitEvidence};
use crate::providers::{locate_commit, non_terminal, select_for_event, CiProvider};
use crate::status::{EventType, Pipeline, PipelineRef, ProviderKind, RunId};

use super::client::JenkinsClient;
use super::mapping::{built_branches, classify_trigger, normalize, pull_request_number};
use super::types::JenkinsBuild;

/// Façade over Jenkins jobs. Pipelines are named by their full job name
/// (`folder/job`).
pub struct JenkinsProvider {
    client: JenkinsClient,
    history_depth: usize,
}

impl JenkinsProvider {
    /// # Errors
    ///
    /// Returns `CIRelayError::Config` if `jenkins.base-url` is missing, or if only one
    /// of `jenkins.user` and `jenkins.token` is configured.
    pub fn new(config: &JenkinsConfig, retry: RetryPolicy) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| CIRelayError::Config("jenkins.base-url is not set".into()))?;
        match (&config.user, &config.token) {
            (Some(_), None) => {
                return Err(CIRelayError::Config(
                    "jenkins.user is set but jenkins.token is not".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(CIRelayError::Config(
                    "jenkins.token is set but jenkins.user is not".into(),
                ))
            }
            _ => {}
        }
        let token = config.token.as_deref().map(Token::from);
        let client = JenkinsClient::new(base_url, config.user.as_deref(), token, retry)?;

        Ok(Self {
            client,
            history_depth: config.history_depth.max(1),
        })
    }

    fn to_pipeline(&self, job: &str, build: &JenkinsBuild) -> Pipeline {
        let status = normalize(build);
        let started_at = build.timestamp.and_then(DateTime::<Utc>::from_timestamp_millis);
        let finished_at = if status.is_terminal() {
            started_at.map(|start| start + Duration::milliseconds(build.duration.unwrap_or(0)))
        } else {
            None
        };

        Pipeline {
            id: RunId {
                provider: ProviderKind::Jenkins,
                definition: job.to_string(),
                run: build.number.to_string(),
            },
            number: build.number,
            name: job.rsplit('/').next().unwrap_or(job).to_string(),
            repository: job.split('/').next().unwrap_or(job).to_string(),
            status,
            trigger: classify_trigger(build),
            started_at,
            finished_at,
            commit_sha: build.scm_revisions().into_iter().next(),
            web_url: build.url.clone(),
        }
    }
}

fn matches_reference(build: &JenkinsBuild, reference: &PipelineRef) -> bool {
    match reference {
        PipelineRef::PullRequest { number, head_sha } => {
            let same_number = pull_request_number(build) == Some(*number);
            match head_sha {
                Some(sha) => {
                    same_number
                        && (build.pull_request_commits().iter().any(|c| sha_matches(c, sha))
                            || build.scm_revisions().iter().any(|c| sha_matches(c, sha)))
                }
                None => same_number,
            }
        }
        PipelineRef::Branch(branch) => built_branches(build).iter().any(|b| b == branch),
        PipelineRef::Commit(_) => true,
    }
}

#[async_trait]
impl CiProvider for JenkinsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Jenkins
    }

    async fn resolve_pipeline_id(&self, name: &str) -> Result<Option<String>> {
        let job = optional(self.client.get_job(name).await)?;
        Ok(job.map(|job| job.full_name.unwrap_or(job.name)))
    }

    async fn get_pipeline_for_event(
        &self,
        name: &str,
        reference: &PipelineRef,
        event: EventType,
    ) -> Result<Option<Pipeline>> {
        let Some(job) = self.resolve_pipeline_id(name).await? else {
            info!("Jenkins job '{name}' not found");
            return Ok(None);
        };

        let builds = self.client.list_builds(&job, self.history_depth).await?;
        debug!("Job {job} returned {} builds for {reference}", builds.len());

        if let PipelineRef::Commit(sha) = reference {
            let found = locate_commit(&builds, sha, self.history_depth, event, classify_trigger);
            return Ok(found.map(|build| self.to_pipeline(&job, build)));
        }

        let candidates = builds
            .iter()
            .filter(|build| matches_reference(build, reference))
            .map(|build| self.to_pipeline(&job, build))
            .collect();
        Ok(select_for_event(candidates, event))
    }

    async fn fetch_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let build = self
            .client
            .get_build(&pipeline.id.definition, &pipeline.id.run)
            .await?;
        Ok(self.to_pipeline(&pipeline.id.definition, &build))
    }

    async fn list_in_flight(&self, pipeline_id: &str) -> Result<Vec<Pipeline>> {
        let builds = self.client.list_builds(pipeline_id, self.history_depth).await?;
        Ok(non_terminal(
            builds
                .iter()
                .map(|build| self.to_pipeline(pipeline_id, build))
                .collect(),
        ))
    }
}
