//! Per-provider façades behind one [`CiProvider`] contract.
//!
//! Each provider keeps its raw payload types, its status table and its trigger
//! rules to itself and only hands out canonical [`Pipeline`] values.

pub mod azure;
pub mod github;
pub mod jenkins;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;
use crate::locator::{find_run_by_commit, CommitEvidence};
use crate::status::{
    most_recent, EventType, Pipeline, PipelineRef, PipelineStatus, ProviderKind, TriggerReason,
};

pub use azure::AzureProvider;
pub use github::GitHubProvider;
pub use jenkins::JenkinsProvider;

#[async_trait]
pub trait CiProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Resolves a stable pipeline name to the provider-side identifier.
    async fn resolve_pipeline_id(&self, name: &str) -> Result<Option<String>>;

    /// Finds the run of pipeline `name` for `reference`.
    ///
    /// `Ok(None)` means no matching run exists yet, which is a normal outcome right
    /// after a pull request is opened or merged.
    async fn get_pipeline_for_event(
        &self,
        name: &str,
        reference: &PipelineRef,
        event: EventType,
    ) -> Result<Option<Pipeline>>;

    /// Re-reads a run from the provider.
    async fn fetch_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline>;

    async fn current_status(&self, pipeline: &Pipeline) -> Result<PipelineStatus> {
        Ok(self.fetch_pipeline(pipeline).await?.status)
    }

    /// Non-terminal runs of the pipeline identified by `pipeline_id`.
    async fn list_in_flight(&self, pipeline_id: &str) -> Result<Vec<Pipeline>>;
}

/// Builds the façade for `kind` from its configuration section.
pub fn build_provider(kind: ProviderKind, config: &Config) -> Result<Arc<dyn CiProvider>> {
    Ok(match kind {
        ProviderKind::Azure => Arc::new(AzureProvider::new(&config.azure, config.http)?),
        ProviderKind::Jenkins => Arc::new(JenkinsProvider::new(&config.jenkins, config.http)?),
        ProviderKind::Github => Arc::new(GitHubProvider::new(&config.github, config.http)?),
    })
}

/// Keeps the candidates `event` accepts and picks the most recently finished one.
pub(crate) fn select_for_event(candidates: Vec<Pipeline>, event: EventType) -> Option<Pipeline> {
    most_recent(
        candidates
            .into_iter()
            .filter(|p| event.accepts(p.trigger))
            .collect(),
    )
}

/// Finds the newest raw run for `sha` among runs whose trigger `event` accepts.
pub(crate) fn locate_commit<'a, R, C>(
    history: &'a [R],
    sha: &str,
    max_depth: usize,
    event: EventType,
    classify: C,
) -> Option<&'a R>
where
    R: CommitEvidence,
    C: Fn(&R) -> TriggerReason,
{
    let window: Vec<&R> = history
        .iter()
        .take(max_depth)
        .filter(|run| event.accepts(classify(*run)))
        .collect();
    find_run_by_commit(&window, sha, max_depth).map(|found| *found.run)
}

pub(crate) fn non_terminal(pipelines: Vec<Pipeline>) -> Vec<Pipeline> {
    pipelines.into_iter().filter(|p| !p.is_terminal()).collect()
}
