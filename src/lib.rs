//! Pipeline status normalization and promotion orchestration.
//!
//! Azure Pipelines, Jenkins and GitHub Actions runs are normalized into one
//! [`Pipeline`] model; the [`Orchestrator`] drives GitOps promotions through a Git
//! host, those pipelines and an Argo CD controller.

pub mod auth;
pub mod cd;
pub mod config;
pub mod error;
pub mod git;
pub mod http;
pub mod locator;
pub mod poller;
pub mod promotion;
pub mod providers;
pub mod status;
pub mod trigger;
pub mod watcher;

pub use cd::{Application, ArgoCdClient, CdController, SyncReport};
pub use config::Config;
pub use error::{CIRelayError, Result};
pub use git::{GitHost, GitHubRepository, MergeResult, PullRequest, SourceChange};
pub use promotion::{
    AbortCause, Orchestrator, PromotionMode, PromotionRequest, Stage, StageListener, WorkflowMode,
};
pub use providers::{build_provider, CiProvider};
pub use status::{
    EventType, Pipeline, PipelineRef, PipelineStatus, ProviderKind, RunId, TriggerReason,
};
pub use watcher::PipelineWatcher;
