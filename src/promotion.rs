//! Promotion workflows.
//!
//! A promotion moves an artifact into an environment through a fixed sequence of
//! stages. Every stage must succeed before the next one starts; the first failure
//! aborts the workflow with an error naming the environment, the mode, the failing
//! stage and the last stage that completed.
//!
//! ```text
//! with pull request: CHECK_TARGET_EXISTS → CREATE_PR → AWAIT_PR_PIPELINE → MERGE_PR
//!                    → AWAIT_PUSH_PIPELINE → SYNC_DEPLOYMENT → AWAIT_SYNC → DONE
//! direct:            CHECK_TARGET_EXISTS → COMMIT_DIRECT → SYNC_DEPLOYMENT → AWAIT_SYNC → DONE
//! source change:     CREATE_PR → AWAIT_PR_PIPELINE → MERGE_PR → AWAIT_PUSH_PIPELINE → DONE
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cd::CdController;
use crate::config::PromotionConfig;
use crate::error::{CIRelayError, Result};
use crate::git::{GitHost, PullRequest, SourceChange};
use crate::status::{EventType, PipelineRef, PipelineStatus};
use crate::watcher::PipelineWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CheckTargetExists,
    CreatePr,
    AwaitPrPipeline,
    MergePr,
    AwaitPushPipeline,
    CommitDirect,
    SyncDeployment,
    AwaitSync,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckTargetExists => "CHECK_TARGET_EXISTS",
            Self::CreatePr => "CREATE_PR",
            Self::AwaitPrPipeline => "AWAIT_PR_PIPELINE",
            Self::MergePr => "MERGE_PR",
            Self::AwaitPushPipeline => "AWAIT_PUSH_PIPELINE",
            Self::CommitDirect => "COMMIT_DIRECT",
            Self::SyncDeployment => "SYNC_DEPLOYMENT",
            Self::AwaitSync => "AWAIT_SYNC",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a promotion reaches the base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionMode {
    /// Through a pull request gated by the pull request and push pipelines.
    #[default]
    WithPullRequest,
    /// Straight onto the base branch, without any pipeline gate.
    Direct,
}

/// The workflow an abort happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMode {
    WithPullRequest,
    Direct,
    SourceChange,
}

impl From<PromotionMode> for WorkflowMode {
    fn from(mode: PromotionMode) -> Self {
        match mode {
            PromotionMode::WithPullRequest => Self::WithPullRequest,
            PromotionMode::Direct => Self::Direct,
        }
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WithPullRequest => "Pull request promotion",
            Self::Direct => "Direct promotion",
            Self::SourceChange => "Source change",
        };
        f.write_str(name)
    }
}

/// Why a stage failed.
#[derive(Debug)]
pub enum AbortCause {
    /// A gating pipeline finished with a non-success status.
    Status(PipelineStatus),
    /// A gating pipeline or the deployment did not finish in time.
    Timeout {
        elapsed: Duration,
        last_status: Option<PipelineStatus>,
    },
    /// No run of the gating pipeline showed up.
    NoPipeline { pipeline: String, reference: String },
    /// The environment has no deployment application.
    TargetMissing,
    /// The deployment controller gave up on the sync.
    SyncFailed(String),
    Cancelled,
    /// A collaborator call failed.
    Fault(Box<CIRelayError>),
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "pipeline finished {status}"),
            Self::Timeout {
                elapsed,
                last_status,
            } => match last_status {
                Some(status) => write!(f, "timed out after {elapsed:?} while {status}"),
                None => write!(f, "timed out after {elapsed:?}"),
            },
            Self::NoPipeline {
                pipeline,
                reference,
            } => write!(f, "no run of '{pipeline}' appeared for {reference}"),
            Self::TargetMissing => f.write_str("no deployment application for the environment"),
            Self::SyncFailed(message) => write!(f, "deployment did not sync: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Fault(e) => write!(f, "{e}"),
        }
    }
}

impl From<CIRelayError> for AbortCause {
    fn from(e: CIRelayError) -> Self {
        match e {
            CIRelayError::Timeout {
                elapsed,
                last_status,
                ..
            } => Self::Timeout {
                elapsed,
                last_status,
            },
            CIRelayError::Cancelled { .. } => Self::Cancelled,
            other => Self::Fault(Box::new(other)),
        }
    }
}

/// One promotion of `artifact` into `environment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRequest {
    pub environment: String,
    /// Image reference or tag written into the environment's manifest.
    pub artifact: String,
    pub mode: PromotionMode,
}

/// Observes stage transitions, e.g. to render progress.
pub trait StageListener: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}

    fn stage_completed(&self, _stage: Stage) {}

    fn stage_failed(&self, _stage: Stage, _cause: &AbortCause) {}
}

/// Listener that only logs.
pub struct LogListener;

impl StageListener for LogListener {
    fn stage_started(&self, stage: Stage) {
        info!("Stage {stage} started");
    }

    fn stage_completed(&self, stage: Stage) {
        info!("Stage {stage} completed");
    }
}

/// What follows a successful push pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Deploy,
    Finish,
}

/// What the pull request of a chain carries.
enum Proposal<'a> {
    Promotion { artifact: &'a str },
    Change(&'a SourceChange),
}

/// Progress of a single workflow run.
struct Run<'a> {
    environment: &'a str,
    mode: WorkflowMode,
    last_completed: Option<Stage>,
    listener: &'a dyn StageListener,
    cancel: &'a CancellationToken,
}

impl<'a> Run<'a> {
    async fn stage<T, F>(&mut self, stage: Stage, work: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, AbortCause>>,
    {
        if self.cancel.is_cancelled() {
            return Err(self.abort(stage, AbortCause::Cancelled));
        }
        self.listener.stage_started(stage);
        match work.await {
            Ok(value) => {
                self.last_completed = Some(stage);
                self.listener.stage_completed(stage);
                Ok(value)
            }
            Err(cause) => Err(self.abort(stage, cause)),
        }
    }

    fn abort(&self, stage: Stage, cause: AbortCause) -> CIRelayError {
        self.listener.stage_failed(stage, &cause);
        error!(
            "{} of '{}' aborted at {stage}: {cause}",
            self.mode, self.environment
        );
        CIRelayError::WorkflowAborted {
            environment: self.environment.to_string(),
            mode: self.mode,
            stage,
            last_completed: self.last_completed,
            cause,
        }
    }

    fn finish(&mut self) {
        self.last_completed = Some(Stage::Done);
        self.listener.stage_completed(Stage::Done);
        info!("{} of '{}' is done", self.mode, self.environment);
    }
}

/// Drives promotion and source-change workflows across the Git host, the CI
/// provider and the deployment controller.
pub struct Orchestrator {
    watcher: PipelineWatcher,
    git: Arc<dyn GitHost>,
    cd: Arc<dyn CdController>,
    pr_pipeline: String,
    push_pipeline: String,
    listener: Arc<dyn StageListener>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        watcher: PipelineWatcher,
        git: Arc<dyn GitHost>,
        cd: Arc<dyn CdController>,
        config: &PromotionConfig,
    ) -> Self {
        Self {
            watcher,
            git,
            cd,
            pr_pipeline: config.pr_pipeline.clone(),
            push_pipeline: config.push_pipeline.clone(),
            listener: Arc::new(LogListener),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn StageListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Cancelling `cancel` interrupts pipeline waits and stops before the next stage.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.watcher = self.watcher.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    fn run<'a>(&'a self, environment: &'a str, mode: WorkflowMode) -> Run<'a> {
        Run {
            environment,
            mode,
            last_completed: None,
            listener: self.listener.as_ref(),
            cancel: &self.cancel,
        }
    }

    /// Promotes `request.artifact` into `request.environment`.
    ///
    /// # Errors
    ///
    /// `WorkflowAborted` at the first stage that does not succeed.
    pub async fn promote(&self, request: &PromotionRequest) -> Result<()> {
        let environment = request.environment.as_str();
        let mut run = self.run(environment, request.mode.into());
        info!(
            "Promoting {} to {environment} ({})",
            request.artifact, run.mode
        );

        run.stage(Stage::CheckTargetExists, async {
            match self.cd.get_application(environment).await? {
                Some(_) => Ok(()),
                None => Err(AbortCause::TargetMissing),
            }
        })
        .await?;

        match request.mode {
            PromotionMode::WithPullRequest => {
                let proposal = Proposal::Promotion {
                    artifact: &request.artifact,
                };
                self.pull_request_chain(&mut run, proposal, Tail::Deploy)
                    .await
            }
            PromotionMode::Direct => {
                warn!(
                    "Direct promotion to {environment} skips the pull request and push pipelines"
                );
                let sha = run
                    .stage(Stage::CommitDirect, async {
                        Ok::<_, AbortCause>(self
                            .git
                            .create_direct_commit(environment, &request.artifact)
                            .await?)
                    })
                    .await?;
                self.deploy(&mut run, &sha).await
            }
        }
    }

    /// Proposes `change`, waits for its pipelines and merges it. Nothing is deployed.
    pub async fn run_source_change(&self, change: &SourceChange) -> Result<()> {
        let mut run = self.run(&change.branch, WorkflowMode::SourceChange);
        self.pull_request_chain(&mut run, Proposal::Change(change), Tail::Finish)
            .await
    }

    async fn pull_request_chain(
        &self,
        run: &mut Run<'_>,
        proposal: Proposal<'_>,
        tail: Tail,
    ) -> Result<()> {
        let environment = run.environment;
        let pr: PullRequest = run
            .stage(Stage::CreatePr, async {
                Ok::<_, AbortCause>(match proposal {
                    Proposal::Promotion { artifact } => {
                        self.git.create_pull_request(environment, artifact).await?
                    }
                    Proposal::Change(change) => self.git.open_source_change(change).await?,
                })
            })
            .await?;

        let pr_ref = PipelineRef::PullRequest {
            number: pr.number,
            head_sha: Some(pr.sha.clone()),
        };
        run.stage(
            Stage::AwaitPrPipeline,
            self.gate(&self.pr_pipeline, &pr_ref, EventType::PullRequest),
        )
        .await?;

        let merged = run
            .stage(Stage::MergePr, async {
                Ok::<_, AbortCause>(self.git.merge_pull_request(&pr).await?)
            })
            .await?;

        let push_ref = PipelineRef::Commit(merged.sha.clone());
        run.stage(
            Stage::AwaitPushPipeline,
            self.gate(&self.push_pipeline, &push_ref, EventType::Push),
        )
        .await?;

        match tail {
            Tail::Deploy => self.deploy(run, &merged.sha).await,
            Tail::Finish => {
                run.finish();
                Ok(())
            }
        }
    }

    /// Waits for the run of `name` for `reference` to appear and finish successfully.
    async fn gate(
        &self,
        name: &str,
        reference: &PipelineRef,
        event: EventType,
    ) -> std::result::Result<(), AbortCause> {
        let pipeline = self
            .watcher
            .await_pipeline(name, reference, event)
            .await?
            .ok_or_else(|| AbortCause::NoPipeline {
                pipeline: name.to_string(),
                reference: reference.to_string(),
            })?;

        let status = self
            .watcher
            .wait_for_pipeline_to_finish(&pipeline, None)
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(AbortCause::Status(status))
        }
    }

    async fn deploy(&self, run: &mut Run<'_>, revision: &str) -> Result<()> {
        let environment = run.environment;
        run.stage(Stage::SyncDeployment, async {
            Ok::<_, AbortCause>(self.cd.sync_application(environment).await?)
        })
        .await?;

        run.stage(Stage::AwaitSync, async {
            let report = self.cd.wait_until_synced(environment, revision).await?;
            if report.synced {
                Ok(())
            } else {
                Err(AbortCause::SyncFailed(report.message))
            }
        })
        .await?;

        run.finish();
        Ok(())
    }
}
