use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use cirelay::providers::AzureProvider;
use cirelay::{
    build_provider, ArgoCdClient, CiProvider, Config, EventType, GitHubRepository, Orchestrator,
    Pipeline, PipelineRef, PipelineStatus, PipelineWatcher, PromotionMode, PromotionRequest,
    ProviderKind, SourceChange,
};

use crate::output;

#[derive(Parser)]
#[command(name = "cirelay")]
#[command(
    author,
    version,
    about = "Pipeline status normalization and promotion orchestration",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./cirelay.toml and friends)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// CI provider to query (defaults to promotion.provider)
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderKind>,

    /// Write JSON to this file instead of printing a table
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    #[command(flatten)]
    credentials: Credentials,
}

/// Tokens taken from the environment override the configuration file.
#[derive(Args)]
struct Credentials {
    #[arg(long, env = "AZURE_DEVOPS_TOKEN", hide_env_values = true, global = true)]
    azure_token: Option<String>,

    #[arg(long, env = "JENKINS_TOKEN", hide_env_values = true, global = true)]
    jenkins_token: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    github_token: Option<String>,

    /// Token for the GitOps repository; falls back to the GitHub token
    #[arg(long, env = "GITOPS_TOKEN", hide_env_values = true, global = true)]
    git_token: Option<String>,

    #[arg(long, env = "ARGOCD_AUTH_TOKEN", hide_env_values = true, global = true)]
    argocd_token: Option<String>,
}

/// Exactly one of `--pr`, `--branch` or `--commit`.
#[derive(Args)]
struct Target {
    /// Pull request number
    #[arg(long)]
    pr: Option<u64>,

    /// Head commit of the pull request
    #[arg(long, requires = "pr")]
    head_sha: Option<String>,

    #[arg(long)]
    branch: Option<String>,

    #[arg(long)]
    commit: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the run of a pipeline for a pull request, branch or commit
    Status {
        pipeline: String,

        #[command(flatten)]
        target: Target,

        #[arg(long, value_enum, default_value_t = EventType::Any)]
        event: EventType,

        /// Keep looking until the run shows this status or finishes
        #[arg(long, value_enum)]
        expect: Option<PipelineStatus>,
    },

    /// Wait for the run of a pipeline to appear and finish
    Wait {
        pipeline: String,

        #[command(flatten)]
        target: Target,

        #[arg(long, value_enum, default_value_t = EventType::Any)]
        event: EventType,

        /// Seconds to wait once the run has started
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List queued and running runs of a pipeline
    InFlight {
        pipeline: String,

        /// Block until none are left
        #[arg(long, default_value_t = false)]
        wait: bool,
    },

    /// Promote an artifact into an environment
    Promote {
        environment: String,

        /// Image tag or reference written into the environment manifest
        artifact: String,

        #[arg(long, value_enum, default_value_t = PromotionMode::WithPullRequest)]
        mode: PromotionMode,
    },

    /// Propose a file change through a pull request and merge it once its pipelines pass
    SourceChange {
        #[arg(long)]
        branch: String,

        /// Path of the file inside the repository
        #[arg(long)]
        path: String,

        /// Local file holding the new content
        #[arg(long)]
        file: PathBuf,

        #[arg(short, long)]
        message: String,

        /// Pull request title (defaults to the commit message)
        #[arg(long)]
        title: Option<String>,
    },

    /// Grant an Azure pipeline access to its agent queue and variable group
    Authorize {
        #[arg(long)]
        pipeline_id: u64,

        #[arg(long)]
        queue_id: u64,

        #[arg(long)]
        variable_group_id: u64,
    },
}

impl Target {
    fn reference(&self) -> Result<PipelineRef> {
        match (self.pr, &self.branch, &self.commit) {
            (Some(number), None, None) => Ok(PipelineRef::PullRequest {
                number,
                head_sha: self.head_sha.clone(),
            }),
            (None, Some(branch), None) => Ok(PipelineRef::Branch(branch.clone())),
            (None, None, Some(sha)) => Ok(PipelineRef::Commit(sha.clone())),
            _ => bail!("Pass exactly one of --pr, --branch or --commit"),
        }
    }
}

impl Credentials {
    fn apply(&self, config: &mut Config) {
        if let Some(token) = &self.azure_token {
            config.azure.token = Some(token.clone());
        }
        if let Some(token) = &self.jenkins_token {
            config.jenkins.token = Some(token.clone());
        }
        if let Some(token) = &self.github_token {
            config.github.token = Some(token.clone());
        }
        if let Some(token) = &self.argocd_token {
            config.argocd.token = Some(token.clone());
        }
        if let Some(token) = &self.git_token {
            config.git.token = Some(token.clone());
        }
        if config.git.token.is_none() {
            config.git.token.clone_from(&config.github.token);
        }
    }
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.credentials.apply(&mut config);
        Ok(config)
    }

    fn provider_kind(&self, config: &Config) -> ProviderKind {
        self.provider.unwrap_or(config.promotion.provider)
    }

    fn watcher(&self, config: &Config, cancel: &CancellationToken) -> Result<PipelineWatcher> {
        let kind = self.provider_kind(config);
        let provider: Arc<dyn CiProvider> = build_provider(kind, config)
            .with_context(|| format!("Failed to set up the {kind} provider"))?;
        Ok(PipelineWatcher::new(provider, config.polling).with_cancellation(cancel.clone()))
    }

    fn emit<T: Serialize>(&self, value: &T, render: impl FnOnce() -> String) -> Result<()> {
        if !self.json && self.output.is_none() {
            println!("{}", render());
            return Ok(());
        }

        let json_output = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Result written to: {}", output_path.display());
        } else {
            println!("{json_output}");
        }

        Ok(())
    }

    async fn execute_status(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        pipeline: &str,
        reference: &PipelineRef,
        event: EventType,
        expect: Option<PipelineStatus>,
    ) -> Result<()> {
        let watcher = self.watcher(config, cancel)?;
        match watcher.get_pipeline(pipeline, reference, expect, event).await? {
            Some(run) => self.emit(&run, || output::pipelines_table(&[run.clone()]).to_string()),
            None => bail!("No run of '{pipeline}' found for {reference}"),
        }
    }

    async fn execute_wait(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        pipeline: &str,
        reference: &PipelineRef,
        event: EventType,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let watcher = self.watcher(config, cancel)?;
        let Some(run) = watcher.await_pipeline(pipeline, reference, event).await? else {
            bail!("No run of '{pipeline}' appeared for {reference}");
        };

        let spinner = output::waiting(&run.id.to_string());
        let finished = watcher.wait_for_completion(&run, timeout).await;
        spinner.finish_and_clear();
        let finished: Pipeline = finished?;

        self.emit(&finished, || output::pipelines_table(&[finished.clone()]).to_string())?;
        if finished.status.is_success() {
            Ok(())
        } else {
            bail!("{} finished {}", finished.id, finished.status)
        }
    }

    async fn execute_in_flight(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        pipeline: &str,
        wait: bool,
    ) -> Result<()> {
        let watcher = self.watcher(config, cancel)?;
        if wait {
            let spinner = output::waiting(&format!("in-flight runs of {pipeline}"));
            let drained = watcher.wait_for_all_in_flight_to_finish(pipeline).await;
            spinner.finish_and_clear();
            drained?;
            eprintln!("{}", output::bright_green(format!("No runs of {pipeline} in flight")));
            return Ok(());
        }

        let Some(pipeline_id) = watcher.provider().resolve_pipeline_id(pipeline).await? else {
            bail!("Pipeline '{pipeline}' not found");
        };
        let runs = watcher.provider().list_in_flight(&pipeline_id).await?;
        self.emit(&runs, || output::pipelines_table(&runs).to_string())
    }

    fn orchestrator(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        title: &str,
    ) -> Result<Orchestrator> {
        let watcher = self.watcher(config, cancel)?;
        let git = GitHubRepository::new(&config.git, config.http)
            .context("Failed to set up the GitOps repository")?;
        let cd = ArgoCdClient::new(&config.argocd, config.http, config.polling)
            .context("Failed to set up the Argo CD client")?
            .with_cancellation(cancel.clone());

        Ok(
            Orchestrator::new(watcher, Arc::new(git), Arc::new(cd), &config.promotion)
                .with_listener(Arc::new(output::StageProgress::new(title)))
                .with_cancellation(cancel.clone()),
        )
    }

    async fn execute_promote(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        request: PromotionRequest,
    ) -> Result<()> {
        let title = format!("Promoting {} to {}", request.artifact, request.environment);
        let orchestrator = self.orchestrator(config, cancel, &title)?;
        orchestrator.promote(&request).await?;
        eprintln!(
            "\n{}",
            output::bright_green(format!("{} is running {}", request.environment, request.artifact))
        );
        Ok(())
    }

    async fn execute_source_change(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        change: SourceChange,
    ) -> Result<()> {
        let title = format!("Changing {} on {}", change.path, change.branch);
        let orchestrator = self.orchestrator(config, cancel, &title)?;
        orchestrator.run_source_change(&change).await?;
        eprintln!("\n{}", output::bright_green(format!("{} merged", change.branch)));
        Ok(())
    }

    async fn execute_authorize(
        &self,
        config: &Config,
        pipeline_id: u64,
        queue_id: u64,
        variable_group_id: u64,
    ) -> Result<()> {
        if self.provider.is_some_and(|kind| kind != ProviderKind::Azure) {
            warn!("authorize only applies to Azure Pipelines; ignoring --provider");
        }
        let provider = AzureProvider::new(&config.azure, config.http)?;
        provider
            .authorize_pipeline(pipeline_id, queue_id, variable_group_id)
            .await?;
        eprintln!(
            "{}",
            output::bright_green(format!("Pipeline {pipeline_id} is authorized"))
        );
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.load_config()?;
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", output::bright_red("Interrupted, stopping"));
                on_interrupt.cancel();
            }
        });

        match &self.command {
            Commands::Status {
                pipeline,
                target,
                event,
                expect,
            } => {
                let reference = target.reference()?;
                self.execute_status(&config, &cancel, pipeline, &reference, *event, *expect)
                    .await
            }
            Commands::Wait {
                pipeline,
                target,
                event,
                timeout,
            } => {
                let timeout = timeout.map(Duration::from_secs);
                self.execute_wait(&config, &cancel, pipeline, &target.reference()?, *event, timeout)
                    .await
            }
            Commands::InFlight { pipeline, wait } => {
                self.execute_in_flight(&config, &cancel, pipeline, *wait).await
            }
            Commands::Promote {
                environment,
                artifact,
                mode,
            } => {
                let request = PromotionRequest {
                    environment: environment.clone(),
                    artifact: artifact.clone(),
                    mode: *mode,
                };
                self.execute_promote(&config, &cancel, request).await
            }
            Commands::SourceChange {
                branch,
                path,
                file,
                message,
                title,
            } => {
                let content = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let change = SourceChange {
                    branch: branch.clone(),
                    path: path.clone(),
                    content,
                    message: message.clone(),
                    title: title.clone().unwrap_or_else(|| message.clone()),
                };
                self.execute_source_change(&config, &cancel, change).await
            }
            Commands::Authorize {
                pipeline_id,
                queue_id,
                variable_group_id,
            } => {
                self.execute_authorize(&config, *pipeline_id, *queue_id, *variable_group_id)
                    .await
            }
        }
    }
}
