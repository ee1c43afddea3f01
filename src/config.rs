use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::RetryPolicy;
use crate::poller::PollPolicy;
use crate::status::ProviderKind;

/// Configuration file structure for CIRelay.
///
/// Credentials live here (or in the environment, via the CLI) and are handed to each
/// collaborator's constructor, which rejects incomplete sections up front.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub azure: AzureConfig,

    #[serde(default)]
    pub jenkins: JenkinsConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub argocd: ArgoCdConfig,

    /// GitOps repository that holds the environment manifests
    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    /// Retry budget for individual HTTP requests
    #[serde(default)]
    pub http: RetryPolicy,

    #[serde(default)]
    pub promotion: PromotionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AzureConfig {
    #[serde(default = "default_azure_base_url")]
    pub base_url: String,

    pub organization: Option<String>,

    pub project: Option<String>,

    /// Personal access token
    pub token: Option<String>,

    /// Number of recent builds inspected when looking a commit up
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JenkinsConfig {
    pub base_url: Option<String>,

    pub user: Option<String>,

    /// API token for `user`
    pub token: Option<String>,

    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitHubConfig {
    #[serde(default = "default_github_base_url")]
    pub base_url: String,

    /// Repository running the workflows (e.g., 'owner/repo')
    pub repository: Option<String>,

    pub token: Option<String>,

    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArgoCdConfig {
    pub base_url: Option<String>,

    pub token: Option<String>,

    /// Application name for an environment; `{env}` is substituted
    #[serde(default = "default_application_template")]
    pub application_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitConfig {
    #[serde(default = "default_github_base_url")]
    pub base_url: String,

    /// GitOps repository (e.g., 'owner/deployments')
    pub repository: Option<String>,

    pub token: Option<String>,

    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Manifest path for an environment; `{env}` is substituted
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Dotted key inside the manifest that holds the deployed artifact
    #[serde(default = "default_image_key")]
    pub image_key: String,

    #[serde(default = "default_merge_method")]
    pub merge_method: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollingConfig {
    /// How long a started pipeline may run
    #[serde(default = "default_pipeline_timeout", with = "seconds")]
    pub pipeline_timeout: Duration,

    /// How long to wait for a pipeline to show up after a PR or merge
    #[serde(default = "default_appear_timeout", with = "seconds")]
    pub appear_timeout: Duration,

    /// How long a deployment may take to sync
    #[serde(default = "default_sync_timeout", with = "seconds")]
    pub sync_timeout: Duration,

    #[serde(default = "default_interval", with = "seconds")]
    pub interval: Duration,

    /// Attempts used when waiting for every in-flight run to finish
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_min_backoff", with = "seconds")]
    pub min_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "seconds")]
    pub max_backoff: Duration,

    #[serde(default = "default_max_fetch_failures")]
    pub max_fetch_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PromotionConfig {
    /// CI provider that validates changes to the GitOps repository
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Pipeline run for pull requests
    #[serde(default = "default_pipeline_name")]
    pub pr_pipeline: String,

    /// Pipeline run after merge
    #[serde(default = "default_pipeline_name")]
    pub push_pipeline: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            base_url: default_azure_base_url(),
            organization: None,
            project: None,
            token: None,
            history_depth: default_history_depth(),
        }
    }
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user: None,
            token: None,
            history_depth: default_history_depth(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            base_url: default_github_base_url(),
            repository: None,
            token: None,
            history_depth: default_history_depth(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_url: default_github_base_url(),
            repository: None,
            token: None,
            base_branch: default_base_branch(),
            manifest_path: default_manifest_path(),
            image_key: default_image_key(),
            merge_method: default_merge_method(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout: default_pipeline_timeout(),
            appear_timeout: default_appear_timeout(),
            sync_timeout: default_sync_timeout(),
            interval: default_interval(),
            max_attempts: default_max_attempts(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
            max_fetch_failures: default_max_fetch_failures(),
        }
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            pr_pipeline: default_pipeline_name(),
            push_pipeline: default_pipeline_name(),
        }
    }
}

impl PollingConfig {
    pub fn pipeline_policy(&self) -> PollPolicy {
        PollPolicy::deadline(self.pipeline_timeout, self.interval)
    }

    pub fn appear_policy(&self) -> PollPolicy {
        PollPolicy::deadline(self.appear_timeout, self.interval)
    }

    pub fn sync_policy(&self) -> PollPolicy {
        PollPolicy::deadline(self.sync_timeout, self.interval)
    }

    pub fn in_flight_policy(&self) -> PollPolicy {
        PollPolicy::Attempts {
            max_attempts: self.max_attempts,
            min_backoff: self.min_backoff,
            max_backoff: self.max_backoff,
        }
    }
}

fn default_azure_base_url() -> String {
    "https://dev.azure.com".to_string()
}

fn default_github_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_history_depth() -> usize {
    50
}

fn default_application_template() -> String {
    "{env}".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_manifest_path() -> String {
    "environments/{env}/values.yaml".to_string()
}

fn default_image_key() -> String {
    "image.tag".to_string()
}

fn default_merge_method() -> String {
    "squash".to_string()
}

fn default_pipeline_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_appear_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_max_attempts() -> u32 {
    crate::poller::DEFAULT_MAX_ATTEMPTS
}

fn default_min_backoff() -> Duration {
    crate::poller::DEFAULT_MIN_BACKOFF
}

fn default_max_backoff() -> Duration {
    crate::poller::DEFAULT_MAX_BACKOFF
}

fn default_max_fetch_failures() -> u32 {
    crate::poller::DEFAULT_MAX_FETCH_FAILURES
}

fn default_provider() -> ProviderKind {
    ProviderKind::Github
}

fn default_pipeline_name() -> String {
    "ci".to_string()
}

/// Serializes a `Duration` as whole seconds.
pub(crate) mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cirelay.toml
    /// 3. ./cirelay.json
    /// 4. ./cirelay.yaml
    /// 5. ./cirelay.yml
    /// 6. `<config dir>/cirelay/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["cirelay.toml", "cirelay.json", "cirelay.yaml", "cirelay.yml"];

        let user_config = dirs::config_dir().map(|dir| dir.join("cirelay").join("config.toml"));

        let found = candidates
            .iter()
            .map(PathBuf::from)
            .chain(user_config)
            .find(|path| path.exists());

        match found {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}
