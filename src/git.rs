//! Git hosting collaborator: pull requests, merges and direct commits against the
//! GitOps repository.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::auth::Token;
use crate::config::GitConfig;
use crate::error::{CIRelayError, Result};
use crate::http::{ApiClient, Auth, RetryPolicy};
use crate::providers::github::split_repository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub number: u64,
    /// Head commit of the pull request branch.
    pub sha: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub number: u64,
    /// Commit created on the base branch by the merge.
    pub sha: String,
}

/// A single-file change proposed through a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChange {
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
    pub title: String,
}

#[async_trait]
pub trait GitHost: Send + Sync {
    /// Opens a pull request that points `environment` at `artifact`.
    async fn create_pull_request(&self, environment: &str, artifact: &str) -> Result<PullRequest>;

    async fn open_source_change(&self, change: &SourceChange) -> Result<PullRequest>;

    async fn merge_pull_request(&self, pr: &PullRequest) -> Result<MergeResult>;

    /// Points `environment` at `artifact` straight on the base branch and returns
    /// the new commit.
    async fn create_direct_commit(&self, environment: &str, artifact: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaRef,
}

#[derive(Serialize)]
struct NewBlob<'a> {
    content: &'a str,
    encoding: &'static str,
}

#[derive(Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: &'a str,
}

#[derive(Serialize)]
struct NewTree<'a> {
    base_tree: &'a str,
    tree: Vec<TreeEntry<'a>>,
}

#[derive(Serialize)]
struct NewCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
}

#[derive(Serialize)]
struct NewRef<'a> {
    #[serde(rename = "ref")]
    ref_: String,
    sha: &'a str,
}

#[derive(Serialize)]
struct UpdateRef<'a> {
    sha: &'a str,
    force: bool,
}

#[derive(Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
    head: ShaRef,
}

#[derive(Serialize)]
struct MergeRequest<'a> {
    merge_method: &'a str,
    sha: &'a str,
}

#[derive(Deserialize)]
struct MergeResponse {
    sha: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: String,
}

/// [`GitHost`] backed by the GitHub REST API.
///
/// Commits are assembled with the git data API (blob, tree, commit, ref), so file
/// content never has to be base64-encoded.
pub struct GitHubRepository {
    api: ApiClient,
    owner: String,
    repo: String,
    base_branch: String,
    manifest_path: String,
    image_key: String,
    merge_method: String,
}

impl GitHubRepository {
    /// # Errors
    ///
    /// Returns `CIRelayError::Config` if `git.repository` or `git.token` is missing.
    pub fn new(config: &GitConfig, retry: RetryPolicy) -> Result<Self> {
        let repository = config
            .repository
            .as_deref()
            .ok_or_else(|| CIRelayError::Config("git.repository is not set".into()))?;
        let token = config
            .token
            .as_deref()
            .map(Token::from)
            .ok_or_else(|| CIRelayError::Config("git.token is not set".into()))?;
        let (owner, repo) = split_repository(repository)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let api = ApiClient::with_headers(&config.base_url, Auth::Bearer(token), retry, headers)?;

        Ok(Self {
            api,
            owner,
            repo,
            base_branch: config.base_branch.clone(),
            manifest_path: config.manifest_path.clone(),
            image_key: config.image_key.clone(),
            merge_method: config.merge_method.clone(),
        })
    }

    fn repo_url(&self, rest: &str) -> Result<url::Url> {
        self.api
            .endpoint(&format!("repos/{}/{}/{rest}", self.owner, self.repo))
    }

    fn manifest_for(&self, environment: &str) -> String {
        self.manifest_path.replace("{env}", environment)
    }

    async fn branch_head(&self, branch: &str) -> Result<String> {
        let url = self.repo_url(&format!("git/ref/heads/{branch}"))?;
        let response: RefResponse = self.api.get_json(url).await?;
        Ok(response.object.sha)
    }

    async fn read_file(&self, path: &str, branch: &str) -> Result<String> {
        let mut url = self.repo_url(&format!("contents/{path}"))?;
        url.query_pairs_mut().append_pair("ref", branch);
        self.api
            .get_text(url, Some("application/vnd.github.raw"))
            .await
    }

    /// Commits `content` at `path` on top of `parent` and returns the new commit SHA.
    async fn commit_file(
        &self,
        parent: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String> {
        let url = self.repo_url(&format!("git/commits/{parent}"))?;
        let parent_commit: CommitResponse = self.api.get_json(url).await?;

        let blob: ShaRef = self
            .api
            .send_json(
                Method::POST,
                self.repo_url("git/blobs")?,
                &NewBlob {
                    content,
                    encoding: "utf-8",
                },
            )
            .await?;

        let tree: ShaRef = self
            .api
            .send_json(
                Method::POST,
                self.repo_url("git/trees")?,
                &NewTree {
                    base_tree: &parent_commit.tree.sha,
                    tree: vec![TreeEntry {
                        path,
                        mode: "100644",
                        kind: "blob",
                        sha: &blob.sha,
                    }],
                },
            )
            .await?;

        let commit: ShaRef = self
            .api
            .send_json(
                Method::POST,
                self.repo_url("git/commits")?,
                &NewCommit {
                    message,
                    tree: &tree.sha,
                    parents: vec![&parent_commit.sha],
                },
            )
            .await?;

        debug!("Created commit {} for {path}", commit.sha);
        Ok(commit.sha)
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        self.api
            .send(
                Method::POST,
                self.repo_url("git/refs")?,
                Some(&NewRef {
                    ref_: format!("refs/heads/{branch}"),
                    sha,
                }),
            )
            .await
    }

    async fn open_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let response: PullRequestResponse = self
            .api
            .send_json(
                Method::POST,
                self.repo_url("pulls")?,
                &NewPullRequest {
                    title,
                    head: branch,
                    base: &self.base_branch,
                    body,
                },
            )
            .await?;

        info!("Opened pull request #{} from {branch}", response.number);
        Ok(PullRequest {
            number: response.number,
            sha: response.head.sha,
            url: response.html_url,
        })
    }

    /// Manifest for `environment` with the image key pointing at `artifact`.
    async fn updated_manifest(
        &self,
        environment: &str,
        artifact: &str,
    ) -> Result<(String, String)> {
        let path = self.manifest_for(environment);
        let current = self.read_file(&path, &self.base_branch).await?;
        let updated = set_yaml_key(&current, &self.image_key, artifact)?;
        Ok((path, updated))
    }

    /// Commits `content` at `path` on a new `branch` forked from the base branch and
    /// opens a pull request for it.
    async fn propose(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        title: &str,
    ) -> Result<PullRequest> {
        let base = self.branch_head(&self.base_branch).await?;
        let commit = self.commit_file(&base, path, content, message).await?;
        self.create_branch(branch, &commit).await?;
        self.open_pull_request(branch, title, message).await
    }
}

#[async_trait]
impl GitHost for GitHubRepository {
    async fn create_pull_request(&self, environment: &str, artifact: &str) -> Result<PullRequest> {
        let (path, content) = self.updated_manifest(environment, artifact).await?;
        let branch = promotion_branch(environment, artifact);
        let message = format!("Promote {artifact} to {environment}");
        self.propose(&branch, &path, &content, &message, &message).await
    }

    async fn open_source_change(&self, change: &SourceChange) -> Result<PullRequest> {
        self.propose(
            &change.branch,
            &change.path,
            &change.content,
            &change.message,
            &change.title,
        )
        .await
    }

    async fn merge_pull_request(&self, pr: &PullRequest) -> Result<MergeResult> {
        let url = self.repo_url(&format!("pulls/{}/merge", pr.number))?;
        let response: MergeResponse = self
            .api
            .send_json(
                Method::PUT,
                url,
                &MergeRequest {
                    merge_method: &self.merge_method,
                    sha: &pr.sha,
                },
            )
            .await?;

        if !response.merged {
            return Err(CIRelayError::ApiError {
                status: 409,
                message: format!(
                    "Pull request #{} was not merged: {}",
                    pr.number, response.message
                ),
            });
        }
        info!("Merged pull request #{} as {}", pr.number, response.sha);
        Ok(MergeResult {
            number: pr.number,
            sha: response.sha,
        })
    }

    async fn create_direct_commit(&self, environment: &str, artifact: &str) -> Result<String> {
        let (path, content) = self.updated_manifest(environment, artifact).await?;
        let base = self.branch_head(&self.base_branch).await?;
        let message = format!("Promote {artifact} to {environment}");
        let commit = self.commit_file(&base, &path, &content, &message).await?;

        let url = self.repo_url(&format!("git/refs/heads/{}", self.base_branch))?;
        self.api
            .send(
                Method::PATCH,
                url,
                Some(&UpdateRef {
                    sha: &commit,
                    force: false,
                }),
            )
            .await?;
        info!("Committed {artifact} to {} for {environment}", self.base_branch);
        Ok(commit)
    }
}

/// Branch name for promoting `artifact` to `environment`, e.g.
/// `promote/staging/registry-app-1.2.3`.
pub fn promotion_branch(environment: &str, artifact: &str) -> String {
    let slug: String = artifact
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    format!("promote/{environment}/{}", slug.trim_matches('-'))
}

/// Sets the dotted `key` (e.g. `image.tag`) in a YAML document, creating missing
/// intermediate mappings.
pub fn set_yaml_key(document: &str, key: &str, value: &str) -> Result<String> {
    let mut root: Value = if document.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(document)?
    };

    let mut node = &mut root;
    for segment in key.split('.') {
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(mapping) = node else {
            return Err(CIRelayError::Config(format!(
                "Cannot set '{key}': '{segment}' is under a non-mapping value"
            )));
        };
        node = mapping
            .entry(Value::String(segment.to_string()))
            .or_insert(Value::Null);
    }
    *node = Value::String(value.to_string());

    Ok(serde_yaml::to_string(&root)?)
}
