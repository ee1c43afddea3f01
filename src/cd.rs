//! Continuous-deployment collaborator: the GitOps controller that rolls an
//! environment forward once its manifest changes.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::auth::Token;
use crate::config::{ArgoCdConfig, PollingConfig};
use crate::error::{optional, CIRelayError, Result};
use crate::http::{ApiClient, Auth, RetryPolicy};
use crate::locator::sha_matches;
use crate::poller::{PollOutcome, Poller};

/// Deployment state of one environment as the controller reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    /// `Synced`, `OutOfSync` or `Unknown`
    pub sync_status: String,
    /// `Healthy`, `Progressing`, `Degraded`, `Suspended`, `Missing` or `Unknown`
    pub health: String,
    /// Revision the live state was last synced to.
    pub revision: Option<String>,
    /// Phase of the last sync operation (`Running`, `Succeeded`, `Failed`, `Error`).
    pub operation_phase: Option<String>,
    pub message: Option<String>,
}

impl Application {
    pub fn is_synced_to(&self, revision: &str) -> bool {
        self.sync_status.eq_ignore_ascii_case("Synced")
            && self.health.eq_ignore_ascii_case("Healthy")
            && self
                .revision
                .as_deref()
                .is_some_and(|current| sha_matches(current, revision))
    }

    /// Whether the last sync attempt ended in a state that will not recover by itself.
    pub fn has_failed(&self) -> bool {
        self.health.eq_ignore_ascii_case("Degraded")
            || self.operation_phase.as_deref().is_some_and(|phase| {
                phase.eq_ignore_ascii_case("Failed") || phase.eq_ignore_ascii_case("Error")
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: bool,
    pub message: String,
}

#[async_trait]
pub trait CdController: Send + Sync {
    /// The application deploying `environment`; `None` if there is none.
    async fn get_application(&self, environment: &str) -> Result<Option<Application>>;

    async fn sync_application(&self, environment: &str) -> Result<()>;

    /// Waits until `environment` runs `expected_revision`, or its sync failed.
    async fn wait_until_synced(
        &self,
        environment: &str,
        expected_revision: &str,
    ) -> Result<SyncReport>;
}

#[derive(Deserialize)]
struct ArgoApplication {
    metadata: ArgoMetadata,
    #[serde(default)]
    status: ArgoStatus,
}

#[derive(Deserialize)]
struct ArgoMetadata {
    name: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArgoStatus {
    #[serde(default)]
    sync: ArgoSync,
    #[serde(default)]
    health: ArgoHealth,
    operation_state: Option<ArgoOperationState>,
}

#[derive(Default, Deserialize)]
struct ArgoSync {
    status: Option<String>,
    revision: Option<String>,
}

#[derive(Default, Deserialize)]
struct ArgoHealth {
    status: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ArgoOperationState {
    phase: Option<String>,
    message: Option<String>,
}

impl From<ArgoApplication> for Application {
    fn from(app: ArgoApplication) -> Self {
        let operation = app.status.operation_state;
        let message = operation
            .as_ref()
            .and_then(|op| op.message.clone())
            .or(app.status.health.message);
        Self {
            name: app.metadata.name,
            sync_status: app.status.sync.status.unwrap_or_else(|| "Unknown".into()),
            health: app.status.health.status.unwrap_or_else(|| "Unknown".into()),
            revision: app.status.sync.revision,
            operation_phase: operation.and_then(|op| op.phase),
            message,
        }
    }
}

/// [`CdController`] backed by the Argo CD REST API.
pub struct ArgoCdClient {
    api: ApiClient,
    application_template: String,
    polling: PollingConfig,
    cancel: CancellationToken,
}

impl ArgoCdClient {
    /// # Errors
    ///
    /// Returns `CIRelayError::Config` if `argocd.base-url` or `argocd.token` is missing.
    pub fn new(config: &ArgoCdConfig, retry: RetryPolicy, polling: PollingConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| CIRelayError::Config("argocd.base-url is not set".into()))?;
        let token = config
            .token
            .as_deref()
            .map(Token::from)
            .ok_or_else(|| CIRelayError::Config("argocd.token is not set".into()))?;

        Ok(Self {
            api: ApiClient::new(base_url, Auth::Bearer(token), retry)?,
            application_template: config.application_template.clone(),
            polling,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn application_name(&self, environment: &str) -> String {
        self.application_template.replace("{env}", environment)
    }

    async fn fetch(&self, name: &str, refresh: bool) -> Result<Application> {
        let mut url = self.api.endpoint(&format!("api/v1/applications/{name}"))?;
        if refresh {
            url.query_pairs_mut().append_pair("refresh", "normal");
        }
        let app: ArgoApplication = self.api.get_json(url).await?;
        Ok(app.into())
    }
}

#[async_trait]
impl CdController for ArgoCdClient {
    async fn get_application(&self, environment: &str) -> Result<Option<Application>> {
        optional(self.fetch(&self.application_name(environment), false).await)
    }

    async fn sync_application(&self, environment: &str) -> Result<()> {
        let name = self.application_name(environment);
        let url = self.api.endpoint(&format!("api/v1/applications/{name}/sync"))?;
        self.api
            .send(Method::POST, url, Some(&serde_json::json!({ "prune": false })))
            .await?;
        info!("Requested sync of {name}");
        Ok(())
    }

    async fn wait_until_synced(
        &self,
        environment: &str,
        expected_revision: &str,
    ) -> Result<SyncReport> {
        let name = self.application_name(environment);
        let subject = format!("application {name}");
        let poller = Poller::new(self.polling.sync_policy())
            .with_cancellation(self.cancel.clone())
            .with_max_fetch_failures(self.polling.max_fetch_failures);

        let outcome = poller
            .await_terminal(
                &subject,
                || self.fetch(&name, true),
                |app: &Application| app.is_synced_to(expected_revision) || app.has_failed(),
            )
            .await?;

        match outcome {
            PollOutcome::Terminal(app) if app.is_synced_to(expected_revision) => {
                info!("{name} is synced to {expected_revision}");
                Ok(SyncReport {
                    synced: true,
                    message: format!("{name} synced to {expected_revision}"),
                })
            }
            PollOutcome::Terminal(app) => {
                debug!("{name} failed to sync: {app:?}");
                Ok(SyncReport {
                    synced: false,
                    message: app.message.unwrap_or_else(|| {
                        format!("{name} is {} / {}", app.sync_status, app.health)
                    }),
                })
            }
            PollOutcome::TimedOut { elapsed, .. } => Err(CIRelayError::Timeout {
                subject,
                elapsed,
                last_status: None,
            }),
            PollOutcome::Cancelled { .. } => Err(CIRelayError::Cancelled { subject }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server, ServerGuard};

    use super::*;

    fn app(sync: &str, health: &str, revision: &str) -> String {
        format!(
            r#"{{"metadata": {{"name": "web-staging"}},
                "status": {{"sync": {{"status": "{sync}", "revision": "{revision}"}},
                           "health": {{"status": "{health}"}}}}}}"#
        )
    }

    fn client_for(server: &ServerGuard) -> ArgoCdClient {
        let config = ArgoCdConfig {
            base_url: Some(server.url()),
            token: Some("argo-token".into()),
            application_template: "web-{env}".into(),
        };
        let polling = PollingConfig {
            sync_timeout: Duration::from_secs(60),
            interval: Duration::from_millis(10),
            ..PollingConfig::default()
        };
        ArgoCdClient::new(&config, RetryPolicy::none(), polling).unwrap()
    }

    #[test]
    fn test_application_sync_checks() {
        let mut app = Application {
            name: "web".into(),
            sync_status: "Synced".into(),
            health: "Healthy".into(),
            revision: Some("cafef00d1234".into()),
            operation_phase: None,
            message: None,
        };
        assert!(app.is_synced_to("cafef00d"));
        assert!(!app.is_synced_to("deadbeef"));
        assert!(!app.has_failed());

        app.operation_phase = Some("Failed".into());
        assert!(app.has_failed());
    }

    #[test]
    fn test_requires_base_url_and_token() {
        let config = ArgoCdConfig::default();
        assert!(ArgoCdClient::new(&config, RetryPolicy::none(), PollingConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_missing_application_is_none() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/applications/web-prod")
            .with_status(404)
            .create_async()
            .await;
        let client = client_for(&server);
        assert!(client.get_application("prod").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_and_wait() {
        let mut server = Server::new_async().await;
        let sync = server
            .mock("POST", "/api/v1/applications/web-staging/sync")
            .match_header("authorization", "Bearer argo-token")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/applications/web-staging")
            .match_query(Matcher::UrlEncoded("refresh".into(), "normal".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(app("Synced", "Healthy", "cafef00d00000000"))
            .create_async()
            .await;
        let client = client_for(&server);

        client.sync_application("staging").await.unwrap();
        let report = client.wait_until_synced("staging", "cafef00d").await.unwrap();
        assert!(report.synced);
        sync.assert_async().await;
    }

    #[tokio::test]
    async fn test_degraded_application_reports_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/applications/web-staging")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(app("OutOfSync", "Degraded", "0000000"))
            .create_async()
            .await;
        let client = client_for(&server);

        let report = client.wait_until_synced("staging", "cafef00d").await.unwrap();
        assert!(!report.synced);
        assert!(report.message.contains("Degraded"));
    }
}
