use log::info;
use reqwest::Method;

use crate::auth::Token;
use crate::error::Result;
use crate::http::{ApiClient, Auth, RetryPolicy, ValueList};

use super::types::{AzureBuild, AzureDefinition, PipelinePermission, PipelinePermissions};

const API_VERSION: &str = "7.1";
const PERMISSIONS_API_VERSION: &str = "7.1-preview.1";

/// Statuses Azure reports for builds that have not finished.
const IN_FLIGHT_FILTER: &str = "notStarted,postponed,inProgress,cancelling";

/// Filters for listing builds of one definition. Unset fields are not sent.
#[derive(Debug, Clone, Default)]
pub struct BuildQuery {
    pub branch_name: Option<String>,
    pub status_filter: Option<&'static str>,
    pub top: usize,
}

impl BuildQuery {
    pub fn in_flight(top: usize) -> Self {
        Self {
            status_filter: Some(IN_FLIGHT_FILTER),
            top,
            ..Self::default()
        }
    }
}

/// Azure DevOps REST client scoped to one organization and project.
#[derive(Clone)]
pub struct AzureClient {
    api: ApiClient,
}

impl AzureClient {
    /// # Arguments
    ///
    /// * `base_url` - Azure DevOps base URL (e.g., "https://dev.azure.com")
    /// * `organization` / `project` - path segments every call is scoped to
    /// * `token` - personal access token, sent as the basic-auth password
    pub fn new(
        base_url: &str,
        organization: &str,
        project: &str,
        token: Token,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base = format!(
            "{}/{organization}/{project}",
            base_url.trim_end_matches('/')
        );
        let auth = Auth::Basic {
            user: String::new(),
            token,
        };
        Ok(Self {
            api: ApiClient::new(&base, auth, retry)?,
        })
    }

    pub async fn list_definitions(&self, name: &str) -> Result<Vec<AzureDefinition>> {
        let mut url = self.api.endpoint("_apis/build/definitions")?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("api-version", API_VERSION);
        let response: ValueList<AzureDefinition> = self.api.get_json(url).await?;
        Ok(response.value)
    }

    /// Builds of `definition_id`, most recently queued first.
    pub async fn list_builds(
        &self,
        definition_id: &str,
        query: &BuildQuery,
    ) -> Result<Vec<AzureBuild>> {
        let mut url = self.api.endpoint("_apis/build/builds")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("definitions", definition_id);
            if let Some(branch) = &query.branch_name {
                pairs.append_pair("branchName", branch);
            }
            if let Some(status) = query.status_filter {
                pairs.append_pair("statusFilter", status);
            }
            pairs
                .append_pair("$top", &query.top.max(1).to_string())
                .append_pair("queryOrder", "queueTimeDescending")
                .append_pair("api-version", API_VERSION);
        }
        let response: ValueList<AzureBuild> = self.api.get_json(url).await?;
        Ok(response.value)
    }

    pub async fn get_build(&self, build_id: &str) -> Result<AzureBuild> {
        let mut url = self.api.endpoint(&format!("_apis/build/builds/{build_id}"))?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        self.api.get_json(url).await
    }

    /// Grants `pipeline_id` access to a protected resource (`queue` or `variablegroup`).
    pub async fn authorize_resource(
        &self,
        resource_type: &str,
        resource_id: u64,
        pipeline_id: u64,
    ) -> Result<()> {
        let mut url = self.api.endpoint(&format!(
            "_apis/pipelines/pipelinePermissions/{resource_type}/{resource_id}"
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", PERMISSIONS_API_VERSION);

        let body = PipelinePermissions {
            pipelines: vec![PipelinePermission {
                id: pipeline_id,
                authorized: true,
            }],
        };
        self.api.send(Method::PATCH, url, Some(&body)).await?;
        info!("Authorized pipeline {pipeline_id} for {resource_type} {resource_id}");
        Ok(())
    }
}
