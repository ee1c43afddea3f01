use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An Azure Pipelines build definition.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureDefinition {
    pub id: u64,
    pub name: String,
}

/// An Azure Pipelines build, as returned by the build REST API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureBuild {
    /// Build ID, monotonically increasing within an organization
    pub id: u64,
    /// Human-facing build number (e.g., "20240501.3")
    #[serde(default)]
    pub build_number: String,
    /// notStarted, inProgress, cancelling, postponed, completed
    pub status: Option<String>,
    /// succeeded, partiallySucceeded, failed, canceled
    pub result: Option<String>,
    /// Why the build was queued (manual, individualCI, pullRequest, ...)
    #[serde(default)]
    pub reason: String,
    /// Full ref (e.g., "refs/heads/main", "refs/pull/42/merge")
    #[serde(default)]
    pub source_branch: String,
    pub source_version: Option<String>,
    /// Provider-populated trigger details such as "pr.number" or "ci.sourceSha"
    #[serde(default)]
    pub trigger_info: HashMap<String, String>,
    /// Queue-time parameters, JSON-encoded as a string map
    pub parameters: Option<String>,
    pub queue_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub definition: Option<AzureDefinition>,
    pub repository: Option<AzureRepository>,
    pub requested_for: Option<AzureIdentity>,
    pub requested_by: Option<AzureIdentity>,
    #[serde(rename = "_links", default)]
    pub links: AzureLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzureRepository {
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureIdentity {
    #[serde(default)]
    pub display_name: String,
    pub unique_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzureLinks {
    pub web: Option<AzureLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureLink {
    pub href: String,
}

/// Body of a pipeline permission update.
#[derive(Debug, Serialize)]
pub(super) struct PipelinePermissions {
    pub pipelines: Vec<PipelinePermission>,
}

#[derive(Debug, Serialize)]
pub(super) struct PipelinePermission {
    pub id: u64,
    pub authorized: bool,
}
