use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// A job as returned by `{job}/api/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsJob {
    pub name: String,
    pub full_name: Option<String>,
    #[serde(default)]
    pub builds: Vec<JenkinsBuild>,
}

/// A build of a job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsBuild {
    pub number: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub building: bool,
    /// SUCCESS, FAILURE, UNSTABLE, ABORTED, NOT_BUILT; null until finished
    pub result: Option<String>,
    /// Start time in epoch milliseconds
    pub timestamp: Option<i64>,
    /// Duration in milliseconds, 0 while building
    pub duration: Option<i64>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Heterogeneous action list; unknown actions deserialize to empty defaults.
    #[serde(default)]
    pub actions: Vec<JenkinsAction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsAction {
    #[serde(rename = "_class")]
    pub class: Option<String>,
    #[serde(default)]
    pub causes: Vec<JenkinsCause>,
    #[serde(default)]
    pub parameters: Vec<JenkinsParameter>,
    pub last_built_revision: Option<JenkinsRevision>,
    #[serde(default)]
    pub builds_by_branch_name: HashMap<String, JenkinsBranchBuild>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsCause {
    #[serde(rename = "_class")]
    pub class: Option<String>,
    #[serde(default)]
    pub short_description: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsParameter {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl JenkinsParameter {
    /// Parameter value rendered as text; booleans and numbers are stringified.
    pub fn text(&self) -> Option<String> {
        match &self.value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JenkinsRevision {
    #[serde(rename = "SHA1", default)]
    pub sha1: String,
    #[serde(default)]
    pub branch: Vec<JenkinsBranch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsBranch {
    #[serde(rename = "SHA1", default)]
    pub sha1: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsBranchBuild {
    pub build_number: Option<u64>,
    pub revision: Option<JenkinsRevision>,
}
