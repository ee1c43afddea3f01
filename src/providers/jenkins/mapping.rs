use crate::locator::CommitEvidence;
use crate::status::{normalize_status, PipelineStatus, StatusRule, TriggerReason};
use crate::trigger::{classify, mentions, TriggerRule};

use super::types::{JenkinsBranchBuild, JenkinsBuild, JenkinsCause, JenkinsParameter};

const COMMIT_PARAMETERS: &[&str] = &["GIT_COMMIT", "COMMIT_SHA", "GIT_SHA", "sha1"];
const PULL_REQUEST_PARAMETERS: &[&str] = &["ghprbPullId", "CHANGE_ID"];
const PULL_REQUEST_COMMIT_PARAMETERS: &[&str] = &["ghprbActualCommit"];
const BRANCH_PARAMETERS: &[&str] = &["BRANCH_NAME", "GIT_BRANCH", "ghprbSourceBranch"];

/// Jenkins has no separate state field, so one is derived: a build is `building`,
/// `completed` once it has a result, and `queued` before that.
pub const STATUS_TABLE: &[StatusRule] = &[
    StatusRule::new(Some("building"), None, PipelineStatus::Running),
    StatusRule::new(Some("queued"), None, PipelineStatus::Pending),
    StatusRule::new(Some("completed"), Some("SUCCESS"), PipelineStatus::Success),
    StatusRule::new(Some("completed"), Some("FAILURE"), PipelineStatus::Failure),
    StatusRule::new(Some("completed"), Some("UNSTABLE"), PipelineStatus::Failure),
    StatusRule::new(Some("completed"), Some("ABORTED"), PipelineStatus::Cancelled),
    StatusRule::new(Some("completed"), Some("NOT_BUILT"), PipelineStatus::Cancelled),
];

fn state(build: &JenkinsBuild) -> &'static str {
    if build.building {
        "building"
    } else if build.result.is_some() {
        "completed"
    } else {
        "queued"
    }
}

pub fn normalize(build: &JenkinsBuild) -> PipelineStatus {
    normalize_status(STATUS_TABLE, state(build), build.result.as_deref())
}

pub(crate) fn causes(build: &JenkinsBuild) -> impl Iterator<Item = &JenkinsCause> {
    build.actions.iter().flat_map(|action| action.causes.iter())
}

pub(crate) fn parameters(build: &JenkinsBuild) -> impl Iterator<Item = &JenkinsParameter> {
    build.actions.iter().flat_map(|action| action.parameters.iter())
}

/// Values of the parameters named in `names`, compared case-insensitively.
pub(crate) fn parameter_values(build: &JenkinsBuild, names: &[&str]) -> Vec<String> {
    parameters(build)
        .filter(|p| names.iter().any(|name| p.name.eq_ignore_ascii_case(name)))
        .filter_map(JenkinsParameter::text)
        .filter(|value| !value.is_empty())
        .collect()
}

fn cause_mentions(build: &JenkinsBuild, needles: &[&str]) -> bool {
    causes(build).any(|cause| {
        let class = cause.class.as_deref().unwrap_or_default();
        needles
            .iter()
            .any(|needle| mentions(class, needle) || mentions(&cause.short_description, needle))
    })
}

fn pull_request_cause(build: &JenkinsBuild) -> bool {
    cause_mentions(build, &["ghprb", "PullRequest", "pull request"])
        || !parameter_values(build, PULL_REQUEST_PARAMETERS).is_empty()
}

fn push_cause(build: &JenkinsBuild) -> bool {
    cause_mentions(build, &["SCMTrigger", "Push", "BranchEvent", "SCM change"])
}

fn user_cause(build: &JenkinsBuild) -> bool {
    cause_mentions(build, &["UserIdCause", "Started by user"])
}

fn timer_cause(build: &JenkinsBuild) -> bool {
    cause_mentions(build, &["TimerTrigger", "Started by timer"])
}

fn remote_cause(build: &JenkinsBuild) -> bool {
    cause_mentions(build, &["RemoteCause", "UpstreamCause", "remote host", "Started by upstream"])
}

/// Causes are free text, so there is no explicit trigger field to trust first.
pub const TRIGGER_RULES: &[TriggerRule<JenkinsBuild>] = &[
    TriggerRule::new("pull-request-cause", TriggerReason::PullRequest, pull_request_cause),
    TriggerRule::new("push-cause", TriggerReason::Push, push_cause),
    TriggerRule::new("user-cause", TriggerReason::Manual, user_cause),
    TriggerRule::new("timer-cause", TriggerReason::Schedule, timer_cause),
    TriggerRule::new("remote-cause", TriggerReason::Api, remote_cause),
];

pub fn classify_trigger(build: &JenkinsBuild) -> TriggerReason {
    classify(TRIGGER_RULES, build)
}

pub fn pull_request_number(build: &JenkinsBuild) -> Option<u64> {
    parameter_values(build, PULL_REQUEST_PARAMETERS)
        .iter()
        .find_map(|value| value.parse().ok())
}

/// Entries of the git plugin's branch map recorded by this build itself.
///
/// The map is cumulative: every build repeats the last revision of every branch
/// the job has ever built, so only entries naming this build number count.
fn own_branch_builds(build: &JenkinsBuild) -> impl Iterator<Item = (&String, &JenkinsBranchBuild)> {
    build
        .actions
        .iter()
        .flat_map(|action| action.builds_by_branch_name.iter())
        .filter(move |(_, entry)| entry.build_number == Some(build.number))
}

/// Branch names the build reports having built, without remote prefixes.
pub fn built_branches(build: &JenkinsBuild) -> Vec<String> {
    let mut names: Vec<String> = build
        .actions
        .iter()
        .filter_map(|action| action.last_built_revision.as_ref())
        .flat_map(|revision| revision.branch.iter().map(|b| b.name.clone()))
        .chain(own_branch_builds(build).map(|(name, _)| name.clone()))
        .chain(parameter_values(build, BRANCH_PARAMETERS))
        .collect();
    for name in &mut names {
        *name = short_branch(name).to_string();
    }
    names.sort();
    names.dedup();
    names
}

fn short_branch(name: &str) -> &str {
    ["refs/remotes/origin/", "refs/heads/", "origin/"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

impl CommitEvidence for JenkinsBuild {
    fn run_number(&self) -> u64 {
        self.number
    }

    fn scm_revisions(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|action| action.last_built_revision.as_ref())
            .map(|revision| revision.sha1.clone())
            .collect()
    }

    fn branch_revisions(&self) -> Vec<String> {
        own_branch_builds(self)
            .filter_map(|(_, entry)| entry.revision.as_ref())
            .map(|revision| revision.sha1.clone())
            .collect()
    }

    fn commit_parameters(&self) -> Vec<String> {
        parameter_values(self, COMMIT_PARAMETERS)
    }

    fn pull_request_commits(&self) -> Vec<String> {
        parameter_values(self, PULL_REQUEST_COMMIT_PARAMETERS)
    }

    fn descriptions(&self) -> Vec<String> {
        causes(self)
            .map(|cause| cause.short_description.clone())
            .chain(self.description.clone())
            .collect()
    }
}
