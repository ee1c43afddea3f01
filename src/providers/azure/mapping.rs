use std::collections::HashMap;

use crate::locator::CommitEvidence;
use crate::status::{normalize_status, PipelineStatus, StatusRule, TriggerReason};
use crate::trigger::{classify, TriggerRule};

use super::types::AzureBuild;

/// Queue-time parameters that carry the commit a build was asked to test.
const COMMIT_PARAMETER_KEYS: &[&str] = &["commitSha", "sourceVersion", "GIT_COMMIT", "sha"];

/// Build `status` × `result` table.
///
/// `partiallySucceeded` counts as a success: the build produced its artifacts
/// and only non-blocking steps failed.
pub const STATUS_TABLE: &[StatusRule] = &[
    StatusRule::new(Some("notStarted"), None, PipelineStatus::Pending),
    StatusRule::new(Some("postponed"), None, PipelineStatus::Pending),
    StatusRule::new(Some("inProgress"), None, PipelineStatus::Running),
    StatusRule::new(Some("cancelling"), None, PipelineStatus::Running),
    StatusRule::new(Some("completed"), Some("succeeded"), PipelineStatus::Success),
    StatusRule::new(Some("completed"), Some("partiallySucceeded"), PipelineStatus::Success),
    StatusRule::new(Some("completed"), Some("failed"), PipelineStatus::Failure),
    StatusRule::new(Some("completed"), Some("canceled"), PipelineStatus::Cancelled),
];

pub fn normalize(build: &AzureBuild) -> PipelineStatus {
    normalize_status(
        STATUS_TABLE,
        build.status.as_deref().unwrap_or_default(),
        build.result.as_deref(),
    )
}

fn reason_is(build: &AzureBuild, names: &[&str]) -> bool {
    names.iter().any(|name| build.reason.eq_ignore_ascii_case(name))
}

fn reason_pull_request(build: &AzureBuild) -> bool {
    reason_is(build, &["pullRequest"])
}

fn reason_push(build: &AzureBuild) -> bool {
    reason_is(build, &["individualCI", "batchedCI"])
}

fn reason_manual(build: &AzureBuild) -> bool {
    reason_is(build, &["manual", "userCreated"])
}

fn reason_schedule(build: &AzureBuild) -> bool {
    reason_is(build, &["schedule"])
}

fn reason_api(build: &AzureBuild) -> bool {
    reason_is(build, &["triggered", "buildCompletion", "resourceTrigger"])
}

fn has_trigger_info(build: &AzureBuild, prefix: &str) -> bool {
    build.trigger_info.keys().any(|key| key.starts_with(prefix))
}

fn pull_request_ref(build: &AzureBuild) -> bool {
    build.source_branch.starts_with("refs/pull/") || has_trigger_info(build, "pr.")
}

fn branch_push(build: &AzureBuild) -> bool {
    has_trigger_info(build, "ci.")
        || (build.source_branch.starts_with("refs/heads/") && build.source_version.is_some())
}

fn user_created(build: &AzureBuild) -> bool {
    build
        .requested_for
        .as_ref()
        .and_then(|identity| identity.unique_name.as_deref())
        .is_some_and(|name| name.contains('@'))
}

// Scheduled builds are queued on behalf of the collection service account.
fn service_identity(build: &AzureBuild) -> bool {
    build.requested_for.as_ref().is_some_and(|identity| {
        identity
            .display_name
            .starts_with("Microsoft.VisualStudio.Services.TFS")
    })
}

fn remote_reason(build: &AzureBuild) -> bool {
    reason_is(build, &["checkInShelveset", "validateShelveset", "all"])
}

pub const TRIGGER_RULES: &[TriggerRule<AzureBuild>] = &[
    TriggerRule::new("reason:pullRequest", TriggerReason::PullRequest, reason_pull_request),
    TriggerRule::new("reason:ci", TriggerReason::Push, reason_push),
    TriggerRule::new("reason:manual", TriggerReason::Manual, reason_manual),
    TriggerRule::new("reason:schedule", TriggerReason::Schedule, reason_schedule),
    TriggerRule::new("reason:triggered", TriggerReason::Api, reason_api),
    TriggerRule::new("pull-request-ref", TriggerReason::PullRequest, pull_request_ref),
    TriggerRule::new("branch-push", TriggerReason::Push, branch_push),
    TriggerRule::new("user-created", TriggerReason::Manual, user_created),
    TriggerRule::new("service-identity", TriggerReason::Schedule, service_identity),
    TriggerRule::new("remote-reason", TriggerReason::Api, remote_reason),
];

pub fn classify_trigger(build: &AzureBuild) -> TriggerReason {
    classify(TRIGGER_RULES, build)
}

/// Pull request number from trigger info, falling back to a `refs/pull/{n}/merge` branch.
pub fn pull_request_number(build: &AzureBuild) -> Option<u64> {
    build
        .trigger_info
        .get("pr.number")
        .and_then(|n| n.parse().ok())
        .or_else(|| {
            build
                .source_branch
                .strip_prefix("refs/pull/")
                .and_then(|rest| rest.split('/').next())
                .and_then(|n| n.parse().ok())
        })
}

fn parameters(build: &AzureBuild) -> HashMap<String, String> {
    build
        .parameters
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

impl CommitEvidence for AzureBuild {
    fn run_number(&self) -> u64 {
        self.id
    }

    fn scm_revisions(&self) -> Vec<String> {
        self.source_version.iter().cloned().collect()
    }

    fn branch_revisions(&self) -> Vec<String> {
        self.trigger_info.get("ci.sourceSha").cloned().into_iter().collect()
    }

    fn commit_parameters(&self) -> Vec<String> {
        let params = parameters(self);
        params
            .iter()
            .filter(|(key, _)| {
                COMMIT_PARAMETER_KEYS
                    .iter()
                    .any(|wanted| key.eq_ignore_ascii_case(wanted))
            })
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn pull_request_commits(&self) -> Vec<String> {
        self.trigger_info.get("pr.sourceSha").cloned().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::{find_run_by_commit, MatchMethod};
    use crate::providers::azure::types::AzureIdentity;
    use crate::status::EventType;

    fn build(status: &str, result: Option<&str>) -> AzureBuild {
        AzureBuild {
            status: Some(status.to_string()),
            result: result.map(ToString::to_string),
            ..AzureBuild::default()
        }
    }

    #[test]
    fn test_status_table() {
        assert_eq!(normalize(&build("notStarted", None)), PipelineStatus::Pending);
        assert_eq!(normalize(&build("postponed", None)), PipelineStatus::Pending);
        assert_eq!(normalize(&build("inProgress", None)), PipelineStatus::Running);
        assert_eq!(normalize(&build("cancelling", None)), PipelineStatus::Running);
        assert_eq!(normalize(&build("completed", Some("succeeded"))), PipelineStatus::Success);
        assert_eq!(normalize(&build("completed", Some("failed"))), PipelineStatus::Failure);
        assert_eq!(normalize(&build("completed", Some("canceled"))), PipelineStatus::Cancelled);
    }

    #[test]
    fn test_partially_succeeded_counts_as_success() {
        assert_eq!(
            normalize(&build("completed", Some("partiallySucceeded"))),
            PipelineStatus::Success
        );
    }

    #[test]
    fn test_unmapped_status_is_unknown() {
        assert_eq!(normalize(&build("completed", Some("none"))), PipelineStatus::Unknown);
        assert_eq!(normalize(&build("completed", None)), PipelineStatus::Unknown);
        assert_eq!(normalize(&AzureBuild::default()), PipelineStatus::Unknown);
    }

    #[test]
    fn test_every_table_row_is_canonical() {
        for rule in STATUS_TABLE {
            let state = rule.state.unwrap_or("any");
            assert_eq!(normalize_status(STATUS_TABLE, state, rule.result), rule.status);
        }
    }

    #[test]
    fn test_reason_field_is_trusted() {
        let mut b = AzureBuild {
            source_branch: "refs/pull/7/merge".into(),
            ..AzureBuild::default()
        };
        b.reason = "manual".into();
        assert_eq!(classify_trigger(&b), TriggerReason::Manual);
        b.reason = "batchedCI".into();
        assert_eq!(classify_trigger(&b), TriggerReason::Push);
        b.reason = "buildCompletion".into();
        assert_eq!(classify_trigger(&b), TriggerReason::Api);
    }

    #[test]
    fn test_user_created_reason_beats_branch_push_hint() {
        let mut b = AzureBuild {
            source_branch: "refs/heads/main".into(),
            source_version: Some("abc1234".into()),
            ..AzureBuild::default()
        };
        b.reason = "userCreated".into();
        assert_eq!(classify_trigger(&b), TriggerReason::Manual);
        assert!(!EventType::Push.accepts(classify_trigger(&b)));
    }

    #[test]
    fn test_pull_request_hint_beats_push_hint() {
        let mut b = AzureBuild {
            source_branch: "refs/pull/7/merge".into(),
            source_version: Some("abc1234".into()),
            ..AzureBuild::default()
        };
        b.trigger_info.insert("ci.sourceSha".into(), "abc1234".into());
        assert_eq!(classify_trigger(&b), TriggerReason::PullRequest);

        b.source_branch = "refs/heads/main".into();
        assert_eq!(classify_trigger(&b), TriggerReason::Push);
    }

    #[test]
    fn test_identity_hints() {
        let mut b = AzureBuild {
            requested_for: Some(AzureIdentity {
                display_name: "Jo Doe".into(),
                unique_name: Some("jo@example.com".into()),
            }),
            ..AzureBuild::default()
        };
        assert_eq!(classify_trigger(&b), TriggerReason::Manual);

        b.requested_for = Some(AzureIdentity {
            display_name: "Microsoft.VisualStudio.Services.TFS".into(),
            unique_name: None,
        });
        assert_eq!(classify_trigger(&b), TriggerReason::Schedule);
    }

    #[test]
    fn test_empty_build_is_unknown() {
        assert_eq!(classify_trigger(&AzureBuild::default()), TriggerReason::Unknown);
    }

    #[test]
    fn test_pull_request_number() {
        let mut b = AzureBuild {
            source_branch: "refs/pull/42/merge".into(),
            ..AzureBuild::default()
        };
        assert_eq!(pull_request_number(&b), Some(42));
        b.trigger_info.insert("pr.number".into(), "43".into());
        assert_eq!(pull_request_number(&b), Some(43));
        assert_eq!(pull_request_number(&AzureBuild::default()), None);
    }

    #[test]
    fn test_commit_found_in_parameters() {
        let history = vec![
            AzureBuild {
                id: 12,
                parameters: Some(r#"{"commitSha": "feedface99"}"#.into()),
                ..AzureBuild::default()
            },
            AzureBuild {
                id: 11,
                source_version: Some("0000000000".into()),
                ..AzureBuild::default()
            },
        ];
        let found = find_run_by_commit(&history, "FEEDFACE", 10).expect("match");
        assert_eq!(found.run.id, 12);
        assert_eq!(found.method, MatchMethod::BuildParameter);
    }
}
