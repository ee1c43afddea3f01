use crate::locator::CommitEvidence;
use crate::status::{normalize_status, PipelineStatus, StatusRule, TriggerReason};
use crate::trigger::{classify, TriggerRule};

use super::types::GitHubWorkflowRun;

/// Workflow run `status` × `conclusion` table.
///
/// `neutral` counts as success and `skipped` as cancelled. `action_required` and
/// `stale` are left out on purpose: such runs need a human and resolve to `Unknown`.
pub const STATUS_TABLE: &[StatusRule] = &[
    StatusRule::new(Some("queued"), None, PipelineStatus::Pending),
    StatusRule::new(Some("waiting"), None, PipelineStatus::Pending),
    StatusRule::new(Some("requested"), None, PipelineStatus::Pending),
    StatusRule::new(Some("pending"), None, PipelineStatus::Pending),
    StatusRule::new(Some("in_progress"), None, PipelineStatus::Running),
    StatusRule::new(Some("completed"), Some("success"), PipelineStatus::Success),
    StatusRule::new(Some("completed"), Some("neutral"), PipelineStatus::Success),
    StatusRule::new(Some("completed"), Some("failure"), PipelineStatus::Failure),
    StatusRule::new(Some("completed"), Some("timed_out"), PipelineStatus::Failure),
    StatusRule::new(Some("completed"), Some("startup_failure"), PipelineStatus::Failure),
    StatusRule::new(Some("completed"), Some("cancelled"), PipelineStatus::Cancelled),
    StatusRule::new(Some("completed"), Some("skipped"), PipelineStatus::Cancelled),
];

pub fn normalize(run: &GitHubWorkflowRun) -> PipelineStatus {
    normalize_status(
        STATUS_TABLE,
        run.status.as_deref().unwrap_or_default(),
        run.conclusion.as_deref(),
    )
}

fn event_is(run: &GitHubWorkflowRun, names: &[&str]) -> bool {
    names.iter().any(|name| run.event.eq_ignore_ascii_case(name))
}

fn event_pull_request(run: &GitHubWorkflowRun) -> bool {
    event_is(run, &["pull_request", "pull_request_target", "pull_request_review"])
}

fn event_push(run: &GitHubWorkflowRun) -> bool {
    event_is(run, &["push"])
}

fn event_manual(run: &GitHubWorkflowRun) -> bool {
    event_is(run, &["workflow_dispatch"])
}

fn event_schedule(run: &GitHubWorkflowRun) -> bool {
    event_is(run, &["schedule"])
}

fn event_api(run: &GitHubWorkflowRun) -> bool {
    event_is(run, &["repository_dispatch", "workflow_call", "workflow_run"])
}

fn linked_pull_request(run: &GitHubWorkflowRun) -> bool {
    !run.pull_requests.is_empty()
}

fn head_commit(run: &GitHubWorkflowRun) -> bool {
    run.head_commit.is_some()
}

fn triggering_actor(run: &GitHubWorkflowRun) -> bool {
    run.triggering_actor.is_some()
}

pub const TRIGGER_RULES: &[TriggerRule<GitHubWorkflowRun>] = &[
    TriggerRule::new("event:pull_request", TriggerReason::PullRequest, event_pull_request),
    TriggerRule::new("event:push", TriggerReason::Push, event_push),
    TriggerRule::new("event:workflow_dispatch", TriggerReason::Manual, event_manual),
    TriggerRule::new("event:schedule", TriggerReason::Schedule, event_schedule),
    TriggerRule::new("event:dispatch", TriggerReason::Api, event_api),
    TriggerRule::new("linked-pull-request", TriggerReason::PullRequest, linked_pull_request),
    TriggerRule::new("head-commit", TriggerReason::Push, head_commit),
    TriggerRule::new("triggering-actor", TriggerReason::Manual, triggering_actor),
];

pub fn classify_trigger(run: &GitHubWorkflowRun) -> TriggerReason {
    classify(TRIGGER_RULES, run)
}

impl CommitEvidence for GitHubWorkflowRun {
    fn run_number(&self) -> u64 {
        self.run_number
    }

    fn scm_revisions(&self) -> Vec<String> {
        vec![self.head_sha.clone()]
    }

    fn pull_request_commits(&self) -> Vec<String> {
        self.pull_requests.iter().map(|pr| pr.head.sha.clone()).collect()
    }

    fn descriptions(&self) -> Vec<String> {
        self.head_commit
            .iter()
            .map(|commit| commit.message.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::github::types::{
        GitHubActor, GitHubCommit, GitHubHead, GitHubPullRequestRef,
    };

    fn run(status: &str, conclusion: Option<&str>) -> GitHubWorkflowRun {
        GitHubWorkflowRun {
            status: Some(status.to_string()),
            conclusion: conclusion.map(ToString::to_string),
            ..GitHubWorkflowRun::default()
        }
    }

    #[test]
    fn test_status_table() {
        assert_eq!(normalize(&run("queued", None)), PipelineStatus::Pending);
        assert_eq!(normalize(&run("in_progress", None)), PipelineStatus::Running);
        assert_eq!(normalize(&run("completed", Some("success"))), PipelineStatus::Success);
        assert_eq!(normalize(&run("completed", Some("neutral"))), PipelineStatus::Success);
        assert_eq!(normalize(&run("completed", Some("timed_out"))), PipelineStatus::Failure);
        assert_eq!(normalize(&run("completed", Some("cancelled"))), PipelineStatus::Cancelled);
        assert_eq!(normalize(&run("completed", Some("skipped"))), PipelineStatus::Cancelled);
    }

    #[test]
    fn test_unmapped_status_is_unknown() {
        assert_eq!(
            normalize(&run("completed", Some("action_required"))),
            PipelineStatus::Unknown
        );
        assert_eq!(normalize(&run("completed", None)), PipelineStatus::Unknown);
        assert_eq!(normalize(&GitHubWorkflowRun::default()), PipelineStatus::Unknown);
    }

    #[test]
    fn test_every_table_row_is_canonical() {
        for rule in STATUS_TABLE {
            let state = rule.state.unwrap_or("any");
            assert_eq!(normalize_status(STATUS_TABLE, state, rule.result), rule.status);
        }
    }

    #[test]
    fn test_explicit_event_is_trusted() {
        let mut r = GitHubWorkflowRun::default();
        r.event = "push".into();
        r.pull_requests = vec![GitHubPullRequestRef {
            number: 4,
            head: GitHubHead {
                sha: "abc".into(),
                ref_: "feature".into(),
            },
        }];
        assert_eq!(classify_trigger(&r), TriggerReason::Push);

        r.event = "workflow_dispatch".into();
        assert_eq!(classify_trigger(&r), TriggerReason::Manual);

        r.event = "schedule".into();
        assert_eq!(classify_trigger(&r), TriggerReason::Schedule);

        r.event = "repository_dispatch".into();
        assert_eq!(classify_trigger(&r), TriggerReason::Api);
    }

    #[test]
    fn test_pull_request_hint_beats_push_hint() {
        let r = GitHubWorkflowRun {
            event: "merge_group".into(),
            head_commit: Some(GitHubCommit {
                id: "abc".into(),
                message: "change".into(),
            }),
            pull_requests: vec![GitHubPullRequestRef {
                number: 4,
                head: GitHubHead {
                    sha: "abc".into(),
                    ref_: "feature".into(),
                },
            }],
            ..GitHubWorkflowRun::default()
        };
        assert_eq!(classify_trigger(&r), TriggerReason::PullRequest);
    }

    #[test]
    fn test_actor_only_is_manual_and_empty_is_unknown() {
        let mut r = GitHubWorkflowRun::default();
        assert_eq!(classify_trigger(&r), TriggerReason::Unknown);

        r.triggering_actor = Some(GitHubActor {
            login: "octocat".into(),
        });
        assert_eq!(classify_trigger(&r), TriggerReason::Manual);
    }
}
