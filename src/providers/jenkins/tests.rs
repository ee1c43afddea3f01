use mockito::{Matcher, Server, ServerGuard};

use super::*;
use crate::config::JenkinsConfig;
use crate::error::CIRelayError;
use crate::http::RetryPolicy;
use crate::providers::CiProvider;
use crate::status::{EventType, PipelineRef, PipelineStatus, TriggerReason};

const JOB: &str = r#"{"name": "deploy", "fullName": "platform/deploy"}"#;

const BUILDS: &str = r#"{
  "name": "deploy",
  "fullName": "platform/deploy",
  "builds": [
    {
      "number": 57, "url": "https://ci.example.com/job/platform/job/deploy/57/",
      "building": true, "result": null, "timestamp": 1714557600000, "duration": 0,
      "actions": [
        {"_class": "hudson.model.CauseAction", "causes": [
          {"_class": "org.jenkinsci.plugins.ghprb.GhprbCause", "shortDescription": "GitHub pull request #42 of commit deadbeef"}
        ]},
        {"_class": "hudson.model.ParametersAction", "parameters": [
          {"name": "ghprbPullId", "value": "42"},
          {"name": "ghprbActualCommit", "value": "deadbeef00000000000000000000000000000000"}
        ]},
        {}
      ]
    },
    {
      "number": 56, "url": "https://ci.example.com/job/platform/job/deploy/56/",
      "building": false, "result": "UNSTABLE", "timestamp": 1714554000000, "duration": 600000,
      "actions": [
        {"_class": "hudson.model.CauseAction", "causes": [
          {"_class": "com.cloudbees.jenkins.GitHubPushCause", "shortDescription": "Started by GitHub push by jo"}
        ]},
        {"_class": "hudson.plugins.git.util.BuildData",
         "lastBuiltRevision": {"SHA1": "cafef00d00000000000000000000000000000000",
                               "branch": [{"SHA1": "cafef00d00000000000000000000000000000000", "name": "refs/remotes/origin/main"}]},
         "buildsByBranchName": {"refs/remotes/origin/main": {"buildNumber": 56,
                                "revision": {"SHA1": "cafef00d00000000000000000000000000000000"}}}}
      ]
    },
    {
      "number": 55, "url": "https://ci.example.com/job/platform/job/deploy/55/",
      "building": false, "result": "SUCCESS", "timestamp": 1714550400000, "duration": 300000,
      "actions": [
        {"_class": "hudson.model.CauseAction", "causes": [
          {"_class": "hudson.model.Cause$UserIdCause", "shortDescription": "Started by user Jo", "userId": "jo"}
        ]},
        {"_class": "hudson.model.ParametersAction", "parameters": [
          {"name": "BRANCH_NAME", "value": "main"}, {"name": "DRY_RUN", "value": false}
        ]}
      ]
    }
  ]
}"#;

fn provider_for(server: &ServerGuard) -> JenkinsProvider {
    let config = JenkinsConfig {
        base_url: Some(server.url()),
        user: Some("ci-bot".into()),
        token: Some("api-token".into()),
        history_depth: 10,
    };
    JenkinsProvider::new(&config, RetryPolicy::none()).unwrap()
}

async fn mock_job(server: &mut ServerGuard) {
    server
        .mock("GET", "/job/platform/job/deploy/api/json")
        .match_query(Matcher::UrlEncoded("tree".into(), "name,fullName".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(JOB)
        .create_async()
        .await;
    server
        .mock("GET", "/job/platform/job/deploy/api/json")
        .match_query(Matcher::Regex("builds".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(BUILDS)
        .create_async()
        .await;
}

#[test]
fn test_requires_base_url_and_token_with_user() {
    match JenkinsProvider::new(&JenkinsConfig::default(), RetryPolicy::none()) {
        Err(CIRelayError::Config(message)) => assert!(message.contains("jenkins.base-url")),
        _ => panic!("expected a config error"),
    }

    let config = JenkinsConfig {
        base_url: Some("https://ci.example.com".into()),
        user: Some("ci-bot".into()),
        ..JenkinsConfig::default()
    };
    assert!(JenkinsProvider::new(&config, RetryPolicy::none()).is_err());
}

#[test]
fn test_token_without_user_is_rejected() {
    let config = JenkinsConfig {
        base_url: Some("https://ci.example.com".into()),
        token: Some("api-token".into()),
        ..JenkinsConfig::default()
    };
    match JenkinsProvider::new(&config, RetryPolicy::none()) {
        Err(CIRelayError::Config(message)) => assert!(message.contains("jenkins.user")),
        _ => panic!("expected a config error"),
    }
}

#[tokio::test]
async fn test_missing_job_resolves_to_none() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/job/missing/api/json")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let provider = provider_for(&server);

    assert!(provider.resolve_pipeline_id("missing").await.unwrap().is_none());
    let found = provider
        .get_pipeline_for_event("missing", &PipelineRef::Branch("main".into()), EventType::Any)
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_pull_request_lookup_uses_parameters() {
    let mut server = Server::new_async().await;
    mock_job(&mut server).await;
    let provider = provider_for(&server);

    let pipeline = provider
        .get_pipeline_for_event(
            "platform/deploy",
            &PipelineRef::PullRequest {
                number: 42,
                head_sha: Some("DEADBEEF".into()),
            },
            EventType::PullRequest,
        )
        .await
        .unwrap()
        .expect("build for PR 42");

    assert_eq!(pipeline.id.to_string(), "jenkins:platform/deploy/57");
    assert_eq!(pipeline.status, PipelineStatus::Running);
    assert_eq!(pipeline.trigger, TriggerReason::PullRequest);
    assert!(pipeline.finished_at.is_none());
}

#[tokio::test]
async fn test_commit_lookup_reads_git_build_data() {
    let mut server = Server::new_async().await;
    mock_job(&mut server).await;
    let provider = provider_for(&server);

    let pipeline = provider
        .get_pipeline_for_event(
            "platform/deploy",
            &PipelineRef::Commit("cafef00d".into()),
            EventType::Push,
        )
        .await
        .unwrap()
        .expect("push build");

    assert_eq!(pipeline.number, 56);
    assert_eq!(pipeline.status, PipelineStatus::Failure);
    assert_eq!(
        pipeline.commit_sha.as_deref(),
        Some("cafef00d00000000000000000000000000000000")
    );
    let finished = pipeline.finished_at.expect("finished");
    let started = pipeline.started_at.expect("started");
    assert_eq!((finished - started).num_minutes(), 10);
}

#[tokio::test]
async fn test_branch_lookup_prefers_latest_finish() {
    let mut server = Server::new_async().await;
    mock_job(&mut server).await;
    let provider = provider_for(&server);

    let pipeline = provider
        .get_pipeline_for_event(
            "platform/deploy",
            &PipelineRef::Branch("main".into()),
            EventType::Any,
        )
        .await
        .unwrap()
        .expect("build on main");
    assert_eq!(pipeline.number, 56);

    let manual = provider
        .get_pipeline_for_event(
            "platform/deploy",
            &PipelineRef::Branch("main".into()),
            EventType::PullRequest,
        )
        .await
        .unwrap();
    assert!(manual.is_none());
}

#[tokio::test]
async fn test_fetch_pipeline_reads_single_build() {
    let mut server = Server::new_async().await;
    mock_job(&mut server).await;
    let build = server
        .mock("GET", "/job/platform/job/deploy/57/api/json")
        .match_query(Matcher::Any)
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"number": 57, "building": false, "result": "ABORTED", "timestamp": 1714557600000, "duration": 1000}"#)
        .create_async()
        .await;
    let provider = provider_for(&server);

    let pipeline = provider
        .get_pipeline_for_event(
            "platform/deploy",
            &PipelineRef::PullRequest {
                number: 42,
                head_sha: None,
            },
            EventType::Any,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        provider.current_status(&pipeline).await.unwrap(),
        PipelineStatus::Cancelled
    );
    build.assert_async().await;
}

#[tokio::test]
async fn test_list_in_flight() {
    let mut server = Server::new_async().await;
    mock_job(&mut server).await;
    let provider = provider_for(&server);

    let in_flight = provider.list_in_flight("platform/deploy").await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].number, 57);
}
