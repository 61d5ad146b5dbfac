//! GitLab REST client tests against a wiremock server
//!
//! Every request the client makes is matched on method, encoded path and the
//! PRIVATE-TOKEN header, so these tests pin down the wire contract without a network.

use base64::Engine as _;
use repo_migrator::config::{GitLabConfig, RetrySettings};
use repo_migrator::platform::{
    CommitRequest, FileAction, JobStatus, PipelineStatus, PlatformError, Project, RepositoryClient,
};
use repo_migrator::GitLabClient;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "glpat-mock-token";

/// GitLab API mock server with a client pointed at it
struct GitLabApiMock {
    server: MockServer,
    client: GitLabClient,
}

impl GitLabApiMock {
    async fn new() -> Self {
        Self::with_retry(RetrySettings {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        })
        .await
    }

    async fn with_retry(retry: RetrySettings) -> Self {
        let server = MockServer::start().await;
        let config = GitLabConfig {
            base_url: format!("{}/api/v4", server.uri()),
            token: Some(TOKEN.to_string()),
            retry,
            ..GitLabConfig::default()
        };
        let client = GitLabClient::new(&config).expect("client should build");
        Self { server, client }
    }

    async fn mount(&self, mock: Mock) {
        mock.mount(&self.server).await;
    }
}

fn project() -> Project {
    Project::new("101")
}

#[tokio::test]
async fn test_get_file_decodes_base64_at_ref() {
    let api = GitLabApiMock::new().await;
    let encoded = base64::engine::general_purpose::STANDARD.encode("<java.version>11</java.version>");
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/repository/files/pom.xml"))
            .and(query_param("ref", "develop"))
            .and(header("PRIVATE-TOKEN", TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "file_name": "pom.xml",
                "encoding": "base64",
                "content": encoded
            }))),
    )
    .await;

    let content = api.client.get_file(&project(), "pom.xml", "develop").await.unwrap();
    assert_eq!(content.as_deref(), Some("<java.version>11</java.version>"));
}

#[tokio::test]
async fn test_missing_file_and_branch_are_none() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/repository/files/.gitlab-ci.yml"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "404 File Not Found"}))),
    )
    .await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/repository/branches/task-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "404 Branch Not Found"})))
            .expect(1),
    )
    .await;

    assert_eq!(api.client.get_file(&project(), ".gitlab-ci.yml", "develop").await.unwrap(), None);
    assert_eq!(api.client.get_branch(&project(), "task-1").await.unwrap(), None);
}

#[tokio::test]
async fn test_namespaced_project_and_nested_file_are_single_segments() {
    let api = GitLabApiMock::new().await;
    let encoded = base64::engine::general_purpose::STANDARD.encode("branch-defaults:\n");
    api.mount(
        Mock::given(method("GET"))
            .and(path(
                "/api/v4/projects/payments%2Fledger/repository/files/.elasticbeanstalk%2Fconfig.yml",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"encoding": "base64", "content": encoded}))),
    )
    .await;

    let content = api
        .client
        .get_file(&Project::new("payments/ledger"), ".elasticbeanstalk/config.yml", "develop")
        .await
        .unwrap();
    assert_eq!(content.as_deref(), Some("branch-defaults:\n"));
}

#[tokio::test]
async fn test_commit_sends_every_action_in_one_request() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/101/repository/commits"))
            .and(body_partial_json(json!({
                "branch": "task-1",
                "commit_message": "fix: java17-migration updates",
                "actions": [
                    {"action": "update", "file_path": "pom.xml", "content": "a"},
                    {"action": "update", "file_path": ".gitlab-ci.yml", "content": "b"}
                ]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "6104942438c14ec7bd21c6cd5bd995272b3faff6",
                "short_id": "6104942438c"
            })))
            .expect(1),
    )
    .await;

    let request = CommitRequest {
        branch: "task-1".to_string(),
        message: "fix: java17-migration updates".to_string(),
        actions: vec![
            FileAction {
                path: "pom.xml".to_string(),
                new_content: "a".to_string(),
            },
            FileAction {
                path: ".gitlab-ci.yml".to_string(),
                new_content: "b".to_string(),
            },
        ],
    };
    let info = api.client.commit(&project(), &request).await.unwrap();
    assert_eq!(info.short_sha, "6104942438c");
}

#[tokio::test]
async fn test_merge_request_listing_follows_pages() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/merge_requests"))
            .and(query_param("state", "opened"))
            .and(query_param("source_branch", "task-1"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "2")
                    .set_body_json(json!([{"iid": 1, "source_branch": "task-1", "target_branch": "develop", "title": "a"}])),
            ),
    )
    .await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/merge_requests"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "")
                    .set_body_json(json!([{"iid": 2, "source_branch": "task-1", "target_branch": "develop", "title": "b", "web_url": "https://gitlab.example.com/mr/2"}])),
            ),
    )
    .await;

    let mrs = api
        .client
        .list_open_merge_requests(&project(), "task-1", "develop")
        .await
        .unwrap();
    assert_eq!(mrs.iter().map(|mr| mr.iid).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(mrs[1].web_url.as_deref(), Some("https://gitlab.example.com/mr/2"));
}

#[tokio::test]
async fn test_duplicate_merge_request_is_conflict_and_not_retried() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/101/merge_requests"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": ["Another open merge request already exists for this source branch: !4"]
            })))
            .expect(1),
    )
    .await;

    let err = api
        .client
        .create_merge_request(&project(), "task-1", "develop", "TASK-4323: java migration")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_create_tag_reads_spawned_pipeline() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/101/repository/tags"))
            .and(body_partial_json(json!({"tag_name": "azure-dev", "ref": "task-1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "name": "azure-dev",
                "commit": {"id": "2695effb", "short_id": "2695", "last_pipeline": {"id": 7781, "status": "created"}}
            }))),
    )
    .await;

    let created = api.client.create_tag(&project(), "azure-dev", "task-1").await.unwrap();
    assert_eq!(created.pipeline_id, Some(7781));
}

#[tokio::test]
async fn test_delete_tag_accepts_no_content() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("DELETE"))
            .and(path("/api/v4/projects/101/repository/tags/dev"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1),
    )
    .await;

    api.client.delete_tag(&project(), "dev").await.unwrap();
}

#[tokio::test]
async fn test_pipeline_read_retries_transient_failure() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/pipelines/55"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1),
    )
    .await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/pipelines/55"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 55, "status": "success", "ref": "dev"}))),
    )
    .await;

    let pipeline = api.client.get_pipeline(&project(), 55).await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Success);
}

#[tokio::test]
async fn test_rate_limit_surfaces_retry_after() {
    let api = GitLabApiMock::with_retry(RetrySettings {
        max_attempts: 1,
        base_delay_ms: 10,
        max_delay_ms: 10,
    })
    .await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/pipelines/55"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12")),
    )
    .await;

    let err = api.client.get_pipeline(&project(), 55).await.unwrap_err();
    assert_eq!(
        err,
        PlatformError::RateLimited {
            retry_after_secs: Some(12)
        }
    );
}

#[tokio::test]
async fn test_jobs_listing_and_play() {
    let api = GitLabApiMock::new().await;
    api.mount(
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/101/pipelines/55/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 900, "name": "build", "status": "success"},
                {"id": 901, "name": "eb-terminate", "status": "manual"}
            ]))),
    )
    .await;
    api.mount(
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/101/jobs/901/play"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 901, "name": "eb-terminate", "status": "pending"})))
            .expect(1),
    )
    .await;

    let jobs = api.client.list_jobs(&project(), 55).await.unwrap();
    assert!(jobs[1].is_manual());
    let played = api.client.play_job(&project(), 901).await.unwrap();
    assert_eq!(played.status, JobStatus::Pending);
}
