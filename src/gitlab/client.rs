use async_trait::async_trait;
use base64::Engine as _;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::models::*;
use super::retry::{RetryConfig, RetryHandler};
use crate::config::GitLabConfig;
use crate::platform::*;

const PER_PAGE: &str = "100";

/// GitLab v4 REST implementation of [`RepositoryClient`].
///
/// Reads are rate limited and retried on transient failures; mutations are rate
/// limited but sent exactly once.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryHandler,
}

impl GitLabClient {
    pub fn new(config: &GitLabConfig) -> Result<Self, PlatformError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| PlatformError::decode("gitlab.base_url", e))?;
        if base_url.cannot_be_a_base() {
            return Err(PlatformError::decode("gitlab.base_url", "URL cannot be used as a base"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .user_agent(concat!("repo-migrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::transport("build http client", e))?;

        let per_second = NonZeroU32::new(config.rate_limit.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.rate_limit.burst_capacity).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)));

        Ok(Self {
            http,
            base_url,
            token: config.token.clone().unwrap_or_default(),
            rate_limiter,
            retry: RetryHandler::new(RetryConfig::from(&config.retry)),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `{base}/projects/{id}/{segments...}` with every segment percent-encoded, so
    /// namespaced project paths, file paths and slashed branch names stay one segment.
    fn project_url(&self, project: &Project, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("projects").push(&project.id).extend(segments);
        }
        url
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, PlatformError> {
        self.rate_limiter.until_ready().await;
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| PlatformError::transport(operation, e))?;
        check_status(operation, response).await
    }

    async fn read_json<T: DeserializeOwned + Send>(&self, operation: &str, response: Response) -> Result<T, PlatformError> {
        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::decode(format!("{operation} response"), e))
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        operation: &str,
        url: &Url,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        self.retry
            .execute_with_retry(operation, move || async move {
                let response = self.send(operation, self.http.get(url.clone()).query(query)).await?;
                self.read_json(operation, response).await
            })
            .await
    }

    async fn get_optional<T: DeserializeOwned + Send>(
        &self,
        operation: &str,
        url: &Url,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, PlatformError> {
        match self.get_json(operation, url, query).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Follow `x-next-page` until the listing is exhausted.
    async fn get_all<T: DeserializeOwned + Send>(
        &self,
        operation: &str,
        url: &Url,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, PlatformError> {
        let mut items = Vec::new();
        let mut page = "1".to_string();
        loop {
            let current = page.as_str();
            let (batch, next) = self
                .retry
                .execute_with_retry(operation, move || async move {
                    let mut params = query.to_vec();
                    params.push(("per_page", PER_PAGE));
                    params.push(("page", current));
                    let response = self.send(operation, self.http.get(url.clone()).query(&params)).await?;
                    let next = response
                        .headers()
                        .get("x-next-page")
                        .and_then(|v| v.to_str().ok())
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                    let batch: Vec<T> = self.read_json(operation, response).await?;
                    Ok((batch, next))
                })
                .await?;
            items.extend(batch);
            match next {
                Some(next) => page = next,
                None => return Ok(items),
            }
        }
    }

    async fn mutate<T: DeserializeOwned + Send>(
        &self,
        method: Method,
        operation: &str,
        url: Url,
        body: serde_json::Value,
    ) -> Result<T, PlatformError> {
        debug!(operation, %url, "sending mutation");
        let response = self.send(operation, self.http.request(method, url).json(&body)).await?;
        self.read_json(operation, response).await
    }
}

async fn check_status(operation: &str, response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound {
            resource: operation.to_string(),
        },
        StatusCode::CONFLICT => PlatformError::Conflict { message },
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited { retry_after_secs },
        _ => PlatformError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        },
    })
}

fn decode_file(path: &str, file: FileResponse) -> Result<String, PlatformError> {
    let bytes = match file.encoding.as_deref() {
        Some("base64") | None => {
            let compact: String = file.content.split_whitespace().collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| PlatformError::decode(format!("{path} content"), e))?
        }
        Some(_) => file.content.into_bytes(),
    };
    String::from_utf8(bytes).map_err(|e| PlatformError::decode(format!("{path} content"), e))
}

#[async_trait]
impl RepositoryClient for GitLabClient {
    async fn get_branch(&self, project: &Project, name: &str) -> Result<Option<Branch>, PlatformError> {
        let url = self.project_url(project, &["repository", "branches", name]);
        let branch: Option<BranchResponse> = self.get_optional("get branch", &url, &[]).await?;
        Ok(branch.map(Branch::from))
    }

    async fn create_branch(&self, project: &Project, name: &str, from_ref: &str) -> Result<Branch, PlatformError> {
        let url = self.project_url(project, &["repository", "branches"]);
        let branch: BranchResponse = self
            .mutate(
                Method::POST,
                "create branch",
                url,
                json!({ "branch": name, "ref": from_ref }),
            )
            .await?;
        info!(project = %project.id, branch = name, from_ref, "created branch");
        Ok(branch.into())
    }

    async fn get_file(&self, project: &Project, path: &str, git_ref: &str) -> Result<Option<String>, PlatformError> {
        let url = self.project_url(project, &["repository", "files", path]);
        let file: Option<FileResponse> = self.get_optional("get file", &url, &[("ref", git_ref)]).await?;
        file.map(|f| decode_file(path, f)).transpose()
    }

    async fn commit(&self, project: &Project, request: &CommitRequest) -> Result<CommitInfo, PlatformError> {
        let url = self.project_url(project, &["repository", "commits"]);
        // Actions only exist for files read from the working ref, so they are always updates.
        let actions: Vec<_> = request
            .actions
            .iter()
            .map(|a| json!({ "action": "update", "file_path": a.path, "content": a.new_content }))
            .collect();
        let commit: CommitRef = self
            .mutate(
                Method::POST,
                "create commit",
                url,
                json!({
                    "branch": request.branch,
                    "commit_message": request.message,
                    "actions": actions,
                }),
            )
            .await?;
        let short_sha = commit
            .short_id
            .unwrap_or_else(|| commit.id.chars().take(8).collect());
        Ok(CommitInfo {
            sha: commit.id,
            short_sha,
        })
    }

    async fn list_open_merge_requests(
        &self,
        project: &Project,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, PlatformError> {
        let url = self.project_url(project, &["merge_requests"]);
        let mrs: Vec<MergeRequestResponse> = self
            .get_all(
                "list merge requests",
                &url,
                &[
                    ("state", "opened"),
                    ("source_branch", source_branch),
                    ("target_branch", target_branch),
                ],
            )
            .await?;
        Ok(mrs.into_iter().map(MergeRequest::from).collect())
    }

    async fn create_merge_request(
        &self,
        project: &Project,
        source_branch: &str,
        target_branch: &str,
        title: &str,
    ) -> Result<MergeRequest, PlatformError> {
        let url = self.project_url(project, &["merge_requests"]);
        let mr: MergeRequestResponse = self
            .mutate(
                Method::POST,
                "create merge request",
                url,
                json!({
                    "source_branch": source_branch,
                    "target_branch": target_branch,
                    "title": title,
                }),
            )
            .await?;
        Ok(mr.into())
    }

    async fn get_tag(&self, project: &Project, name: &str) -> Result<Option<Tag>, PlatformError> {
        let url = self.project_url(project, &["repository", "tags", name]);
        let tag: Option<TagResponse> = self.get_optional("get tag", &url, &[]).await?;
        Ok(tag.map(Tag::from))
    }

    async fn delete_tag(&self, project: &Project, name: &str) -> Result<(), PlatformError> {
        let url = self.project_url(project, &["repository", "tags", name]);
        self.send("delete tag", self.http.delete(url)).await?;
        Ok(())
    }

    async fn create_tag(&self, project: &Project, name: &str, from_ref: &str) -> Result<CreatedTag, PlatformError> {
        let url = self.project_url(project, &["repository", "tags"]);
        let tag: TagResponse = self
            .mutate(
                Method::POST,
                "create tag",
                url,
                json!({ "tag_name": name, "ref": from_ref }),
            )
            .await?;
        Ok(tag.into())
    }

    async fn get_pipeline(&self, project: &Project, pipeline_id: u64) -> Result<Pipeline, PlatformError> {
        let id = pipeline_id.to_string();
        let url = self.project_url(project, &["pipelines", &id]);
        let pipeline: PipelineResponse = self.get_json("get pipeline", &url, &[]).await?;
        Ok(pipeline.into())
    }

    async fn list_jobs(&self, project: &Project, pipeline_id: u64) -> Result<Vec<Job>, PlatformError> {
        let id = pipeline_id.to_string();
        let url = self.project_url(project, &["pipelines", &id, "jobs"]);
        let jobs: Vec<JobResponse> = self.get_all("list jobs", &url, &[]).await?;
        Ok(jobs.into_iter().map(Job::from).collect())
    }

    async fn play_job(&self, project: &Project, job_id: u64) -> Result<Job, PlatformError> {
        let id = job_id.to_string();
        let url = self.project_url(project, &["jobs", &id, "play"]);
        let job: JobResponse = self
            .mutate(Method::POST, "play job", url, json!({}))
            .await?;
        Ok(job.into())
    }
}
