// Capability seam between the orchestration engine and the remote platform.

use async_trait::async_trait;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::errors::PlatformError;
use super::types::*;

/// Remote version-control/CI operations the engine depends on.
///
/// Lookups return `Ok(None)` when the resource does not exist; every other failure is a
/// [`PlatformError`]. Implementations must not cache: the engine re-derives branch, merge
/// request and tag state from the remote on every run.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    async fn get_branch(&self, project: &Project, name: &str) -> Result<Option<Branch>, PlatformError>;

    async fn create_branch(
        &self,
        project: &Project,
        name: &str,
        from_ref: &str,
    ) -> Result<Branch, PlatformError>;

    /// Fetch a file's decoded text content at `git_ref`.
    async fn get_file(
        &self,
        project: &Project,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, PlatformError>;

    /// Submit every action in `request` as a single commit.
    async fn commit(&self, project: &Project, request: &CommitRequest) -> Result<CommitInfo, PlatformError>;

    async fn list_open_merge_requests(
        &self,
        project: &Project,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, PlatformError>;

    /// Open a merge request. A duplicate is reported as [`PlatformError::Conflict`].
    async fn create_merge_request(
        &self,
        project: &Project,
        source_branch: &str,
        target_branch: &str,
        title: &str,
    ) -> Result<MergeRequest, PlatformError>;

    async fn get_tag(&self, project: &Project, name: &str) -> Result<Option<Tag>, PlatformError>;

    async fn delete_tag(&self, project: &Project, name: &str) -> Result<(), PlatformError>;

    async fn create_tag(
        &self,
        project: &Project,
        name: &str,
        from_ref: &str,
    ) -> Result<CreatedTag, PlatformError>;

    async fn get_pipeline(&self, project: &Project, pipeline_id: u64) -> Result<Pipeline, PlatformError>;

    async fn list_jobs(&self, project: &Project, pipeline_id: u64) -> Result<Vec<Job>, PlatformError>;

    /// Start a job that is waiting in `manual` state.
    async fn play_job(&self, project: &Project, job_id: u64) -> Result<Job, PlatformError>;
}
