// Wire types for the GitLab v4 REST API (only the fields the client reads)

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::platform::{Branch, CreatedTag, Job, JobStatus, MergeRequest, Pipeline, PipelineStatus, Tag};

#[derive(Debug, Deserialize)]
pub(crate) struct CommitRef {
    pub id: String,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub last_pipeline: Option<PipelineRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PipelineRef {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchResponse {
    pub name: String,
    #[serde(default)]
    pub commit: Option<CommitRef>,
}

impl From<BranchResponse> for Branch {
    fn from(b: BranchResponse) -> Self {
        Branch {
            name: b.name,
            commit_sha: b.commit.map(|c| c.id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileResponse {
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MergeRequestResponse {
    pub iid: u64,
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    #[serde(default)]
    pub web_url: Option<String>,
}

impl From<MergeRequestResponse> for MergeRequest {
    fn from(mr: MergeRequestResponse) -> Self {
        MergeRequest {
            iid: mr.iid,
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            title: mr.title,
            web_url: mr.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagResponse {
    pub name: String,
    #[serde(default)]
    pub commit: Option<CommitRef>,
}

impl From<TagResponse> for Tag {
    fn from(t: TagResponse) -> Self {
        Tag {
            name: t.name,
            commit_sha: t.commit.map(|c| c.id),
        }
    }
}

impl From<TagResponse> for CreatedTag {
    fn from(t: TagResponse) -> Self {
        let (commit_sha, pipeline_id) = match t.commit {
            Some(commit) => (Some(commit.id), commit.last_pipeline.map(|p| p.id)),
            None => (None, None),
        };
        CreatedTag {
            name: t.name,
            commit_sha,
            pipeline_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PipelineResponse {
    pub id: u64,
    pub status: String,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<PipelineResponse> for Pipeline {
    fn from(p: PipelineResponse) -> Self {
        Pipeline {
            id: p.id,
            status: PipelineStatus::from(p.status.as_str()),
            git_ref: p.git_ref,
            web_url: p.web_url,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobResponse {
    pub id: u64,
    pub name: String,
    pub status: String,
}

impl From<JobResponse> for Job {
    fn from(j: JobResponse) -> Self {
        Job {
            id: j.id,
            name: j.name,
            status: JobStatus::from(j.status.as_str()),
        }
    }
}
