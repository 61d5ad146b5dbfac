use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository on the remote platform, addressed by an opaque identifier.
///
/// The identifier is whatever the platform accepts in its project routes: a numeric
/// id (`"4242"`) or a namespaced path (`"payments/ledger"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    /// Name shown in logs and summaries, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if name != &self.id => write!(f, "{} ({})", name, self.id),
            _ => write!(f, "{}", self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub commit_sha: Option<String>,
}

/// A pending whole-file replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAction {
    pub path: String,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub branch: String,
    pub message: String,
    pub actions: Vec<FileAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// Project-scoped merge request number.
    pub iid: u64,
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub commit_sha: Option<String>,
}

/// Result of creating a tag, including the pipeline the creation spawned, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTag {
    pub name: String,
    pub commit_sha: Option<String>,
    pub pipeline_id: Option<u64>,
}

/// Pipeline status as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineStatus {
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Scheduled,
    Unknown(String),
}

impl PipelineStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PipelineStatus::Created => "created",
            PipelineStatus::WaitingForResource => "waiting_for_resource",
            PipelineStatus::Preparing => "preparing",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
            PipelineStatus::Manual => "manual",
            PipelineStatus::Scheduled => "scheduled",
            PipelineStatus::Unknown(other) => other,
        }
    }
}

impl From<&str> for PipelineStatus {
    fn from(status: &str) -> Self {
        match status {
            "created" => PipelineStatus::Created,
            "waiting_for_resource" => PipelineStatus::WaitingForResource,
            "preparing" => PipelineStatus::Preparing,
            "pending" => PipelineStatus::Pending,
            "running" => PipelineStatus::Running,
            "success" => PipelineStatus::Success,
            "failed" => PipelineStatus::Failed,
            "canceled" | "cancelled" => PipelineStatus::Canceled,
            "skipped" => PipelineStatus::Skipped,
            "manual" => PipelineStatus::Manual,
            "scheduled" => PipelineStatus::Scheduled,
            _ => PipelineStatus::Unknown(status.to_string()),
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub id: u64,
    pub status: PipelineStatus,
    pub git_ref: Option<String>,
    pub web_url: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Unknown(String),
}

impl From<&str> for JobStatus {
    fn from(status: &str) -> Self {
        match status {
            "created" => JobStatus::Created,
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            "failed" => JobStatus::Failed,
            "canceled" | "cancelled" => JobStatus::Canceled,
            "skipped" => JobStatus::Skipped,
            "manual" => JobStatus::Manual,
            _ => JobStatus::Unknown(status.to_string()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
            JobStatus::Manual => "manual",
            JobStatus::Unknown(other) => other,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub status: JobStatus,
}

impl Job {
    pub fn is_manual(&self) -> bool {
        self.status == JobStatus::Manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_status_parsing_preserves_unknown_values() {
        assert_eq!(PipelineStatus::from("success"), PipelineStatus::Success);
        assert_eq!(PipelineStatus::from("cancelled"), PipelineStatus::Canceled);
        let odd = PipelineStatus::from("blocked");
        assert_eq!(odd, PipelineStatus::Unknown("blocked".to_string()));
        assert_eq!(odd.to_string(), "blocked");
    }

    #[test]
    fn test_project_display_prefers_name() {
        assert_eq!(Project::named("42", "ledger").to_string(), "ledger (42)");
        assert_eq!(Project::new("42").to_string(), "42");
        assert_eq!(Project::new("42").display_name(), "42");
    }
}
