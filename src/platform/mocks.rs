// In-memory platform for tests - no network, every call recorded

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::errors::PlatformError;
use super::traits::RepositoryClient;
use super::types::*;

/// Every call made against an [`InMemoryPlatform`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCommand {
    GetBranch { project: String, name: String },
    CreateBranch { project: String, name: String, from_ref: String },
    GetFile { project: String, path: String, git_ref: String },
    Commit { project: String, branch: String, paths: Vec<String> },
    ListOpenMergeRequests { project: String, source: String, target: String },
    CreateMergeRequest { project: String, source: String, target: String },
    GetTag { project: String, name: String },
    DeleteTag { project: String, name: String },
    CreateTag { project: String, name: String, from_ref: String },
    GetPipeline { project: String, pipeline_id: u64 },
    ListJobs { project: String, pipeline_id: u64 },
    PlayJob { project: String, job_id: u64 },
}

#[derive(Debug, Default)]
struct ProjectState {
    branches: HashMap<String, String>,
    files: HashMap<(String, String), String>,
    merge_requests: Vec<MergeRequest>,
    tags: HashMap<String, String>,
    tag_pipelines: HashMap<String, u64>,
    pipelines: HashMap<u64, VecDeque<Result<PipelineStatus, PlatformError>>>,
    jobs: HashMap<u64, Vec<Job>>,
}

#[derive(Debug, Default)]
struct State {
    projects: HashMap<String, ProjectState>,
    failures: HashMap<&'static str, VecDeque<PlatformError>>,
    conflict_on_merge_request: bool,
    next_id: u64,
    commands: Vec<PlatformCommand>,
}

impl State {
    fn project(&mut self, id: &str) -> &mut ProjectState {
        self.projects.entry(id.to_string()).or_default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn next_sha(&mut self) -> String {
        format!("{:040x}", self.next_id())
    }

    fn injected_failure(&mut self, operation: &'static str) -> Option<PlatformError> {
        self.failures.get_mut(operation).and_then(|queue| queue.pop_front())
    }
}

/// Stateful fake of the remote platform.
///
/// Branches own a file snapshot; creating a branch copies its source ref's files, and
/// commits write into the branch snapshot. Pipelines replay a scripted status sequence,
/// repeating the final entry once the script is exhausted.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, command: PlatformCommand) {
        self.state().commands.push(command);
    }

    pub fn with_branch(self, project: &str, branch: &str) -> Self {
        {
            let mut state = self.state();
            let sha = state.next_sha();
            state.project(project).branches.insert(branch.to_string(), sha);
        }
        self
    }

    pub fn with_file(self, project: &str, git_ref: &str, path: &str, content: &str) -> Self {
        self.state()
            .project(project)
            .files
            .insert((git_ref.to_string(), path.to_string()), content.to_string());
        self
    }

    pub fn with_open_merge_request(self, project: &str, source: &str, target: &str, iid: u64) -> Self {
        self.state().project(project).merge_requests.push(MergeRequest {
            iid,
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            title: format!("Existing merge request !{iid}"),
            web_url: None,
        });
        self
    }

    pub fn with_tag(self, project: &str, tag: &str) -> Self {
        {
            let mut state = self.state();
            let sha = state.next_sha();
            state.project(project).tags.insert(tag.to_string(), sha);
        }
        self
    }

    /// The pipeline id returned when `tag` is created.
    pub fn with_tag_pipeline(self, project: &str, tag: &str, pipeline_id: u64) -> Self {
        self.state()
            .project(project)
            .tag_pipelines
            .insert(tag.to_string(), pipeline_id);
        self
    }

    pub fn with_pipeline_statuses(self, project: &str, pipeline_id: u64, statuses: &[&str]) -> Self {
        let script = statuses.iter().map(|s| Ok(PipelineStatus::from(*s))).collect();
        self.state().project(project).pipelines.insert(pipeline_id, script);
        self
    }

    /// Script a pipeline poll sequence that may contain transport failures.
    pub fn with_pipeline_script(
        self,
        project: &str,
        pipeline_id: u64,
        script: Vec<Result<PipelineStatus, PlatformError>>,
    ) -> Self {
        self.state()
            .project(project)
            .pipelines
            .insert(pipeline_id, script.into());
        self
    }

    pub fn with_job(self, project: &str, pipeline_id: u64, job_id: u64, name: &str, status: &str) -> Self {
        self.state()
            .project(project)
            .jobs
            .entry(pipeline_id)
            .or_default()
            .push(Job {
                id: job_id,
                name: name.to_string(),
                status: JobStatus::from(status),
            });
        self
    }

    /// Make the next `times` calls of `operation` fail with `error`.
    ///
    /// Operation names match the [`RepositoryClient`] method names.
    pub fn failing(self, operation: &'static str, times: usize, error: PlatformError) -> Self {
        self.state()
            .failures
            .entry(operation)
            .or_default()
            .extend(std::iter::repeat_n(error, times));
        self
    }

    /// Reject merge request creation with a conflict, as a concurrent creator would cause.
    pub fn with_merge_request_conflict(self) -> Self {
        self.state().conflict_on_merge_request = true;
        self
    }

    pub fn executed_commands(&self) -> Vec<PlatformCommand> {
        self.state().commands.clone()
    }

    pub fn clear_executed_commands(&self) {
        self.state().commands.clear();
    }

    pub fn file(&self, project: &str, git_ref: &str, path: &str) -> Option<String> {
        self.state()
            .projects
            .get(project)
            .and_then(|p| p.files.get(&(git_ref.to_string(), path.to_string())).cloned())
    }

    pub fn has_branch(&self, project: &str, branch: &str) -> bool {
        self.state()
            .projects
            .get(project)
            .is_some_and(|p| p.branches.contains_key(branch))
    }

    pub fn has_tag(&self, project: &str, tag: &str) -> bool {
        self.state()
            .projects
            .get(project)
            .is_some_and(|p| p.tags.contains_key(tag))
    }

    pub fn open_merge_requests(&self, project: &str) -> Vec<MergeRequest> {
        self.state()
            .projects
            .get(project)
            .map(|p| p.merge_requests.clone())
            .unwrap_or_default()
    }

    pub fn commit_count(&self) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| matches!(c, PlatformCommand::Commit { .. }))
            .count()
    }

    pub fn played_jobs(&self) -> Vec<u64> {
        self.state()
            .commands
            .iter()
            .filter_map(|c| match c {
                PlatformCommand::PlayJob { job_id, .. } => Some(*job_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RepositoryClient for InMemoryPlatform {
    async fn get_branch(&self, project: &Project, name: &str) -> Result<Option<Branch>, PlatformError> {
        self.record(PlatformCommand::GetBranch {
            project: project.id.clone(),
            name: name.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("get_branch") {
            return Err(err);
        }
        Ok(state.project(&project.id).branches.get(name).map(|sha| Branch {
            name: name.to_string(),
            commit_sha: Some(sha.clone()),
        }))
    }

    async fn create_branch(&self, project: &Project, name: &str, from_ref: &str) -> Result<Branch, PlatformError> {
        self.record(PlatformCommand::CreateBranch {
            project: project.id.clone(),
            name: name.to_string(),
            from_ref: from_ref.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("create_branch") {
            return Err(err);
        }
        let sha = state.next_sha();
        let repo = state.project(&project.id);
        if repo.branches.contains_key(name) {
            return Err(PlatformError::Api {
                operation: "create branch".to_string(),
                status: 400,
                message: "Branch already exists".to_string(),
            });
        }
        let copied: Vec<_> = repo
            .files
            .iter()
            .filter(|((git_ref, _), _)| git_ref == from_ref)
            .map(|((_, path), content)| ((name.to_string(), path.clone()), content.clone()))
            .collect();
        repo.files.extend(copied);
        repo.branches.insert(name.to_string(), sha.clone());
        Ok(Branch {
            name: name.to_string(),
            commit_sha: Some(sha),
        })
    }

    async fn get_file(&self, project: &Project, path: &str, git_ref: &str) -> Result<Option<String>, PlatformError> {
        self.record(PlatformCommand::GetFile {
            project: project.id.clone(),
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("get_file") {
            return Err(err);
        }
        Ok(state
            .project(&project.id)
            .files
            .get(&(git_ref.to_string(), path.to_string()))
            .cloned())
    }

    async fn commit(&self, project: &Project, request: &CommitRequest) -> Result<CommitInfo, PlatformError> {
        self.record(PlatformCommand::Commit {
            project: project.id.clone(),
            branch: request.branch.clone(),
            paths: request.actions.iter().map(|a| a.path.clone()).collect(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("commit") {
            return Err(err);
        }
        let sha = state.next_sha();
        let repo = state.project(&project.id);
        if !repo.branches.contains_key(&request.branch) {
            return Err(PlatformError::NotFound {
                resource: format!("branch {}", request.branch),
            });
        }
        for action in &request.actions {
            repo.files.insert(
                (request.branch.clone(), action.path.clone()),
                action.new_content.clone(),
            );
        }
        repo.branches.insert(request.branch.clone(), sha.clone());
        Ok(CommitInfo {
            short_sha: sha[..8].to_string(),
            sha,
        })
    }

    async fn list_open_merge_requests(
        &self,
        project: &Project,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, PlatformError> {
        self.record(PlatformCommand::ListOpenMergeRequests {
            project: project.id.clone(),
            source: source_branch.to_string(),
            target: target_branch.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("list_open_merge_requests") {
            return Err(err);
        }
        Ok(state
            .project(&project.id)
            .merge_requests
            .iter()
            .filter(|mr| mr.source_branch == source_branch && mr.target_branch == target_branch)
            .cloned()
            .collect())
    }

    async fn create_merge_request(
        &self,
        project: &Project,
        source_branch: &str,
        target_branch: &str,
        title: &str,
    ) -> Result<MergeRequest, PlatformError> {
        self.record(PlatformCommand::CreateMergeRequest {
            project: project.id.clone(),
            source: source_branch.to_string(),
            target: target_branch.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("create_merge_request") {
            return Err(err);
        }
        let conflict = state.conflict_on_merge_request;
        let iid = state.next_id();
        let repo = state.project(&project.id);
        let duplicate = repo
            .merge_requests
            .iter()
            .any(|mr| mr.source_branch == source_branch && mr.target_branch == target_branch);
        if conflict || duplicate {
            return Err(PlatformError::Conflict {
                message: "Another open merge request already exists for this source branch".to_string(),
            });
        }
        let mr = MergeRequest {
            iid,
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            title: title.to_string(),
            web_url: None,
        };
        repo.merge_requests.push(mr.clone());
        Ok(mr)
    }

    async fn get_tag(&self, project: &Project, name: &str) -> Result<Option<Tag>, PlatformError> {
        self.record(PlatformCommand::GetTag {
            project: project.id.clone(),
            name: name.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("get_tag") {
            return Err(err);
        }
        Ok(state.project(&project.id).tags.get(name).map(|sha| Tag {
            name: name.to_string(),
            commit_sha: Some(sha.clone()),
        }))
    }

    async fn delete_tag(&self, project: &Project, name: &str) -> Result<(), PlatformError> {
        self.record(PlatformCommand::DeleteTag {
            project: project.id.clone(),
            name: name.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("delete_tag") {
            return Err(err);
        }
        match state.project(&project.id).tags.remove(name) {
            Some(_) => Ok(()),
            None => Err(PlatformError::NotFound {
                resource: format!("tag {name}"),
            }),
        }
    }

    async fn create_tag(&self, project: &Project, name: &str, from_ref: &str) -> Result<CreatedTag, PlatformError> {
        self.record(PlatformCommand::CreateTag {
            project: project.id.clone(),
            name: name.to_string(),
            from_ref: from_ref.to_string(),
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("create_tag") {
            return Err(err);
        }
        let repo = state.project(&project.id);
        if repo.tags.contains_key(name) {
            return Err(PlatformError::Api {
                operation: "create tag".to_string(),
                status: 400,
                message: format!("Tag {name} already exists"),
            });
        }
        let Some(sha) = repo.branches.get(from_ref).cloned() else {
            return Err(PlatformError::NotFound {
                resource: format!("ref {from_ref}"),
            });
        };
        repo.tags.insert(name.to_string(), sha.clone());
        Ok(CreatedTag {
            name: name.to_string(),
            commit_sha: Some(sha),
            pipeline_id: repo.tag_pipelines.get(name).copied(),
        })
    }

    async fn get_pipeline(&self, project: &Project, pipeline_id: u64) -> Result<Pipeline, PlatformError> {
        self.record(PlatformCommand::GetPipeline {
            project: project.id.clone(),
            pipeline_id,
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("get_pipeline") {
            return Err(err);
        }
        let script = state
            .project(&project.id)
            .pipelines
            .get_mut(&pipeline_id)
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("pipeline {pipeline_id}"),
            })?;
        let step = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        let status = step.unwrap_or(Ok(PipelineStatus::Pending))?;
        Ok(Pipeline {
            id: pipeline_id,
            status,
            git_ref: None,
            web_url: None,
            created_at: None,
        })
    }

    async fn list_jobs(&self, project: &Project, pipeline_id: u64) -> Result<Vec<Job>, PlatformError> {
        self.record(PlatformCommand::ListJobs {
            project: project.id.clone(),
            pipeline_id,
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("list_jobs") {
            return Err(err);
        }
        Ok(state
            .project(&project.id)
            .jobs
            .get(&pipeline_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn play_job(&self, project: &Project, job_id: u64) -> Result<Job, PlatformError> {
        self.record(PlatformCommand::PlayJob {
            project: project.id.clone(),
            job_id,
        });
        let mut state = self.state();
        if let Some(err) = state.injected_failure("play_job") {
            return Err(err);
        }
        let job = state
            .project(&project.id)
            .jobs
            .values_mut()
            .flat_map(|jobs| jobs.iter_mut())
            .find(|job| job.id == job_id)
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("job {job_id}"),
            })?;
        if !job.is_manual() {
            return Err(PlatformError::Api {
                operation: "play job".to_string(),
                status: 400,
                message: format!("Job {} is not playable (status {})", job.name, job.status),
            });
        }
        job.status = JobStatus::Pending;
        Ok(job.clone())
    }
}
