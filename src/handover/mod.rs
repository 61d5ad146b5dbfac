//! Tag-based environment handover
//!
//! For each handover tag the orchestrator recreates the tag from the feature branch,
//! waits for the pipeline the tag spawned, then plays the terminate job and, only once
//! that was played, the deploy job for the tag. Tags are processed one at a time and a
//! failure on one tag never stops the next.

use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::HandoverConfig;
use crate::platform::{Job, Project, RepositoryClient};
use crate::watcher::{PipelineOutcome, PipelineWatcher, PollPolicy};

/// Terminal state of one tag's handover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoverOutcome {
    /// Terminate and deploy were both played.
    Deployed { terminate_job: u64, deploy_job: u64 },
    /// The tag was created but no pipeline was attached to it.
    NoPipeline,
    /// Deleting or creating the tag failed.
    TagFailed(String),
    PipelineFailed(String),
    TimedOut,
    /// A required manual job was missing or not in `manual` state.
    JobUnavailable { job: String },
    /// Listing or playing a job failed.
    JobFailed { job: String, message: String },
}

impl HandoverOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, HandoverOutcome::Deployed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHandoverReport {
    pub tag: String,
    pub pipeline_id: Option<u64>,
    /// Set once the terminate job for this tag has been played.
    pub terminate_played: bool,
    pub outcome: HandoverOutcome,
}

pub struct DeploymentOrchestrator {
    client: Arc<dyn RepositoryClient>,
    watcher: PipelineWatcher,
    config: HandoverConfig,
    policy: PollPolicy,
}

impl DeploymentOrchestrator {
    pub fn new(client: Arc<dyn RepositoryClient>, config: HandoverConfig) -> Self {
        let policy = PollPolicy::from(&config);
        Self {
            watcher: PipelineWatcher::new(client.clone()),
            client,
            config,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn handover(&self, project: &Project, feature_branch: &str, tags: &[String]) -> Vec<TagHandoverReport> {
        let mut reports = Vec::with_capacity(tags.len());
        for tag in tags {
            let span = info_span!("handover", project = %project.id, tag = %tag);
            let report = self.handover_tag(project, feature_branch, tag).instrument(span).await;
            reports.push(report);
        }
        reports
    }

    async fn handover_tag(&self, project: &Project, feature_branch: &str, tag: &str) -> TagHandoverReport {
        let mut report = TagHandoverReport {
            tag: tag.to_string(),
            pipeline_id: None,
            terminate_played: false,
            outcome: HandoverOutcome::NoPipeline,
        };

        let pipeline_id = match self.recreate_tag(project, feature_branch, tag).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(tag, "Tag created but no pipeline was found for it");
                return report;
            }
            Err(message) => {
                error!(tag, %message, "Failed to recreate tag");
                report.outcome = HandoverOutcome::TagFailed(message);
                return report;
            }
        };
        report.pipeline_id = Some(pipeline_id);

        if let Some(outcome) = self.wait(project, pipeline_id).await {
            report.outcome = outcome;
            return report;
        }

        let terminate = self.config.terminate_job.clone();
        let terminate_id = match self.play_manual_job(project, pipeline_id, &terminate).await {
            Ok(id) => id,
            Err(outcome) => {
                report.outcome = outcome;
                return report;
            }
        };
        report.terminate_played = true;

        if self.config.await_between_jobs {
            if let Some(outcome) = self.wait(project, pipeline_id).await {
                report.outcome = outcome;
                return report;
            }
        }

        let deploy = self.config.deploy_job_for(tag);
        report.outcome = match self.play_manual_job(project, pipeline_id, &deploy).await {
            Ok(deploy_id) => {
                info!(tag, terminate_job = terminate_id, deploy_job = deploy_id, "Handover complete");
                HandoverOutcome::Deployed {
                    terminate_job: terminate_id,
                    deploy_job: deploy_id,
                }
            }
            Err(outcome) => outcome,
        };
        report
    }

    /// Delete the tag if present, recreate it from `from_ref` and return the spawned pipeline.
    async fn recreate_tag(&self, project: &Project, from_ref: &str, tag: &str) -> Result<Option<u64>, String> {
        match self.client.get_tag(project, tag).await {
            Ok(Some(_)) => {
                self.client
                    .delete_tag(project, tag)
                    .await
                    .map_err(|e| format!("delete tag {tag}: {e}"))?;
                info!(tag, "Deleted existing tag");
            }
            Ok(None) => {}
            Err(err) => warn!(tag, error = %err, "Tag lookup failed, attempting creation anyway"),
        }

        let created = self
            .client
            .create_tag(project, tag, from_ref)
            .await
            .map_err(|e| format!("create tag {tag}: {e}"))?;
        info!(tag, from_ref, pipeline_id = ?created.pipeline_id, "Created tag");
        Ok(created.pipeline_id)
    }

    /// `None` when the pipeline succeeded, otherwise the outcome that ends this tag.
    async fn wait(&self, project: &Project, pipeline_id: u64) -> Option<HandoverOutcome> {
        match self.watcher.await_success(project, pipeline_id, &self.policy).await {
            PipelineOutcome::Success => None,
            PipelineOutcome::Failed(status) => Some(HandoverOutcome::PipelineFailed(status.to_string())),
            PipelineOutcome::TimedOut => Some(HandoverOutcome::TimedOut),
        }
    }

    async fn play_manual_job(&self, project: &Project, pipeline_id: u64, name: &str) -> Result<u64, HandoverOutcome> {
        let jobs = self.client.list_jobs(project, pipeline_id).await.map_err(|e| {
            error!(job = name, pipeline_id, error = %e, "Failed to list jobs");
            HandoverOutcome::JobFailed {
                job: name.to_string(),
                message: e.to_string(),
            }
        })?;

        let Some(job) = find_manual_job(&jobs, name) else {
            warn!(job = name, pipeline_id, "No manual job with this name, aborting tag");
            return Err(HandoverOutcome::JobUnavailable { job: name.to_string() });
        };

        match self.client.play_job(project, job.id).await {
            Ok(played) => {
                info!(job = name, job_id = played.id, status = %played.status, "Triggered job");
                Ok(played.id)
            }
            Err(e) => {
                error!(job = name, job_id = job.id, error = %e, "Failed to play job");
                Err(HandoverOutcome::JobFailed {
                    job: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

fn find_manual_job<'a>(jobs: &'a [Job], name: &str) -> Option<&'a Job> {
    jobs.iter().find(|job| job.name == name && job.is_manual())
}
