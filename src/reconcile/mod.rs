//! Repository state reconciliation
//!
//! Brings one project's feature branch in line with the transform targets: picks the
//! working ref, computes whole-file replacements, commits them as a single commit and
//! makes sure at most one merge request is open from the feature branch.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::decision::DecisionSource;
use crate::platform::{CommitInfo, CommitRequest, FileAction, MergeRequest, PlatformError, Project, RepositoryClient};
use crate::transform::{self, TransformTarget};

/// Which ref file contents were read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingRef {
    Feature(String),
    Base(String),
}

impl WorkingRef {
    pub fn name(&self) -> &str {
        match self {
            WorkingRef::Feature(name) | WorkingRef::Base(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitInfo),
    /// Changes were computed but not submitted.
    DryRun,
    AlreadyCompliant,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRequestOutcome {
    Existing(MergeRequest),
    Created(MergeRequest),
    /// Creation was rejected because one already exists.
    AlreadyExists,
    Declined,
    /// No feature branch or dry run.
    Skipped,
    Failed(String),
}

/// Why a target produced no action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    FetchFailed(String),
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTarget {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub working_ref: WorkingRef,
    pub actions: Vec<FileAction>,
    pub skipped: Vec<SkippedTarget>,
    pub commit: CommitOutcome,
    /// Whether the feature branch exists on the remote once the commit step is over.
    pub feature_branch_exists: bool,
    pub merge_request: MergeRequestOutcome,
}

impl ReconcileReport {
    pub fn feature_branch_ready(&self) -> bool {
        self.feature_branch_exists
    }
}

pub struct RepositoryStateManager {
    client: Arc<dyn RepositoryClient>,
    decisions: Arc<dyn DecisionSource>,
    settings: MigrationConfig,
}

impl RepositoryStateManager {
    pub fn new(client: Arc<dyn RepositoryClient>, decisions: Arc<dyn DecisionSource>, settings: MigrationConfig) -> Self {
        Self {
            client,
            decisions,
            settings,
        }
    }

    pub async fn reconcile(&self, project: &Project, targets: &[TransformTarget], dry_run: bool) -> ReconcileReport {
        let working_ref = self.working_ref(project).await;
        info!(project = %project, working_ref = working_ref.name(), "Reading files");

        let (actions, skipped) = self.collect_actions(project, targets, &working_ref).await;

        let on_feature = matches!(working_ref, WorkingRef::Feature(_));
        let (commit, branch_seen) = if actions.is_empty() {
            info!(project = %project, "Already compliant, nothing to commit");
            (CommitOutcome::AlreadyCompliant, on_feature)
        } else if dry_run {
            let paths: Vec<&str> = actions.iter().map(|a| a.path.as_str()).collect();
            info!(project = %project, ?paths, "Dry run, not committing");
            (CommitOutcome::DryRun, on_feature)
        } else {
            self.commit_actions(project, &working_ref, &actions).await
        };

        let feature_branch_exists = if dry_run {
            branch_seen
        } else {
            self.feature_branch_exists(project, branch_seen).await
        };

        let mut report = ReconcileReport {
            working_ref,
            actions,
            skipped,
            commit,
            feature_branch_exists,
            merge_request: MergeRequestOutcome::Skipped,
        };

        if !dry_run && report.feature_branch_ready() {
            report.merge_request = self.reconcile_merge_request(project).await;
        }

        report
    }

    async fn working_ref(&self, project: &Project) -> WorkingRef {
        let feature = &self.settings.feature_branch;
        match self.client.get_branch(project, feature).await {
            Ok(Some(_)) => WorkingRef::Feature(feature.clone()),
            Ok(None) => WorkingRef::Base(self.settings.base_branch.clone()),
            Err(err) => {
                warn!(project = %project, branch = %feature, error = %err, "Branch lookup failed, treating as absent");
                WorkingRef::Base(self.settings.base_branch.clone())
            }
        }
    }

    /// Ask the remote whether the feature branch exists. `fallback` is what this run
    /// already observed, used when the lookup itself fails.
    async fn feature_branch_exists(&self, project: &Project, fallback: bool) -> bool {
        let feature = &self.settings.feature_branch;
        match self.client.get_branch(project, feature).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(project = %project, branch = %feature, error = %err, fallback, "Branch re-check failed");
                fallback
            }
        }
    }

    async fn collect_actions(
        &self,
        project: &Project,
        targets: &[TransformTarget],
        working_ref: &WorkingRef,
    ) -> (Vec<FileAction>, Vec<SkippedTarget>) {
        let mut actions = Vec::new();
        let mut skipped = Vec::new();

        for target in targets {
            let reason = match self.client.get_file(project, &target.path, working_ref.name()).await {
                Ok(Some(original)) => {
                    let outcome = transform::apply(&target.path, &original, &target.rule_set);
                    if outcome.changed {
                        info!(
                            project = %project,
                            path = %target.path,
                            rules = ?outcome.applied_rules,
                            "File needs migration"
                        );
                        actions.push(FileAction {
                            path: target.path.clone(),
                            new_content: outcome.content,
                        });
                        continue;
                    }
                    debug!(project = %project, path = %target.path, "File already migrated");
                    SkipReason::Unchanged
                }
                Ok(None) => {
                    info!(project = %project, path = %target.path, "File not present, skipping");
                    SkipReason::Missing
                }
                Err(err) => {
                    warn!(project = %project, path = %target.path, error = %err, "Could not fetch file, skipping");
                    SkipReason::FetchFailed(err.to_string())
                }
            };
            skipped.push(SkippedTarget {
                path: target.path.clone(),
                reason,
            });
        }

        (actions, skipped)
    }

    /// Commit `actions` to the feature branch, creating it first when reading from base.
    /// The flag reports whether the branch is known to exist afterwards.
    async fn commit_actions(
        &self,
        project: &Project,
        working_ref: &WorkingRef,
        actions: &[FileAction],
    ) -> (CommitOutcome, bool) {
        let feature = &self.settings.feature_branch;

        if let WorkingRef::Base(base) = working_ref {
            match self.client.create_branch(project, feature, base).await {
                Ok(_) => info!(project = %project, branch = %feature, from = %base, "Created feature branch"),
                Err(err) if branch_already_exists(&err) => {
                    warn!(project = %project, branch = %feature, "Feature branch already exists, committing to it");
                }
                Err(err) => {
                    error!(project = %project, branch = %feature, error = %err, "Failed to create feature branch");
                    return (CommitOutcome::Failed(format!("create branch {feature}: {err}")), false);
                }
            }
        }

        let request = CommitRequest {
            branch: feature.clone(),
            message: self.settings.commit_message.clone(),
            actions: actions.to_vec(),
        };

        let outcome = match self.client.commit(project, &request).await {
            Ok(info) => {
                info!(project = %project, commit = %info.short_sha, files = actions.len(), "Committed changes");
                CommitOutcome::Committed(info)
            }
            Err(err) => {
                error!(project = %project, error = %err, "Commit failed");
                CommitOutcome::Failed(err.to_string())
            }
        };
        (outcome, true)
    }

    async fn reconcile_merge_request(&self, project: &Project) -> MergeRequestOutcome {
        let source = &self.settings.feature_branch;
        let target = &self.settings.base_branch;

        match self.client.list_open_merge_requests(project, source, target).await {
            Ok(open) => {
                if let Some(existing) = open.into_iter().next() {
                    info!(project = %project, iid = existing.iid, "Merge request already open");
                    return MergeRequestOutcome::Existing(existing);
                }
            }
            // Fall through to creation; a duplicate is caught by the conflict response.
            Err(err) => warn!(project = %project, error = %err, "Could not list merge requests"),
        }

        let question = format!("Raise a merge request {source} -> {target} for {}?", project.display_name());
        if !self.decisions.ask_yes_no(&question) {
            info!(project = %project, "Merge request declined");
            return MergeRequestOutcome::Declined;
        }

        match self
            .client
            .create_merge_request(project, source, target, &self.settings.merge_request_title)
            .await
        {
            Ok(mr) => {
                info!(project = %project, iid = mr.iid, url = ?mr.web_url, "Merge request created");
                MergeRequestOutcome::Created(mr)
            }
            Err(err) if err.is_conflict() => {
                info!(project = %project, "Merge request already exists");
                MergeRequestOutcome::AlreadyExists
            }
            Err(err) => {
                error!(project = %project, error = %err, "Failed to create merge request");
                MergeRequestOutcome::Failed(err.to_string())
            }
        }
    }
}

/// GitLab answers a duplicate branch with 400 "Branch already exists" rather than 409.
fn branch_already_exists(err: &PlatformError) -> bool {
    match err {
        PlatformError::Api { status: 400, message, .. } => message.to_ascii_lowercase().contains("already exists"),
        other => other.is_conflict(),
    }
}
