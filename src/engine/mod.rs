//! Migration engine
//!
//! The single entry point for a run: builds the transform targets for the selected
//! categories, then walks the configured projects in order, reconciling each one and
//! optionally driving its handover. Nothing that happens inside one project can stop
//! the run; every outcome ends up in the [`RunSummary`].

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::config::MigratorConfig;
use crate::decision::DecisionSource;
use crate::handover::{DeploymentOrchestrator, TagHandoverReport};
use crate::platform::{Project, RepositoryClient};
use crate::reconcile::{CommitOutcome, MergeRequestOutcome, ReconcileReport, RepositoryStateManager};
use crate::telemetry::{generate_correlation_id, project_span};
use crate::transform::{catalog, Category, TransformError, TransformTarget};
use crate::watcher::PollPolicy;

/// Choices for one run, resolved before the engine starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub categories: BTreeSet<Category>,
    pub handover: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            categories: Category::ALL.into_iter().collect(),
            handover: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectReport {
    pub project: Project,
    pub reconcile: ReconcileReport,
    /// `None` when handover was not requested or could not start.
    pub handover: Option<Vec<TagHandoverReport>>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub correlation_id: String,
    pub dry_run: bool,
    pub projects: Vec<ProjectReport>,
}

impl RunSummary {
    pub fn changed_projects(&self) -> usize {
        self.projects.iter().filter(|p| !p.reconcile.actions.is_empty()).count()
    }

    pub fn compliant_projects(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| p.reconcile.commit == CommitOutcome::AlreadyCompliant)
            .count()
    }

    pub fn failed_commits(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| matches!(p.reconcile.commit, CommitOutcome::Failed(_)))
            .count()
    }

    pub fn merge_requests_created(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| matches!(p.reconcile.merge_request, MergeRequestOutcome::Created(_)))
            .count()
    }

    pub fn merge_requests_existing(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| {
                matches!(
                    p.reconcile.merge_request,
                    MergeRequestOutcome::Existing(_) | MergeRequestOutcome::AlreadyExists
                )
            })
            .count()
    }

    fn tag_reports(&self) -> impl Iterator<Item = &TagHandoverReport> {
        self.projects.iter().flat_map(|p| p.handover.iter().flatten())
    }

    pub fn handovers_deployed(&self) -> usize {
        self.tag_reports().filter(|r| r.outcome.is_deployed()).count()
    }

    pub fn handovers_failed(&self) -> usize {
        self.tag_reports().filter(|r| !r.outcome.is_deployed()).count()
    }
}

pub struct MigrationEngine {
    config: MigratorConfig,
    client: Arc<dyn RepositoryClient>,
    decisions: Arc<dyn DecisionSource>,
    poll_policy: Option<PollPolicy>,
}

impl MigrationEngine {
    pub fn new(config: MigratorConfig, client: Arc<dyn RepositoryClient>, decisions: Arc<dyn DecisionSource>) -> Self {
        Self {
            config,
            client,
            decisions,
            poll_policy: None,
        }
    }

    /// Override the handover poll policy derived from configuration.
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = Some(policy);
        self
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary, TransformError> {
        let targets = catalog::targets(&options.categories, &self.config.transforms)?;
        let correlation_id = generate_correlation_id();
        let handover_active = options.handover && !options.dry_run;

        info!(
            correlation_id = %correlation_id,
            projects = self.config.migration.projects.len(),
            categories = ?options.categories,
            dry_run = options.dry_run,
            handover = handover_active,
            "Starting migration run"
        );
        if options.handover && options.dry_run {
            warn!("Handover requested but disabled for dry run");
        }

        let manager = RepositoryStateManager::new(
            self.client.clone(),
            self.decisions.clone(),
            self.config.migration.clone(),
        );
        let orchestrator = handover_active.then(|| self.orchestrator());

        let mut projects = Vec::with_capacity(self.config.migration.projects.len());
        for project in &self.config.migration.projects {
            let span = project_span(project, &correlation_id);
            let report = self
                .run_project(project, &targets, options.dry_run, &manager, orchestrator.as_ref())
                .instrument(span)
                .await;
            projects.push(report);
        }

        let summary = RunSummary {
            correlation_id,
            dry_run: options.dry_run,
            projects,
        };
        info!(
            correlation_id = %summary.correlation_id,
            changed = summary.changed_projects(),
            compliant = summary.compliant_projects(),
            commit_failures = summary.failed_commits(),
            merge_requests_created = summary.merge_requests_created(),
            merge_requests_existing = summary.merge_requests_existing(),
            handovers_deployed = summary.handovers_deployed(),
            handovers_failed = summary.handovers_failed(),
            "Migration run finished"
        );
        Ok(summary)
    }

    fn orchestrator(&self) -> DeploymentOrchestrator {
        let orchestrator = DeploymentOrchestrator::new(self.client.clone(), self.config.handover.clone());
        match self.poll_policy {
            Some(policy) => orchestrator.with_policy(policy),
            None => orchestrator,
        }
    }

    async fn run_project(
        &self,
        project: &Project,
        targets: &[TransformTarget],
        dry_run: bool,
        manager: &RepositoryStateManager,
        orchestrator: Option<&DeploymentOrchestrator>,
    ) -> ProjectReport {
        info!("Processing project");
        let reconcile = manager.reconcile(project, targets, dry_run).await;

        let handover = match orchestrator {
            Some(orchestrator) if reconcile.feature_branch_ready() => Some(
                orchestrator
                    .handover(project, &self.config.migration.feature_branch, &self.config.handover.tags)
                    .await,
            ),
            Some(_) => {
                warn!("Feature branch does not exist, skipping handover");
                None
            }
            None => None,
        };

        ProjectReport {
            project: project.clone(),
            reconcile,
            handover,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ScriptedDecisions;
    use crate::platform::mocks::InMemoryPlatform;
    use crate::platform::PlatformError;
    use std::time::Duration;

    const FEATURE: &str = "task-4323-java17-migration";

    fn config(projects: &[&str]) -> MigratorConfig {
        let mut config = MigratorConfig::default();
        config.migration.projects = projects.iter().map(|id| Project::new(*id)).collect();
        config
    }

    fn pom_only() -> RunOptions {
        RunOptions {
            dry_run: false,
            categories: [Category::Pom].into_iter().collect(),
            handover: false,
        }
    }

    #[tokio::test]
    async fn test_project_failure_does_not_stop_run() {
        let platform = Arc::new(
            InMemoryPlatform::new()
                .with_branch("1", "develop")
                .with_file("1", "develop", "pom.xml", "<java.version>11</java.version>")
                .with_branch("2", "develop")
                .with_file("2", "develop", "pom.xml", "<java.version>11</java.version>")
                .failing("create_branch", 1, PlatformError::transport("create branch", "reset")),
        );
        let engine = MigrationEngine::new(
            config(&["1", "2"]),
            platform.clone(),
            Arc::new(ScriptedDecisions::new().answer_yes_no(false)),
        );

        let summary = engine.run(&pom_only()).await.unwrap();

        assert_eq!(summary.projects.len(), 2);
        assert_eq!(summary.failed_commits(), 1);
        assert!(matches!(summary.projects[1].reconcile.commit, CommitOutcome::Committed(_)));
        assert_eq!(summary.changed_projects(), 2);
        assert!(platform.has_branch("2", FEATURE));
    }

    #[tokio::test]
    async fn test_dry_run_never_hands_over() {
        let platform = Arc::new(InMemoryPlatform::new().with_branch("1", FEATURE));
        let engine = MigrationEngine::new(config(&["1"]), platform.clone(), Arc::new(ScriptedDecisions::new()));

        let options = RunOptions {
            handover: true,
            ..RunOptions::default()
        };
        let summary = engine.run(&options).await.unwrap();

        assert!(summary.projects[0].handover.is_none());
        assert!(!platform.has_tag("1", "dev"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handover_skipped_without_feature_branch() {
        let platform = Arc::new(InMemoryPlatform::new().with_branch("1", "develop"));
        let engine = MigrationEngine::new(config(&["1"]), platform, Arc::new(ScriptedDecisions::new()))
            .with_poll_policy(PollPolicy::new(Duration::from_secs(1), 1));

        let options = RunOptions {
            handover: true,
            ..pom_only()
        };
        let summary = engine.run(&options).await.unwrap();

        assert_eq!(summary.compliant_projects(), 1);
        assert!(summary.projects[0].handover.is_none());
        assert_eq!(summary.handovers_failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handover_runs_when_branch_created_but_commit_failed() {
        let platform = Arc::new(
            InMemoryPlatform::new()
                .with_branch("1", "develop")
                .with_file("1", "develop", "pom.xml", "<java.version>11</java.version>")
                .failing("commit", 1, PlatformError::transport("commit", "reset")),
        );
        let engine = MigrationEngine::new(
            config(&["1"]),
            platform.clone(),
            Arc::new(ScriptedDecisions::new().answer_yes_no(false)),
        )
        .with_poll_policy(PollPolicy::new(Duration::from_secs(1), 1));

        let options = RunOptions {
            handover: true,
            ..pom_only()
        };
        let summary = engine.run(&options).await.unwrap();

        assert_eq!(summary.failed_commits(), 1);
        assert!(summary.projects[0].reconcile.feature_branch_ready());
        assert!(summary.projects[0].handover.is_some());
        assert!(platform.has_tag("1", "dev"));
    }
}
