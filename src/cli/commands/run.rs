use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::MigratorConfig;
use crate::decision::{AutoDecisions, Choice, DecisionSource, TerminalPrompt};
use crate::engine::{MigrationEngine, ProjectReport, RunOptions, RunSummary};
use crate::gitlab::GitLabClient;
use crate::handover::HandoverOutcome;
use crate::platform::Project;
use crate::reconcile::{CommitOutcome, MergeRequestOutcome, WorkingRef};
use crate::transform::Category;

/// Flags as given on the command line; `None` means "ask".
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub dry_run: Option<bool>,
    pub select: Option<String>,
    pub handover: Option<bool>,
    pub yes: bool,
    pub projects: Vec<String>,
}

pub struct RunCommand {
    config: MigratorConfig,
    flags: RunFlags,
}

impl RunCommand {
    pub fn new(config: MigratorConfig, flags: RunFlags) -> Self {
        Self { config, flags }
    }

    pub async fn execute(self) -> Result<()> {
        let decisions: Arc<dyn DecisionSource> = if self.flags.yes {
            Arc::new(AutoDecisions { yes_to_all: true })
        } else {
            Arc::new(TerminalPrompt)
        };

        let mut config = self.config;
        if !self.flags.projects.is_empty() {
            config.migration.projects = self.flags.projects.iter().map(Project::new).collect();
        }

        println!("🚚 REPO MIGRATOR");
        println!("================");
        println!();

        let options = resolve_options(&self.flags, decisions.as_ref())?;
        config
            .validate(options.dry_run)
            .context("configuration is not usable for this run")?;

        let client = GitLabClient::new(&config.gitlab).context("failed to build GitLab client")?;

        println!("🌐 GitLab:     {}", client.base_url());
        println!("📦 Projects:   {}", config.migration.projects.len());
        println!(
            "🔧 Categories: {}",
            options.categories.iter().map(|c| c.key()).collect::<Vec<_>>().join(", ")
        );
        println!("🌿 Branch:     {} -> {}", config.migration.feature_branch, config.migration.base_branch);
        if options.dry_run {
            println!("🔍 Dry run: nothing will be committed, raised or tagged");
        }
        if options.handover {
            println!("🏷️  Handover:   {}", config.handover.tags.join(", "));
        }
        println!();

        let engine = MigrationEngine::new(config, Arc::new(client), decisions);
        let summary = engine.run(&options).await?;
        print_summary(&summary);
        Ok(())
    }
}

/// Fill in every choice not given by flag, asking `decisions` or using defaults under `--yes`.
pub fn resolve_options(flags: &RunFlags, decisions: &dyn DecisionSource) -> Result<RunOptions> {
    let defaults = RunOptions::default();

    let dry_run = match flags.dry_run {
        Some(dry_run) => dry_run,
        None if flags.yes => defaults.dry_run,
        None => decisions.ask_yes_no("Run in dry-run mode?"),
    };

    let categories = match &flags.select {
        Some(selection) => Category::parse_selection(selection)?,
        None if flags.yes => defaults.categories,
        None => ask_categories(decisions),
    };
    if categories.is_empty() {
        anyhow::bail!("no transform categories selected");
    }

    let handover = match flags.handover {
        Some(handover) => handover,
        None if flags.yes || dry_run => defaults.handover,
        None => decisions.ask_yes_no("Run the tag handover (terminate and redeploy environments)?"),
    };

    Ok(RunOptions {
        dry_run,
        categories,
        handover,
    })
}

fn ask_categories(decisions: &dyn DecisionSource) -> BTreeSet<Category> {
    let options: Vec<Choice> = Category::ALL
        .iter()
        .map(|c| Choice::new(c.number().to_string(), c.label()))
        .collect();
    decisions
        .ask_choice_set("Select migration categories:", &options)
        .iter()
        .filter_map(|key| key.parse().ok())
        .collect()
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("📊 RUN SUMMARY");
    println!("==============");
    for report in &summary.projects {
        print_project(report);
    }
    println!();
    println!("✏️  Changed:        {}", summary.changed_projects());
    println!("✅ Compliant:      {}", summary.compliant_projects());
    println!("❌ Commit failures: {}", summary.failed_commits());
    println!(
        "🔀 Merge requests: {} created, {} already open",
        summary.merge_requests_created(),
        summary.merge_requests_existing()
    );
    if summary.handovers_deployed() + summary.handovers_failed() > 0 {
        println!(
            "🏷️  Handovers:      {} deployed, {} failed",
            summary.handovers_deployed(),
            summary.handovers_failed()
        );
    }
    println!("🧾 Correlation id: {}", summary.correlation_id);
}

fn print_project(report: &ProjectReport) {
    let reconcile = &report.reconcile;
    let source = match &reconcile.working_ref {
        WorkingRef::Feature(name) => format!("feature {name}"),
        WorkingRef::Base(name) => format!("base {name}"),
    };
    let commit = match &reconcile.commit {
        CommitOutcome::Committed(info) => format!("committed {} file(s) as {}", reconcile.actions.len(), info.short_sha),
        CommitOutcome::DryRun => format!("would change {} file(s)", reconcile.actions.len()),
        CommitOutcome::AlreadyCompliant => "already compliant".to_string(),
        CommitOutcome::Failed(message) => format!("commit failed: {message}"),
    };
    println!();
    println!("📦 {} (read from {source})", report.project);
    println!("   📝 {commit}");
    for action in &reconcile.actions {
        println!("      • {}", action.path);
    }

    let merge_request = match &reconcile.merge_request {
        MergeRequestOutcome::Existing(mr) => Some(format!("!{} already open", mr.iid)),
        MergeRequestOutcome::Created(mr) => Some(format!(
            "!{} created{}",
            mr.iid,
            mr.web_url.as_deref().map(|u| format!(" {u}")).unwrap_or_default()
        )),
        MergeRequestOutcome::AlreadyExists => Some("already exists".to_string()),
        MergeRequestOutcome::Declined => Some("not raised".to_string()),
        MergeRequestOutcome::Failed(message) => Some(format!("failed: {message}")),
        MergeRequestOutcome::Skipped => None,
    };
    if let Some(line) = merge_request {
        println!("   🔀 Merge request {line}");
    }

    for tag in report.handover.iter().flatten() {
        let outcome = match &tag.outcome {
            HandoverOutcome::Deployed { deploy_job, .. } => format!("✅ deployed (job {deploy_job})"),
            HandoverOutcome::NoPipeline => "⚠️  no pipeline".to_string(),
            HandoverOutcome::TagFailed(message) => format!("❌ tag failed: {message}"),
            HandoverOutcome::PipelineFailed(status) => format!("❌ pipeline {status}"),
            HandoverOutcome::TimedOut => "⏰ timed out".to_string(),
            HandoverOutcome::JobUnavailable { job } => format!("❌ {job} not available"),
            HandoverOutcome::JobFailed { job, message } => format!("❌ {job}: {message}"),
        };
        println!("   🏷️  {}: {outcome}", tag.tag);
    }
}
