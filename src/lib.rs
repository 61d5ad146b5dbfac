// repo-migrator library - multi-repository migration and handover on GitLab
// This exposes the engine components for the binary and for integration tests

pub mod cli;
pub mod config;
pub mod decision;
pub mod engine;
pub mod gitlab;
pub mod handover;
pub mod platform;
pub mod reconcile;
pub mod telemetry;
pub mod transform;
pub mod watcher;

// Re-export key types for easy access
pub use config::{ConfigError, MigratorConfig};
pub use decision::{AutoDecisions, DecisionSource, ScriptedDecisions, TerminalPrompt};
pub use engine::{MigrationEngine, ProjectReport, RunOptions, RunSummary};
pub use gitlab::GitLabClient;
pub use handover::{DeploymentOrchestrator, HandoverOutcome, TagHandoverReport};
pub use platform::{PlatformError, Project, RepositoryClient};
pub use reconcile::{CommitOutcome, MergeRequestOutcome, ReconcileReport, RepositoryStateManager, WorkingRef};
pub use telemetry::{generate_correlation_id, init_telemetry, project_span};
pub use transform::{Category, RuleSet, TransformOutcome, TransformRule, TransformTarget};
pub use watcher::{PipelineOutcome, PipelineWatcher, PollPolicy};
