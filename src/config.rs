use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::platform::Project;

const DEFAULT_CONFIG_FILE: &str = "repo-migrator.toml";
const TOKEN_PLACEHOLDER: &str = "glpat-REPLACE_ME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to write configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

/// Immutable run configuration, built once at startup and passed into the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// GitLab connection settings
    pub gitlab: GitLabConfig,
    /// Projects and branch naming
    pub migration: MigrationConfig,
    /// Target values for the built-in transform catalog
    pub transforms: TransformConfig,
    /// Tag handover settings
    pub handover: HandoverConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitLabConfig {
    /// API root, e.g. `https://gitlab.example.com/api/v4`
    pub base_url: String,
    /// Personal access token (can be set via env var)
    pub token: Option<String>,
    /// HTTP request timeout
    pub timeout_seconds: u64,
    pub rate_limit: RateLimitConfig,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub projects: Vec<Project>,
    /// Working branch that accumulates migration commits
    pub feature_branch: String,
    /// Branch the feature branch is cut from and merged into
    pub base_branch: String,
    pub commit_message: String,
    pub merge_request_title: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    pub java_version: String,
    pub parent_version: String,
    pub default_platform: String,
    /// Per-category path overrides, keyed by category key (`pom`, `ci`, `eb`)
    pub paths: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandoverConfig {
    /// Allow tag handover without asking
    pub enabled: bool,
    /// Tags recreated in order
    pub tags: Vec<String>,
    pub terminate_job: String,
    /// Deploy job name; `{tag}` is replaced with the tag name
    pub deploy_job_template: String,
    pub poll_interval_seconds: u64,
    pub max_attempts: u32,
    /// Wait for the pipeline to settle again after terminate before deploying
    pub await_between_jobs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com/api/v4".to_string(),
            token: None, // Will be read from env var or .env
            timeout_seconds: 30,
            rate_limit: RateLimitConfig::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst_capacity: 10,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            feature_branch: "task-4323-java17-migration".to_string(),
            base_branch: "develop".to_string(),
            commit_message: "fix: java17-migration updates".to_string(),
            merge_request_title: "TASK-4323: java migration".to_string(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            java_version: "17".to_string(),
            parent_version: "1.8.3".to_string(),
            default_platform: "arn:aws:elasticbeanstalk:us-east-1::platform/Corretto 17 running on 64bit Amazon Linux 2/3.10.1".to_string(),
            paths: BTreeMap::new(),
        }
    }
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tags: vec!["dev".to_string(), "azure-dev".to_string()],
            terminate_job: "eb-terminate".to_string(),
            deploy_job_template: "eb-deploy-{tag}".to_string(),
            poll_interval_seconds: 30,
            max_attempts: 30, // 15 minutes at the default interval
            await_between_jobs: true,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl HandoverConfig {
    pub fn deploy_job_for(&self, tag: &str) -> String {
        self.deploy_job_template.replace("{tag}", tag)
    }
}

impl MigratorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`repo-migrator.toml`, or `explicit_path`)
    /// 3. Environment variables (prefixed with REPO_MIGRATOR_, `__` between sections)
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match explicit_path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("REPO_MIGRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut migrator_config: MigratorConfig = builder.build()?.try_deserialize()?;

        // Special handling for the token - check the conventional variables too
        if migrator_config.gitlab.token.as_deref().is_none_or(str::is_empty) {
            migrator_config.gitlab.token = std::env::var("REPO_MIGRATOR_TOKEN")
                .or_else(|_| std::env::var("GITLAB_TOKEN"))
                .ok()
                .filter(|t| !t.is_empty());
        }

        Ok(migrator_config)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<(), ConfigError> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    /// Check invariants the engine relies on.
    ///
    /// A token is only required when the run will talk to the platform for real.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        if self.migration.projects.is_empty() {
            return Err(ConfigError::Invalid(
                "no projects configured; add [[migration.projects]] entries".to_string(),
            ));
        }
        if self.migration.feature_branch.trim().is_empty() || self.migration.base_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("feature and base branch names must be set".to_string()));
        }
        if self.migration.feature_branch == self.migration.base_branch {
            return Err(ConfigError::Invalid(format!(
                "feature branch and base branch are both '{}'",
                self.migration.base_branch
            )));
        }
        if !self.handover.deploy_job_template.contains("{tag}") {
            return Err(ConfigError::Invalid(
                "handover.deploy_job_template must contain '{tag}'".to_string(),
            ));
        }
        if self.handover.max_attempts == 0 || self.handover.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "handover polling needs a non-zero interval and attempt budget".to_string(),
            ));
        }
        let token_missing = self
            .gitlab
            .token
            .as_deref()
            .is_none_or(|t| t.is_empty() || t == TOKEN_PLACEHOLDER);
        if token_missing && !dry_run {
            return Err(ConfigError::Invalid(
                "GitLab token not set; export REPO_MIGRATOR_TOKEN or GITLAB_TOKEN".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy safe to print or persist for sharing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.gitlab.token.is_some() {
            copy.gitlab.token = Some("***".to_string());
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> MigratorConfig {
        let mut config = MigratorConfig::default();
        config.migration.projects = vec![Project::new("101")];
        config.gitlab.token = Some("glpat-test".to_string());
        config
    }

    #[test]
    fn test_defaults_match_handover_conventions() {
        let config = MigratorConfig::default();
        assert_eq!(config.handover.tags, vec!["dev", "azure-dev"]);
        assert_eq!(config.handover.terminate_job, "eb-terminate");
        assert_eq!(config.handover.deploy_job_for("azure-dev"), "eb-deploy-azure-dev");
        assert_eq!(config.handover.max_attempts, 30);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[gitlab]
base_url = "https://gitlab.internal/api/v4"
token = "glpat-from-file"

[migration]
feature_branch = "feature/java17"
projects = [{{ id = "12", name = "billing" }}, {{ id = "group/ledger" }}]

[handover]
tags = ["dev"]
"#
        )
        .unwrap();

        let config = MigratorConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.gitlab.base_url, "https://gitlab.internal/api/v4");
        assert_eq!(config.migration.feature_branch, "feature/java17");
        assert_eq!(config.migration.base_branch, "develop");
        assert_eq!(config.migration.projects.len(), 2);
        assert_eq!(config.migration.projects[0].display_name(), "billing");
        assert_eq!(config.migration.projects[1].name, None);
        assert_eq!(config.handover.tags, vec!["dev"]);
        assert_eq!(config.handover.terminate_job, "eb-terminate");
    }

    #[test]
    fn test_validate_rejects_empty_project_list() {
        let mut config = valid_config();
        config.migration.projects.clear();
        assert!(matches!(config.validate(false), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_same_feature_and_base_branch() {
        let mut config = valid_config();
        config.migration.feature_branch = "develop".to_string();
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_token_only_required_for_live_runs() {
        let mut config = valid_config();
        config.gitlab.token = None;
        assert!(config.validate(true).is_ok());
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_deploy_template_needs_tag_placeholder() {
        let mut config = valid_config();
        config.handover.deploy_job_template = "eb-deploy".to_string();
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_redacted_hides_token_and_round_trips_through_toml() {
        let config = valid_config().redacted();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("glpat-test"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        config.save_to_file(&path).unwrap();
        let reloaded = MigratorConfig::load(Some(&path)).unwrap();
        assert_eq!(reloaded.migration.projects, config.migration.projects);
    }
}
