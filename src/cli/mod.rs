use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "repo-migrator")]
#[command(about = "Multi-repository migration and environment handover for GitLab")]
#[command(long_about = "repo-migrator patches tracked files across many GitLab projects, commits them \
                       through a feature branch, keeps one merge request open per project and can hand \
                       environments over by re-tagging and playing manual deploy jobs. Start with \
                       'repo-migrator run --dry-run' to preview changes.")]
pub struct Cli {
    /// Configuration file (defaults to ./repo-migrator.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Migrate every configured project (asks for anything not given as a flag)
    Run {
        /// Compute changes without committing, opening merge requests or tagging
        #[arg(long, conflicts_with = "live", help = "Preview changes without touching any remote state")]
        dry_run: bool,
        /// Apply changes to the remote projects
        #[arg(long, help = "Commit, raise merge requests and run handover for real")]
        live: bool,
        /// Categories to migrate, by number or name
        #[arg(long, value_name = "LIST", help = "Comma separated categories, e.g. 1,2,3 or pom,eb")]
        select: Option<String>,
        /// Run the tag handover after migrating
        #[arg(long, conflicts_with = "no_handover", help = "Recreate handover tags and play terminate/deploy jobs")]
        handover: bool,
        /// Skip the tag handover
        #[arg(long, help = "Do not touch tags or deployment jobs")]
        no_handover: bool,
        /// Non-interactive mode
        #[arg(
            short = 'y',
            long,
            help = "Never prompt: raise merge requests and use defaults (dry run, all categories, no handover)"
        )]
        yes: bool,
        /// Restrict the run to these project ids (repeatable)
        #[arg(long = "project", value_name = "ID", help = "Project id or path; overrides the configured list")]
        projects: Vec<String>,
    },
    /// List the transform categories and the files they target
    Rules,
    /// Print the effective configuration with secrets redacted
    Config,
}
