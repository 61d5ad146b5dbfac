use anyhow::Result;
use clap::Parser;

use repo_migrator::cli::commands::config::ConfigCommand;
use repo_migrator::cli::commands::rules::RulesCommand;
use repo_migrator::cli::commands::run::{RunCommand, RunFlags};
use repo_migrator::cli::commands::show_usage;
use repo_migrator::cli::{Cli, Commands};
use repo_migrator::config::MigratorConfig;
use repo_migrator::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return show_usage().await;
    };

    MigratorConfig::load_env_file()?;
    let config = MigratorConfig::load(cli.config.as_deref())?;
    init_telemetry(&config.observability.log_level, config.observability.json)?;

    match command {
        Commands::Run {
            dry_run,
            live,
            select,
            handover,
            no_handover,
            yes,
            projects,
        } => {
            let flags = RunFlags {
                dry_run: flag_pair(dry_run, live),
                select,
                handover: flag_pair(handover, no_handover).or(config.handover.enabled.then_some(true)),
                yes,
                projects,
            };
            RunCommand::new(config, flags).execute().await
        }
        Commands::Rules => RulesCommand::new(config).execute().await,
        Commands::Config => ConfigCommand::new(config).execute().await,
    }
}

/// `Some(true)` for the positive flag, `Some(false)` for the negative one, `None` if neither.
fn flag_pair(positive: bool, negative: bool) -> Option<bool> {
    match (positive, negative) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}
