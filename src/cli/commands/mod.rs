use anyhow::Result;

pub mod config;
pub mod rules;
pub mod run;

pub async fn show_usage() -> Result<()> {
    println!("🚚 repo-migrator - GitLab multi-repository migration");
    println!();
    println!("To get started:");
    println!("  🔍 repo-migrator run --dry-run   # Preview what would change");
    println!("  🚀 repo-migrator run --live      # Commit changes and raise merge requests");
    println!("  📋 repo-migrator rules           # List transform categories");
    println!("  ⚙️  repo-migrator config          # Show effective configuration");
    println!();
    println!("💡 Configure projects in repo-migrator.toml and export REPO_MIGRATOR_TOKEN.");
    Ok(())
}
