use anyhow::Result;

use crate::config::MigratorConfig;

pub struct ConfigCommand {
    config: MigratorConfig,
}

impl ConfigCommand {
    pub fn new(config: MigratorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> Result<()> {
        print!("{}", self.config.redacted().to_toml()?);
        Ok(())
    }
}
