use anyhow::Result;

use crate::config::MigratorConfig;
use crate::transform::Category;

pub struct RulesCommand {
    config: MigratorConfig,
}

impl RulesCommand {
    pub fn new(config: MigratorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> Result<()> {
        println!("📋 TRANSFORM CATEGORIES");
        println!("=======================");
        println!();
        for category in Category::ALL {
            let rule_set = category.rule_set(&self.config.transforms)?;
            println!("{}. {} [{}]", category.number(), category.label(), category.key());
            println!("   📄 {}", category.path(&self.config.transforms));
            println!("   🔧 {}", rule_set.rule_names().join(", "));
        }
        println!();
        println!(
            "Java {} / parent {} / platform {}",
            self.config.transforms.java_version, self.config.transforms.parent_version, self.config.transforms.default_platform
        );
        Ok(())
    }
}
