// Built-in migration categories: Maven descriptor, GitLab CI descriptor, Beanstalk config

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::rules::{BlockScoped, RegexReplace, RemoveLines};
use super::{RuleSet, TransformError, TransformTarget};
use crate::config::TransformConfig;

/// A selectable group of target files and the rules that migrate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Pom,
    Ci,
    ElasticBeanstalk,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Pom, Category::Ci, Category::ElasticBeanstalk];

    /// Menu number shown in prompts.
    pub fn number(self) -> u8 {
        match self {
            Category::Pom => 1,
            Category::Ci => 2,
            Category::ElasticBeanstalk => 3,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Category::Pom => "pom",
            Category::Ci => "ci",
            Category::ElasticBeanstalk => "eb",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Pom => "POM (Java version and parent)",
            Category::Ci => "CI (.gitlab-ci.yml image cleanup)",
            Category::ElasticBeanstalk => "EB (.elasticbeanstalk platform)",
        }
    }

    pub fn default_path(self) -> &'static str {
        match self {
            Category::Pom => "pom.xml",
            Category::Ci => ".gitlab-ci.yml",
            Category::ElasticBeanstalk => ".elasticbeanstalk/config.yml",
        }
    }

    pub fn path(self, config: &TransformConfig) -> String {
        config
            .paths
            .get(self.key())
            .cloned()
            .unwrap_or_else(|| self.default_path().to_string())
    }

    /// Parse a comma separated selection such as `1,3` or `pom, eb`.
    pub fn parse_selection(input: &str) -> Result<BTreeSet<Category>, TransformError> {
        input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Category::from_str)
            .collect()
    }

    pub fn rule_set(self, config: &TransformConfig) -> Result<RuleSet, TransformError> {
        match self {
            Category::Pom => pom_rules(config),
            Category::Ci => ci_rules(),
            Category::ElasticBeanstalk => eb_rules(config),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "pom" => Ok(Category::Pom),
            "2" | "ci" => Ok(Category::Ci),
            "3" | "eb" => Ok(Category::ElasticBeanstalk),
            other => Err(TransformError::UnknownCategory(other.to_string())),
        }
    }
}

/// Build the ordered target list for a category selection.
pub fn targets(
    categories: &BTreeSet<Category>,
    config: &TransformConfig,
) -> Result<Vec<TransformTarget>, TransformError> {
    categories
        .iter()
        .map(|c| Ok(TransformTarget::new(c.path(config), c.rule_set(config)?)))
        .collect()
}

fn xml_element(tag: &str, value: &str) -> Result<RegexReplace, TransformError> {
    let escaped = regex::escape(tag);
    RegexReplace::literal(
        tag,
        &format!(r"<{escaped}>.*?</{escaped}>"),
        format!("<{tag}>{value}</{tag}>"),
    )
}

fn pom_rules(config: &TransformConfig) -> Result<RuleSet, TransformError> {
    let java = &config.java_version;
    let parent = &config.parent_version;

    let parent_block = BlockScoped::new("parent", "<parent>", "</parent>")
        .with_rule(xml_element("version", parent)?)
        .with_rule(RegexReplace::with_groups(
            "parent-relative-path",
            r"(parent-pom-).*?(\.xml)",
            format!("${{1}}{}${{2}}", parent.replace('$', "$$")),
        )?);

    Ok(RuleSet::new(Category::Pom.key())
        .with_rule(xml_element("java.version", java)?)
        .with_rule(xml_element("maven.compiler.source", java)?)
        .with_rule(xml_element("maven.compiler.target", java)?)
        .with_rule(parent_block))
}

fn ci_rules() -> Result<RuleSet, TransformError> {
    Ok(RuleSet::new(Category::Ci.key()).with_rule(RemoveLines::new("image", r"^\s*image:")?))
}

fn eb_rules(config: &TransformConfig) -> Result<RuleSet, TransformError> {
    Ok(RuleSet::new(Category::ElasticBeanstalk.key()).with_rule(RegexReplace::literal(
        "default-platform",
        r"default_platform:[^\r\n]*",
        format!("default_platform: {}", config.default_platform),
    )?))
}
