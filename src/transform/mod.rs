//! Text transformation engine
//!
//! A [`RuleSet`] is an ordered list of named [`TransformRule`]s. Rules are composed as a
//! pipeline: each one receives the previous rule's output. Every rule must be pure and
//! idempotent, so running a set over already-migrated content changes nothing and the
//! caller can treat "no change" as "already compliant".

pub mod catalog;
pub mod rules;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use catalog::Category;
pub use rules::{BlockScoped, RegexReplace, RemoveLines};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("rule '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("unknown transform category '{0}' (expected 1-3 or pom, ci, eb)")]
    UnknownCategory(String),
}

/// A named, pure `content -> content` rewrite.
///
/// Implementations must be idempotent: `apply(apply(x)) == apply(x)`.
pub trait TransformRule: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn apply(&self, content: &str) -> String;
}

#[derive(Debug)]
pub struct RuleSet {
    name: String,
    rules: Vec<Box<dyn TransformRule>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: impl TransformRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A file path paired with the rule set that migrates it.
#[derive(Debug, Clone)]
pub struct TransformTarget {
    pub path: String,
    pub rule_set: Arc<RuleSet>,
}

impl TransformTarget {
    pub fn new(path: impl Into<String>, rule_set: RuleSet) -> Self {
        Self {
            path: path.into(),
            rule_set: Arc::new(rule_set),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub content: String,
    pub changed: bool,
    /// Names of the rules that altered the content, in application order.
    pub applied_rules: Vec<String>,
}

/// Run every rule of `rule_set` over `original`, in order.
pub fn apply(path: &str, original: &str, rule_set: &RuleSet) -> TransformOutcome {
    let mut content = original.to_string();
    let mut applied_rules = Vec::new();

    for rule in &rule_set.rules {
        let next = rule.apply(&content);
        if next != content {
            debug!(path, rule = rule.name(), rule_set = rule_set.name(), "rule rewrote content");
            applied_rules.push(rule.name().to_string());
            content = next;
        }
    }

    let changed = content != original;
    TransformOutcome {
        content,
        changed,
        applied_rules,
    }
}
