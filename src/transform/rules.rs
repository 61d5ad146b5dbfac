// Reusable rule shapes: regex substitution, line removal, block-scoped rewrite

use regex::{NoExpand, Regex};

use super::{TransformError, TransformRule};

fn compile(rule: &str, pattern: &str) -> Result<Regex, TransformError> {
    Regex::new(pattern).map_err(|source| TransformError::InvalidPattern {
        rule: rule.to_string(),
        source,
    })
}

/// Replace every match of a pattern.
///
/// Idempotence is the caller's responsibility: the replacement must itself match the
/// pattern and map to itself (e.g. `<v>.*?</v>` -> `<v>17</v>`).
#[derive(Debug)]
pub struct RegexReplace {
    name: String,
    pattern: Regex,
    replacement: String,
    expand_groups: bool,
}

impl RegexReplace {
    /// Replacement is inserted verbatim; `$` has no special meaning.
    pub fn literal(name: &str, pattern: &str, replacement: impl Into<String>) -> Result<Self, TransformError> {
        Ok(Self {
            name: name.to_string(),
            pattern: compile(name, pattern)?,
            replacement: replacement.into(),
            expand_groups: false,
        })
    }

    /// Replacement may reference capture groups as `${1}` or `${name}`.
    pub fn with_groups(name: &str, pattern: &str, replacement: impl Into<String>) -> Result<Self, TransformError> {
        Ok(Self {
            name: name.to_string(),
            pattern: compile(name, pattern)?,
            replacement: replacement.into(),
            expand_groups: true,
        })
    }
}

impl TransformRule for RegexReplace {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, content: &str) -> String {
        if self.expand_groups {
            self.pattern
                .replace_all(content, self.replacement.as_str())
                .into_owned()
        } else {
            self.pattern
                .replace_all(content, NoExpand(&self.replacement))
                .into_owned()
        }
    }
}

/// Drop every line whose text (without its line ending) matches a pattern.
#[derive(Debug)]
pub struct RemoveLines {
    name: String,
    pattern: Regex,
}

impl RemoveLines {
    pub fn new(name: &str, pattern: &str) -> Result<Self, TransformError> {
        Ok(Self {
            name: name.to_string(),
            pattern: compile(name, pattern)?,
        })
    }
}

impl TransformRule for RemoveLines {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, content: &str) -> String {
        content
            .split_inclusive('\n')
            .filter(|line| !self.pattern.is_match(line.trim_end_matches(['\n', '\r'])))
            .collect()
    }
}

/// Rewrite only the interior of delimited blocks.
///
/// Each `open ... close` block is located, its interior is passed through the inner
/// rules, and the result is spliced back between the untouched delimiters. Text outside
/// every block is copied verbatim. An `open` marker without a matching `close` leaves the
/// remainder of the document untouched.
#[derive(Debug)]
pub struct BlockScoped {
    name: String,
    open: String,
    close: String,
    inner: Vec<Box<dyn TransformRule>>,
}

impl BlockScoped {
    pub fn new(name: &str, open: &str, close: &str) -> Self {
        Self {
            name: name.to_string(),
            open: open.to_string(),
            close: close.to_string(),
            inner: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: impl TransformRule + 'static) -> Self {
        self.inner.push(Box::new(rule));
        self
    }
}

impl TransformRule for BlockScoped {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, content: &str) -> String {
        let mut output = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find(&self.open) {
            let interior_start = start + self.open.len();
            let Some(len) = rest[interior_start..].find(&self.close) else {
                break;
            };
            let interior_end = interior_start + len;

            let interior = self
                .inner
                .iter()
                .fold(rest[interior_start..interior_end].to_string(), |acc, rule| rule.apply(&acc));

            output.push_str(&rest[..interior_start]);
            output.push_str(&interior);
            output.push_str(&self.close);
            rest = &rest[interior_end + self.close.len()..];
        }

        output.push_str(rest);
        output
    }
}
