//! Ignore rules compiled to a path predicate
//!
//! A rule string is interpreted by its shape:
//!
//! 1. No slash anywhere: matches any tree member whose basename equals the
//!    rule.
//! 2. Leading slash: matches exactly that path relative to the working root
//!    (a trailing slash is stripped).
//! 3. Anything else: matches any member whose canonical path ends with the
//!    rule (a trailing slash is stripped).
//!
//! Matching is a disjunction across rules, so order never matters. The
//! control directory `.hoard` is always excluded.

use std::path::{Path, PathBuf};

/// Name of the working tree control directory, implicitly ignored
pub const CONTROL_DIR: &str = ".hoard";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    /// Basename equality
    Name(String),
    /// Exact path under the root
    Exact(PathBuf),
    /// Canonical path suffix
    Suffix(String),
}

/// A compiled set of ignore rules
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    rules: Vec<Rule>,
}

impl IgnoreSet {
    /// Compile rules against a canonical root directory
    pub fn compile<I, S>(root: &Path, rules: I) -> IgnoreSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = vec![Rule::Name(CONTROL_DIR.to_string())];
        for rule in rules {
            let rule = rule.as_ref();
            if rule.is_empty() {
                continue;
            }
            if let Some(stripped) = rule.strip_prefix('/') {
                let stripped = stripped.trim_end_matches('/');
                compiled.push(Rule::Exact(root.join(stripped)));
            } else if rule.contains('/') {
                compiled.push(Rule::Suffix(rule.trim_end_matches('/').to_string()));
            } else {
                compiled.push(Rule::Name(rule.to_string()));
            }
        }
        IgnoreSet { rules: compiled }
    }

    /// Test an absolute path within the tree against every rule
    pub fn matches(&self, path: &Path) -> bool {
        self.rules.iter().any(|rule| match rule {
            Rule::Name(name) => path
                .file_name()
                .map(|f| f.to_string_lossy() == name.as_str())
                .unwrap_or(false),
            Rule::Exact(exact) => path == exact,
            Rule::Suffix(suffix) => path.to_string_lossy().ends_with(suffix.as_str()),
        })
    }
}
