//! Compiled ignore filters and rule-file parsing.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

use tokentree_core::PatternSets;

/// A compiled, immutable set of gitignore-style patterns.
///
/// Patterns are evaluated in insertion order and the last match wins, so a
/// later `!pattern` re-includes what an earlier pattern excluded. Cloning is
/// cheap.
#[derive(Clone)]
pub struct IgnoreFilter {
    inner: Arc<FilterInner>,
}

#[derive(Clone)]
struct FilterInner {
    root: PathBuf,
    patterns: Vec<String>,
    origins: BTreeSet<String>,
    matcher: Gitignore,
}

impl IgnoreFilter {
    /// Compile `patterns` for paths relative to `root`.
    pub fn new<I, S>(root: &Path, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::compile(
            root.to_path_buf(),
            patterns.into_iter().map(Into::into).collect(),
            BTreeSet::new(),
        )
    }

    /// A filter that matches nothing.
    pub fn empty(root: &Path) -> Self {
        Self::new(root, Vec::<String>::new())
    }

    /// The universal default exclusions.
    pub fn defaults(root: &Path, sets: &PatternSets) -> Self {
        Self::new(root, sets.default_patterns.iter().cloned())
    }

    /// Defaults, then global patterns, then the (already normalized) custom patterns.
    pub fn global(root: &Path, sets: &PatternSets, custom: &[String]) -> Self {
        let patterns = sets
            .default_patterns
            .iter()
            .chain(&sets.global_patterns)
            .chain(custom)
            .cloned();
        Self::new(root, patterns)
    }

    /// Derive a filter with one directory's rule-file patterns layered on top.
    ///
    /// `patterns` must already be rewritten relative to the root.
    pub fn layered(&self, dir_key: &str, patterns: &[String]) -> Self {
        let mut all = self.inner.patterns.clone();
        all.extend_from_slice(patterns);
        let mut origins = self.inner.origins.clone();
        origins.insert(dir_key.to_string());
        Self::compile(self.inner.root.clone(), all, origins)
    }

    pub(crate) fn with_origins(mut self, origins: impl IntoIterator<Item = String>) -> Self {
        Arc::make_mut(&mut self.inner).origins.extend(origins);
        self
    }

    fn compile(root: PathBuf, patterns: Vec<String>, origins: BTreeSet<String>) -> Self {
        let mut builder = GitignoreBuilder::new(&root);
        for pattern in &patterns {
            if let Err(err) = builder.add_line(None, pattern) {
                warn!(pattern = %pattern, error = %err, "skipping invalid ignore pattern");
            }
        }
        let matcher = builder.build().unwrap_or_else(|err| {
            warn!(error = %err, "failed to compile ignore patterns");
            Gitignore::empty()
        });

        Self {
            inner: Arc::new(FilterInner {
                root,
                patterns,
                origins,
                matcher,
            }),
        }
    }

    /// Whether a file at `relative_path` is excluded.
    pub fn matches(&self, relative_path: &str) -> bool {
        self.is_ignored(relative_path, false)
    }

    /// Whether `relative_path` (or any of its parent directories) is excluded.
    ///
    /// An excluded parent directory wins over a whitelist match on the path
    /// itself, matching a walk that never enters excluded directories.
    pub fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        let path = Path::new(relative_path);
        if relative_path.is_empty() || path.has_root() {
            return false;
        }
        let matcher = &self.inner.matcher;
        let parent_excluded = path
            .ancestors()
            .skip(1)
            .filter(|dir| !dir.as_os_str().is_empty())
            .any(|dir| matcher.matched(dir, true).is_ignore());
        parent_excluded || matcher.matched(path, is_dir).is_ignore()
    }

    /// Patterns in evaluation order.
    pub fn patterns(&self) -> &[String] {
        &self.inner.patterns
    }

    /// Whether the rule file of `dir_key` has already been folded in.
    pub fn has_origin(&self, dir_key: &str) -> bool {
        self.inner.origins.contains(dir_key)
    }

    pub fn len(&self) -> usize {
        self.inner.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.patterns.is_empty()
    }
}

impl fmt::Debug for IgnoreFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreFilter")
            .field("root", &self.inner.root)
            .field("patterns", &self.inner.patterns.len())
            .field("origins", &self.inner.origins)
            .finish()
    }
}

/// Pattern lines of a rule file: blank lines and `#` comments dropped.
pub fn parse_rule_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Rewrite a rule-file pattern from directory `dir_key` to be root-relative.
///
/// Anchored patterns (leading `/` or an inner `/`) are anchored at the rule
/// file's directory. Bare names match anywhere below that directory. Patterns
/// from the root rule file are returned unchanged.
pub fn rewrite_pattern(dir_key: &str, pattern: &str) -> String {
    if dir_key == "." || dir_key.is_empty() {
        return pattern.to_string();
    }

    let (negation, body) = match pattern.strip_prefix('!') {
        Some(rest) => ("!", rest),
        None => ("", pattern),
    };

    let anchored = body.starts_with('/') || body.trim_end_matches('/').contains('/');
    let body = body.trim_start_matches('/');
    if anchored {
        format!("{negation}/{dir_key}/{body}")
    } else {
        format!("{negation}/{dir_key}/**/{body}")
    }
}

/// Rewrite every line of one rule file.
pub fn rewrite_rule_lines(dir_key: &str, lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| rewrite_pattern(dir_key, line))
        .collect()
}
