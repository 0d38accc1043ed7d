#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `exodus_filters` provides ordered include/exclude pattern evaluation for
//! exodus-rsync. The implementation reproduces the subset of rsync's filter
//! grammar that release pipelines rely on when publishing to the gateway:
//! `+ PATTERN` / `- PATTERN` rules (optionally carrying the `/` modifier that
//! matches against the absolute source path), together with the
//! `--include`/`--exclude` command-line equivalents. Patterns honour anchored
//! matches (leading `/`), directory-only rules (trailing `/`), and recursive
//! wildcards using the same glob semantics exposed by upstream rsync.
//!
//! # Design
//!
//! - [`FilterRule`] captures the parsed action, pattern text, and whether the
//!   rule matches the transfer-relative or the absolute path. The rule itself
//!   is lightweight; heavy lifting happens when a [`FilterSet`] is built.
//! - [`FilterSet`] owns the compiled representation of each rule. Slash-free
//!   patterns match the final path component at any depth and unanchored
//!   patterns gain an implicit `**/` prefix, so callers can hand over paths
//!   relative to the transfer root without further massaging.
//! - Matching happens against native [`Path`] values; rules carrying the `/`
//!   modifier are given the absolute source path instead.
//!
//! # Invariants
//!
//! - Rules are applied in definition order. The first matching rule decides
//!   and the default is [`FilterAction::Include`] when no rule matches.
//! - Trailing `/` marks a directory-only rule: it never matches a
//!   non-directory. Directory-only excludes additionally cover the
//!   directory's descendants so explicitly listed children are handled
//!   consistently with pruned traversals; includes do not.
//! - Leading `/` anchors a rule to the transfer root.
//!
//! # Errors
//!
//! [`FilterRule::parse`] rejects directives outside the supported subset
//! (`merge` and `dir-merge` in particular) and [`FilterSet::from_rules`]
//! reports patterns that fail to compile into glob matchers. Both surface as
//! [`FilterError`] carrying the offending text.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};

/// Action taken when a rule matches a path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterAction {
    /// Include the matching path.
    Include,
    /// Exclude the matching path and, for directories, prune the subtree.
    Exclude,
}

/// A parsed filter rule: an action, a pattern, and the matching mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterRule {
    action: FilterAction,
    pattern: String,
    match_absolute: bool,
}

impl FilterRule {
    /// Creates an include rule for `pattern`, equivalent to `--include`.
    #[must_use]
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            action: FilterAction::Include,
            pattern: pattern.into(),
            match_absolute: false,
        }
    }

    /// Creates an exclude rule for `pattern`, equivalent to `--exclude`.
    #[must_use]
    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            action: FilterAction::Exclude,
            pattern: pattern.into(),
            match_absolute: false,
        }
    }

    /// Parses a `--filter` directive such as `+ PATTERN` or `-/ PATTERN`.
    ///
    /// The supported directives are `+`, `-`, `+/`, and `-/`. The `/`
    /// modifier switches matching to the absolute source path. The `merge`
    /// family (`merge`, `dir-merge`, `.`, `:`) is recognized but rejected as
    /// unsupported.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let trimmed = text.trim();
        let (directive, pattern) = match trimmed.split_once(char::is_whitespace) {
            Some((directive, rest)) => (directive, rest.trim_start()),
            None => (trimmed, ""),
        };

        let (action, match_absolute) = match directive {
            "+" => (FilterAction::Include, false),
            "-" => (FilterAction::Exclude, false),
            "+/" => (FilterAction::Include, true),
            "-/" => (FilterAction::Exclude, true),
            "merge" | "dir-merge" | "." | ":" => {
                return Err(FilterError::unsupported(text));
            }
            _ => return Err(FilterError::unrecognized(text)),
        };

        if pattern.is_empty() {
            return Err(FilterError::unrecognized(text));
        }

        Ok(Self {
            action,
            pattern: pattern.to_string(),
            match_absolute,
        })
    }

    /// Returns the rule action.
    #[must_use]
    pub const fn action(&self) -> FilterAction {
        self.action
    }

    /// Returns the pattern text associated with the rule.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Reports whether the rule matches against the absolute source path.
    #[must_use]
    pub const fn matches_absolute(&self) -> bool {
        self.match_absolute
    }
}

/// Error produced when a directive cannot be parsed or compiled.
#[derive(Debug)]
pub struct FilterError {
    kind: FilterErrorKind,
}

#[derive(Debug)]
enum FilterErrorKind {
    Unrecognized {
        rule: String,
    },
    Unsupported {
        rule: String,
    },
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

impl FilterError {
    fn unrecognized(rule: &str) -> Self {
        Self {
            kind: FilterErrorKind::Unrecognized {
                rule: rule.to_string(),
            },
        }
    }

    fn unsupported(rule: &str) -> Self {
        Self {
            kind: FilterErrorKind::Unsupported {
                rule: rule.to_string(),
            },
        }
    }

    fn pattern(pattern: &str, source: globset::Error) -> Self {
        Self {
            kind: FilterErrorKind::Pattern {
                pattern: pattern.to_string(),
                source,
            },
        }
    }

    /// Returns the directive or pattern text that caused the failure.
    #[must_use]
    pub fn rule(&self) -> &str {
        match &self.kind {
            FilterErrorKind::Unrecognized { rule } | FilterErrorKind::Unsupported { rule } => rule,
            FilterErrorKind::Pattern { pattern, .. } => pattern,
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FilterErrorKind::Unrecognized { rule } => {
                write!(f, "unrecognized filter rule '{rule}'")
            }
            FilterErrorKind::Unsupported { rule } => {
                write!(f, "unsupported filter rule '{rule}'")
            }
            FilterErrorKind::Pattern { pattern, source } => {
                write!(f, "failed to compile filter pattern '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FilterErrorKind::Pattern { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Ordered, compiled collection of filter rules.
#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    inner: Arc<FilterSetInner>,
}

impl FilterSet {
    /// Builds a [`FilterSet`] from the supplied rules.
    pub fn from_rules<I>(rules: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = FilterRule>,
    {
        let compiled = rules
            .into_iter()
            .map(CompiledRule::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            inner: Arc::new(FilterSetInner { rules: compiled }),
        })
    }

    /// Parses and compiles a sequence of `--filter` directives.
    pub fn parse<I, S>(directives: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = directives
            .into_iter()
            .map(|text| FilterRule::parse(text.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_rules(rules)
    }

    /// Reports whether the set contains any rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.rules.is_empty()
    }

    /// Decides the fate of a candidate path.
    ///
    /// `relative` is the path from the transfer root; `absolute` is the full
    /// source path consulted by rules carrying the `/` modifier. The first
    /// matching rule wins; with no match the path is included.
    #[must_use]
    pub fn decide(&self, relative: &Path, absolute: &Path, is_dir: bool) -> FilterAction {
        for rule in &self.inner.rules {
            let candidate = if rule.match_absolute {
                absolute
            } else {
                relative
            };
            if rule.matches(candidate, is_dir) {
                return rule.action;
            }
        }
        FilterAction::Include
    }

    /// Convenience wrapper around [`decide`](Self::decide) returning `true`
    /// when the path is included.
    #[must_use]
    pub fn allows(&self, relative: &Path, absolute: &Path, is_dir: bool) -> bool {
        self.decide(relative, absolute, is_dir) == FilterAction::Include
    }
}

#[derive(Debug, Default)]
struct FilterSetInner {
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    action: FilterAction,
    match_absolute: bool,
    directory_only: bool,
    direct_matchers: Vec<GlobMatcher>,
    descendant_matchers: Vec<GlobMatcher>,
}

impl CompiledRule {
    fn new(rule: FilterRule) -> Result<Self, FilterError> {
        let (anchored, directory_only, core) = normalize_pattern(&rule.pattern);

        let mut direct_patterns = vec![core.clone()];
        if !anchored {
            direct_patterns.push(format!("**/{core}"));
        }

        // Directory excludes also cover everything beneath the directory, so
        // a path queried without its pruned ancestors still matches. Include
        // rules get no descendant matchers: a trailing-slash rule is
        // directory-only and must never match a descendant file.
        let mut descendant_patterns = Vec::new();
        if directory_only && matches!(rule.action, FilterAction::Exclude) {
            descendant_patterns.push(format!("{core}/**"));
            if !anchored {
                descendant_patterns.push(format!("**/{core}/**"));
            }
        }

        Ok(Self {
            action: rule.action,
            match_absolute: rule.match_absolute,
            directory_only,
            direct_matchers: compile_patterns(&direct_patterns, &rule.pattern)?,
            descendant_matchers: compile_patterns(&descendant_patterns, &rule.pattern)?,
        })
    }

    fn matches(&self, path: &Path, is_dir: bool) -> bool {
        let candidate = strip_root(path);
        if (!self.directory_only || is_dir)
            && self
                .direct_matchers
                .iter()
                .any(|matcher| matcher.is_match(candidate))
        {
            return true;
        }

        self.descendant_matchers
            .iter()
            .any(|matcher| matcher.is_match(candidate))
    }
}

fn compile_patterns(patterns: &[String], original: &str) -> Result<Vec<GlobMatcher>, FilterError> {
    let mut matchers = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|error| FilterError::pattern(original, error))?;
        matchers.push(glob.compile_matcher());
    }
    Ok(matchers)
}

fn normalize_pattern(pattern: &str) -> (bool, bool, String) {
    let anchored = pattern.starts_with('/');
    let directory_only = pattern.ends_with('/');
    let mut core = pattern;
    if anchored {
        core = &core[1..];
    }
    if directory_only && !core.is_empty() {
        core = &core[..core.len() - 1];
    }
    (anchored, directory_only, core.to_string())
}

// Absolute candidates keep glob matching uniform by dropping the leading '/'.
fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}
