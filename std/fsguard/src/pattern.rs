//! Gitignore-style ignore rules.
//!
//! Rules are matched against paths relative to the allowed root that
//! contains them, using `/` as the separator:
//!
//! - `*`, `?` and `[...]` never match `/`; `**` matches across directories.
//! - A leading `!` re-includes paths matched by an earlier rule.
//! - A trailing `/` restricts the rule to directories.
//! - A rule with a `/` at the start or in the middle is anchored to the root;
//!   otherwise it matches at any depth.
//! - The last matching rule wins, and a path inside an ignored directory is
//!   ignored no matter what its own rules say.

use crate::error::ConfigError;
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path};

/// A single compiled ignore rule.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    source: String,
    matcher: GlobMatcher,
    negated: bool,
    dir_only: bool,
    anchored: bool,
}

impl IgnoreRule {
    /// Parse one line of gitignore syntax.
    ///
    /// Returns `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str, case_insensitive: bool) -> Result<Option<Self>, ConfigError> {
        let trimmed = trim_trailing_spaces(line);
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let (negated, mut body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if body.starts_with("\\!") || body.starts_with("\\#") {
            body = &body[1..];
        }

        let dir_only = body.ends_with('/');
        let body = body.trim_end_matches('/');
        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return Ok(None);
        }

        let glob = if anchored {
            body.to_owned()
        } else {
            format!("**/{body}")
        };
        let matcher = GlobBuilder::new(&glob)
            .literal_separator(true)
            .backslash_escape(true)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|source| ConfigError::Pattern {
                pattern: line.to_owned(),
                source,
            })?
            .compile_matcher();

        Ok(Some(Self {
            source: trimmed.to_owned(),
            matcher,
            negated,
            dir_only,
            anchored,
        }))
    }

    /// The rule as written, minus trailing whitespace.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    fn applies_to(&self, candidate: &str, is_dir: bool) -> bool {
        (is_dir || !self.dir_only) && self.matcher.is_match(candidate)
    }
}

/// Ordered set of ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Compile patterns in order. Blank lines and comments are skipped.
    pub fn compile<I, S>(patterns: I, case_insensitive: bool) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            if let Some(rule) = IgnoreRule::parse(pattern.as_ref(), case_insensitive)? {
                rules.push(rule);
            }
        }
        Ok(Self { rules })
    }

    /// Compile the rules of a `.gitignore`-style file.
    pub fn from_ignore_file(path: &Path, case_insensitive: bool) -> Result<Self, ConfigError> {
        Self::compile(load_patterns(path)?, case_insensitive)
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `relative` (a path below an allowed root) is ignored.
    ///
    /// Every ancestor directory is checked first; an ignored ancestor prunes
    /// the whole subtree. The empty path, i.e. the root itself, is never
    /// ignored.
    pub fn matches(&self, relative: &Path, is_directory: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let segments: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy()),
                _ => None,
            })
            .collect();

        let mut candidate = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                candidate.push('/');
            }
            candidate.push_str(segment);
            let is_last = i + 1 == segments.len();
            if self.verdict(&candidate, if is_last { is_directory } else { true }) {
                return true;
            }
        }
        false
    }

    /// Forward pass: each matching rule overwrites the running verdict.
    fn verdict(&self, candidate: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.applies_to(candidate, is_dir) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

/// Read ignore patterns from a file, one per line.
pub fn load_patterns(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.lines().map(str::to_owned).collect())
}

/// Strip trailing spaces unless escaped with a backslash.
fn trim_trailing_spaces(line: &str) -> &str {
    let line = line.trim_end_matches(['\r', '\n']);
    let bytes = line.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        if end >= 2 && bytes[end - 2] == b'\\' {
            break;
        }
        end -= 1;
    }
    &line[..end]
}
