//! Startup configuration for the access policy.

use crate::error::ConfigError;
use crate::pattern::{IgnoreMatcher, load_patterns};
use crate::policy::AccessPolicy;
use crate::resolve::{PathResolver, expand_home};
use crate::roots::RootRegistry;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Whether path comparisons fold case by default on this host.
pub const HOST_CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

/// Allowed roots and ignore rules, as read from a config file or the
/// command line. Validated and frozen by [`PolicyConfig::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Directories access may be granted under, in order.
    pub allowed_roots: Vec<PathBuf>,
    /// Gitignore-style patterns, applied after those from `ignore_files`.
    pub ignore_patterns: Vec<String>,
    /// Files holding gitignore-style patterns, one per line.
    pub ignore_files: Vec<PathBuf>,
    /// Fold case in containment checks and ignore matching. Defaults to
    /// [`HOST_CASE_INSENSITIVE`].
    pub case_insensitive: Option<bool>,
    /// Directory relative request paths are anchored to. Defaults to the
    /// process working directory.
    pub base_dir: Option<PathBuf>,
}

impl PolicyConfig {
    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Append `other`'s roots and rules after ours; its scalar settings win
    /// when set.
    pub fn merge(&mut self, other: PolicyConfig) {
        self.allowed_roots.extend(other.allowed_roots);
        self.ignore_patterns.extend(other.ignore_patterns);
        self.ignore_files.extend(other.ignore_files);
        if other.case_insensitive.is_some() {
            self.case_insensitive = other.case_insensitive;
        }
        if other.base_dir.is_some() {
            self.base_dir = other.base_dir;
        }
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive.unwrap_or(HOST_CASE_INSENSITIVE)
    }

    /// Validate everything and build the immutable policy.
    pub fn build(&self) -> Result<AccessPolicy, ConfigError> {
        let case_insensitive = self.case_insensitive();
        let roots = RootRegistry::new(&self.allowed_roots, case_insensitive)?;

        let mut patterns = Vec::new();
        for file in &self.ignore_files {
            patterns.extend(load_patterns(&expand_home(file))?);
        }
        patterns.extend(self.ignore_patterns.iter().cloned());
        let ignore = IgnoreMatcher::compile(&patterns, case_insensitive)?;

        let base_dir = match &self.base_dir {
            Some(dir) => std::path::absolute(expand_home(dir)).map_err(ConfigError::CurrentDir)?,
            None => std::env::current_dir().map_err(ConfigError::CurrentDir)?,
        };

        tracing::info!(
            roots = ?roots.roots().iter().map(|r| r.path().display().to_string()).collect::<Vec<_>>(),
            ignore_rules = ignore.rules().len(),
            case_insensitive,
            "access policy ready"
        );
        Ok(AccessPolicy::new(roots, ignore, PathResolver::new(base_dir)))
    }
}
