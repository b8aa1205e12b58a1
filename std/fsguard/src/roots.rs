//! The set of directories the policy may grant access to.

use crate::error::ConfigError;
use crate::resolve::{expand_home, lexical_normalize};
use std::path::{Component, Path, PathBuf};

/// A directory access may be granted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoot {
    configured: PathBuf,
    canonical: PathBuf,
}

impl AllowedRoot {
    /// Canonical form: absolute, symlinks resolved.
    pub fn path(&self) -> &Path {
        &self.canonical
    }

    /// The path as configured, made absolute and lexically normalized.
    pub fn configured(&self) -> &Path {
        &self.configured
    }
}

/// Ordered allowed roots, canonicalized once and frozen.
#[derive(Debug, Clone)]
pub struct RootRegistry {
    roots: Vec<AllowedRoot>,
    case_insensitive: bool,
}

impl RootRegistry {
    /// Register every root in order. Fails on the first invalid root, or if
    /// none are given.
    pub fn new<I, P>(roots: I, case_insensitive: bool) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut registry = Self {
            roots: Vec::new(),
            case_insensitive,
        };
        for root in roots {
            registry.register(root.as_ref())?;
        }
        if registry.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        Ok(registry)
    }

    fn register(&mut self, root: &Path) -> Result<(), ConfigError> {
        let expanded = expand_home(root);
        if !expanded.is_dir() {
            return Err(ConfigError::InvalidRoot(expanded));
        }
        let canonical = expanded
            .canonicalize()
            .map_err(|source| ConfigError::RootIo {
                path: expanded.clone(),
                source,
            })?;
        let absolute = std::path::absolute(&expanded).map_err(|source| ConfigError::RootIo {
            path: expanded.clone(),
            source,
        })?;

        if self.roots.iter().any(|r| r.canonical == canonical) {
            tracing::debug!(root = %root.display(), "skipping duplicate allowed directory");
            return Ok(());
        }
        tracing::debug!(root = %canonical.display(), "registered allowed directory");
        self.roots.push(AllowedRoot {
            configured: lexical_normalize(&absolute),
            canonical,
        });
        Ok(())
    }

    pub fn roots(&self) -> &[AllowedRoot] {
        &self.roots
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Whether a canonical path equals or lies below some root.
    pub fn contains(&self, candidate: &Path) -> bool {
        self.root_for(candidate).is_some()
    }

    /// The deepest root enclosing `candidate`.
    pub fn root_for(&self, candidate: &Path) -> Option<&AllowedRoot> {
        self.roots
            .iter()
            .filter(|root| strip_root(candidate, &root.canonical, self.case_insensitive).is_some())
            .max_by_key(|root| root.canonical.components().count())
    }

    /// `candidate` relative to `root`; `None` if it is not below it.
    pub fn relative_to(&self, root: &AllowedRoot, candidate: &Path) -> Option<PathBuf> {
        strip_root(candidate, &root.canonical, self.case_insensitive).map(Path::to_path_buf)
    }

    /// Whether a lexically normalized path lies below some root, as
    /// configured or canonical. Symlinks are not consulted.
    pub(crate) fn contains_lexically(&self, lexical: &Path) -> bool {
        self.roots.iter().any(|root| {
            strip_root(lexical, &root.configured, self.case_insensitive).is_some()
                || strip_root(lexical, &root.canonical, self.case_insensitive).is_some()
        })
    }
}

/// Component-wise prefix strip, so `/allowedfoo` never matches `/allowed`.
fn strip_root<'a>(candidate: &'a Path, root: &Path, case_insensitive: bool) -> Option<&'a Path> {
    let mut rest = candidate.components();
    for expected in root.components() {
        let actual = rest.next()?;
        if !component_eq(expected, actual, case_insensitive) {
            return None;
        }
    }
    Some(rest.as_path())
}

fn component_eq(a: Component<'_>, b: Component<'_>, case_insensitive: bool) -> bool {
    if !case_insensitive {
        return a == b;
    }
    match (a, b) {
        (Component::Normal(x), Component::Normal(y)) => {
            x.to_string_lossy().to_lowercase() == y.to_string_lossy().to_lowercase()
        }
        _ => a == b,
    }
}
