//! The access decision engine.
//!
//! [`AccessPolicy::authorize`] is the single gate in front of every
//! filesystem operation: resolve the request path, require it to lie inside
//! an allowed directory, reject it if an ignore rule matches, and hand back an
//! [`AuthorizedPath`]. The policy is immutable once built and is meant to be
//! shared across concurrent requests behind an `Arc`.

use crate::error::Denial;
use crate::operation::OperationKind;
use crate::pattern::IgnoreMatcher;
use crate::resolve::PathResolver;
use crate::roots::RootRegistry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A canonical path that passed every access check.
///
/// Only [`AccessPolicy`] creates these. Not `Clone`: each authorization
/// backs exactly one I/O call.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthorizedPath {
    path: PathBuf,
    root: PathBuf,
    operation: OperationKind,
    existed: bool,
}

impl AuthorizedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The allowed root the path was granted under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Whether the target existed when it was authorized.
    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for AuthorizedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for AuthorizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.display().fmt(f)
    }
}

/// Allowed roots, ignore rules and resolver, frozen together.
#[derive(Debug)]
pub struct AccessPolicy {
    roots: RootRegistry,
    ignore: IgnoreMatcher,
    resolver: PathResolver,
}

impl AccessPolicy {
    pub fn new(roots: RootRegistry, ignore: IgnoreMatcher, resolver: PathResolver) -> Self {
        Self {
            roots,
            ignore,
            resolver,
        }
    }

    pub fn roots(&self) -> &RootRegistry {
        &self.roots
    }

    pub fn ignore_rules(&self) -> &IgnoreMatcher {
        &self.ignore
    }

    /// Canonical allowed directories, in configuration order.
    pub fn allowed_roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.roots().iter().map(|root| root.path())
    }

    /// Decide whether `raw` may be accessed for `operation`.
    pub fn authorize(&self, raw: &str, operation: OperationKind) -> Result<AuthorizedPath, Denial> {
        let verdict = self.decide(raw, operation);
        match &verdict {
            Ok(authorized) => tracing::debug!(
                path = raw,
                %operation,
                resolved = %authorized,
                "access granted"
            ),
            Err(denial) => tracing::info!(
                path = raw,
                %operation,
                code = denial.code(),
                "{denial}"
            ),
        }
        verdict
    }

    /// [`authorize`](Self::authorize) on tokio's blocking pool, so metadata
    /// queries never stall the runtime.
    pub async fn authorize_async(
        self: &Arc<Self>,
        raw: &str,
        operation: OperationKind,
    ) -> Result<AuthorizedPath, Denial> {
        let policy = Arc::clone(self);
        let owned = raw.to_owned();
        tokio::task::spawn_blocking(move || policy.authorize(&owned, operation))
            .await
            .unwrap_or_else(|e| Err(Denial::invalid(raw, format!("resolution task failed: {e}"))))
    }

    /// Whether a canonical path below some root is excluded by the ignore
    /// rules. Paths outside every root report `false`.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.roots
            .root_for(path)
            .and_then(|root| self.roots.relative_to(root, path))
            .is_some_and(|relative| self.ignore.matches(&relative, is_dir))
    }

    fn decide(&self, raw: &str, operation: OperationKind) -> Result<AuthorizedPath, Denial> {
        let resolved = match self.resolver.resolve(raw, operation) {
            Ok(resolved) => resolved,
            // A missing path outside every root is reported as outside, so
            // denials never reveal what exists beyond the roots.
            Err(Denial::NotFound(path)) if !self.roots.contains(&path) => {
                return Err(Denial::OutsideAllowedRoots(path));
            }
            Err(denial) => return Err(denial),
        };

        let Some(root) = self.roots.root_for(&resolved.canonical) else {
            return Err(if self.roots.contains_lexically(&resolved.lexical) {
                Denial::SymlinkEscape {
                    path: resolved.lexical,
                    target: resolved.canonical,
                }
            } else {
                Denial::OutsideAllowedRoots(resolved.canonical)
            });
        };

        let relative = self
            .roots
            .relative_to(root, &resolved.canonical)
            .unwrap_or_default();
        // A missing leaf could become either a file or a directory.
        let ignored = if resolved.exists {
            self.ignore.matches(&relative, resolved.is_dir)
        } else {
            self.ignore.matches(&relative, false) || self.ignore.matches(&relative, true)
        };
        if ignored {
            return Err(Denial::Ignored(resolved.canonical));
        }

        Ok(AuthorizedPath {
            root: root.path().to_path_buf(),
            path: resolved.canonical,
            operation,
            existed: resolved.exists,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Denial, DenialReason};
    use crate::operation::OperationKind;
    use crate::pattern::IgnoreMatcher;
    use crate::policy::AccessPolicy;
    use crate::resolve::PathResolver;
    use crate::roots::RootRegistry;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Layout: `<tmp>/data` is the only root, `<tmp>/outside` is not.
    struct Fixture {
        _tmp: tempfile::TempDir,
        data: PathBuf,
        outside: PathBuf,
        policy: AccessPolicy,
    }

    fn fixture(patterns: &[&str]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().canonicalize().unwrap();
        let data = base.join("data");
        let outside = base.join("outside");
        fs::create_dir(&data).unwrap();
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "secret").unwrap();

        let roots = RootRegistry::new([&data], false).unwrap();
        let ignore = IgnoreMatcher::compile(patterns, false).unwrap();
        let policy = AccessPolicy::new(roots, ignore, PathResolver::new(data.clone()));
        Fixture {
            _tmp: tmp,
            data,
            outside,
            policy,
        }
    }

    fn path_str(p: &std::path::Path) -> &str {
        p.to_str().unwrap()
    }

    #[test]
    fn authorizes_existing_file_inside_root() {
        let f = fixture(&[]);
        fs::write(f.data.join("a.txt"), "a").unwrap();
        let authorized = f
            .policy
            .authorize(path_str(&f.data.join("a.txt")), OperationKind::Read)
            .unwrap();
        assert_eq!(authorized.as_path(), f.data.join("a.txt"));
        assert_eq!(authorized.root(), f.data);
        assert!(authorized.existed());
    }

    #[test]
    fn root_itself_is_authorized() {
        let f = fixture(&["*"]);
        let authorized = f
            .policy
            .authorize(path_str(&f.data), OperationKind::List)
            .unwrap();
        assert_eq!(authorized.as_path(), f.data);
    }

    #[test]
    fn traversal_out_of_root_is_outside() {
        let f = fixture(&[]);
        let raw = format!("{}/../outside/secret.txt", f.data.display());
        let err = f.policy.authorize(&raw, OperationKind::Read).unwrap_err();
        assert_eq!(err, Denial::OutsideAllowedRoots(f.outside.join("secret.txt")));
    }

    #[test]
    fn relative_traversal_is_outside() {
        let f = fixture(&[]);
        let err = f
            .policy
            .authorize("../outside/secret.txt", OperationKind::Read)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::OutsideAllowedRoots);
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let f = fixture(&[]);
        let sibling = f.data.with_file_name("datafoo");
        fs::create_dir(&sibling).unwrap();
        let err = f
            .policy
            .authorize(path_str(&sibling), OperationKind::List)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::OutsideAllowedRoots);
    }

    #[test]
    fn missing_path_outside_roots_is_not_reported_missing() {
        let f = fixture(&[]);
        let err = f
            .policy
            .authorize(path_str(&f.outside.join("nope.txt")), OperationKind::Read)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::OutsideAllowedRoots);
    }

    #[test]
    fn missing_path_inside_root_is_not_found_for_read() {
        let f = fixture(&[]);
        let err = f
            .policy
            .authorize(path_str(&f.data.join("nope.txt")), OperationKind::Stat)
            .unwrap_err();
        assert_eq!(err, Denial::NotFound(f.data.join("nope.txt")));
    }

    #[test]
    fn write_to_missing_leaf_is_authorized() {
        let f = fixture(&[]);
        fs::create_dir(f.data.join("new")).unwrap();
        let raw = f.data.join("new/file.txt");
        let authorized = f
            .policy
            .authorize(path_str(&raw), OperationKind::Write)
            .unwrap();
        assert_eq!(authorized.as_path(), raw);
        assert!(!authorized.existed());
        assert!(!raw.exists());
    }

    #[test]
    fn ignore_precedence() {
        let f = fixture(&["*.log", "!keep.log"]);
        fs::write(f.data.join("a.log"), "").unwrap();
        fs::write(f.data.join("keep.log"), "").unwrap();

        let err = f
            .policy
            .authorize(path_str(&f.data.join("a.log")), OperationKind::Read)
            .unwrap_err();
        assert_eq!(err, Denial::Ignored(f.data.join("a.log")));
        assert!(
            f.policy
                .authorize(path_str(&f.data.join("keep.log")), OperationKind::Read)
                .is_ok()
        );
    }

    #[test]
    fn ignored_directory_prunes_nested_files() {
        let f = fixture(&["build/"]);
        fs::create_dir_all(f.data.join("build/out")).unwrap();
        fs::write(f.data.join("build/out/app.bin"), "").unwrap();

        for op in [OperationKind::Read, OperationKind::Stat, OperationKind::Edit] {
            let err = f
                .policy
                .authorize(path_str(&f.data.join("build/out/app.bin")), op)
                .unwrap_err();
            assert_eq!(err.reason(), DenialReason::Ignored);
        }
        let err = f
            .policy
            .authorize(path_str(&f.data.join("build/new.txt")), OperationKind::Write)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::Ignored);
    }

    #[test]
    fn missing_leaf_matching_directory_rule_is_ignored() {
        let f = fixture(&["cache/"]);
        let err = f
            .policy
            .authorize(path_str(&f.data.join("cache")), OperationKind::Write)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::Ignored);
    }

    #[test]
    fn verdicts_are_idempotent() {
        let f = fixture(&["*.log"]);
        fs::write(f.data.join("x.log"), "").unwrap();
        fs::write(f.data.join("x.txt"), "").unwrap();
        for name in ["x.log", "x.txt", "missing.txt", "../outside/secret.txt"] {
            for op in [OperationKind::Read, OperationKind::Write] {
                let first = f.policy.authorize(name, op);
                let second = f.policy.authorize(name, op);
                assert_eq!(first, second, "{name} {op}");
            }
        }
    }

    #[test]
    fn is_ignored_uses_nearest_root() {
        let f = fixture(&["/top.txt"]);
        assert!(f.policy.is_ignored(&f.data.join("top.txt"), false));
        assert!(!f.policy.is_ignored(&f.data.join("sub/top.txt"), false));
        assert!(!f.policy.is_ignored(&f.outside.join("top.txt"), false));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let f = fixture(&[]);
        std::os::unix::fs::symlink(f.outside.join("secret.txt"), f.data.join("link")).unwrap();
        let err = f
            .policy
            .authorize(path_str(&f.data.join("link")), OperationKind::Read)
            .unwrap_err();
        assert_eq!(
            err,
            Denial::SymlinkEscape {
                path: f.data.join("link"),
                target: f.outside.join("secret.txt"),
            }
        );
        assert!(err.reason().is_outside_roots());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_escape_is_denied_for_writes() {
        let f = fixture(&[]);
        std::os::unix::fs::symlink(&f.outside, f.data.join("door")).unwrap();
        let err = f
            .policy
            .authorize(path_str(&f.data.join("door/planted.txt")), OperationKind::Write)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::SymlinkEscape);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_write_is_denied() {
        let f = fixture(&[]);
        std::os::unix::fs::symlink(f.outside.join("planted.txt"), f.data.join("trap")).unwrap();
        let err = f
            .policy
            .authorize(path_str(&f.data.join("trap")), OperationKind::Write)
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::SymlinkEscape);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_is_authorized_at_its_target() {
        let f = fixture(&[]);
        fs::write(f.data.join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(f.data.join("real.txt"), f.data.join("alias.txt")).unwrap();
        let authorized = f
            .policy
            .authorize(path_str(&f.data.join("alias.txt")), OperationKind::Read)
            .unwrap();
        assert_eq!(authorized.as_path(), f.data.join("real.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn escape_through_root_configured_via_symlink() {
        let f = fixture(&[]);
        let alias = f.data.with_file_name("data-alias");
        std::os::unix::fs::symlink(&f.data, &alias).unwrap();
        std::os::unix::fs::symlink(f.outside.join("secret.txt"), f.data.join("link")).unwrap();
        fs::write(f.data.join("a.txt"), "a").unwrap();

        let roots = RootRegistry::new([&alias], false).unwrap();
        let policy = AccessPolicy::new(
            roots,
            IgnoreMatcher::default(),
            PathResolver::new(alias.clone()),
        );

        let authorized = policy
            .authorize(path_str(&alias.join("a.txt")), OperationKind::Read)
            .unwrap();
        assert_eq!(authorized.as_path(), f.data.join("a.txt"));

        let err = policy
            .authorize(path_str(&alias.join("link")), OperationKind::Read)
            .unwrap_err();
        assert_eq!(
            err,
            Denial::SymlinkEscape {
                path: alias.join("link"),
                target: f.outside.join("secret.txt"),
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn unexpected_io_error_is_invalid_input() {
        let f = fixture(&[]);
        std::os::unix::fs::symlink(f.data.join("loop"), f.data.join("loop")).unwrap();
        for raw in [f.data.join("loop"), f.data.join("loop/inner.txt")] {
            let err = f
                .policy
                .authorize(path_str(&raw), OperationKind::Read)
                .unwrap_err();
            assert_eq!(err.reason(), DenialReason::InvalidInput, "{}", raw.display());
        }
    }

    #[tokio::test]
    async fn authorize_async_matches_sync_verdict() {
        let f = fixture(&[]);
        fs::write(f.data.join("a.txt"), "a").unwrap();
        let policy = Arc::new(f.policy);
        let raw = f.data.join("a.txt");
        let authorized = policy
            .authorize_async(path_str(&raw), OperationKind::Read)
            .await
            .unwrap();
        assert_eq!(authorized, policy.authorize(path_str(&raw), OperationKind::Read).unwrap());
    }
}
