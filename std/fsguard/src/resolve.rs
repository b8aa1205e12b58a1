//! Path resolution for untrusted request paths.
//!
//! Every request path is turned into its canonical form before any
//! containment check runs: all symlinks resolved, `.` and `..` eliminated.
//! Paths that do not exist yet (write targets) are resolved through their
//! deepest existing ancestor, and the missing suffix is re-appended as-is.
//! Resolution only performs read-only metadata queries.

use crate::error::Denial;
use crate::operation::OperationKind;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Limit on dangling symlinks followed while resolving a missing path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Outcome of resolving a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical absolute path.
    pub canonical: PathBuf,
    /// Absolute path with `.`/`..` removed textually, symlinks untouched.
    pub lexical: PathBuf,
    /// Whether the target existed.
    pub exists: bool,
    /// Whether the target is a directory. Always false when missing.
    pub is_dir: bool,
}

/// Resolves raw request paths against a base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

impl PathResolver {
    /// `base_dir` anchors relative input and should be absolute.
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve `raw` to its canonical form.
    ///
    /// Operations that require an existing target fail with
    /// [`Denial::NotFound`]; the denial carries the best-effort canonical
    /// form of the missing path.
    pub fn resolve(&self, raw: &str, operation: OperationKind) -> Result<Resolved, Denial> {
        let absolute = self.normalize(raw)?;
        let lexical = lexical_normalize(&absolute);

        match fs::canonicalize(&absolute) {
            Ok(canonical) => {
                let is_dir = fs::metadata(&canonical)
                    .map_err(|e| Denial::invalid(raw, e.to_string()))?
                    .is_dir();
                Ok(Resolved {
                    canonical,
                    lexical,
                    exists: true,
                    is_dir,
                })
            }
            Err(e) if is_missing(&e) => {
                let canonical = self.resolve_missing(raw, &absolute, 0);
                if operation.requires_existing() {
                    return Err(Denial::NotFound(canonical.unwrap_or(lexical)));
                }
                Ok(Resolved {
                    canonical: canonical?,
                    lexical,
                    exists: false,
                    is_dir: false,
                })
            }
            Err(e) => Err(Denial::invalid(raw, e.to_string())),
        }
    }

    /// Reject malformed input, expand `~` and anchor relative paths.
    fn normalize(&self, raw: &str) -> Result<PathBuf, Denial> {
        if raw.is_empty() {
            return Err(Denial::invalid(raw, "path is empty"));
        }
        if raw.contains('\0') {
            return Err(Denial::invalid(raw, "path contains null byte"));
        }
        let expanded = expand_home(Path::new(raw));
        if expanded.is_absolute() {
            Ok(expanded)
        } else {
            Ok(self.base_dir.join(expanded))
        }
    }

    /// Canonicalize the deepest existing ancestor of a missing path and
    /// re-append the rest.
    fn resolve_missing(&self, raw: &str, path: &Path, hops: usize) -> Result<PathBuf, Denial> {
        if hops > MAX_SYMLINK_HOPS {
            return Err(Denial::invalid(raw, "too many levels of symbolic links"));
        }

        let components: Vec<Component<'_>> = path.components().collect();
        let mut split = components.len();
        let mut found = None;
        while split > 0 {
            let prefix: PathBuf = components[..split].iter().collect();
            match fs::symlink_metadata(&prefix) {
                Ok(meta) => {
                    found = Some((prefix, meta));
                    break;
                }
                Err(e) if is_missing(&e) => split -= 1,
                Err(e) => return Err(Denial::invalid(raw, e.to_string())),
            }
        }
        let Some((ancestor, meta)) = found else {
            return Err(Denial::NotFound(path.to_path_buf()));
        };
        let suffix = &components[split..];

        // A dangling link: follow it by hand so the write lands where the
        // link points, and gets checked there.
        if meta.file_type().is_symlink() {
            match fs::metadata(&ancestor) {
                Ok(_) => {}
                Err(e) if is_missing(&e) => {
                    let target =
                        fs::read_link(&ancestor).map_err(|e| Denial::invalid(raw, e.to_string()))?;
                    let mut next = match ancestor.parent() {
                        Some(parent) => parent.join(target),
                        None => target,
                    };
                    next.extend(suffix.iter().map(|c| c.as_os_str()));
                    return self.resolve_missing(raw, &next, hops + 1);
                }
                Err(e) => return Err(Denial::invalid(raw, e.to_string())),
            }
        }

        let mut resolved =
            fs::canonicalize(&ancestor).map_err(|e| Denial::invalid(raw, e.to_string()))?;
        if !resolved.is_dir() {
            return Err(Denial::NotFound(path.to_path_buf()));
        }
        for component in suffix {
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::CurDir => {}
                // `..` below a missing directory cannot be resolved.
                _ => return Err(Denial::NotFound(path.to_path_buf())),
            }
        }
        Ok(resolved)
    }
}

fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Expand a leading `~` component to the home directory.
pub(crate) fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    if let Some(Component::Normal(first)) = components.next()
        && first == OsStr::new("~")
        && let Some(home) = dirs::home_dir()
    {
        let rest = components.as_path();
        return if rest.as_os_str().is_empty() {
            home
        } else {
            home.join(rest)
        };
    }
    path.to_path_buf()
}

/// Remove `.` and `..` textually, without consulting the filesystem.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::error::Denial;
    use crate::operation::OperationKind;
    use crate::resolve::{PathResolver, expand_home, lexical_normalize};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn setup() -> (tempfile::TempDir, PathBuf, PathResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let resolver = PathResolver::new(root.clone());
        (tmp, root, resolver)
    }

    #[test]
    fn canonicalizes_existing_paths() {
        let (_tmp, root, resolver) = setup();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/file.txt"), "x").unwrap();

        let raw = root.join("sub/../sub/./file.txt");
        let resolved = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Read)
            .unwrap();
        assert_eq!(resolved.canonical, root.join("sub/file.txt"));
        assert!(resolved.exists);
        assert!(!resolved.is_dir);
    }

    #[test]
    fn relative_input_uses_base_dir() {
        let (_tmp, root, resolver) = setup();
        fs::create_dir(root.join("sub")).unwrap();
        let resolved = resolver.resolve("sub", OperationKind::List).unwrap();
        assert_eq!(resolved.canonical, root.join("sub"));
        assert!(resolved.is_dir);
    }

    #[test]
    fn missing_leaf_is_reappended_for_write() {
        let (_tmp, root, resolver) = setup();
        fs::create_dir(root.join("new")).unwrap();
        let raw = root.join("new/file.txt");
        let resolved = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Write)
            .unwrap();
        assert_eq!(resolved.canonical, root.join("new/file.txt"));
        assert!(!resolved.exists);
    }

    #[test]
    fn missing_intermediate_directories_are_tolerated() {
        let (_tmp, root, resolver) = setup();
        let raw = root.join("a/b/c.txt");
        let resolved = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Write)
            .unwrap();
        assert_eq!(resolved.canonical, root.join("a/b/c.txt"));
    }

    #[test]
    fn missing_target_is_not_found_for_reads() {
        let (_tmp, root, resolver) = setup();
        let raw = root.join("nope.txt");
        let err = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Read)
            .unwrap_err();
        assert_eq!(err, Denial::NotFound(root.join("nope.txt")));
    }

    #[test]
    fn file_parent_is_not_found() {
        let (_tmp, root, resolver) = setup();
        fs::write(root.join("file.txt"), "x").unwrap();
        let raw = root.join("file.txt/child");
        let err = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Write)
            .unwrap_err();
        assert!(matches!(err, Denial::NotFound(_)));
    }

    #[test]
    fn parent_ref_below_missing_dir_is_not_found() {
        let (_tmp, root, resolver) = setup();
        let raw = format!("{}/ghost/../x.txt", root.display());
        let err = resolver.resolve(&raw, OperationKind::Write).unwrap_err();
        assert!(matches!(err, Denial::NotFound(_)));
    }

    #[test]
    fn rejects_null_bytes_and_empty_input() {
        let (_tmp, _root, resolver) = setup();
        let err = resolver.resolve("a\0b", OperationKind::Read).unwrap_err();
        assert!(matches!(err, Denial::InvalidInput { .. }));
        let err = resolver.resolve("", OperationKind::Read).unwrap_err();
        assert!(matches!(err, Denial::InvalidInput { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn follows_symlinks_to_real_target() {
        let (_tmp, root, resolver) = setup();
        fs::create_dir(root.join("real")).unwrap();
        fs::write(root.join("real/data.txt"), "x").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let raw = root.join("link/data.txt");
        let resolved = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Read)
            .unwrap();
        assert_eq!(resolved.canonical, root.join("real/data.txt"));
        assert_eq!(resolved.lexical, root.join("link/data.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_resolves_to_its_target() {
        let (_tmp, root, resolver) = setup();
        let outside = tempfile::tempdir().unwrap();
        let outside_root = outside.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside_root.join("planted.txt"), root.join("trap")).unwrap();

        let raw = root.join("trap");
        let resolved = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Write)
            .unwrap();
        assert_eq!(resolved.canonical, outside_root.join("planted.txt"));
        assert!(!resolved.exists);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loops_are_invalid() {
        let (_tmp, root, resolver) = setup();
        std::os::unix::fs::symlink(root.join("b"), root.join("a")).unwrap();
        std::os::unix::fs::symlink(root.join("a"), root.join("b")).unwrap();
        let raw = root.join("a");
        let err = resolver
            .resolve(raw.to_str().unwrap(), OperationKind::Write)
            .unwrap_err();
        assert!(matches!(err, Denial::InvalidInput { .. }));
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~")), home);
            assert_eq!(expand_home(Path::new("~/notes")), home.join("notes"));
        }
        assert_eq!(expand_home(Path::new("/a/~")), PathBuf::from("/a/~"));
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(
            lexical_normalize(Path::new("/data/./a/../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(lexical_normalize(Path::new("/../x")), PathBuf::from("/x"));
    }
}
