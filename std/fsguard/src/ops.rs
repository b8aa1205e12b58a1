//! Filesystem operations behind the access policy.
//!
//! Every operation authorizes its paths first and only touches the
//! filesystem through the resulting [`AuthorizedPath`].

use crate::error::{Denial, OpError};
use crate::operation::OperationKind;
use crate::policy::{AccessPolicy, AuthorizedPath};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// How `write_file` treats existing content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

/// A single text edit operation.
#[derive(Debug, Clone, Deserialize)]
pub struct EditOperation {
    /// The text to search for.
    pub old_text: String,
    /// The replacement text.
    pub new_text: String,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
    Unknown,
}

/// One entry returned by `list_directory`.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// File metadata returned by `get_file_info`.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<String>,
    pub is_dir: bool,
    pub is_file: bool,
    #[cfg(unix)]
    pub permissions: String,
}

/// A node in the directory tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// Result entry for reading multiple files.
#[derive(Debug, Clone, Serialize)]
pub struct FileReadResult {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filesystem access confined by an [`AccessPolicy`].
#[derive(Debug, Clone)]
pub struct GuardedFs {
    policy: Arc<AccessPolicy>,
}

impl GuardedFs {
    pub fn new(policy: Arc<AccessPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Arc<AccessPolicy> {
        &self.policy
    }

    async fn authorize(&self, raw: &str, operation: OperationKind) -> Result<AuthorizedPath, OpError> {
        Ok(self.policy.authorize_async(raw, operation).await?)
    }

    /// Read a file, optionally a byte window of it. Invalid UTF-8 is
    /// replaced.
    pub async fn read_file(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<String, OpError> {
        if length == Some(0) {
            return Err(OpError::InvalidArgument("length must be positive".into()));
        }
        let path = self.authorize(path, OperationKind::Read).await?;
        let mut file = tokio::fs::File::open(&path).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        let mut buf = Vec::new();
        match length {
            Some(len) => file.take(len).read_to_end(&mut buf).await?,
            None => file.read_to_end(&mut buf).await?,
        };
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read several files; a failure is reported per entry.
    pub async fn read_multiple_files(&self, paths: &[String]) -> Vec<FileReadResult> {
        let mut results = Vec::with_capacity(paths.len());
        for p in paths {
            let entry = match self.read_file(p, 0, None).await {
                Ok(content) => FileReadResult {
                    path: p.clone(),
                    content: Some(content),
                    error: None,
                },
                Err(e) => FileReadResult {
                    path: p.clone(),
                    content: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(entry);
        }
        results
    }

    /// Create or overwrite (or append to) a file, creating missing parent
    /// directories below the authorized target.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        mode: WriteMode,
    ) -> Result<String, OpError> {
        let path = self.authorize(path, OperationKind::Write).await?;
        if let Some(parent) = path.as_path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match mode {
            WriteMode::Overwrite => tokio::fs::write(&path, content).await?,
            WriteMode::Append => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
            }
        }
        Ok(format!("Successfully wrote to {path}"))
    }

    /// Apply sequential text edits and return a line diff. With `dry_run`
    /// nothing is written.
    pub async fn edit_file(
        &self,
        path: &str,
        edits: &[EditOperation],
        dry_run: bool,
    ) -> Result<String, OpError> {
        let path = self.authorize(path, OperationKind::Edit).await?;
        let original = tokio::fs::read_to_string(&path).await?.replace("\r\n", "\n");
        let mut content = original.clone();

        for edit in edits {
            let old_text = edit.old_text.replace("\r\n", "\n");
            let new_text = edit.new_text.replace("\r\n", "\n");
            if old_text.is_empty() {
                return Err(OpError::InvalidArgument("old_text must not be empty".into()));
            }
            if !content.contains(&old_text) {
                return Err(OpError::EditNotFound(edit.old_text.clone()));
            }
            content = content.replacen(&old_text, &new_text, 1);
        }

        let diff = build_diff(&original, &content);
        if !dry_run {
            tokio::fs::write(&path, &content).await?;
        }
        Ok(diff)
    }

    /// Create a directory and all missing parents.
    pub async fn create_directory(&self, path: &str) -> Result<String, OpError> {
        let path = self.authorize(path, OperationKind::Write).await?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(format!("Successfully created directory {path}"))
    }

    /// List a directory, sorted by name. Ignored entries are left out.
    pub async fn list_directory(
        &self,
        path: &str,
        show_hidden: bool,
        pattern: Option<&str>,
    ) -> Result<Vec<DirectoryEntry>, OpError> {
        let dir = self.authorize(path, OperationKind::List).await?;
        if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Err(OpError::NotADirectory(dir.into_path_buf()));
        }
        let filter = pattern
            .map(|p| glob::Pattern::new(p).map_err(|e| OpError::InvalidArgument(e.to_string())))
            .transpose()?;
        let options = glob::MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            if filter.as_ref().is_some_and(|f| !f.matches_with(&name, options)) {
                continue;
            }
            let entry_path = entry.path();
            let is_dir = entry.file_type().await.is_ok_and(|ft| ft.is_dir());
            if self.policy.is_ignored(&entry_path, is_dir) {
                continue;
            }
            // Only stat what the policy grants; links out of the root are
            // listed without their target's metadata.
            let authorized = match entry_path.to_str() {
                Some(raw) => self.policy.authorize_async(raw, OperationKind::Stat).await,
                None => Err(Denial::invalid(
                    &entry_path.to_string_lossy(),
                    "path is not valid UTF-8",
                )),
            };
            let listed = match authorized {
                Err(Denial::Ignored(_)) => continue,
                Err(denial) => unknown_entry(name, denial.code().to_owned()),
                Ok(target) => match tokio::fs::metadata(&target).await {
                    Ok(meta) => DirectoryEntry {
                        name,
                        entry_type: if meta.is_dir() {
                            EntryType::Directory
                        } else {
                            EntryType::File
                        },
                        size: (!meta.is_dir()).then(|| meta.len()),
                        modified: rfc3339(meta.modified()),
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!(entry = %entry_path.display(), error = %e, "failed to stat entry");
                        unknown_entry(name, e.to_string())
                    }
                },
            };
            entries.push(listed);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Recursive tree of a directory. Ignored entries are pruned and
    /// symlinks are not followed.
    pub async fn directory_tree(&self, path: &str) -> Result<TreeNode, OpError> {
        let root = self.authorize(path, OperationKind::List).await?;
        Ok(self.build_tree(root.as_path()).await?)
    }

    /// Move or rename a file or directory. The destination must not exist.
    pub async fn move_file(&self, source: &str, destination: &str) -> Result<String, OpError> {
        let source = self.authorize(source, OperationKind::Edit).await?;
        let dest = self.authorize(destination, OperationKind::Write).await?;
        if dest.existed() {
            return Err(OpError::InvalidArgument(format!(
                "destination already exists: {dest}"
            )));
        }
        tokio::fs::rename(&source, &dest).await?;
        Ok(format!("Moved {source} to {dest}"))
    }

    /// Glob search below a directory. Only authorized, non-ignored matches
    /// are returned, minus those matching `exclude_patterns` (relative to
    /// the search base).
    pub async fn search_files(
        &self,
        path: &str,
        pattern: &str,
        exclude_patterns: &[String],
    ) -> Result<Vec<PathBuf>, OpError> {
        let base = self.authorize(path, OperationKind::List).await?.into_path_buf();
        let excludes = exclude_patterns
            .iter()
            .map(|ex| glob::Pattern::new(ex).map_err(|e| OpError::InvalidArgument(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let full_pattern = format!(
            "{}/{pattern}",
            glob::Pattern::escape(&base.to_string_lossy())
        );
        let policy = Arc::clone(&self.policy);

        tokio::task::spawn_blocking(move || {
            let paths = glob::glob(&full_pattern).map_err(|e| OpError::InvalidArgument(e.to_string()))?;
            let mut matches: Vec<PathBuf> = paths
                .filter_map(|entry| entry.ok())
                .filter(|p| {
                    let relative = p.strip_prefix(&base).unwrap_or(p.as_path());
                    !excludes.iter().any(|ex| ex.matches_path(relative))
                })
                .filter_map(|p| {
                    let raw = p.to_str()?;
                    policy.authorize(raw, OperationKind::Stat).ok()
                })
                .map(AuthorizedPath::into_path_buf)
                .collect();
            matches.sort();
            matches.dedup();
            Ok::<_, OpError>(matches)
        })
        .await?
    }

    /// Detailed metadata about a file or directory.
    pub async fn get_file_info(&self, path: &str) -> Result<FileInfo, OpError> {
        let path = self.authorize(path, OperationKind::Stat).await?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(FileInfo {
            size: meta.len(),
            modified: rfc3339(meta.modified()),
            created: rfc3339(meta.created()),
            accessed: rfc3339(meta.accessed()),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            #[cfg(unix)]
            permissions: {
                use std::os::unix::fs::PermissionsExt;
                format!("{:o}", meta.permissions().mode() & 0o777)
            },
            path: path.into_path_buf(),
        })
    }

    /// The directories this filesystem may access.
    pub fn list_allowed_directories(&self) -> Vec<PathBuf> {
        self.policy.allowed_roots().map(Path::to_path_buf).collect()
    }

    /// Recursively build a tree of the filesystem.
    fn build_tree<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<TreeNode, std::io::Error>> + Send + 'a>> {
        Box::pin(async move {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());

            let meta = tokio::fs::symlink_metadata(path).await?;
            if !meta.is_dir() {
                return Ok(TreeNode {
                    name,
                    node_type: EntryType::File,
                    children: None,
                });
            }

            let mut children = Vec::new();
            let mut read_dir = tokio::fs::read_dir(path).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let child_path = entry.path();
                let is_dir = entry.file_type().await.is_ok_and(|ft| ft.is_dir());
                if self.policy.is_ignored(&child_path, is_dir) {
                    continue;
                }
                match self.build_tree(&child_path).await {
                    Ok(child) => children.push(child),
                    Err(_) => continue, // skip inaccessible entries
                }
            }
            children.sort_by(|a, b| a.name.cmp(&b.name));

            Ok(TreeNode {
                name,
                node_type: EntryType::Directory,
                children: Some(children),
            })
        })
    }
}

fn rfc3339(time: std::io::Result<SystemTime>) -> Option<String> {
    time.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
        .map(|dt| dt.to_rfc3339())
}

fn unknown_entry(name: String, error: String) -> DirectoryEntry {
    DirectoryEntry {
        name,
        entry_type: EntryType::Unknown,
        size: None,
        modified: None,
        error: Some(error),
    }
}

/// Above this many table cells the middle of a diff is reported as a block
/// replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Line diff of `original` against `modified`: kept lines start with a
/// space, removed lines with `-`, added lines with `+`.
fn build_diff(original: &str, modified: &str) -> String {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = modified.lines().collect();

    let head = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let tail = old[head..]
        .iter()
        .rev()
        .zip(new[head..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut diff = String::new();
    let mut push = |tag: char, line: &str| {
        diff.push(tag);
        diff.push_str(line);
        diff.push('\n');
    };
    for line in &old[..head] {
        push(' ', *line);
    }
    for (tag, line) in diff_lines(&old[head..old.len() - tail], &new[head..new.len() - tail]) {
        push(tag, line);
    }
    for line in &old[old.len() - tail..] {
        push(' ', *line);
    }
    diff
}

/// Longest-common-subsequence walk; removals come before additions.
fn diff_lines<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<(char, &'a str)> {
    let mut out = Vec::with_capacity(old.len() + new.len());
    if old.len().saturating_mul(new.len()) > MAX_LCS_CELLS {
        out.extend(old.iter().map(|line| ('-', *line)));
        out.extend(new.iter().map(|line| ('+', *line)));
        return out;
    }

    // lcs[i * cols + j] is the LCS length of old[i..] and new[j..].
    let cols = new.len() + 1;
    let mut lcs = vec![0u32; (old.len() + 1) * cols];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i * cols + j] = if old[i] == new[j] {
                lcs[(i + 1) * cols + j + 1] + 1
            } else {
                lcs[(i + 1) * cols + j].max(lcs[i * cols + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            out.push((' ', old[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * cols + j] >= lcs[i * cols + j + 1] {
            out.push(('-', old[i]));
            i += 1;
        } else {
            out.push(('+', new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|line| ('-', *line)));
    out.extend(new[j..].iter().map(|line| ('+', *line)));
    out
}
