//! Sandboxed filesystem and shell access.
//!
//! Every operation is confined under a single workspace root: paths are
//! resolved relative to that root and rejected if they try to climb out of
//! it with `..` or an absolute path elsewhere on disk. This is the only
//! layer that touches real I/O; [`crate::agent::turn_engine`] calls through
//! it and never opens a file or spawns a process directly.

use std::path::{Component, Path, PathBuf};

use tokio::process::Command as AsyncCommand;

use crate::error::{AgentError, Result};

/// A single filesystem entry returned by [`Workspace::list_dir`].
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// The result of a shell command: `run_shell` folds this into one string,
/// but tests and subscribers want the parts separately.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// Render as the single string the tool result carries: an
    /// `exit_code=N` header line, then stdout, then stderr if non-empty;
    /// if both are empty, a literal `(no output)` marker takes their place.
    pub fn render(&self) -> String {
        let mut out = format!("exit_code={}\n", self.exit_code);
        if self.stdout.is_empty() && self.stderr.is_empty() {
            out.push_str("(no output)");
            return out;
        }
        out.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("stderr:\n");
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Bound to a single root directory; every method takes workspace-relative
/// paths and rejects attempts to escape the root.
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the workspace root, rejecting any path
    /// component that would climb above it. Does not require the path to
    /// exist, so callers can resolve a path before creating it.
    ///
    /// Lexical `..`-depth tracking alone isn't enough: a symlink placed
    /// inside the workspace can point outside it without ever spelling
    /// `..`. Once the lexical containment check passes, re-resolve through
    /// the filesystem (`canonicalize`, which follows symlinks) and check
    /// containment again against the canonical root — this is what
    /// actually guards the I/O that follows.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf> {
        let lexical = self.resolve_lexical(relative)?;
        self.verify_symlink_free(relative, &lexical)
    }

    fn resolve_lexical(&self, relative: &str) -> Result<PathBuf> {
        let relative_path = Path::new(relative);
        let mut resolved = self.root.clone();
        let mut depth: i32 = 0;

        for component in relative_path.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(AgentError::Workspace(format!(
                            "path '{relative}' escapes the workspace root"
                        )));
                    }
                    resolved.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::Workspace(format!(
                        "path '{relative}' must be workspace-relative, not absolute"
                    )));
                }
            }
        }

        Ok(resolved)
    }

    fn canonical_root(&self) -> Result<PathBuf> {
        self.root
            .canonicalize()
            .map_err(|e| AgentError::Workspace(format!("failed to resolve workspace root: {e}")))
    }

    /// Confirm `lexical` stays inside the workspace root once any symlinks
    /// along the way are followed. When `lexical` doesn't exist yet (e.g. a
    /// `write_file` with `create=true`), walk up to the nearest existing
    /// ancestor and canonicalize that instead — there's nothing further to
    /// resolve, but a symlinked parent directory must still be caught.
    fn verify_symlink_free(&self, relative: &str, lexical: &Path) -> Result<PathBuf> {
        let canonical_root = self.canonical_root()?;

        if let Ok(canonical) = lexical.canonicalize() {
            return if canonical.starts_with(&canonical_root) {
                Ok(canonical)
            } else {
                Err(AgentError::Workspace(format!(
                    "path '{relative}' escapes the workspace root"
                )))
            };
        }

        let mut ancestor = lexical.to_path_buf();
        let mut trailing_rev: Vec<std::ffi::OsString> = Vec::new();
        while !ancestor.exists() {
            let name = ancestor.file_name().map(|n| n.to_os_string());
            if !ancestor.pop() {
                break;
            }
            if let Some(name) = name {
                trailing_rev.push(name);
            }
        }

        let canonical_existing = ancestor
            .canonicalize()
            .map_err(|e| AgentError::Workspace(format!("failed to resolve '{relative}': {e}")))?;
        if !canonical_existing.starts_with(&canonical_root) {
            return Err(AgentError::Workspace(format!(
                "path '{relative}' escapes the workspace root"
            )));
        }

        let mut resolved = canonical_existing;
        for name in trailing_rev.into_iter().rev() {
            resolved.push(name);
        }
        Ok(resolved)
    }

    pub async fn exists(&self, relative: &str) -> Result<bool> {
        let path = self.resolve_path(relative)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    pub async fn read_text(&self, relative: &str) -> Result<String> {
        let path = self.resolve_path(relative)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::Workspace(format!("failed to read '{relative}': {e}")))
    }

    /// Write `content` to `relative`, creating parent directories as needed.
    pub async fn write_text(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve_path(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::Workspace(format!("failed to create '{parent:?}': {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AgentError::Workspace(format!("failed to write '{relative}': {e}")))
    }

    pub async fn list_dir(&self, relative: &str) -> Result<Vec<DirEntry>> {
        let path = self.resolve_path(relative)?;
        let mut read_dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| AgentError::Workspace(format!("failed to list '{relative}': {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| AgentError::Workspace(format!("failed to read directory entry: {e}")))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| AgentError::Workspace(format!("failed to stat entry: {e}")))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Case-insensitive substring search over both file names and
    /// workspace-relative paths, depth-first, capped at 200 hits.
    pub async fn search(&self, query: &str, subtree: &str) -> Result<Vec<String>> {
        const MAX_HITS: usize = 200;
        let root = self.resolve_path(subtree)?;
        let canonical_root = self.canonical_root()?;
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        let mut stack = vec![root.clone()];

        while let Some(dir) = stack.pop() {
            if hits.len() >= MAX_HITS {
                break;
            }
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            let mut children = Vec::new();
            while let Some(entry) = read_dir.next_entry().await.ok().flatten() {
                children.push(entry);
            }
            // Depth-first: push subdirectories so the next iteration visits
            // them before returning to siblings queued earlier.
            for entry in children.into_iter().rev() {
                let path = entry.path();
                let rel = path
                    .strip_prefix(&canonical_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                let name = entry.file_name().to_string_lossy().into_owned();

                if name.to_lowercase().contains(&needle) || rel.to_lowercase().contains(&needle) {
                    hits.push(rel.clone());
                    if hits.len() >= MAX_HITS {
                        break;
                    }
                }

                if let Ok(file_type) = entry.file_type().await {
                    if file_type.is_dir() {
                        stack.push(path);
                    }
                }
            }
        }

        Ok(hits)
    }

    /// Search-and-replace patch: fails if `search` is empty or not found.
    /// When `replace_all` is false, only the first occurrence is replaced.
    pub async fn apply_patch(
        &self,
        relative: &str,
        search: &str,
        replace: &str,
        replace_all: bool,
    ) -> Result<String> {
        if search.is_empty() {
            return Err(AgentError::Validation(
                "apply_patch search string must not be empty".to_string(),
            ));
        }

        let original = self.read_text(relative).await?;
        if !original.contains(search) {
            return Err(AgentError::Validation(format!(
                "search string not found in '{relative}'"
            )));
        }

        let patched = if replace_all {
            original.replace(search, replace)
        } else {
            original.replacen(search, replace, 1)
        };

        self.write_text(relative, &patched).await?;
        Ok(patched)
    }

    /// Run a shell command with `cwd` relative to the workspace root.
    /// Prefers the user's interactive shell (`$SHELL` on unix); `cmd /C`
    /// on windows.
    pub async fn run_shell(&self, command: &str, cwd: &str) -> Result<ShellOutput> {
        let dir = self.resolve_path(cwd)?;

        let mut builder = shell_command(command);
        builder.current_dir(&dir);

        let output = builder
            .output()
            .await
            .map_err(|e| AgentError::Workspace(format!("failed to run shell command: {e}")))?;

        Ok(ShellOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(target_os = "windows")]
fn shell_command(command: &str) -> AsyncCommand {
    let mut c = AsyncCommand::new("cmd");
    c.arg("/C").arg(command);
    c
}

#[cfg(not(target_os = "windows"))]
fn shell_command(command: &str) -> AsyncCommand {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let mut c = AsyncCommand::new(shell);
    c.arg("-c").arg(command);
    c
}
