//! Project-root path containment.
//!
//! Every file tool resolves caller-supplied paths through a [`PathGuard`]
//! before touching the filesystem. Containment is checked against the
//! canonicalized root, resolving the nearest existing ancestor for paths
//! that do not exist yet, so a symlink inside the tree cannot smuggle an
//! operation outside the root. Escapes fail with `refused`.

use crate::error::{ErrorKind, HiveError, HiveResult};
use std::path::{Component, Path, PathBuf};

/// Resolves and validates paths against a fixed project root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard rooted at `root` (created if missing so the root can be
    /// canonicalized).
    pub fn new(root: PathBuf) -> HiveResult<Self> {
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    /// Borrow the canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path to an absolute path inside the root.
    ///
    /// Relative paths resolve against the root. Absolute paths are accepted
    /// only when they already point inside it. `.` and `..` components are
    /// normalized lexically first, then the nearest existing ancestor is
    /// canonicalized so symlinked parents cannot escape.
    pub fn resolve(&self, raw: &str) -> HiveResult<PathBuf> {
        let supplied = PathBuf::from(raw);

        let mut normalized = PathBuf::new();
        for component in supplied.components() {
            match component {
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    normalized = PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        let effective = if normalized.is_absolute() {
            normalized
        } else {
            self.root.join(&normalized)
        };

        let canonical = self.canonicalize_with_missing_tail(&effective)?;
        if !canonical.starts_with(&self.root) {
            return Err(HiveError::new(
                ErrorKind::Refused,
                format!("path escapes project root: {}", raw),
            ));
        }
        Ok(canonical)
    }

    /// Canonicalize a path that may not fully exist: resolve the nearest
    /// existing ancestor, then re-append the missing suffix.
    fn canonicalize_with_missing_tail(&self, path: &Path) -> HiveResult<PathBuf> {
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        let mut ancestor = path;
        let mut suffix_parts: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            match ancestor.parent() {
                Some(parent) => {
                    if let Some(name) = ancestor.file_name() {
                        suffix_parts.push(name);
                    }
                    if parent.exists() {
                        let mut canonical = parent.canonicalize()?;
                        for part in suffix_parts.iter().rev() {
                            canonical.push(part);
                        }
                        return Ok(canonical);
                    }
                    ancestor = parent;
                }
                None => {
                    return Err(HiveError::refused(format!(
                        "no existing ancestor for {}",
                        path.display()
                    )))
                }
            }
        }
    }
}

/// Write a sibling `.bak` snapshot of a file's current content.
///
/// No-op when the file does not exist yet. Called by every mutating file
/// tool before it writes.
pub fn snapshot_backup(path: &Path) -> HiveResult<()> {
    if path.exists() {
        let backup = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.bak", ext.to_string_lossy()),
            None => "bak".to_string(),
        });
        std::fs::copy(path, &backup)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_paths_resolve_under_root() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path().to_path_buf()).unwrap();
        let resolved = guard.resolve("notes/todo.txt").unwrap();
        assert!(resolved.starts_with(guard.root()));
        assert!(resolved.ends_with("notes/todo.txt"));
    }

    #[test]
    fn parent_traversal_cannot_escape() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path().to_path_buf()).unwrap();
        // Lexical normalization strips the leading .. before joining, so the
        // result stays inside the root.
        let resolved = guard.resolve("../../etc/passwd").unwrap();
        assert!(resolved.starts_with(guard.root()));
    }

    #[test]
    fn foreign_absolute_paths_are_refused() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path().to_path_buf()).unwrap();
        let err = guard.resolve("/etc/passwd").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Refused);
    }

    #[test]
    fn absolute_path_inside_root_is_accepted() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path().to_path_buf()).unwrap();
        let inside = guard.root().join("file.txt");
        let resolved = guard.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_refused() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path().to_path_buf()).unwrap();

        let link = guard.root().join("sneaky");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let err = guard.resolve("sneaky/secret.txt").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Refused);
    }

    #[test]
    fn backup_snapshots_prior_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "original").unwrap();
        snapshot_backup(&path).unwrap();
        let backup = dir.path().join("data.txt.bak");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "original");
    }

    #[test]
    fn backup_noop_for_new_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh.txt");
        snapshot_backup(&path).unwrap();
        assert!(!dir.path().join("fresh.txt.bak").exists());
    }
}
