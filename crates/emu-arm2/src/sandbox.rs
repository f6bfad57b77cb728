//! Filesystem sandbox for guest file syscalls.
//!
//! Every guest-supplied path must resolve, after symlink canonicalisation,
//! to a location inside the configured root. There is no fallback mode: a
//! violation halts the VM rather than returning an error the guest could
//! probe.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

/// A sandbox escape attempt (or unusable root).
#[derive(Debug)]
pub struct SecurityError {
    /// The offending guest path.
    pub path: String,
    /// What rule it broke.
    pub reason: String,
}

impl SecurityError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox violation on `{}`: {}", self.path, self.reason)
    }
}

impl std::error::Error for SecurityError {}

/// Validated filesystem root.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`, which must exist.
    pub fn new(root: &Path) -> io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// The canonical root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a guest path to a host path inside the root.
    ///
    /// Rules, in order: empty paths are rejected; any textual `..`
    /// component is rejected before the filesystem is consulted; absolute
    /// paths are re-rooted at the sandbox; the canonical result (following
    /// symlinks; for a not-yet-existing file, its parent's canonical form)
    /// must stay inside the root.
    pub fn resolve(&self, guest_path: &str) -> Result<PathBuf, SecurityError> {
        if guest_path.is_empty() {
            return Err(SecurityError::new(guest_path, "empty path"));
        }
        let given = Path::new(guest_path);
        if given
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SecurityError::new(guest_path, "`..` component"));
        }
        // Absolute guest paths are relative to the sandbox root.
        let relative: PathBuf = given
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let joined = self.root.join(&relative);

        let canonical = if joined.exists() {
            joined.canonicalize().map_err(|e| {
                SecurityError::new(guest_path, format!("cannot canonicalize: {e}"))
            })?
        } else {
            // File being created: its directory must exist and canonicalize
            // inside the root.
            let parent = joined
                .parent()
                .ok_or_else(|| SecurityError::new(guest_path, "no parent directory"))?;
            let file = joined
                .file_name()
                .ok_or_else(|| SecurityError::new(guest_path, "no file name"))?;
            parent
                .canonicalize()
                .map_err(|e| SecurityError::new(guest_path, format!("parent: {e}")))?
                .join(file)
        };

        if !canonical.starts_with(&self.root) {
            return Err(SecurityError::new(guest_path, "escapes the sandbox root"));
        }
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("arm2-sandbox-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/file.txt"), b"data").unwrap();
        dir
    }

    #[test]
    fn plain_paths_resolve_inside_root() {
        let dir = scratch("plain");
        let sandbox = Sandbox::new(&dir).unwrap();
        let resolved = sandbox.resolve("sub/file.txt").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
        // Not-yet-existing file in an existing directory is fine.
        assert!(sandbox.resolve("sub/new.txt").is_ok());
    }

    #[test]
    fn dotdot_is_rejected_textually() {
        let dir = scratch("dotdot");
        let sandbox = Sandbox::new(&dir).unwrap();
        assert!(sandbox.resolve("../../etc/passwd").is_err());
        assert!(sandbox.resolve("sub/../../x").is_err());
    }

    #[test]
    fn absolute_paths_are_rerooted() {
        let dir = scratch("abs");
        let sandbox = Sandbox::new(&dir).unwrap();
        let resolved = sandbox.resolve("/sub/file.txt").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
    }

    #[test]
    fn empty_path_is_rejected() {
        let dir = scratch("empty");
        let sandbox = Sandbox::new(&dir).unwrap();
        assert!(sandbox.resolve("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let dir = scratch("symlink");
        let outside = std::env::temp_dir().join(format!("arm2-outside-{}", std::process::id()));
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(&outside, dir.join("link")).unwrap();

        let sandbox = Sandbox::new(&dir).unwrap();
        assert!(sandbox.resolve("link/secret").is_err());
    }
}
