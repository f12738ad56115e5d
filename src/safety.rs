use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories under the root that rule files may never target.
const FORBIDDEN_DIRS: &[&str] = &[".git", "node_modules"];

/// Keeps patched documents inside the patch root.
#[derive(Debug, Clone)]
pub struct RootGuard {
    /// Canonical path to the patch root
    root: PathBuf,
    /// Canonical paths to forbidden directories
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path is outside the patch root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("failed to resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RootGuard {
    /// Create a guard for the given root.
    ///
    /// The root is canonicalized so symlinked roots compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = canonicalize(root.as_ref())?;

        let forbidden_paths = FORBIDDEN_DIRS
            .iter()
            .filter_map(|dir| root.join(dir).canonicalize().ok())
            .collect();

        Ok(Self {
            root,
            forbidden_paths,
        })
    }

    /// Resolve a document path and check it is safe to patch.
    ///
    /// Relative paths are taken from the root. Returns the canonical path.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let canonical = canonicalize(&absolute)?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    /// Re-check a previously validated path right before writing to it.
    pub fn revalidate(&self, path: &Path) -> Result<PathBuf, SafetyError> {
        let canonical = canonicalize(path)?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideRoot {
                path: canonical.to_path_buf(),
                root: self.root.clone(),
            });
        }

        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, SafetyError> {
    path.canonicalize().map_err(|source| SafetyError::Resolve {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_path_inside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let file = root.join("public/index.html");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"").unwrap();

        let guard = RootGuard::new(root).unwrap();
        assert!(guard.validate_path("public/index.html").is_ok());
        assert!(guard.validate_path(&file).is_ok());
    }

    #[test]
    fn test_validate_path_outside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("site");
        fs::create_dir_all(&root).unwrap();
        let outside = temp_dir.path().join("outside.html");
        fs::write(&outside, b"").unwrap();

        let guard = RootGuard::new(&root).unwrap();
        assert!(matches!(
            guard.validate_path("../outside.html"),
            Err(SafetyError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_validate_path_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let vendored = root.join("node_modules/pkg/index.js");
        fs::create_dir_all(vendored.parent().unwrap()).unwrap();
        fs::write(&vendored, b"").unwrap();

        let guard = RootGuard::new(root).unwrap();
        assert!(matches!(
            guard.validate_path("node_modules/pkg/index.js"),
            Err(SafetyError::ForbiddenPath { .. })
        ));
    }

    #[test]
    fn test_missing_path_fails_to_resolve() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = RootGuard::new(temp_dir.path()).unwrap();
        assert!(matches!(
            guard.validate_path("nope.html"),
            Err(SafetyError::Resolve { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("site");
        fs::create_dir_all(&root).unwrap();
        let outside = temp_dir.path().join("outside.js");
        fs::write(&outside, b"").unwrap();
        symlink(&outside, root.join("escape.js")).unwrap();

        let guard = RootGuard::new(&root).unwrap();
        let result = guard.validate_path("escape.js");
        assert!(matches!(result, Err(SafetyError::OutsideRoot { .. })));
    }
}
