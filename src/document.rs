use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// A UTF-8 text document identified by its path.
///
/// Documents are values. A rule application never mutates its input; it
/// produces a successor via [`Document::with_text`] that keeps the path and
/// the fingerprint of the text originally loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a Document does nothing until it is saved"]
pub struct Document {
    path: PathBuf,
    text: String,
    /// xxh3 of the text as read from disk; `None` for in-memory documents
    origin: Option<u64>,
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Utf8 { path: PathBuf },

    #[error("{path} changed on disk since it was loaded; refusing to overwrite")]
    ChangedOnDisk { path: PathBuf },
}

/// Result of persisting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "SaveResult should be checked for written/unchanged"]
pub enum SaveResult {
    Written { path: PathBuf, bytes: usize },
    /// Text equals what was loaded; nothing written
    Unchanged { path: PathBuf },
}

impl Document {
    /// Create an in-memory document.
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            origin: None,
        }
    }

    /// Read a document from storage.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = xxh3_64(&bytes);
        let text = String::from_utf8(bytes).map_err(|_| DocumentError::Utf8 {
            path: path.to_path_buf(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            text,
            origin: Some(origin),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Successor document with new text, same identity.
    pub fn with_text(&self, text: String) -> Self {
        Self {
            path: self.path.clone(),
            text,
            origin: self.origin,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.text.as_bytes())
    }

    /// Whether the text differs from what was loaded. In-memory documents
    /// are always considered modified.
    pub fn is_modified(&self) -> bool {
        self.origin != Some(self.fingerprint())
    }

    /// Persist the document to its path.
    ///
    /// Loaded documents are only written when modified, and only if the file
    /// on disk still has the content it had at load time.
    pub fn save(&self) -> Result<SaveResult, DocumentError> {
        if let Some(origin) = self.origin {
            if !self.is_modified() {
                return Ok(SaveResult::Unchanged {
                    path: self.path.clone(),
                });
            }

            let current = fs::read(&self.path).map_err(|source| DocumentError::Io {
                path: self.path.clone(),
                source,
            })?;
            if xxh3_64(&current) != origin {
                return Err(DocumentError::ChangedOnDisk {
                    path: self.path.clone(),
                });
            }
        }

        atomic_write(&self.path, self.text.as_bytes()).map_err(|source| DocumentError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(path = %self.path.display(), bytes = self.text.len(), "document written");
        Ok(SaveResult::Written {
            path: self.path.clone(),
            bytes: self.text.len(),
        })
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the original file is left in place.
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Same directory keeps the rename on one filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
