//! Template source abstraction for filesystem-independent conversion.
//!
//! Baseline schedules and procedure templates are passed around as explicit
//! [`TemplateRef`] values instead of being looked up from ambient
//! directories. [`FileSystemSource`] reads from disk; [`InMemorySource`]
//! serves fixtures from memory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{ProtocolError, ProtocolResult};

/// Read-only access to template bytes.
pub trait TemplateSource {
    /// Read the raw bytes stored at `path`.
    fn read_template(&self, path: &Path) -> Result<Vec<u8>, std::io::Error>;
}

/// Default filesystem-backed template source.
pub struct FileSystemSource;

impl TemplateSource for FileSystemSource {
    fn read_template(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
        std::fs::read(path)
    }
}

/// In-memory template source for tests and embedding.
///
/// Paths are normalized without touching the filesystem, so `a/./b` and
/// `a/c/../b` address the same template.
#[derive(Default)]
pub struct InMemorySource {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl InMemorySource {
    pub fn new(files: HashMap<PathBuf, Vec<u8>>) -> Self {
        let files = files
            .into_iter()
            .map(|(p, bytes)| (Self::normalize_path(&p), bytes))
            .collect();
        Self { files }
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, bytes: impl Into<Vec<u8>>) {
        self.files
            .insert(Self::normalize_path(path.as_ref()), bytes.into());
    }

    fn normalize_path(path: &Path) -> PathBuf {
        let mut key = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    key.pop();
                }
                other => key.push(other),
            }
        }
        key
    }
}

impl TemplateSource for InMemorySource {
    fn read_template(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
        let normalized = Self::normalize_path(path);
        self.files.get(&normalized).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("template not found in memory: {}", normalized.display()),
            )
        })
    }
}

/// A template path paired with the source it is read from.
#[derive(Clone, Copy)]
pub struct TemplateRef<'a> {
    pub source: &'a dyn TemplateSource,
    pub path: &'a Path,
}

impl<'a> TemplateRef<'a> {
    pub fn new(source: &'a dyn TemplateSource, path: &'a Path) -> Self {
        TemplateRef { source, path }
    }

    /// A template read from disk.
    pub fn file(path: &'a Path) -> Self {
        TemplateRef {
            source: &FileSystemSource,
            path,
        }
    }

    pub fn read(&self) -> ProtocolResult<Vec<u8>> {
        self.source
            .read_template(self.path)
            .map_err(|e| ProtocolError::io(self.path, e))
    }

    pub fn origin(&self) -> String {
        self.path.display().to_string()
    }
}
