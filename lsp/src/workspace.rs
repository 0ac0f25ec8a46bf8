//! Session-wide workspace context and per-run document identity.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::protocol;
use crate::types::ServerSettings;

/// Lexically fold `.` and `..` out of an absolute path.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// How the toolchain is driven for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// A build descriptor exists under the root: run the full project build.
    Project,
    /// No descriptor: assemble the document on its own.
    SingleFile,
}

/// Workspace root and settings, fixed once the session is initialized.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    settings: ServerSettings,
}

impl Workspace {
    pub fn new(root: &Path, settings: ServerSettings) -> Self {
        Self {
            root: normalize_path(root),
            settings,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Re-derived on every call: the descriptor may come and go between edits.
    #[must_use]
    pub fn build_mode(&self) -> BuildMode {
        if self.root.join(&self.settings.build_descriptor).exists() {
            BuildMode::Project
        } else {
            BuildMode::SingleFile
        }
    }

    /// Resolve an editor URI against this workspace.
    ///
    /// Returns `None` for non-`file` URIs.
    #[must_use]
    pub fn document(&self, uri: &Url) -> Option<DocumentRef> {
        let path = protocol::file_uri_to_path(uri)?;
        Some(DocumentRef::from_path(&self.root, path))
    }
}

/// A document as seen by one diagnostic run. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    absolute_path: PathBuf,
    relative_path: PathBuf,
}

impl DocumentRef {
    /// Build from a filesystem path. Paths outside `root` keep their
    /// absolute form as the relative path.
    pub fn from_path(root: &Path, path: PathBuf) -> Self {
        let absolute_path = normalize_path(&path);
        let relative_path = absolute_path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| absolute_path.clone());
        Self {
            absolute_path,
            relative_path,
        }
    }

    #[must_use]
    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    #[must_use]
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }
}
