//! Filesystem-backed resource provider.
//!
//! URIs are resolved under a site root. Resolved paths must stay inside the
//! root; `..` escapes and absolute paths are reported as not found.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use trellis_traits::{ResourceError, ResourceProvider, SharedResourceData};

/// Loads sitemaps and content files from a site directory.
#[derive(Debug)]
pub struct FilesystemResourceProvider {
    root: PathBuf,
    root_display: Option<String>,
    canonical_root: Option<PathBuf>,
}

impl FilesystemResourceProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let canonical_root = root.canonicalize().ok();
        let root_display = root.to_str().map(str::to_string);
        Self {
            root,
            root_display,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a URI onto a path under the root, or `None` if it would escape.
    fn locate(&self, uri: &str) -> Option<PathBuf> {
        let relative = uri.strip_prefix("file://").unwrap_or(uri);
        if Path::new(relative).is_absolute() {
            return None;
        }
        if Path::new(relative)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }

        let full_path = self.root.join(relative);
        match (full_path.canonicalize(), &self.canonical_root) {
            (Ok(canonical), Some(root)) if canonical.starts_with(root) => Some(canonical),
            (Ok(_), Some(_)) => None,
            _ => Some(full_path),
        }
    }
}

impl ResourceProvider for FilesystemResourceProvider {
    fn load(&self, path: &str) -> Result<SharedResourceData, ResourceError> {
        let full_path = self
            .locate(path)
            .ok_or_else(|| ResourceError::NotFound(format!("{path} (outside site root)")))?;

        log::debug!("Loading '{}' from {}", path, full_path.display());
        std::fs::read(&full_path).map(Arc::new).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResourceError::NotFound(path.to_string())
            } else {
                ResourceError::LoadFailed {
                    path: path.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.locate(path).is_some_and(|p| p.is_file())
    }

    fn last_modified(&self, path: &str) -> Option<SystemTime> {
        let full_path = self.locate(path)?;
        std::fs::metadata(full_path).ok()?.modified().ok()
    }

    fn base_path(&self) -> Option<&str> {
        self.root_display.as_deref()
    }

    fn name(&self) -> &'static str {
        "FilesystemResourceProvider"
    }
}
