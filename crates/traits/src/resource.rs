//! ResourceProvider trait for abstracting source loading.
//!
//! Sitemaps, mounted sub-sitemaps and the files read by generators and
//! readers are all addressed by URI and loaded through this trait, so the
//! processor never depends on the filesystem directly.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed to load resource '{path}': {message}")]
    LoadFailed { path: String, message: String },

    #[error("Invalid resource format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::Io(err.to_string())
    }
}

/// Shared resource data type (reference-counted bytes).
pub type SharedResourceData = Arc<Vec<u8>>;

/// A trait for loading resources by URI.
///
/// # Implementations
///
/// - `FilesystemResourceProvider` (trellis-resource): local files under a base directory
/// - [`InMemoryResourceProvider`]: pre-populated memory, used heavily by tests
pub trait ResourceProvider: Send + Sync + Debug {
    /// Load a resource by its path/URI.
    fn load(&self, path: &str) -> Result<SharedResourceData, ResourceError>;

    /// Check if a resource exists.
    fn exists(&self, path: &str) -> bool;

    /// Modification stamp of a resource, used to decide whether a built
    /// sitemap tree is stale.
    ///
    /// Returns `None` when the provider cannot tell, in which case trees
    /// built from this provider are never considered stale.
    fn last_modified(&self, _path: &str) -> Option<SystemTime> {
        None
    }

    /// Get the base path for resolving relative resources.
    fn base_path(&self) -> Option<&str> {
        None
    }

    /// Returns a human-readable name for this provider (for logging/debugging).
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredResource {
    data: SharedResourceData,
    modified: SystemTime,
}

/// An in-memory resource provider.
///
/// Every `add` bumps a logical clock, so replacing a resource always yields
/// a later [`ResourceProvider::last_modified`] stamp than the one it replaced.
#[derive(Debug, Default)]
pub struct InMemoryResourceProvider {
    resources: RwLock<HashMap<String, StoredResource>>,
    clock: AtomicU64,
}

impl InMemoryResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> SystemTime {
        let revision = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        SystemTime::UNIX_EPOCH + Duration::from_nanos(revision)
    }

    /// Add a resource to the in-memory store, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::LoadFailed` if the internal lock is poisoned.
    pub fn add(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<(), ResourceError> {
        self.add_shared(path, Arc::new(data.into()))
    }

    /// Add a resource from shared data.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::LoadFailed` if the internal lock is poisoned.
    pub fn add_shared(
        &self,
        path: impl Into<String>,
        data: SharedResourceData,
    ) -> Result<(), ResourceError> {
        let path_string = path.into();
        let modified = self.tick();
        let mut resources = self
            .resources
            .write()
            .map_err(|_| ResourceError::LoadFailed {
                path: path_string.clone(),
                message: "resource store lock poisoned".to_string(),
            })?;
        resources.insert(path_string, StoredResource { data, modified });
        Ok(())
    }

    /// Remove a resource from the store.
    pub fn remove(&self, path: &str) -> Option<SharedResourceData> {
        self.resources.write().ok()?.remove(path).map(|r| r.data)
    }

    /// Get the number of resources in the store.
    pub fn len(&self) -> usize {
        self.resources.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().map(|r| r.is_empty()).unwrap_or(true)
    }
}

impl ResourceProvider for InMemoryResourceProvider {
    fn load(&self, path: &str) -> Result<SharedResourceData, ResourceError> {
        let resources = self
            .resources
            .read()
            .map_err(|_| ResourceError::LoadFailed {
                path: path.to_string(),
                message: "resource store lock poisoned".to_string(),
            })?;
        resources
            .get(path)
            .map(|r| Arc::clone(&r.data))
            .ok_or_else(|| ResourceError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.resources
            .read()
            .map(|r| r.contains_key(path))
            .unwrap_or(false)
    }

    fn last_modified(&self, path: &str) -> Option<SystemTime> {
        self.resources.read().ok()?.get(path).map(|r| r.modified)
    }

    fn name(&self) -> &'static str {
        "InMemoryResourceProvider"
    }
}

/// Resolves `href` against a context directory.
///
/// Absolute paths and URLs are returned unchanged. Relative references are
/// joined onto `base` and normalised (`.` and `..` segments collapsed). A
/// trailing `/` on the reference is preserved so callers can still tell a
/// directory reference from a file reference.
pub fn resolve_uri(href: &str, base: &str) -> String {
    if href.starts_with('/') || href.contains("://") {
        return href.to_string();
    }
    let joined = if base.is_empty() || base.ends_with('/') {
        format!("{base}{href}")
    } else {
        format!("{base}/{href}")
    };
    normalize_path(&joined)
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    let mut normalized = parts.join("/");
    if path.starts_with('/') {
        normalized.insert(0, '/');
    }
    let directory = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if directory && !parts.is_empty() {
        normalized.push('/');
    }
    normalized
}
