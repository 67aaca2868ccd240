use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use trellis::traits::{
    ComponentError, Environment, Matcher, Parameters, ResourceError, ResourceProvider,
    SharedResourceData,
};

/// Matches when the request URI equals the pattern, and records every
/// pattern it is asked about. The result map holds the pattern as `id`.
#[derive(Debug, Default, Clone)]
pub struct RecordingMatcher {
    tried: Arc<Mutex<Vec<String>>>,
}

impl RecordingMatcher {
    pub fn tried(&self) -> Vec<String> {
        self.tried.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut tried) = self.tried.lock() {
            tried.clear();
        }
    }
}

impl Matcher for RecordingMatcher {
    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        if let Ok(mut tried) = self.tried.lock() {
            tried.push(pattern.to_string());
        }
        if pattern == "explode" {
            return Err(ComponentError::execution("injected matcher failure"));
        }
        Ok((env.addressing().uri == pattern)
            .then(|| Parameters::from([("id".to_string(), pattern.to_string())])))
    }
}

/// Delegates to another provider and counts loads per path.
#[derive(Debug)]
pub struct CountingProvider<P> {
    inner: P,
    watched: String,
    loads: AtomicUsize,
}

impl<P: ResourceProvider> CountingProvider<P> {
    pub fn new(inner: P, watched: &str) -> Self {
        Self {
            inner,
            watched: watched.to_string(),
            loads: AtomicUsize::new(0),
        }
    }

    /// How often the watched path was loaded.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl<P: ResourceProvider> ResourceProvider for CountingProvider<P> {
    fn load(&self, path: &str) -> Result<SharedResourceData, ResourceError> {
        if path == self.watched {
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Widen the window in which concurrent first requests overlap.
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        self.inner.load(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    fn last_modified(&self, path: &str) -> Option<SystemTime> {
        self.inner.last_modified(path)
    }

    fn name(&self) -> &'static str {
        "CountingProvider"
    }
}
