// src/builder.rs
use crate::dispatch::Dispatcher;
use crate::error::TrellisError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trellis_core::{ComponentRegistry, DEFAULT_SITEMAP, Language, ProcessorShared, TreeProcessor};
use trellis_executor::ExecutorImpl;
use trellis_resource::FilesystemResourceProvider;
use trellis_traits::ResourceProvider;

/// A builder for creating a [`Dispatcher`] around a sitemap.
pub struct ProcessorBuilder {
    sitemap: Option<PathBuf>,
    provider: Option<Arc<dyn ResourceProvider>>,
    registry: Option<ComponentRegistry>,
    language: Option<Language>,
    check_reload: bool,
    executor: ExecutorImpl,
    eager: bool,
}

impl Default for ProcessorBuilder {
    fn default() -> Self {
        Self {
            sitemap: None,
            provider: None,
            registry: None,
            language: None,
            check_reload: true,
            executor: ExecutorImpl::default(),
            eager: true,
        }
    }
}

impl ProcessorBuilder {
    /// Creates a new `ProcessorBuilder` with the built-in components and
    /// reload checking on.
    pub fn new() -> Self {
        Default::default()
    }

    /// The sitemap to serve.
    ///
    /// Without an explicit provider this is a filesystem path: its directory
    /// becomes the site root, and a directory path means the
    /// `sitemap.xmap` inside it. With a provider it is a URI within that
    /// provider.
    pub fn with_sitemap<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sitemap = Some(path.as_ref().to_path_buf());
        self
    }

    /// Loads sitemaps and content through `provider` instead of the filesystem.
    pub fn with_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replaces the built-in components.
    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the sitemap language, e.g. one with extra builders registered.
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    /// Whether the tree is rebuilt when the sitemap source changes.
    pub fn with_check_reload(mut self, check_reload: bool) -> Self {
        self.check_reload = check_reload;
        self
    }

    /// Selects how request batches are dispatched.
    pub fn with_executor(mut self, executor: ExecutorImpl) -> Self {
        self.executor = executor;
        self
    }

    /// Whether `build` compiles the sitemap right away, so configuration
    /// errors surface before the first request. On by default.
    pub fn with_eager_build(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Consumes the builder and creates the `Dispatcher`.
    pub fn build(self) -> Result<Dispatcher, TrellisError> {
        let sitemap = self.sitemap.ok_or_else(|| {
            TrellisError::Config("No sitemap has been configured. Use `with_sitemap`.".to_string())
        })?;

        let (provider, source) = match self.provider {
            Some(provider) => (provider, uri_of(&sitemap)?),
            None => filesystem_site(&sitemap)?,
        };

        let registry = match self.registry {
            Some(registry) => registry,
            None => ComponentRegistry::with_defaults(Arc::clone(&provider)),
        };
        let language = match self.language {
            Some(language) => language,
            None => Language::sitemap()?,
        };

        let shared = Arc::new(ProcessorShared::with_parts(
            provider,
            Arc::new(registry),
            Arc::new(language),
        ));
        let processor =
            TreeProcessor::with_shared(shared, &source).with_check_reload(self.check_reload);

        if self.eager {
            let tree = processor.tree()?;
            log::info!("Sitemap '{source}' ready with {} nodes", tree.node_count());
        }
        log::debug!("Dispatching with {}", trellis_traits::Executor::name(&self.executor));

        Ok(Dispatcher::new(Arc::new(processor), self.executor))
    }
}

fn uri_of(path: &Path) -> Result<String, TrellisError> {
    path.to_str()
        .map(|s| s.replace('\\', "/"))
        .ok_or_else(|| TrellisError::Config(format!("Sitemap path '{}' is not valid UTF-8", path.display())))
}

/// A filesystem provider rooted at the sitemap's directory, and the
/// sitemap's URI below it.
fn filesystem_site(path: &Path) -> Result<(Arc<dyn ResourceProvider>, String), TrellisError> {
    let (root, file) = if path.is_dir() {
        (path.to_path_buf(), DEFAULT_SITEMAP.to_string())
    } else {
        let root = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let file = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| TrellisError::Config(format!("'{}' does not name a sitemap file", path.display())))?
            .to_string();
        (root, file)
    };

    if !root.join(&file).is_file() {
        return Err(TrellisError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Sitemap '{}' not found", root.join(&file).display()),
        )));
    }
    log::debug!("Serving site root '{}'", root.display());
    Ok((Arc::new(FilesystemResourceProvider::new(root)), file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_traits::InMemoryResourceProvider;

    const SITEMAP: &str = r#"<map:sitemap xmlns:map="http://apache.org/cocoon/sitemap/1.0">
        <map:pipelines><map:pipeline>
          <map:match pattern="*"><map:read src="{1}.txt"/></map:match>
        </map:pipeline></map:pipelines>
      </map:sitemap>"#;

    #[test]
    fn test_missing_sitemap_is_config_error() {
        assert!(matches!(ProcessorBuilder::new().build(), Err(TrellisError::Config(_))));
    }

    #[test]
    fn test_build_with_provider() {
        let provider = InMemoryResourceProvider::new();
        provider.add("site/sitemap.xmap", SITEMAP).unwrap();
        let dispatcher = ProcessorBuilder::new()
            .with_provider(Arc::new(provider))
            .with_sitemap("site/sitemap.xmap")
            .build()
            .unwrap();
        assert_eq!(dispatcher.processor().context_dir(), "site/");
    }

    #[test]
    fn test_eager_build_surfaces_errors() {
        let provider = InMemoryResourceProvider::new();
        provider.add("sitemap.xmap", "<map:sitemap/>").unwrap();
        let result = ProcessorBuilder::new()
            .with_provider(Arc::new(provider))
            .with_sitemap("sitemap.xmap")
            .build();
        assert!(matches!(result, Err(TrellisError::Processing(_))));
    }

    #[test]
    fn test_lazy_build_defers_errors() {
        let provider = InMemoryResourceProvider::new();
        provider.add("sitemap.xmap", "<map:sitemap/>").unwrap();
        let result = ProcessorBuilder::new()
            .with_provider(Arc::new(provider))
            .with_sitemap("sitemap.xmap")
            .with_eager_build(false)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_filesystem_site_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sitemap.xmap"), SITEMAP).unwrap();
        let dispatcher = ProcessorBuilder::new().with_sitemap(dir.path()).build().unwrap();
        assert_eq!(dispatcher.processor().source(), "sitemap.xmap");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessorBuilder::new()
            .with_sitemap(dir.path().join("nope.xmap"))
            .build();
        assert!(matches!(result, Err(TrellisError::Io(_))));
    }
}
