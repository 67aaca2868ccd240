//! The tree processor: owns the processing tree built from one sitemap and
//! dispatches requests through it.

use crate::builder::{Language, OutlineEntry, TreeBuilder};
use crate::components::{ComponentManager, ComponentRegistry, PipelineHandle};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::NodeRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Instant, SystemTime};
use trellis_traits::{Addressing, AddressingScope, Environment, ResourceProvider};

/// Sitemap file looked up when a mount source names a directory.
pub const DEFAULT_SITEMAP: &str = "sitemap.xmap";

/// What every processor of one hierarchy shares: where sources come from,
/// the registered components and the sitemap language.
#[derive(Debug)]
pub struct ProcessorShared {
    pub provider: Arc<dyn ResourceProvider>,
    pub registry: Arc<ComponentRegistry>,
    pub language: Arc<Language>,
}

impl ProcessorShared {
    /// The built-in components and the sitemap language over `provider`.
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Result<Self, BuildError> {
        let registry = Arc::new(ComponentRegistry::with_defaults(Arc::clone(&provider)));
        Ok(Self::with_parts(provider, registry, Arc::new(Language::sitemap()?)))
    }

    pub fn with_parts(
        provider: Arc<dyn ResourceProvider>,
        registry: Arc<ComponentRegistry>,
        language: Arc<Language>,
    ) -> Self {
        Self {
            provider,
            registry,
            language,
        }
    }
}

/// A built sitemap. Requests hold it through an `Arc`, so a tree replaced
/// by a reload stays alive until its last request is done and is disposed
/// on drop.
#[derive(Debug)]
pub struct ProcessingTree {
    root: NodeRef,
    components: Arc<ComponentManager>,
    disposables: Vec<NodeRef>,
    outline: Vec<OutlineEntry>,
    source: String,
    last_modified: Option<SystemTime>,
}

impl ProcessingTree {
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Component manager of the sitemap level this tree was built for.
    pub fn components(&self) -> &Arc<ComponentManager> {
        &self.components
    }

    /// Every element of the sitemap in document order.
    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    pub fn node_count(&self) -> usize {
        self.outline.len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }
}

impl Drop for ProcessingTree {
    fn drop(&mut self) {
        log::debug!("Disposing processing tree of '{}'", self.source);
        for node in self.disposables.iter().rev() {
            node.dispose();
        }
    }
}

/// Dispatches requests through the tree built from one sitemap source.
///
/// The tree is built on the first request and, with reload checking on,
/// rebuilt whenever the source's modification stamp changes. A processor
/// is shared by all threads serving requests.
#[derive(Debug)]
pub struct TreeProcessor {
    shared: Arc<ProcessorShared>,
    source: String,
    context_dir: String,
    parent_components: Arc<ComponentManager>,
    check_reload: bool,
    tree: RwLock<Option<Arc<ProcessingTree>>>,
    building: Mutex<()>,
    disposed: AtomicBool,
}

fn poisoned() -> ProcessingError {
    ProcessingError::internal("processing tree lock poisoned")
}

impl TreeProcessor {
    /// A top-level processor for the sitemap at `source`, with the built-in
    /// components.
    pub fn new(provider: Arc<dyn ResourceProvider>, source: &str) -> Result<Self, BuildError> {
        Ok(Self::with_shared(Arc::new(ProcessorShared::new(provider)?), source))
    }

    pub fn with_shared(shared: Arc<ProcessorShared>, source: &str) -> Self {
        let components = ComponentManager::root(Arc::clone(&shared.registry));
        Self::create(shared, source, components, true)
    }

    /// A processor for a mounted sitemap. Its components inherit from the
    /// mounting level.
    pub(crate) fn child(
        shared: Arc<ProcessorShared>,
        source: &str,
        parent_components: Arc<ComponentManager>,
        check_reload: bool,
    ) -> Self {
        Self::create(shared, source, parent_components, check_reload)
    }

    fn create(
        shared: Arc<ProcessorShared>,
        source: &str,
        parent_components: Arc<ComponentManager>,
        check_reload: bool,
    ) -> Self {
        let context_dir = match source.rfind('/') {
            Some(index) => source[..=index].to_string(),
            None => String::new(),
        };
        Self {
            shared,
            source: source.to_string(),
            context_dir,
            parent_components,
            check_reload,
            tree: RwLock::new(None),
            building: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_check_reload(mut self, check_reload: bool) -> Self {
        self.check_reload = check_reload;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Directory of the sitemap source, with a trailing `/` unless empty.
    /// Relative sources in the sitemap resolve against it.
    pub fn context_dir(&self) -> &str {
        &self.context_dir
    }

    pub fn shared(&self) -> &Arc<ProcessorShared> {
        &self.shared
    }

    fn is_stale(&self, tree: &ProcessingTree) -> bool {
        self.check_reload && self.shared.provider.last_modified(&self.source) != tree.last_modified
    }

    fn current(&self) -> Result<Option<Arc<ProcessingTree>>, ProcessingError> {
        let tree = self.tree.read().map_err(|_| poisoned())?;
        Ok(tree.as_ref().filter(|tree| !self.is_stale(tree)).cloned())
    }

    /// The current tree, building or rebuilding it when needed. Only one
    /// thread builds at a time; the others wait and reuse its result.
    pub fn tree(&self) -> Result<Arc<ProcessingTree>, ProcessingError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ProcessingError::internal(format!(
                "processor for '{}' has been disposed",
                self.source
            )));
        }
        if let Some(tree) = self.current()? {
            return Ok(tree);
        }

        let _building = self.building.lock().map_err(|_| poisoned())?;
        if let Some(tree) = self.current()? {
            return Ok(tree);
        }

        let tree = Arc::new(self.build_tree()?);
        let replaced = self.tree.write().map_err(|_| poisoned())?.replace(Arc::clone(&tree));
        if replaced.is_some() {
            log::info!("Reloaded processing tree of '{}'", self.source);
        }
        Ok(tree)
    }

    fn build_tree(&self) -> Result<ProcessingTree, ProcessingError> {
        log::info!("Building processing tree from '{}'", self.source);
        let start = Instant::now();
        let built = TreeBuilder::new(Arc::clone(&self.shared), Arc::clone(&self.parent_components))
            .build(&self.source)
            .inspect_err(|e| log::error!("Failed to build '{}': {e}", self.source))?;

        log::info!(
            "Built processing tree from '{}' ({} nodes) in {:.2?}",
            self.source,
            built.outline.len(),
            start.elapsed()
        );
        Ok(ProcessingTree {
            root: built.root,
            components: built.components,
            disposables: built.disposables,
            outline: built.outline,
            source: self.source.clone(),
            last_modified: built.last_modified,
        })
    }

    /// The caller's addressing, with relative sources resolved against this
    /// processor's sitemap.
    fn top_level_addressing(&self, env: &dyn Environment) -> Addressing {
        let Addressing { uri, prefix, .. } = env.addressing().clone();
        Addressing {
            uri,
            prefix,
            context: self.context_dir.clone(),
        }
    }

    /// Processes a request in full. `Ok(false)` means no pipeline matched
    /// and nothing was written.
    pub fn process(&self, env: &mut dyn Environment) -> Result<bool, ProcessingError> {
        let addressing = self.top_level_addressing(env);
        let mut scoped = AddressingScope::enter(env, addressing);
        self.process_with(&mut *scoped, false)
    }

    /// Assembles the pipeline for a request without running it.
    pub fn build_pipeline(
        &self,
        env: &mut dyn Environment,
    ) -> Result<Option<PipelineHandle>, ProcessingError> {
        let addressing = self.top_level_addressing(env);
        let mut scoped = AddressingScope::enter(env, addressing);
        self.build_pipeline_with(&mut *scoped, false)
    }

    /// Processes a request under the addressing already installed on `env`.
    pub fn process_with(
        &self,
        env: &mut dyn Environment,
        pass_through: bool,
    ) -> Result<bool, ProcessingError> {
        let tree = self.tree()?;
        let mut context = InvokeContext::new().with_pass_through(pass_through);
        let result = tree.root().invoke(env, &mut context);
        context.dispose();
        result
    }

    /// Builds the pipeline under the addressing already installed on `env`
    /// and hands it to the caller.
    pub fn build_pipeline_with(
        &self,
        env: &mut dyn Environment,
        pass_through: bool,
    ) -> Result<Option<PipelineHandle>, ProcessingError> {
        let tree = self.tree()?;
        let mut context = InvokeContext::for_pipeline_build().with_pass_through(pass_through);
        let result = match tree.root().invoke(env, &mut context) {
            Ok(true) => Ok(context.take_processing_pipeline()),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        context.dispose();
        result
    }

    /// Drops the current tree. In-flight requests finish on the tree they
    /// started with; it is disposed once they are done.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.tree.write() {
            Ok(mut tree) => {
                if tree.take().is_some() {
                    log::debug!("Released processing tree of '{}'", self.source);
                }
            }
            Err(_) => log::warn!("Tree lock of '{}' is poisoned, tree not released", self.source),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;
    use crate::nodes::testing::{pipelines, provider};

    const SITE: &str = r#"<map:pipeline>
        <map:match pattern="*"><map:read src="{1}.txt"/></map:match>
      </map:pipeline>"#;

    #[test]
    fn test_tree_is_built_once() {
        let _ = env_logger::builder().is_test(true).try_init();

        let xml = pipelines(SITE);
        let processor =
            TreeProcessor::new(provider(&[("sitemap.xmap", &xml), ("a.txt", "a")]), "sitemap.xmap").unwrap();
        let first = processor.tree().unwrap();
        let second = processor.tree().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.outline()[0].element, "sitemap");
        assert!(first.node_count() >= 4);
    }

    #[test]
    fn test_context_dir() {
        let shared = Arc::new(ProcessorShared::new(provider(&[])).unwrap());
        assert_eq!(TreeProcessor::with_shared(Arc::clone(&shared), "sitemap.xmap").context_dir(), "");
        assert_eq!(TreeProcessor::with_shared(shared, "site/docs/sitemap.xmap").context_dir(), "site/docs/");
    }

    #[test]
    fn test_sources_resolve_against_sitemap_directory() {
        let xml = pipelines(SITE);
        let processor = TreeProcessor::new(
            provider(&[("site/sitemap.xmap", &xml), ("site/a.txt", "in site")]),
            "site/sitemap.xmap",
        )
        .unwrap();
        let mut env = RequestEnvironment::new("a");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "in site");
        assert_eq!(env.addressing().context, "");
    }

    #[test]
    fn test_reload_on_modification() {
        let provider = provider(&[("sitemap.xmap", &pipelines(SITE)), ("a.txt", "a")]);
        let processor = TreeProcessor::new(provider.clone(), "sitemap.xmap").unwrap();
        let first = processor.tree().unwrap();

        provider.add("sitemap.xmap", pipelines(SITE)).unwrap();
        let second = processor.tree().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_no_reload_when_disabled() {
        let provider = provider(&[("sitemap.xmap", &pipelines(SITE))]);
        let processor = TreeProcessor::new(provider.clone(), "sitemap.xmap")
            .unwrap()
            .with_check_reload(false);
        let first = processor.tree().unwrap();
        provider.add("sitemap.xmap", pipelines(SITE)).unwrap();
        assert!(Arc::ptr_eq(&first, &processor.tree().unwrap()));
    }

    #[test]
    fn test_build_failure_is_retried() {
        let provider = provider(&[("sitemap.xmap", "<broken")]);
        let processor = TreeProcessor::new(provider.clone(), "sitemap.xmap").unwrap();
        assert!(matches!(processor.tree(), Err(ProcessingError::Build(_))));

        provider.add("sitemap.xmap", pipelines(SITE)).unwrap();
        assert!(processor.tree().is_ok());
    }

    #[test]
    fn test_disposed_tree_survives_in_flight_holder() {
        let provider = provider(&[("sitemap.xmap", &pipelines(SITE))]);
        let processor = TreeProcessor::new(provider, "sitemap.xmap").unwrap();
        let tree = processor.tree().unwrap();
        processor.dispose();
        assert!(processor.is_disposed());
        assert!(processor.tree().is_err());
        assert!(!tree.components().is_disposed());
        drop(tree);
    }
}
