//! Component registry, scoped handles and the built-in components.
//!
//! Components are registered under a hint per [`Category`] with one of two
//! lifestyles:
//!
//! - **thread-safe**: one shared instance serves every request
//! - **pooled**: instances come from a factory and are recycled through an
//!   idle pool; each one is used by a single request at a time
//!
//! Every lookup hands out a [`ComponentHandle`] that gives the instance back
//! when dropped, so release happens on every exit path.

mod manager;
mod matchers;
mod modules;
mod pipeline;
mod selectors;
mod stages;

pub use manager::{ComponentDeclarations, ComponentManager, HintError};
pub use matchers::{RegexpMatcher, RequestParameterMatcher, WildcardMatcher};
pub use modules::{RequestAttributeModule, RequestParamModule};
pub use pipeline::{NonCachingPipelineFactory, PipelineFactory, PipelineHandle, StagedPipeline};
pub use selectors::{ParameterSelector, RequestParamAction, RequestParameterSelector};
pub use stages::{FileGenerator, IdentityTransformer, ResourceReader, TextSerializer};

use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trellis_traits::{
    Action, ComponentError, Generator, InputModule, Matcher, Reader, ResourceProvider, Selector,
    Serializer, Transformer,
};

/// Idle instances kept per pooled hint.
const DEFAULT_POOL_SIZE: usize = 16;

/// The kinds of component a sitemap can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Generator,
    Transformer,
    Serializer,
    Reader,
    Matcher,
    Selector,
    Action,
    Pipe,
    InputModule,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Generator,
        Category::Transformer,
        Category::Serializer,
        Category::Reader,
        Category::Matcher,
        Category::Selector,
        Category::Action,
        Category::Pipe,
        Category::InputModule,
    ];

    /// Singular name, as used in error messages and in `<map:components>`
    /// declarations (`<map:matcher name=.. src=..>`).
    pub fn role(self) -> &'static str {
        match self {
            Category::Generator => "generator",
            Category::Transformer => "transformer",
            Category::Serializer => "serializer",
            Category::Reader => "reader",
            Category::Matcher => "matcher",
            Category::Selector => "selector",
            Category::Action => "action",
            Category::Pipe => "pipe",
            Category::InputModule => "input-module",
        }
    }

    /// Name of the grouping element inside `<map:components>`.
    pub fn element(self) -> &'static str {
        match self {
            Category::Generator => "generators",
            Category::Transformer => "transformers",
            Category::Serializer => "serializers",
            Category::Reader => "readers",
            Category::Matcher => "matchers",
            Category::Selector => "selectors",
            Category::Action => "actions",
            Category::Pipe => "pipes",
            Category::InputModule => "input-modules",
        }
    }

    pub fn from_element(element: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.element() == element)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifestyle {
    ThreadSafe,
    Pooled,
}

/// Counters for one registered hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentStats {
    /// Instances ever created (1 for thread-safe components).
    pub created: usize,
    /// Handles currently out.
    pub active: usize,
    /// Pooled instances waiting for reuse.
    pub idle: usize,
}

type Factory<T> = Box<dyn Fn() -> Arc<T> + Send + Sync>;

enum Provision<T: ?Sized + 'static> {
    Shared(Arc<T>),
    Pooled {
        factory: Factory<T>,
        idle: Mutex<Vec<Arc<T>>>,
        max_idle: usize,
    },
}

struct ComponentEntry<T: ?Sized + 'static> {
    role: &'static str,
    hint: String,
    provision: Provision<T>,
    created: AtomicUsize,
    active: AtomicUsize,
}

impl<T: ?Sized + 'static> ComponentEntry<T> {
    fn acquire(&self) -> Result<Arc<T>, ComponentError> {
        let component = match &self.provision {
            Provision::Shared(component) => Arc::clone(component),
            Provision::Pooled { factory, idle, .. } => {
                let recycled = idle
                    .lock()
                    .map_err(|_| {
                        ComponentError::execution(format!(
                            "pool of {} '{}' is poisoned",
                            self.role, self.hint
                        ))
                    })?
                    .pop();
                match recycled {
                    Some(component) => component,
                    None => {
                        self.created.fetch_add(1, Ordering::SeqCst);
                        factory()
                    }
                }
            }
        };
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(component)
    }

    fn release(&self, component: Arc<T>) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if let Provision::Pooled { idle, max_idle, .. } = &self.provision {
            match idle.lock() {
                Ok(mut idle) if idle.len() < *max_idle => idle.push(component),
                Ok(_) => {}
                Err(_) => log::warn!(
                    "Dropping {} '{}' instead of pooling it: pool lock poisoned",
                    self.role,
                    self.hint
                ),
            }
        }
    }

    fn lifestyle(&self) -> Lifestyle {
        match self.provision {
            Provision::Shared(_) => Lifestyle::ThreadSafe,
            Provision::Pooled { .. } => Lifestyle::Pooled,
        }
    }

    fn stats(&self) -> ComponentStats {
        let idle = match &self.provision {
            Provision::Shared(_) => 0,
            Provision::Pooled { idle, .. } => idle.lock().map(|i| i.len()).unwrap_or(0),
        };
        ComponentStats {
            created: self.created.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            idle,
        }
    }
}

/// A looked-up component. Dropping the handle releases it.
pub struct ComponentHandle<T: ?Sized + 'static> {
    component: Arc<T>,
    entry: Option<Arc<ComponentEntry<T>>>,
}

impl<T: ?Sized + 'static> ComponentHandle<T> {
    /// Wraps an instance that is not owned by any selector.
    pub fn detached(component: Arc<T>) -> Self {
        Self {
            component,
            entry: None,
        }
    }

    /// The shared instance behind the handle.
    pub fn instance(&self) -> Arc<T> {
        Arc::clone(&self.component)
    }

    pub fn hint(&self) -> Option<&str> {
        self.entry.as_ref().map(|e| e.hint.as_str())
    }
}

impl<T: ?Sized + 'static> Deref for ComponentHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.component
    }
}

impl<T: ?Sized + 'static> Drop for ComponentHandle<T> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            entry.release(Arc::clone(&self.component));
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for ComponentHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("hint", &self.hint())
            .finish()
    }
}

/// All components of one category, keyed by hint.
pub struct ComponentSelector<T: ?Sized + 'static> {
    role: &'static str,
    entries: HashMap<String, Arc<ComponentEntry<T>>>,
    default_hint: Option<String>,
}

impl<T: ?Sized + 'static> ComponentSelector<T> {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            entries: HashMap::new(),
            default_hint: None,
        }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Registers one instance shared by all requests.
    pub fn register_thread_safe(&mut self, hint: impl Into<String>, component: Arc<T>) -> &mut Self {
        let hint = hint.into();
        let entry = ComponentEntry {
            role: self.role,
            hint: hint.clone(),
            provision: Provision::Shared(component),
            created: AtomicUsize::new(1),
            active: AtomicUsize::new(0),
        };
        self.entries.insert(hint, Arc::new(entry));
        self
    }

    /// Registers a factory whose instances are handed to one request at a
    /// time and recycled afterwards.
    pub fn register_pooled<F>(&mut self, hint: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let hint = hint.into();
        let entry = ComponentEntry {
            role: self.role,
            hint: hint.clone(),
            provision: Provision::Pooled {
                factory: Box::new(factory),
                idle: Mutex::new(Vec::new()),
                max_idle: DEFAULT_POOL_SIZE,
            },
            created: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        };
        self.entries.insert(hint, Arc::new(entry));
        self
    }

    pub fn set_default(&mut self, hint: impl Into<String>) -> &mut Self {
        self.default_hint = Some(hint.into());
        self
    }

    pub fn default_hint(&self) -> Option<&str> {
        self.default_hint.as_deref()
    }

    pub fn contains(&self, hint: &str) -> bool {
        self.entries.contains_key(hint)
    }

    pub fn lifestyle(&self, hint: &str) -> Option<Lifestyle> {
        self.entries.get(hint).map(|e| e.lifestyle())
    }

    /// Registered hints in alphabetical order.
    pub fn hints(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).sorted().collect()
    }

    pub fn select(&self, hint: &str) -> Result<ComponentHandle<T>, ComponentError> {
        let entry = self
            .entries
            .get(hint)
            .ok_or_else(|| ComponentError::unavailable(self.role, hint))?;
        let component = entry.acquire()?;
        Ok(ComponentHandle {
            component,
            entry: Some(Arc::clone(entry)),
        })
    }

    pub fn stats(&self, hint: &str) -> Option<ComponentStats> {
        self.entries.get(hint).map(|e| e.stats())
    }
}

impl<T: ?Sized + 'static> fmt::Debug for ComponentSelector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSelector")
            .field("role", &self.role)
            .field("hints", &self.hints())
            .field("default", &self.default_hint)
            .finish()
    }
}

/// How a node holds on to the component it was built with.
///
/// Thread-safe components are looked up once at build time and kept for
/// the node's lifetime; pooled ones are remembered by hint and acquired
/// per invocation.
pub enum ComponentSlot<T: ?Sized + 'static> {
    Shared(Arc<T>),
    Pooled(String),
}

impl<T: ?Sized + 'static> ComponentSlot<T> {
    pub fn for_hint(selector: &ComponentSelector<T>, hint: &str) -> Result<Self, ComponentError> {
        match selector.lifestyle(hint) {
            Some(Lifestyle::ThreadSafe) => Ok(Self::Shared(selector.select(hint)?.instance())),
            Some(Lifestyle::Pooled) => Ok(Self::Pooled(hint.to_string())),
            None => Err(ComponentError::unavailable(selector.role(), hint)),
        }
    }

    pub fn acquire(&self, selector: &ComponentSelector<T>) -> Result<ComponentHandle<T>, ComponentError> {
        match self {
            Self::Shared(component) => Ok(ComponentHandle::detached(Arc::clone(component))),
            Self::Pooled(hint) => selector.select(hint),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

impl<T: ?Sized + 'static> fmt::Debug for ComponentSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("Shared"),
            Self::Pooled(hint) => write!(f, "Pooled({hint})"),
        }
    }
}

/// Every component known to a processor, by category.
#[derive(Debug)]
pub struct ComponentRegistry {
    generators: ComponentSelector<dyn Generator>,
    transformers: ComponentSelector<dyn Transformer>,
    serializers: ComponentSelector<dyn Serializer>,
    readers: ComponentSelector<dyn Reader>,
    matchers: ComponentSelector<dyn Matcher>,
    selectors: ComponentSelector<dyn Selector>,
    actions: ComponentSelector<dyn Action>,
    pipes: ComponentSelector<dyn PipelineFactory>,
    input_modules: ComponentSelector<dyn InputModule>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            generators: ComponentSelector::new(Category::Generator.role()),
            transformers: ComponentSelector::new(Category::Transformer.role()),
            serializers: ComponentSelector::new(Category::Serializer.role()),
            readers: ComponentSelector::new(Category::Reader.role()),
            matchers: ComponentSelector::new(Category::Matcher.role()),
            selectors: ComponentSelector::new(Category::Selector.role()),
            actions: ComponentSelector::new(Category::Action.role()),
            pipes: ComponentSelector::new(Category::Pipe.role()),
            input_modules: ComponentSelector::new(Category::InputModule.role()),
        }
    }

    /// A registry holding the built-in components, with generators and
    /// readers loading through `provider`.
    pub fn with_defaults(provider: Arc<dyn ResourceProvider>) -> Self {
        let mut registry = Self::new();

        registry
            .matchers
            .register_thread_safe("wildcard", Arc::new(WildcardMatcher))
            .register_thread_safe("regexp", Arc::new(RegexpMatcher))
            .register_pooled("request-parameter", || -> Arc<dyn Matcher> {
                Arc::new(RequestParameterMatcher::default())
            })
            .set_default("wildcard");

        registry
            .selectors
            .register_thread_safe("parameter", Arc::new(ParameterSelector))
            .register_thread_safe("request-parameter", Arc::new(RequestParameterSelector))
            .set_default("parameter");

        registry
            .actions
            .register_thread_safe("request", Arc::new(RequestParamAction))
            .set_default("request");

        registry
            .generators
            .register_thread_safe("file", Arc::new(FileGenerator::new(Arc::clone(&provider))))
            .set_default("file");

        registry
            .transformers
            .register_thread_safe("identity", Arc::new(IdentityTransformer))
            .set_default("identity");

        registry
            .serializers
            .register_thread_safe("xml", Arc::new(TextSerializer::new("text/xml")))
            .register_thread_safe("html", Arc::new(TextSerializer::new("text/html")))
            .register_thread_safe("text", Arc::new(TextSerializer::new("text/plain")))
            .set_default("html");

        registry
            .readers
            .register_thread_safe("resource", Arc::new(ResourceReader::new(provider)))
            .set_default("resource");

        registry
            .pipes
            .register_thread_safe("noncaching", Arc::new(NonCachingPipelineFactory))
            .set_default("noncaching");

        registry
            .input_modules
            .register_thread_safe("request-param", Arc::new(RequestParamModule))
            .register_thread_safe("request-attr", Arc::new(RequestAttributeModule));

        registry
    }

    pub fn generators(&self) -> &ComponentSelector<dyn Generator> {
        &self.generators
    }

    pub fn generators_mut(&mut self) -> &mut ComponentSelector<dyn Generator> {
        &mut self.generators
    }

    pub fn transformers(&self) -> &ComponentSelector<dyn Transformer> {
        &self.transformers
    }

    pub fn transformers_mut(&mut self) -> &mut ComponentSelector<dyn Transformer> {
        &mut self.transformers
    }

    pub fn serializers(&self) -> &ComponentSelector<dyn Serializer> {
        &self.serializers
    }

    pub fn serializers_mut(&mut self) -> &mut ComponentSelector<dyn Serializer> {
        &mut self.serializers
    }

    pub fn readers(&self) -> &ComponentSelector<dyn Reader> {
        &self.readers
    }

    pub fn readers_mut(&mut self) -> &mut ComponentSelector<dyn Reader> {
        &mut self.readers
    }

    pub fn matchers(&self) -> &ComponentSelector<dyn Matcher> {
        &self.matchers
    }

    pub fn matchers_mut(&mut self) -> &mut ComponentSelector<dyn Matcher> {
        &mut self.matchers
    }

    pub fn selectors(&self) -> &ComponentSelector<dyn Selector> {
        &self.selectors
    }

    pub fn selectors_mut(&mut self) -> &mut ComponentSelector<dyn Selector> {
        &mut self.selectors
    }

    pub fn actions(&self) -> &ComponentSelector<dyn Action> {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ComponentSelector<dyn Action> {
        &mut self.actions
    }

    pub fn pipes(&self) -> &ComponentSelector<dyn PipelineFactory> {
        &self.pipes
    }

    pub fn pipes_mut(&mut self) -> &mut ComponentSelector<dyn PipelineFactory> {
        &mut self.pipes
    }

    pub fn input_modules(&self) -> &ComponentSelector<dyn InputModule> {
        &self.input_modules
    }

    pub fn input_modules_mut(&mut self) -> &mut ComponentSelector<dyn InputModule> {
        &mut self.input_modules
    }

    pub fn contains(&self, category: Category, hint: &str) -> bool {
        match category {
            Category::Generator => self.generators.contains(hint),
            Category::Transformer => self.transformers.contains(hint),
            Category::Serializer => self.serializers.contains(hint),
            Category::Reader => self.readers.contains(hint),
            Category::Matcher => self.matchers.contains(hint),
            Category::Selector => self.selectors.contains(hint),
            Category::Action => self.actions.contains(hint),
            Category::Pipe => self.pipes.contains(hint),
            Category::InputModule => self.input_modules.contains(hint),
        }
    }

    pub fn default_hint(&self, category: Category) -> Option<&str> {
        match category {
            Category::Generator => self.generators.default_hint(),
            Category::Transformer => self.transformers.default_hint(),
            Category::Serializer => self.serializers.default_hint(),
            Category::Reader => self.readers.default_hint(),
            Category::Matcher => self.matchers.default_hint(),
            Category::Selector => self.selectors.default_hint(),
            Category::Action => self.actions.default_hint(),
            Category::Pipe => self.pipes.default_hint(),
            Category::InputModule => self.input_modules.default_hint(),
        }
    }
}
