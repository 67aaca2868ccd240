use super::{
    Category, ComponentHandle, ComponentRegistry, ComponentSelector, PipelineFactory, PipelineHandle,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use trellis_traits::{
    Action, ComponentError, Generator, InputModule, Matcher, Reader, Selector, Serializer,
    Transformer,
};

/// Longest alias chain followed before giving up.
const MAX_ALIAS_DEPTH: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HintError {
    #[error("no default {0} is declared")]
    NoDefault(Category),

    #[error("unknown {category} '{hint}'")]
    Unknown { category: Category, hint: String },
}

#[derive(Debug, Default, Clone)]
struct CategoryDeclarations {
    default: Option<String>,
    aliases: HashMap<String, String>,
}

/// Default hints and aliases declared by one sitemap's `<map:components>`.
#[derive(Debug, Default, Clone)]
pub struct ComponentDeclarations {
    categories: HashMap<Category, CategoryDeclarations>,
}

impl ComponentDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, category: Category, hint: impl Into<String>) -> &mut Self {
        self.categories.entry(category).or_default().default = Some(hint.into());
        self
    }

    /// Makes `name` refer to the component registered (or aliased) as `target`.
    pub fn add_alias(
        &mut self,
        category: Category,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> &mut Self {
        self.categories
            .entry(category)
            .or_default()
            .aliases
            .insert(name.into(), target.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    fn default_for(&self, category: Category) -> Option<&str> {
        self.categories.get(&category)?.default.as_deref()
    }

    fn alias_for(&self, category: Category, name: &str) -> Option<&str> {
        self.categories
            .get(&category)?
            .aliases
            .get(name)
            .map(String::as_str)
    }
}

/// The components visible at one sitemap level.
///
/// A child sitemap's manager sees its own declarations first and falls back
/// to its parent's, all the way up to the processor's registry. Disposing a
/// manager makes further lookups through it fail; handles already out stay
/// valid until dropped.
#[derive(Debug)]
pub struct ComponentManager {
    registry: Arc<ComponentRegistry>,
    parent: Option<Arc<ComponentManager>>,
    declarations: ComponentDeclarations,
    disposed: AtomicBool,
}

impl ComponentManager {
    pub fn root(registry: Arc<ComponentRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            parent: None,
            declarations: ComponentDeclarations::default(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn child(parent: &Arc<Self>, declarations: ComponentDeclarations) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::clone(&parent.registry),
            parent: Some(Arc::clone(parent)),
            declarations,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn parent(&self) -> Option<&Arc<ComponentManager>> {
        self.parent.as_ref()
    }

    /// Number of managers between this one and the root.
    pub fn depth(&self) -> usize {
        self.ancestry().count() - 1
    }

    fn ancestry(&self) -> impl Iterator<Item = &ComponentManager> {
        std::iter::successors(Some(self), |m| m.parent.as_deref())
    }

    /// Turns the `type` attribute of an element (or its absence) into a
    /// registered hint.
    pub fn resolve_hint(&self, category: Category, hint: Option<&str>) -> Result<String, HintError> {
        let requested = match hint {
            Some(hint) => hint.to_string(),
            None => self
                .ancestry()
                .find_map(|m| m.declarations.default_for(category))
                .or_else(|| self.registry.default_hint(category))
                .ok_or(HintError::NoDefault(category))?
                .to_string(),
        };

        let mut resolved = requested.clone();
        for _ in 0..MAX_ALIAS_DEPTH {
            if self.registry.contains(category, &resolved) {
                return Ok(resolved);
            }
            match self
                .ancestry()
                .find_map(|m| m.declarations.alias_for(category, &resolved))
            {
                Some(target) if target != resolved => resolved = target.to_string(),
                _ => break,
            }
        }
        Err(HintError::Unknown {
            category,
            hint: requested,
        })
    }

    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::debug!("Disposed component manager at depth {}", self.depth());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn live(&self) -> Result<&ComponentRegistry, ComponentError> {
        if self.is_disposed() {
            Err(ComponentError::Disposed)
        } else {
            Ok(&self.registry)
        }
    }

    pub fn generators(&self) -> Result<&ComponentSelector<dyn Generator>, ComponentError> {
        Ok(self.live()?.generators())
    }

    pub fn transformers(&self) -> Result<&ComponentSelector<dyn Transformer>, ComponentError> {
        Ok(self.live()?.transformers())
    }

    pub fn serializers(&self) -> Result<&ComponentSelector<dyn Serializer>, ComponentError> {
        Ok(self.live()?.serializers())
    }

    pub fn readers(&self) -> Result<&ComponentSelector<dyn Reader>, ComponentError> {
        Ok(self.live()?.readers())
    }

    pub fn matchers(&self) -> Result<&ComponentSelector<dyn Matcher>, ComponentError> {
        Ok(self.live()?.matchers())
    }

    pub fn selectors(&self) -> Result<&ComponentSelector<dyn Selector>, ComponentError> {
        Ok(self.live()?.selectors())
    }

    pub fn actions(&self) -> Result<&ComponentSelector<dyn Action>, ComponentError> {
        Ok(self.live()?.actions())
    }

    pub fn pipes(&self) -> Result<&ComponentSelector<dyn PipelineFactory>, ComponentError> {
        Ok(self.live()?.pipes())
    }

    /// Looks up an input module by name or alias.
    pub fn input_module(&self, name: &str) -> Result<ComponentHandle<dyn InputModule>, ComponentError> {
        let hint = self
            .resolve_hint(Category::InputModule, Some(name))
            .map_err(|_| ComponentError::unavailable(Category::InputModule.role(), name))?;
        self.live()?.input_modules().select(&hint)
    }

    /// Creates a pipeline of the given type. The pipeline goes back to its
    /// factory when the handle is dropped.
    pub fn pipeline(self: &Arc<Self>, hint: &str) -> Result<PipelineHandle, ComponentError> {
        let factory = self.pipes()?.select(hint)?;
        let pipeline = factory.create(Arc::clone(self));
        Ok(PipelineHandle::new(hint, pipeline, factory))
    }
}
