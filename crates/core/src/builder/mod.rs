//! Turns a sitemap document into a tree of processing nodes.
//!
//! Building happens in two passes. The first walks the configuration
//! top-down, creating one node per element and registering named nodes
//! (resources). The second lets builders that asked for it resolve
//! references to registered nodes, so a `<call>` may name a resource
//! declared after it. Nodes that need it are then initialized in the order
//! they were set up.

mod language;
mod parent;

pub use language::{BuilderFactory, Language, NodeSpec};
pub use parent::{BuiltChildren, ParentNodeBuilder};

use crate::components::{Category, ComponentManager, HintError};
use crate::configuration::{Configuration, Location};
use crate::error::{BuildError, ConfigurationError};
use crate::node::NodeRef;
use crate::processor::ProcessorShared;
use crate::variables::VariableResolver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Compiles one element into a processing node.
pub trait ProcessingNodeBuilder {
    /// First pass. Builders of container elements build their children
    /// through `tree`.
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError>;

    /// Whether this builder takes part in the linking pass.
    fn is_linked(&self) -> bool {
        false
    }

    /// Second pass, run once every node exists and is registered.
    fn link_node(&mut self, _tree: &TreeBuilder) -> Result<(), BuildError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Building,
    Linking,
    Initializing,
}

/// One element of the built tree, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub element: String,
    pub depth: usize,
    pub location: Location,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuiltTree {
    pub root: NodeRef,
    pub components: Arc<ComponentManager>,
    pub disposables: Vec<NodeRef>,
    pub outline: Vec<OutlineEntry>,
    pub last_modified: Option<SystemTime>,
}

/// Build state shared by all node builders of one sitemap.
pub struct TreeBuilder {
    shared: Arc<ProcessorShared>,
    components: Arc<ComponentManager>,
    uri: String,
    phase: BuildPhase,
    depth: usize,
    registered: HashMap<String, NodeRef>,
    linked: Vec<Box<dyn ProcessingNodeBuilder>>,
    to_initialize: Vec<NodeRef>,
    to_dispose: Vec<NodeRef>,
    outline: Vec<OutlineEntry>,
}

impl TreeBuilder {
    /// `components` is the manager of the enclosing level; a sitemap's own
    /// `<components>` section installs a child of it.
    pub fn new(shared: Arc<ProcessorShared>, components: Arc<ComponentManager>) -> Self {
        Self {
            shared,
            components,
            uri: String::new(),
            phase: BuildPhase::Building,
            depth: 0,
            registered: HashMap::new(),
            linked: Vec::new(),
            to_initialize: Vec::new(),
            to_dispose: Vec::new(),
            outline: Vec::new(),
        }
    }

    pub fn shared(&self) -> &Arc<ProcessorShared> {
        &self.shared
    }

    pub fn language(&self) -> &Language {
        &self.shared.language
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// URI of the sitemap being built.
    pub fn source_uri(&self) -> &str {
        &self.uri
    }

    pub fn component_manager(&self) -> &Arc<ComponentManager> {
        &self.components
    }

    pub fn set_component_manager(&mut self, components: Arc<ComponentManager>) {
        self.components = components;
    }

    /// Loads and builds the sitemap at `uri`.
    pub fn build(mut self, uri: &str) -> Result<BuiltTree, BuildError> {
        self.uri = uri.to_string();
        let provider = Arc::clone(&self.shared.provider);
        let last_modified = provider.last_modified(uri);
        let data = provider.load(uri).map_err(|source| BuildError::Resource {
            uri: uri.to_string(),
            source,
        })?;
        let source = std::str::from_utf8(&data)
            .map_err(|e| BuildError::xml(uri, format!("sitemap is not valid UTF-8: {e}")))?;
        let config = Configuration::parse(source, uri)?;

        let mut tree = self.build_configuration(&config)?;
        tree.last_modified = last_modified;
        Ok(tree)
    }

    /// Builds an already parsed sitemap.
    pub fn build_configuration(mut self, config: &Configuration) -> Result<BuiltTree, BuildError> {
        if self.uri.is_empty() {
            self.uri = config.location().uri().to_string();
        }

        let root = self
            .build_node(config)
            .map_err(|e| e.wrap(config.name(), config.location()))?;

        self.phase = BuildPhase::Linking;
        let mut linked = std::mem::take(&mut self.linked);
        for builder in linked.iter_mut() {
            builder.link_node(&self)?;
        }

        self.phase = BuildPhase::Initializing;
        for node in &self.to_initialize {
            node.initialize()
                .map_err(|e| e.wrap("initialize", node.location()))?;
        }

        log::debug!(
            "Built {} nodes from '{}' ({} registered)",
            self.outline.len(),
            self.uri,
            self.registered.len()
        );

        Ok(BuiltTree {
            root,
            components: self.components,
            disposables: self.to_dispose,
            outline: self.outline,
            last_modified: None,
        })
    }

    /// Looks up the builder for an element, checking its namespace first.
    pub fn create_node_builder(
        &self,
        config: &Configuration,
    ) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        let language = self.language();
        if config.namespace() != language.namespace() {
            return Err(ConfigurationError::InvalidNamespace {
                element: config.name().to_string(),
                namespace: config.namespace().to_string(),
                expected: language.namespace().to_string(),
                location: config.location().clone(),
            }
            .into());
        }

        let spec = language.node(config.local_name()).ok_or_else(|| {
            ConfigurationError::UnknownElement {
                element: config.name().to_string(),
                location: config.location().clone(),
            }
        })?;
        let factory = language.builder_factory(spec.builder()).ok_or_else(|| {
            ConfigurationError::UnknownBuilder {
                builder: spec.builder().to_string(),
                element: config.name().to_string(),
            }
        })?;
        factory(spec)
    }

    /// Builds one element and everything beneath it.
    pub fn build_node(&mut self, config: &Configuration) -> Result<NodeRef, BuildError> {
        let mut builder = self.create_node_builder(config)?;
        self.outline.push(OutlineEntry {
            element: config.local_name().to_string(),
            depth: self.depth,
            location: config.location().clone(),
        });

        self.depth += 1;
        let built = builder.build_node(config, self);
        self.depth -= 1;
        let node = built?;

        if builder.is_linked() {
            self.linked.push(builder);
        }
        Ok(node)
    }

    /// Records a freshly built node for initialization and disposal.
    /// Builders call this on every node they create, after building its
    /// children, so both lists hold children before their parents.
    /// Initialization runs in that order; disposal runs in reverse.
    pub fn setup_node(&mut self, node: NodeRef) -> NodeRef {
        if node.requires_initialize() {
            self.to_initialize.push(Arc::clone(&node));
        }
        if node.requires_dispose() {
            self.to_dispose.push(Arc::clone(&node));
        }
        node
    }

    pub fn register_node(
        &mut self,
        name: &str,
        node: NodeRef,
        location: &Location,
    ) -> Result<(), BuildError> {
        if self.registered.contains_key(name) {
            return Err(ConfigurationError::Duplicate {
                kind: "node".to_string(),
                name: name.to_string(),
                location: location.clone(),
            }
            .into());
        }
        self.registered.insert(name.to_string(), node);
        Ok(())
    }

    /// A registered node. Only available from the linking pass on, since
    /// the registry is incomplete while elements are still being built.
    pub fn registered_node(&self, name: &str, location: &Location) -> Result<NodeRef, BuildError> {
        if self.phase == BuildPhase::Building {
            return Err(BuildError::RegistryNotReady {
                name: name.to_string(),
            });
        }
        self.registered.get(name).cloned().ok_or_else(|| {
            ConfigurationError::UnresolvedReference {
                kind: "node".to_string(),
                name: name.to_string(),
                location: location.clone(),
            }
            .into()
        })
    }

    /// The hint named by the element's `type` attribute, or the default
    /// for the category.
    pub fn resolve_hint(&self, category: Category, config: &Configuration) -> Result<String, BuildError> {
        self.components
            .resolve_hint(category, config.attribute("type"))
            .map_err(|e| {
                match e {
                    HintError::NoDefault(category) => ConfigurationError::MissingDefault {
                        category: category.to_string(),
                        element: config.name().to_string(),
                        location: config.location().clone(),
                    },
                    HintError::Unknown { category, hint } => ConfigurationError::UnknownComponent {
                        category: category.to_string(),
                        hint,
                        location: config.location().clone(),
                    },
                }
                .into()
            })
    }

    /// Compiles an optional attribute as a variable expression.
    pub fn expression(
        &self,
        config: &Configuration,
        attribute: &str,
    ) -> Result<Option<VariableResolver>, BuildError> {
        config
            .attribute(attribute)
            .map(|value| {
                VariableResolver::new(value).map_err(|e| e.at(value, config.location()))
            })
            .transpose()
    }

    pub fn required_expression(
        &self,
        config: &Configuration,
        attribute: &str,
    ) -> Result<VariableResolver, BuildError> {
        let value = config.required_attribute(attribute)?;
        VariableResolver::new(value).map_err(|e| e.at(value, config.location()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentRegistry;
    use crate::node::node_ref;
    use crate::nodes::{MountNode, PipelinesNode};
    use trellis_traits::InMemoryResourceProvider;

    const NS: &str = "http://apache.org/cocoon/sitemap/1.0";

    fn builder_with(files: &[(&str, &str)]) -> TreeBuilder {
        let provider = Arc::new(InMemoryResourceProvider::new());
        for (path, data) in files {
            provider.add(*path, *data).unwrap();
        }
        let shared = Arc::new(ProcessorShared::new(provider).unwrap());
        let components = ComponentManager::root(Arc::clone(&shared.registry));
        TreeBuilder::new(shared, components)
    }

    fn sitemap(body: &str) -> String {
        format!(r#"<map:sitemap xmlns:map="{NS}">{body}</map:sitemap>"#)
    }

    #[test]
    fn test_builds_outline_in_document_order() {
        let xml = sitemap(
            r#"<map:pipelines><map:pipeline>
                <map:match pattern="a"><map:read src="a.txt"/></map:match>
            </map:pipeline></map:pipelines>"#,
        );
        let tree = builder_with(&[("sitemap.xmap", &xml)]).build("sitemap.xmap").unwrap();
        let elements: Vec<(&str, usize)> = tree
            .outline
            .iter()
            .map(|e| (e.element.as_str(), e.depth))
            .collect();
        assert_eq!(
            elements,
            vec![("sitemap", 0), ("pipelines", 1), ("pipeline", 2), ("match", 3), ("read", 4)]
        );
        assert!(node_ref::<PipelinesNode>(&tree.root).is_some());
    }

    #[test]
    fn test_setup_lists_children_before_parents() {
        let xml = sitemap(
            r#"<map:pipelines><map:pipeline>
                <map:match pattern="sub/**"><map:mount uri-prefix="sub/" src="sub/"/></map:match>
            </map:pipeline></map:pipelines>"#,
        );
        let tree = builder_with(&[("sitemap.xmap", &xml)]).build("sitemap.xmap").unwrap();
        assert_eq!(tree.disposables.len(), 2);
        assert!(node_ref::<MountNode>(&tree.disposables[0]).is_some());
        assert!(Arc::ptr_eq(&tree.disposables[1], &tree.root));
    }

    #[test]
    fn test_foreign_namespace_and_unknown_element() {
        let foreign = r#"<sitemap xmlns="urn:other"/>"#;
        let err = builder_with(&[("s.xmap", foreign)]).build("s.xmap").unwrap_err();
        assert!(matches!(
            err,
            BuildError::Configuration(ConfigurationError::InvalidNamespace { .. })
        ));

        let unknown = sitemap("<map:pipelines><map:pipeline><map:bogus/></map:pipeline></map:pipelines>");
        let err = builder_with(&[("s.xmap", &unknown)]).build("s.xmap").unwrap_err();
        match err {
            BuildError::Configuration(ConfigurationError::UnknownElement { element, .. }) => {
                assert_eq!(element, "map:bogus")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_sitemap_is_resource_error() {
        let err = builder_with(&[]).build("missing.xmap").unwrap_err();
        assert!(matches!(err, BuildError::Resource { .. }));
    }

    #[test]
    fn test_registry_not_ready_during_first_pass() {
        let mut tree = builder_with(&[]);
        let location = Location::new("s.xmap", 1, 1);
        assert!(matches!(
            tree.registered_node("resource:x", &location),
            Err(BuildError::RegistryNotReady { .. })
        ));

        tree.phase = BuildPhase::Linking;
        assert!(matches!(
            tree.registered_node("resource:x", &location),
            Err(BuildError::Configuration(ConfigurationError::UnresolvedReference { .. }))
        ));
    }

    #[test]
    fn test_resolve_hint_errors_carry_location() {
        let tree = builder_with(&[]);
        let config = Configuration::parse(
            &format!(r#"<map:generate xmlns:map="{NS}" type="nope"/>"#),
            "s.xmap",
        )
        .unwrap();
        let err = tree.resolve_hint(Category::Generator, &config).unwrap_err();
        match err {
            BuildError::Configuration(ConfigurationError::UnknownComponent { hint, location, .. }) => {
                assert_eq!(hint, "nope");
                assert_eq!(location.line(), 1);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let config = Configuration::parse(&format!(r#"<map:generate xmlns:map="{NS}"/>"#), "s.xmap").unwrap();
        assert_eq!(tree.resolve_hint(Category::Generator, &config).unwrap(), "file");
    }
}
