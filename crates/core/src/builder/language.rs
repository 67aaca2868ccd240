//! The sitemap language: which elements exist and which builder compiles
//! each of them.
//!
//! The table is data. The built-in one is an embedded `<nodes>` document;
//! custom languages can be parsed from XML and extended with further
//! builder kinds through [`Language::register_builder`].

use super::ProcessingNodeBuilder;
use crate::configuration::{Configuration, SITEMAP_NAMESPACE};
use crate::error::{BuildError, ConfigurationError};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Creates a fresh builder for one element.
pub type BuilderFactory = fn(&NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError>;

const SITEMAP_LANGUAGE: &str = r#"<?xml version="1.0"?>
<language namespace="http://apache.org/cocoon/sitemap/1.0" parameter-element="parameter">
  <nodes>
    <node name="sitemap" builder="sitemap">
      <allowed-children>components, resources, pipelines</allowed-children>
      <ignored-children>views, action-sets, flow</ignored-children>
    </node>

    <node name="pipelines" builder="pipelines">
      <allowed-children>pipeline, handle-errors</allowed-children>
      <ignored-children>component-configurations</ignored-children>
    </node>

    <node name="pipeline" builder="pipeline">
      <forbidden-children>sitemap, components, resources, pipelines, pipeline, resource</forbidden-children>
      <ignored-children>description</ignored-children>
    </node>

    <node name="handle-errors" builder="handle-errors">
      <forbidden-children>
        sitemap, components, resources, pipelines, pipeline, handle-errors, mount, resource
      </forbidden-children>
    </node>

    <node name="resource" builder="resource">
      <forbidden-children>sitemap, components, resources, pipelines, pipeline, handle-errors, resource</forbidden-children>
    </node>

    <node name="match" builder="match">
      <forbidden-children>sitemap, components, resources, pipelines, pipeline, handle-errors, resource</forbidden-children>
      <ignored-children>description</ignored-children>
    </node>

    <node name="select" builder="select">
      <forbidden-children>sitemap, components, resources, pipelines, pipeline, handle-errors, resource</forbidden-children>
    </node>

    <node name="act" builder="act">
      <forbidden-children>sitemap, components, resources, pipelines, pipeline, handle-errors, resource</forbidden-children>
    </node>

    <node name="call" builder="call">
      <allowed-children/>
    </node>

    <node name="mount" builder="mount">
      <allowed-children/>
    </node>

    <node name="generate" builder="generate">
      <allowed-children/>
    </node>

    <node name="transform" builder="transform">
      <allowed-children/>
    </node>

    <node name="serialize" builder="serialize">
      <allowed-children/>
    </node>

    <node name="read" builder="read">
      <allowed-children/>
    </node>

    <node name="redirect-to" builder="redirect-to">
      <allowed-children/>
    </node>
  </nodes>
</language>
"#;

/// One `<node>` entry of the language table.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    element: String,
    builder: String,
    allowed: Option<BTreeSet<String>>,
    forbidden: Option<BTreeSet<String>>,
    ignored: BTreeSet<String>,
    parameter_element: String,
    configuration: Configuration,
}

impl NodeSpec {
    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn builder(&self) -> &str {
        &self.builder
    }

    /// `None` when every child not forbidden is allowed.
    pub fn allowed_children(&self) -> Option<&BTreeSet<String>> {
        self.allowed.as_ref()
    }

    pub fn forbidden_children(&self) -> Option<&BTreeSet<String>> {
        self.forbidden.as_ref()
    }

    pub fn ignored_children(&self) -> &BTreeSet<String> {
        &self.ignored
    }

    pub fn parameter_element(&self) -> &str {
        &self.parameter_element
    }

    /// The `<node>` element itself, for builders that read extra settings.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

/// Splits a comma, space or newline separated name list.
fn name_set(config: Option<&Configuration>) -> Option<BTreeSet<String>> {
    config.map(|c| {
        c.value()
            .unwrap_or_default()
            .split([',', ' ', '\n', '\r', '\t'])
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Element table plus builder registry.
pub struct Language {
    namespace: String,
    nodes: HashMap<String, NodeSpec>,
    builders: HashMap<String, BuilderFactory>,
}

impl Language {
    /// The built-in sitemap language.
    pub fn sitemap() -> Result<Self, BuildError> {
        Self::from_xml(SITEMAP_LANGUAGE, "<sitemap-language>")
    }

    /// Parses a `<language>` document and registers the built-in builders.
    pub fn from_xml(xml: &str, uri: &str) -> Result<Self, BuildError> {
        let root = Configuration::parse(xml, uri)?;
        let namespace = root
            .attribute("namespace")
            .unwrap_or(SITEMAP_NAMESPACE)
            .to_string();
        let parameter_element = root.attribute("parameter-element").unwrap_or("parameter");

        let nodes_config = root.child("nodes").ok_or_else(|| ConfigurationError::MissingChild {
            child: "nodes".to_string(),
            element: root.name().to_string(),
            location: root.location().clone(),
        })?;

        let mut nodes = HashMap::new();
        for node in nodes_config.children_named("node") {
            let element = node.required_attribute("name")?.to_string();
            let spec = NodeSpec {
                element: element.clone(),
                builder: node.required_attribute("builder")?.to_string(),
                allowed: name_set(node.child("allowed-children")),
                forbidden: name_set(node.child("forbidden-children")),
                ignored: name_set(node.child("ignored-children")).unwrap_or_default(),
                parameter_element: parameter_element.to_string(),
                configuration: node.clone(),
            };
            if nodes.insert(element.clone(), spec).is_some() {
                return Err(ConfigurationError::Duplicate {
                    kind: "node definition".to_string(),
                    name: element,
                    location: node.location().clone(),
                }
                .into());
            }
        }

        let mut language = Self {
            namespace,
            nodes,
            builders: HashMap::new(),
        };
        crate::nodes::register_builtin_builders(&mut language);
        Ok(language)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn node(&self, element: &str) -> Option<&NodeSpec> {
        self.nodes.get(element)
    }

    /// Element names in alphabetical order.
    pub fn elements(&self) -> Vec<&str> {
        let mut elements: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        elements.sort_unstable();
        elements
    }

    /// Registers (or replaces) a builder kind referenced by `builder="..."`.
    pub fn register_builder(&mut self, name: impl Into<String>, factory: BuilderFactory) -> &mut Self {
        self.builders.insert(name.into(), factory);
        self
    }

    pub fn builder_factory(&self, name: &str) -> Option<BuilderFactory> {
        self.builders.get(name).copied()
    }
}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builders: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        builders.sort_unstable();
        f.debug_struct("Language")
            .field("namespace", &self.namespace)
            .field("elements", &self.elements())
            .field("builders", &builders)
            .finish()
    }
}
