use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::{Category, ComponentDeclarations, ComponentManager};
use crate::configuration::Configuration;
use crate::error::{BuildError, ConfigurationError};
use crate::node::NodeRef;
use std::sync::Arc;

/// Builds `<map:sitemap>`.
///
/// The sitemap element has no node of its own: its `<components>` section
/// installs the component manager for this level, `<resources>` register
/// named nodes, and the `<pipelines>` node becomes the root of the tree.
pub struct SitemapNodeBuilder {
    policy: ParentNodeBuilder,
}

impl SitemapNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }

    fn sections<'a>(
        &self,
        config: &'a Configuration,
        tree: &TreeBuilder,
    ) -> Result<Vec<&'a Configuration>, BuildError> {
        let mut sections = Vec::new();
        for child in config.children() {
            if child.namespace() != tree.language().namespace() {
                return Err(ConfigurationError::InvalidNamespace {
                    element: child.name().to_string(),
                    namespace: child.namespace().to_string(),
                    expected: tree.language().namespace().to_string(),
                    location: child.location().clone(),
                }
                .into());
            }
            if self.policy.is_ignored(child.local_name()) {
                log::debug!("Ignoring '{}' at {}", child.name(), child.location());
                continue;
            }
            if !self.policy.is_allowed(child.local_name()) {
                return Err(ConfigurationError::DisallowedChild {
                    element: child.name().to_string(),
                    parent: config.name().to_string(),
                    location: child.location().clone(),
                }
                .into());
            }
            sections.push(child);
        }
        Ok(sections)
    }
}

/// Reads `<map:components>` into default hints and aliases.
fn declarations(config: &Configuration, tree: &TreeBuilder) -> Result<ComponentDeclarations, BuildError> {
    let registry = tree.component_manager().registry();
    let mut declarations = ComponentDeclarations::new();

    for group in config.children() {
        let category = Category::from_element(group.local_name()).ok_or_else(|| {
            ConfigurationError::UnknownElement {
                element: group.name().to_string(),
                location: group.location().clone(),
            }
        })?;

        for declaration in group.children() {
            let name = declaration.required_attribute("name")?;
            let src = declaration.required_attribute("src")?;
            if !registry.contains(category, src) {
                return Err(ConfigurationError::UnknownComponent {
                    category: category.to_string(),
                    hint: src.to_string(),
                    location: declaration.location().clone(),
                }
                .into());
            }
            declarations.add_alias(category, name, src);
        }

        if let Some(default) = group.attribute("default") {
            declarations.set_default(category, default);
        }
    }
    Ok(declarations)
}

/// Fails unless every declared default resolves to a registered component.
fn check_defaults(
    components: &ComponentManager,
    config: &Configuration,
) -> Result<(), BuildError> {
    for group in config.children() {
        let Some(category) = Category::from_element(group.local_name()) else {
            continue;
        };
        if let Some(default) = group.attribute("default") {
            components.resolve_hint(category, None).map_err(|e| {
                ConfigurationError::InvalidValue {
                    attribute: "default".to_string(),
                    value: default.to_string(),
                    message: e.to_string(),
                    location: group.location().clone(),
                }
            })?;
        }
    }
    Ok(())
}

impl ProcessingNodeBuilder for SitemapNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let sections = self.sections(config, tree)?;

        let declared = match sections.iter().find(|s| s.local_name() == "components") {
            Some(components) => {
                let declared = declarations(components, tree)?;
                Some((components, declared))
            }
            None => None,
        };
        let parent = Arc::clone(tree.component_manager());
        let components = match declared {
            Some((section, declarations)) => {
                let components = ComponentManager::child(&parent, declarations);
                check_defaults(&components, section)?;
                components
            }
            None => ComponentManager::child(&parent, ComponentDeclarations::new()),
        };
        tree.set_component_manager(components);

        for resources in sections.iter().filter(|s| s.local_name() == "resources") {
            for resource in resources.children() {
                if resource.local_name() != "resource" {
                    return Err(ConfigurationError::DisallowedChild {
                        element: resource.name().to_string(),
                        parent: resources.name().to_string(),
                        location: resource.location().clone(),
                    }
                    .into());
                }
                tree.build_node(resource)
                    .map_err(|e| e.wrap(resource.name(), resource.location()))?;
            }
        }

        let mut pipelines = sections.iter().filter(|s| s.local_name() == "pipelines");
        let section = pipelines.next().ok_or_else(|| ConfigurationError::MissingChild {
            child: "pipelines".to_string(),
            element: config.name().to_string(),
            location: config.location().clone(),
        })?;
        if let Some(extra) = pipelines.next() {
            return Err(ConfigurationError::Duplicate {
                kind: "element".to_string(),
                name: extra.name().to_string(),
                location: extra.location().clone(),
            }
            .into());
        }

        tree.build_node(section)
            .map_err(|e| e.wrap(section.name(), section.location()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::PipelinesNode;
    use crate::nodes::testing::{build, pipelines, shared, sitemap};
    use crate::node::node_ref;

    #[test]
    fn test_components_install_child_manager() {
        let xml = sitemap(
            r#"<map:components>
                 <map:matchers default="regex">
                   <map:matcher name="regex" src="regexp"/>
                 </map:matchers>
               </map:components>
               <map:pipelines><map:pipeline/></map:pipelines>"#,
        );
        let shared = shared(&[("sitemap.xmap", &xml)]);
        let tree = build(&shared, "sitemap.xmap").unwrap();

        assert_eq!(tree.components.depth(), 1);
        assert_eq!(tree.components.resolve_hint(Category::Matcher, None).unwrap(), "regexp");
        assert!(node_ref::<PipelinesNode>(&tree.root).is_some());
    }

    #[test]
    fn test_unknown_component_source_is_rejected() {
        let xml = sitemap(
            r#"<map:components>
                 <map:generators><map:generator name="g" src="no-such"/></map:generators>
               </map:components>
               <map:pipelines/>"#,
        );
        let shared = shared(&[("sitemap.xmap", &xml)]);
        let err = build(&shared, "sitemap.xmap").unwrap_err();
        assert!(matches!(
            err,
            BuildError::Configuration(ConfigurationError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn test_bad_default_is_rejected() {
        let xml = sitemap(
            r#"<map:components><map:serializers default="pdf"/></map:components>
               <map:pipelines/>"#,
        );
        let shared = shared(&[("sitemap.xmap", &xml)]);
        let err = build(&shared, "sitemap.xmap").unwrap_err();
        assert!(matches!(
            err,
            BuildError::Configuration(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_ignored_and_missing_sections() {
        let with_views = sitemap("<map:views/><map:pipelines/>");
        let shared_views = shared(&[("sitemap.xmap", &with_views)]);
        assert!(build(&shared_views, "sitemap.xmap").is_ok());

        let empty = sitemap("");
        let shared_empty = shared(&[("sitemap.xmap", &empty)]);
        assert!(matches!(
            build(&shared_empty, "sitemap.xmap").unwrap_err(),
            BuildError::Configuration(ConfigurationError::MissingChild { .. })
        ));

        let stray = pipelines("").replace("<map:pipelines>", "<map:pipeline/><map:pipelines>");
        let shared_stray = shared(&[("sitemap.xmap", &stray)]);
        assert!(matches!(
            build(&shared_stray, "sitemap.xmap").unwrap_err(),
            BuildError::Configuration(ConfigurationError::DisallowedChild { .. })
        ));
    }
}
