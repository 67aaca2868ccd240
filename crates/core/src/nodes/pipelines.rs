use super::{HandleErrorsNode, PipelineNode};
use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::ComponentManager;
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ConfigurationError, ProcessingError};
use crate::node::{NodeRef, ProcessingNode, node_as};
use std::sync::Arc;
use trellis_traits::Environment;

/// `<map:pipelines>`: tries each pipeline in document order.
///
/// The last pipeline is the catch-all that reports "not found" when
/// nothing before it matched. Errors escaping the pipelines go to the
/// block's error handler, if one is declared.
#[derive(Debug)]
pub struct PipelinesNode {
    pipelines: Vec<Arc<PipelineNode>>,
    error_handler: Option<Arc<HandleErrorsNode>>,
    components: Arc<ComponentManager>,
    location: Location,
}

impl PipelinesNode {
    pub fn pipelines(&self) -> &[Arc<PipelineNode>] {
        &self.pipelines
    }

    pub fn components(&self) -> &Arc<ComponentManager> {
        &self.components
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    fn invoke_pipelines(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        for pipeline in &self.pipelines {
            log::debug!("Trying pipeline at {}", pipeline.location());
            if pipeline.invoke(env, context)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl ProcessingNode for PipelinesNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let previous = context.set_component_manager(Some(Arc::clone(&self.components)));
        let result = match self.invoke_pipelines(env, context) {
            Err(err) => match &self.error_handler {
                Some(handler) => handler.handle(err, env, context),
                None => Err(err),
            },
            matched => matched,
        };
        context.set_component_manager(previous);
        result
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn requires_initialize(&self) -> bool {
        true
    }

    fn initialize(&self) -> Result<(), BuildError> {
        if let Some(last) = self.pipelines.last() {
            last.set_last(true);
        }
        Ok(())
    }

    fn requires_dispose(&self) -> bool {
        true
    }

    fn dispose(&self) {
        log::debug!("Disposing components of sitemap level at {}", self.location);
        self.components.dispose();
    }
}

pub struct PipelinesNodeBuilder {
    policy: ParentNodeBuilder,
}

impl PipelinesNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for PipelinesNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let children = self.policy.build_children(config, tree, false)?;

        let mut pipelines = Vec::new();
        let mut error_handler = None;
        for child in children.nodes {
            if let Some(pipeline) = node_as::<PipelineNode>(&child) {
                pipelines.push(pipeline);
            } else if let Some(handler) = node_as::<HandleErrorsNode>(&child) {
                if error_handler.is_some() {
                    return Err(ConfigurationError::Duplicate {
                        kind: "error handler".to_string(),
                        name: "handle-errors".to_string(),
                        location: handler.location().clone(),
                    }
                    .into());
                }
                error_handler = Some(handler);
            }
        }

        let node: NodeRef = Arc::new(PipelinesNode {
            pipelines,
            error_handler,
            components: Arc::clone(tree.component_manager()),
            location: config.location().clone(),
        });
        Ok(tree.setup_node(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{build, pipelines, shared};
    use crate::node::node_ref;

    fn pipelines_node(body: &str) -> (crate::builder::BuiltTree, usize) {
        let xml = pipelines(body);
        let shared = shared(&[("sitemap.xmap", &xml)]);
        let tree = build(&shared, "sitemap.xmap").unwrap();
        let count = node_ref::<PipelinesNode>(&tree.root).unwrap().pipelines().len();
        (tree, count)
    }

    #[test]
    fn test_only_last_pipeline_is_marked() {
        let (tree, count) = pipelines_node("<map:pipeline/><map:pipeline/><map:pipeline/>");
        assert_eq!(count, 3);
        let node = node_ref::<PipelinesNode>(&tree.root).unwrap();
        let marks: Vec<bool> = node.pipelines().iter().map(|p| p.is_last()).collect();
        assert_eq!(marks, vec![false, false, true]);
    }

    #[test]
    fn test_single_pipeline_is_last() {
        let (tree, count) = pipelines_node("<map:pipeline/>");
        assert_eq!(count, 1);
        let node = node_ref::<PipelinesNode>(&tree.root).unwrap();
        assert!(node.pipelines()[0].is_last());
    }

    #[test]
    fn test_handler_is_separated_from_pipelines() {
        let (tree, count) = pipelines_node(
            r#"<map:pipeline/><map:handle-errors><map:read src="error.txt"/></map:handle-errors>"#,
        );
        assert_eq!(count, 1);
        assert!(node_ref::<PipelinesNode>(&tree.root).unwrap().has_error_handler());
    }

    #[test]
    fn test_two_handlers_are_rejected() {
        let xml = pipelines("<map:handle-errors/><map:handle-errors/>");
        let shared = shared(&[("sitemap.xmap", &xml)]);
        assert!(matches!(
            build(&shared, "sitemap.xmap").unwrap_err(),
            BuildError::Configuration(ConfigurationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_dispose_releases_components() {
        let (tree, _) = pipelines_node("<map:pipeline/>");
        let node = node_ref::<PipelinesNode>(&tree.root).unwrap();
        assert!(!node.components().is_disposed());
        node.dispose();
        assert!(node.components().is_disposed());
    }
}
