use super::HandleErrorsNode;
use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::Category;
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ConfigurationError, ProcessingError};
use crate::node::{NodeParameters, NodeRef, ProcessingNode, invoke_nodes, node_as};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use trellis_traits::Environment;

/// `<map:pipeline>`: selects the pipeline type for its children and
/// invokes them in order.
#[derive(Debug)]
pub struct PipelineNode {
    hint: String,
    parameters: Arc<NodeParameters>,
    internal_only: bool,
    last: AtomicBool,
    error_handler: Option<Arc<HandleErrorsNode>>,
    children: Vec<NodeRef>,
    location: Location,
}

impl PipelineNode {
    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn is_internal_only(&self) -> bool {
        self.internal_only
    }

    pub fn is_last(&self) -> bool {
        self.last.load(Ordering::Acquire)
    }

    /// Marks this pipeline as the catch-all of its `<pipelines>` block.
    pub fn set_last(&self, last: bool) {
        self.last.store(last, Ordering::Release);
    }

    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }

    fn invoke_children(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        context.inform_pipeline(&self.hint, Arc::clone(&self.parameters));
        if invoke_nodes(&self.children, env, context)? {
            return Ok(true);
        }

        // Nothing matched: only the last pipeline may turn that into a 404,
        // and only when no enclosing sitemap wants to carry on.
        if self.is_last() && !context.is_pass_through() && !context.is_build_pipeline_only() {
            return Err(ProcessingError::not_found(env.addressing().full_uri()));
        }
        Ok(false)
    }
}

impl ProcessingNode for PipelineNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        if self.internal_only && !env.is_internal() {
            log::debug!("Skipping internal-only pipeline at {} for external request", self.location);
            return Ok(false);
        }

        match self.invoke_children(env, context) {
            Err(err) => match &self.error_handler {
                Some(handler) => handler.handle(err, env, context),
                None => Err(err),
            },
            matched => matched,
        }
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

pub struct PipelineNodeBuilder {
    policy: ParentNodeBuilder,
}

impl PipelineNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for PipelineNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let hint = tree.resolve_hint(Category::Pipe, config)?;
        let internal_only = config.attribute_as_bool("internal-only", false)?;
        let built = self.policy.build_children(config, tree, true)?;

        let mut children = Vec::with_capacity(built.nodes.len());
        let mut error_handler = None;
        for child in built.nodes {
            match node_as::<HandleErrorsNode>(&child) {
                Some(handler) if error_handler.is_some() => {
                    return Err(ConfigurationError::Duplicate {
                        kind: "error handler".to_string(),
                        name: "handle-errors".to_string(),
                        location: handler.location().clone(),
                    }
                    .into());
                }
                Some(handler) => error_handler = Some(handler),
                None => children.push(child),
            }
        }

        let node: NodeRef = Arc::new(PipelineNode {
            hint,
            parameters: Arc::new(built.parameters),
            internal_only,
            last: AtomicBool::new(false),
            error_handler,
            children,
            location: config.location().clone(),
        });
        Ok(tree.setup_node(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;
    use crate::nodes::testing::{pipelines, provider};
    use crate::processor::TreeProcessor;

    fn processor(body: &str) -> TreeProcessor {
        let xml = pipelines(body);
        TreeProcessor::new(provider(&[("sitemap.xmap", &xml), ("a.txt", "alpha")]), "sitemap.xmap")
            .unwrap()
    }

    #[test]
    fn test_last_pipeline_reports_not_found() {
        let processor = processor(
            r#"<map:pipeline><map:match pattern="a"><map:read src="a.txt"/></map:match></map:pipeline>"#,
        );
        let mut env = RequestEnvironment::new("zzz");
        let err = processor.process(&mut env).unwrap_err();
        assert!(err.is_not_found());

        let mut env = RequestEnvironment::new("a");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "alpha");
    }

    #[test]
    fn test_internal_only_pipeline_is_skipped_for_external_requests() {
        let processor = processor(
            r#"<map:pipeline internal-only="true">
                 <map:match pattern="a"><map:read src="a.txt"/></map:match>
               </map:pipeline>
               <map:pipeline/>"#,
        );
        let mut external = RequestEnvironment::new("a");
        assert!(processor.process(&mut external).unwrap_err().is_not_found());

        let mut internal = RequestEnvironment::new("a").internal();
        assert!(processor.process(&mut internal).unwrap());
    }

    #[test]
    fn test_pipeline_parameters_and_type() {
        let processor = processor(
            r#"<map:pipeline type="noncaching">
                 <map:parameter name="expires" value="never"/>
               </map:pipeline>"#,
        );
        let tree = processor.tree().unwrap();
        let root = crate::node::node_ref::<crate::nodes::PipelinesNode>(tree.root()).unwrap();
        let pipeline = &root.pipelines()[0];
        assert_eq!(pipeline.hint(), "noncaching");
        assert_eq!(pipeline.parameters.len(), 1);
        assert!(pipeline.children().is_empty());
    }

    #[test]
    fn test_invalid_internal_only_value() {
        let xml = pipelines(r#"<map:pipeline internal-only="maybe"/>"#);
        let processor = TreeProcessor::new(provider(&[("sitemap.xmap", &xml)]), "sitemap.xmap").unwrap();
        assert!(matches!(
            processor.tree().unwrap_err(),
            ProcessingError::Build(BuildError::Configuration(ConfigurationError::InvalidValue { .. }))
        ));
    }
}
