use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::{Category, ComponentManager};
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::{NodeParameters, NodeRef, ProcessingNode, invoke_nodes};
use crate::variables::VariableResolver;
use std::sync::Arc;
use trellis_traits::Environment;

/// `<map:act>`: runs an action; when it succeeds its result map becomes
/// the scope of the children.
#[derive(Debug)]
pub struct ActNode {
    hint: String,
    source: Option<VariableResolver>,
    anchor: Option<String>,
    parameters: NodeParameters,
    components: Arc<ComponentManager>,
    children: Vec<NodeRef>,
    location: Location,
}

impl ActNode {
    pub fn hint(&self) -> &str {
        &self.hint
    }
}

impl ProcessingNode for ActNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let parameters = self.parameters.resolve(context, env)?;
        let source = self
            .source
            .as_ref()
            .map(|source| source.resolve(context, env))
            .transpose()?;

        let result = {
            let action = self
                .components
                .actions()
                .and_then(|actions| actions.select(&self.hint))
                .map_err(|e| ProcessingError::component(&self.location, e))?;
            action
                .act(env, source.as_deref(), &parameters)
                .map_err(|e| ProcessingError::component(&self.location, e))?
        };

        match result {
            Some(map) => {
                log::debug!("Action '{}' at {} succeeded", self.hint, self.location);
                let mut scoped = context.scoped_map(self.anchor.as_deref(), map);
                invoke_nodes(&self.children, env, &mut scoped)
            }
            None => Ok(false),
        }
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

pub struct ActNodeBuilder {
    policy: ParentNodeBuilder,
}

impl ActNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for ActNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let hint = tree.resolve_hint(Category::Action, config)?;
        let source = tree.expression(config, "src")?;
        let children = self.policy.build_children(config, tree, true)?;

        let node: NodeRef = Arc::new(ActNode {
            hint,
            source,
            anchor: config.attribute("name").map(str::to_string),
            parameters: children.parameters,
            components: Arc::clone(tree.component_manager()),
            children: children.nodes,
            location: config.location().clone(),
        });
        Ok(tree.setup_node(node))
    }
}

#[cfg(test)]
mod tests {
    use crate::environment::RequestEnvironment;
    use crate::nodes::testing::{pipelines, provider};
    use crate::processor::TreeProcessor;

    fn processor(body: &str) -> TreeProcessor {
        let xml = pipelines(&format!("<map:pipeline>{body}</map:pipeline><map:pipeline/>"));
        TreeProcessor::new(
            provider(&[("sitemap.xmap", &xml), ("items/42.txt", "answer")]),
            "sitemap.xmap",
        )
        .unwrap()
    }

    const ACT: &str = r#"
        <map:act name="req">
          <map:parameter name="parameter-required" value="item"/>
          <map:read src="items/{item}.txt"/>
        </map:act>"#;

    #[test]
    fn test_successful_action_scopes_children() {
        let processor = processor(ACT);
        let mut env = RequestEnvironment::new("anything").with_parameter("item", "42");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "answer");
    }

    #[test]
    fn test_failed_action_skips_children() {
        let processor = processor(ACT);
        let mut env = RequestEnvironment::new("anything");
        assert!(processor.process(&mut env).unwrap_err().is_not_found());
        assert!(env.output().is_empty());
    }

    #[test]
    fn test_anchor_reaches_action_result() {
        let processor = processor(
            r#"<map:act name="req">
                 <map:match pattern="**"><map:read src="items/{#req:item}.txt"/></map:match>
               </map:act>"#,
        );
        let mut env = RequestEnvironment::new("a/b").with_parameter("item", "42");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "answer");
    }
}
