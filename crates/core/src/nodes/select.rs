use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::{Category, ComponentManager};
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ConfigurationError, ProcessingError};
use crate::node::{NodeParameters, NodeRef, ProcessingNode, invoke_nodes};
use crate::variables::VariableResolver;
use std::sync::Arc;
use trellis_traits::Environment;

#[derive(Debug)]
struct WhenBranch {
    test: VariableResolver,
    children: Vec<NodeRef>,
}

/// `<map:select>`: runs the first `<map:when>` branch whose test the
/// selector accepts, or the `<map:otherwise>` branch.
#[derive(Debug)]
pub struct SelectNode {
    hint: String,
    parameters: NodeParameters,
    whens: Vec<WhenBranch>,
    otherwise: Option<Vec<NodeRef>>,
    components: Arc<ComponentManager>,
    location: Location,
}

impl SelectNode {
    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn branch_count(&self) -> usize {
        self.whens.len() + usize::from(self.otherwise.is_some())
    }

    fn choose(
        &self,
        env: &dyn Environment,
        context: &InvokeContext,
    ) -> Result<Option<&[NodeRef]>, ProcessingError> {
        let parameters = self.parameters.resolve(context, env)?;
        let selector = self
            .components
            .selectors()
            .and_then(|selectors| selectors.select(&self.hint))
            .map_err(|e| ProcessingError::component(&self.location, e))?;

        for when in &self.whens {
            let test = when.test.resolve(context, env)?;
            let selected = selector
                .select(&test, env, &parameters)
                .map_err(|e| ProcessingError::component(&self.location, e))?;
            if selected {
                return Ok(Some(&when.children));
            }
        }
        Ok(self.otherwise.as_deref())
    }
}

impl ProcessingNode for SelectNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        // The selector is released before the chosen branch runs.
        match self.choose(env, context)? {
            Some(branch) => invoke_nodes(branch, env, context),
            None => Ok(false),
        }
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

pub struct SelectNodeBuilder {
    policy: ParentNodeBuilder,
}

impl SelectNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for SelectNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let hint = tree.resolve_hint(Category::Selector, config)?;
        let parameters = self.policy.build_parameters(config, tree)?;
        let parameter_element = tree
            .language()
            .node(self.policy.element())
            .map(|spec| spec.parameter_element().to_string())
            .unwrap_or_default();

        let mut whens = Vec::new();
        let mut otherwise: Option<Vec<NodeRef>> = None;
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
            match child.local_name() {
                "when" => {
                    let test = tree.required_expression(child, "test")?;
                    let branch = self.policy.build_children(child, tree, false)?;
                    whens.push(WhenBranch {
                        test,
                        children: branch.nodes,
                    });
                }
                "otherwise" => {
                    if otherwise.is_some() {
                        return Err(ConfigurationError::Duplicate {
                            kind: "element".to_string(),
                            name: child.name().to_string(),
                            location: child.location().clone(),
                        }
                        .into());
                    }
                    otherwise = Some(self.policy.build_children(child, tree, false)?.nodes);
                }
                name if name == parameter_element => {}
                _ => {
                    return Err(ConfigurationError::DisallowedChild {
                        element: child.name().to_string(),
                        parent: config.name().to_string(),
                        location: child.location().clone(),
                    }
                    .into());
                }
            }
        }

        let node: NodeRef = Arc::new(SelectNode {
            hint,
            parameters,
            whens,
            otherwise,
            components: Arc::clone(tree.component_manager()),
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
        let xml = pipelines(&format!("<map:pipeline>{body}</map:pipeline>"));
        TreeProcessor::new(
            provider(&[
                ("sitemap.xmap", &xml),
                ("print.txt", "print"),
                ("screen.txt", "screen"),
            ]),
            "sitemap.xmap",
        )
        .unwrap()
    }

    const SELECT: &str = r#"
        <map:select type="request-parameter">
          <map:parameter name="parameter-name" value="media"/>
          <map:when test="print"><map:read src="print.txt"/></map:when>
          <map:otherwise><map:read src="screen.txt"/></map:otherwise>
        </map:select>"#;

    #[test]
    fn test_first_accepted_branch_runs() {
        let processor = processor(SELECT);
        let mut env = RequestEnvironment::new("x").with_parameter("media", "print");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "print");
    }

    #[test]
    fn test_otherwise_branch() {
        let processor = processor(SELECT);
        let mut env = RequestEnvironment::new("x").with_parameter("media", "tv");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "screen");
    }

    #[test]
    fn test_no_branch_is_no_match() {
        let processor = processor(
            r#"<map:select><map:when test="never"><map:read src="print.txt"/></map:when></map:select>"#,
        );
        let mut env = RequestEnvironment::new("x");
        assert!(processor.process(&mut env).unwrap_err().is_not_found());
    }

    #[test]
    fn test_two_otherwise_branches_are_rejected() {
        let xml = pipelines(
            "<map:pipeline><map:select><map:otherwise/><map:otherwise/></map:select></map:pipeline>",
        );
        let processor = TreeProcessor::new(provider(&[("sitemap.xmap", &xml)]), "sitemap.xmap").unwrap();
        assert!(matches!(
            processor.tree().unwrap_err(),
            ProcessingError::Build(BuildError::Configuration(ConfigurationError::Duplicate { .. }))
        ));
    }
}
