use crate::builder::{NodeSpec, ProcessingNodeBuilder, TreeBuilder};
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::{NodeRef, ProcessingNode};
use crate::variables::VariableResolver;
use std::sync::Arc;
use trellis_traits::Environment;

/// `<map:redirect-to uri="..."/>`
#[derive(Debug)]
pub struct RedirectToNode {
    uri: VariableResolver,
    permanent: bool,
    location: Location,
}

impl RedirectToNode {
    pub fn is_permanent(&self) -> bool {
        self.permanent
    }
}

impl ProcessingNode for RedirectToNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let uri = self.uri.resolve(context, env)?;
        if context.is_build_pipeline_only() {
            return Err(ProcessingError::RedirectInBuildMode {
                uri,
                location: self.location.clone(),
            });
        }
        env.redirect(&uri, self.permanent)?;
        Ok(true)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

pub struct RedirectToNodeBuilder;

impl RedirectToNodeBuilder {
    pub fn create(_spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self))
    }
}

impl ProcessingNodeBuilder for RedirectToNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let node: NodeRef = Arc::new(RedirectToNode {
            uri: tree.required_expression(config, "uri")?,
            permanent: config.attribute_as_bool("permanent", false)?,
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
        TreeProcessor::new(provider(&[("sitemap.xmap", &xml)]), "sitemap.xmap").unwrap()
    }

    #[test]
    fn test_redirect_uses_match_groups() {
        let processor = processor(
            r#"<map:match pattern="old/*"><map:redirect-to uri="/new/{1}" permanent="yes"/></map:match>"#,
        );
        let mut env = RequestEnvironment::new("old/page");
        assert!(processor.process(&mut env).unwrap());
        let redirect = env.redirection().unwrap();
        assert_eq!(redirect.uri, "/new/page");
        assert!(redirect.permanent);
    }

    #[test]
    fn test_redirect_refused_in_build_mode() {
        let processor = processor(r#"<map:redirect-to uri="elsewhere"/>"#);
        let mut env = RequestEnvironment::new("x");
        assert!(matches!(
            processor.build_pipeline(&mut env).unwrap_err(),
            ProcessingError::RedirectInBuildMode { .. }
        ));
        assert!(env.redirection().is_none());
    }
}
