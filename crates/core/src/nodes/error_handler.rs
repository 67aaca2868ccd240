use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ConfigurationError, ProcessingError};
use crate::node::{NodeRef, ProcessingNode, invoke_nodes};
use serde_json::json;
use std::sync::Arc;
use trellis_traits::{Environment, Parameters};

/// Object model key under which a handled error is published.
pub const ERROR_OBJECT: &str = "error";

/// Anchor of the scope map describing a handled error.
pub const ERROR_ANCHOR: &str = "error";

/// Which errors a `<map:handle-errors>` block takes care of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFilter {
    All,
    NotFound,
    ServerError,
}

impl ErrorFilter {
    fn parse(config: &Configuration) -> Result<Self, ConfigurationError> {
        match config.attribute("type") {
            None => Ok(Self::All),
            Some("404") => Ok(Self::NotFound),
            Some("500") => Ok(Self::ServerError),
            Some(other) => Err(ConfigurationError::InvalidValue {
                attribute: "type".to_string(),
                value: other.to_string(),
                message: "expected 404 or 500".to_string(),
                location: config.location().clone(),
            }),
        }
    }

    pub fn accepts(self, error: &ProcessingError) -> bool {
        match self {
            Self::All => true,
            Self::NotFound => error.is_not_found(),
            Self::ServerError => !error.is_not_found(),
        }
    }
}

/// `<map:handle-errors>`: an alternative branch run when processing fails.
///
/// It is never invoked as a regular child; pipeline nodes call
/// [`HandleErrorsNode::handle`] with the error they caught.
#[derive(Debug)]
pub struct HandleErrorsNode {
    filter: ErrorFilter,
    children: Vec<NodeRef>,
    location: Location,
}

impl HandleErrorsNode {
    pub fn filter(&self) -> ErrorFilter {
        self.filter
    }

    /// Runs the handler branch for `error`. Returns the branch's result, or
    /// hands the original error back when this handler does not apply or
    /// its branch matches nothing.
    pub fn handle(
        &self,
        error: ProcessingError,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        if !self.filter.accepts(&error) {
            return Err(error);
        }

        log::warn!("Handling {} error at {}: {error}", error.kind(), self.location);
        if !env.reset_response() {
            log::warn!("Response already committed, cannot run error handler at {}", self.location);
            return Err(error);
        }

        let location = error.location().map(ToString::to_string).unwrap_or_default();
        let message = error.to_string();
        env.object_model_mut().insert(
            ERROR_OBJECT.to_string(),
            json!({ "message": message, "kind": error.kind(), "location": location }),
        );
        let scope = Parameters::from([
            ("message".to_string(), message),
            ("kind".to_string(), error.kind().to_string()),
            ("location".to_string(), location),
        ]);

        // The failed branch may have left a half-assembled pipeline behind;
        // the handler starts from a fresh one.
        let mut handler_context = if context.is_build_pipeline_only() {
            InvokeContext::for_pipeline_build()
        } else {
            InvokeContext::new()
        }
        .with_pass_through(context.is_pass_through());
        handler_context.set_component_manager(context.component_manager().cloned());

        let handled = {
            let mut scoped = handler_context.scoped_map(Some(ERROR_ANCHOR), scope);
            invoke_nodes(&self.children, env, &mut scoped)
        };

        let result = match handled {
            Ok(true) => {
                if let Some(pipeline) = handler_context.take_processing_pipeline() {
                    if context.is_build_pipeline_only() {
                        context.set_processing_pipeline(pipeline);
                    }
                }
                Ok(true)
            }
            Ok(false) => Err(error),
            Err(handler_error) => {
                log::error!(
                    "Error handler at {} failed: {handler_error} (while handling: {error})",
                    self.location
                );
                Err(handler_error)
            }
        };
        handler_context.dispose();
        result
    }
}

impl ProcessingNode for HandleErrorsNode {
    fn invoke(
        &self,
        _env: &mut dyn Environment,
        _context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        Ok(false)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

pub struct HandleErrorsNodeBuilder {
    policy: ParentNodeBuilder,
}

impl HandleErrorsNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for HandleErrorsNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let filter = ErrorFilter::parse(config)?;
        let children = self.policy.build_children(config, tree, false)?;
        let node: NodeRef = Arc::new(HandleErrorsNode {
            filter,
            children: children.nodes,
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
        TreeProcessor::new(
            provider(&[("sitemap.xmap", &xml), ("a.txt", "alpha"), ("404.txt", "missing")]),
            "sitemap.xmap",
        )
        .unwrap()
    }

    #[test]
    fn test_not_found_handler() {
        let processor = processor(
            r#"<map:pipeline><map:match pattern="a"><map:read src="a.txt"/></map:match></map:pipeline>
               <map:handle-errors type="404"><map:read src="404.txt"/></map:handle-errors>"#,
        );
        let mut env = RequestEnvironment::new("nowhere");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "missing");
        assert_eq!(env.object_model()[ERROR_OBJECT]["kind"], "not-found");
    }

    #[test]
    fn test_filter_passes_other_errors_through() {
        let processor = processor(
            r#"<map:pipeline><map:match pattern="a"><map:read src="gone.txt"/></map:match></map:pipeline>
               <map:handle-errors type="404"><map:read src="404.txt"/></map:handle-errors>"#,
        );
        let mut env = RequestEnvironment::new("a");
        let err = processor.process(&mut env).unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_handler_sees_error_scope() {
        let processor = processor(
            r#"<map:pipeline>
                 <map:match pattern="a"><map:read src="gone.txt"/></map:match>
                 <map:handle-errors>
                   <map:match type="regexp" pattern="^a$">
                     <map:redirect-to uri="/error?kind={#error:kind}"/>
                   </map:match>
                 </map:handle-errors>
               </map:pipeline>"#,
        );
        let mut env = RequestEnvironment::new("a");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.redirection().unwrap().uri, "/error?kind=server-error");
    }

    #[test]
    fn test_unhandled_branch_returns_original_error() {
        let processor = processor(
            r#"<map:pipeline/>
               <map:handle-errors><map:match pattern="never"><map:read src="a.txt"/></map:match></map:handle-errors>"#,
        );
        let mut env = RequestEnvironment::new("x");
        assert!(processor.process(&mut env).unwrap_err().is_not_found());
    }

    #[test]
    fn test_filter_parsing() {
        assert!(ErrorFilter::All.accepts(&ProcessingError::internal("x")));
        assert!(!ErrorFilter::NotFound.accepts(&ProcessingError::internal("x")));
        assert!(ErrorFilter::ServerError.accepts(&ProcessingError::internal("x")));

        let xml = pipelines(r#"<map:handle-errors type="418"/>"#);
        let processor = TreeProcessor::new(provider(&[("sitemap.xmap", &xml)]), "sitemap.xmap").unwrap();
        assert!(processor.tree().is_err());
    }
}
