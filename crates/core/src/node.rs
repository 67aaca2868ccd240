//! The processing node contract.

use crate::configuration::Location;
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::variables::{VariableResolver, build_map};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use trellis_traits::{Environment, Parameters};

/// Key under which every node parameter map carries the node's location.
pub const LOCATION_PARAMETER: &str = "sitemap:location";

/// Lets the builders recover concrete node types from `dyn ProcessingNode`.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// One compiled element of a sitemap.
///
/// Nodes are immutable once the tree is built and are shared by every
/// request that walks the tree, so `invoke` takes `&self` and keeps all
/// per-request state in the [`InvokeContext`].
pub trait ProcessingNode: AsAny + Send + Sync + Debug {
    /// Processes the request. `Ok(false)` means "did not match, try the
    /// next sibling"; errors abort the walk.
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError>;

    fn location(&self) -> &Location;

    /// Whether [`ProcessingNode::initialize`] must run once the whole tree
    /// has been built and linked.
    fn requires_initialize(&self) -> bool {
        false
    }

    fn initialize(&self) -> Result<(), BuildError> {
        Ok(())
    }

    /// Whether [`ProcessingNode::dispose`] must run when the tree is torn down.
    fn requires_dispose(&self) -> bool {
        false
    }

    fn dispose(&self) {}
}

pub type NodeRef = Arc<dyn ProcessingNode>;

/// Borrows a node as its concrete type.
pub fn node_ref<T: ProcessingNode>(node: &NodeRef) -> Option<&T> {
    (**node).as_any().downcast_ref::<T>()
}

/// Recovers a shared handle to a node's concrete type.
pub fn node_as<T: ProcessingNode>(node: &NodeRef) -> Option<Arc<T>> {
    Arc::clone(node).into_any_arc().downcast::<T>().ok()
}

/// Invokes nodes in order until one reports a match.
pub fn invoke_nodes(
    nodes: &[NodeRef],
    env: &mut dyn Environment,
    context: &mut InvokeContext,
) -> Result<bool, ProcessingError> {
    for node in nodes {
        log::debug!("Invoking node at {}", node.location());
        if node.invoke(env, context)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The `<map:parameter>` children of a node, compiled.
#[derive(Debug, Clone)]
pub struct NodeParameters {
    entries: Vec<(VariableResolver, VariableResolver)>,
    location: Location,
}

impl NodeParameters {
    pub fn new(entries: Vec<(VariableResolver, VariableResolver)>, location: Location) -> Self {
        Self { entries, location }
    }

    pub fn empty(location: Location) -> Self {
        Self::new(Vec::new(), location)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resolves the parameters for one request. The map always carries the
    /// node's location under [`LOCATION_PARAMETER`].
    pub fn resolve(
        &self,
        context: &InvokeContext,
        env: &dyn Environment,
    ) -> Result<Parameters, ProcessingError> {
        let mut parameters = build_map(&self.entries, context, env)?;
        parameters.insert(LOCATION_PARAMETER.to_string(), self.location.to_string());
        Ok(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;

    #[derive(Debug)]
    struct Fixed {
        result: bool,
        location: Location,
    }

    impl ProcessingNode for Fixed {
        fn invoke(
            &self,
            _env: &mut dyn Environment,
            _context: &mut InvokeContext,
        ) -> Result<bool, ProcessingError> {
            Ok(self.result)
        }

        fn location(&self) -> &Location {
            &self.location
        }
    }

    fn fixed(result: bool) -> NodeRef {
        Arc::new(Fixed {
            result,
            location: Location::new("test", 1, 1),
        })
    }

    #[test]
    fn test_invoke_nodes_stops_at_first_match() {
        let mut env = RequestEnvironment::new("a");
        let mut context = InvokeContext::new();
        assert!(invoke_nodes(&[fixed(false), fixed(true)], &mut env, &mut context).unwrap());
        assert!(!invoke_nodes(&[fixed(false)], &mut env, &mut context).unwrap());
        assert!(!invoke_nodes(&[], &mut env, &mut context).unwrap());
    }

    #[test]
    fn test_downcasts() {
        let node = fixed(true);
        assert!(node_ref::<Fixed>(&node).unwrap().result);
        assert!(node_as::<Fixed>(&node).is_some());
    }

    #[test]
    fn test_parameters_carry_location() {
        let env = RequestEnvironment::new("a");
        let context = InvokeContext::new();
        let parameters = NodeParameters::new(
            vec![(
                VariableResolver::new("mode").unwrap(),
                VariableResolver::new("print").unwrap(),
            )],
            Location::new("sitemap.xmap", 4, 2),
        );
        let resolved = parameters.resolve(&context, &env).unwrap();
        assert_eq!(resolved["mode"], "print");
        assert_eq!(resolved[LOCATION_PARAMETER], "sitemap.xmap:4:2");
        assert_eq!(parameters.len(), 1);
    }
}
