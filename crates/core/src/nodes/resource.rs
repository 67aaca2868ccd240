use super::RESOURCE_PREFIX;
use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::{NodeParameters, NodeRef, ProcessingNode, invoke_nodes};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use trellis_traits::Environment;

/// Invokes its children in order. Used for `<map:resource>` bodies.
#[derive(Debug)]
pub struct ContainerNode {
    children: Vec<NodeRef>,
    location: Location,
}

impl ContainerNode {
    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }
}

impl ProcessingNode for ContainerNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        invoke_nodes(&self.children, env, context)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// Builds `<map:resource name="..">` and registers it for `<map:call>`.
pub struct ResourceNodeBuilder {
    policy: ParentNodeBuilder,
}

impl ResourceNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for ResourceNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let name = config.required_attribute("name")?;
        let children = self.policy.build_children(config, tree, false)?;
        let node: NodeRef = Arc::new(ContainerNode {
            children: children.nodes,
            location: config.location().clone(),
        });
        tree.register_node(
            &format!("{RESOURCE_PREFIX}{name}"),
            Arc::clone(&node),
            config.location(),
        )?;
        Ok(tree.setup_node(node))
    }
}

/// `<map:call resource="..">`: invokes a named resource with the call's
/// parameters as a new scope level.
#[derive(Debug)]
pub struct CallNode {
    resource: String,
    parameters: NodeParameters,
    target: OnceCell<NodeRef>,
    location: Location,
}

impl CallNode {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_linked(&self) -> bool {
        self.target.get().is_some()
    }
}

impl ProcessingNode for CallNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let target = self.target.get().ok_or_else(|| {
            ProcessingError::internal(format!(
                "call to resource '{}' at {} was never linked",
                self.resource, self.location
            ))
        })?;
        let parameters = self.parameters.resolve(context, env)?;
        let mut scoped = context.scoped_map(None, parameters);
        target.invoke(env, &mut scoped)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// Builds `<map:call>` in the first pass and points it at its resource in
/// the second, so a call may precede the resource it names.
pub struct CallNodeBuilder {
    policy: ParentNodeBuilder,
    node: Option<Arc<CallNode>>,
}

impl CallNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
            node: None,
        }))
    }
}

impl ProcessingNodeBuilder for CallNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let resource = config.required_attribute("resource")?.to_string();
        let children = self.policy.build_children(config, tree, true)?;
        let node = Arc::new(CallNode {
            resource,
            parameters: children.parameters,
            target: OnceCell::new(),
            location: config.location().clone(),
        });
        self.node = Some(Arc::clone(&node));
        Ok(tree.setup_node(node))
    }

    fn is_linked(&self) -> bool {
        true
    }

    fn link_node(&mut self, tree: &TreeBuilder) -> Result<(), BuildError> {
        let Some(node) = &self.node else {
            return Ok(());
        };
        let target = tree.registered_node(
            &format!("{RESOURCE_PREFIX}{}", node.resource),
            &node.location,
        )?;
        if node.target.set(target).is_err() {
            log::warn!("Call at {} was linked twice", node.location);
        }
        Ok(())
    }
}
