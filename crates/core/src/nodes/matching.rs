use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::{Category, ComponentManager, ComponentSlot};
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::{NodeParameters, NodeRef, ProcessingNode, invoke_nodes};
use crate::variables::VariableResolver;
use std::sync::Arc;
use trellis_traits::{Environment, Matcher, Parameters, PreparedPattern};

/// Pushes a successful match result and invokes the children beneath it.
fn invoke_matched(
    result: Option<Parameters>,
    anchor: Option<&str>,
    children: &[NodeRef],
    env: &mut dyn Environment,
    context: &mut InvokeContext,
) -> Result<bool, ProcessingError> {
    match result {
        None => Ok(false),
        Some(map) => {
            let mut scoped = context.scoped_map(anchor, map);
            invoke_nodes(children, env, &mut scoped)
        }
    }
}

/// `<map:match>` whose pattern was compiled when the tree was built.
///
/// Thread-safe matchers are looked up once and shared by every request;
/// pooled ones are acquired per invocation and released before the
/// children run.
#[derive(Debug)]
pub struct PreparableMatchNode {
    hint: String,
    pattern: PreparedPattern,
    slot: ComponentSlot<dyn Matcher>,
    anchor: Option<String>,
    parameters: NodeParameters,
    components: Arc<ComponentManager>,
    children: Vec<NodeRef>,
    location: Location,
}

impl PreparableMatchNode {
    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }

    pub fn pattern(&self) -> &str {
        self.pattern.source()
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Whether one matcher instance is kept for the node's lifetime.
    pub fn is_shared(&self) -> bool {
        self.slot.is_shared()
    }
}

impl ProcessingNode for PreparableMatchNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let parameters = self.parameters.resolve(context, env)?;
        let result = {
            let matcher = self
                .components
                .matchers()
                .and_then(|selector| self.slot.acquire(selector))
                .map_err(|e| ProcessingError::component(&self.location, e))?;
            matcher
                .prepared_match(&self.pattern, env, &parameters)
                .map_err(|e| ProcessingError::component(&self.location, e))?
        };
        invoke_matched(result, self.anchor.as_deref(), &self.children, env, context)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// `<map:match>` whose pattern contains expressions, or whose matcher
/// cannot pre-compile patterns. The pattern is resolved per request.
#[derive(Debug)]
pub struct MatchNode {
    hint: String,
    pattern: VariableResolver,
    anchor: Option<String>,
    parameters: NodeParameters,
    components: Arc<ComponentManager>,
    children: Vec<NodeRef>,
    location: Location,
}

impl MatchNode {
    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }

    pub fn pattern(&self) -> &str {
        self.pattern.expression()
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }
}

impl ProcessingNode for MatchNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let pattern = self.pattern.resolve(context, env)?;
        let parameters = self.parameters.resolve(context, env)?;
        let result = {
            let matcher = self
                .components
                .matchers()
                .and_then(|selector| selector.select(&self.hint))
                .map_err(|e| ProcessingError::component(&self.location, e))?;
            matcher
                .matches(&pattern, env, &parameters)
                .map_err(|e| ProcessingError::component(&self.location, e))?
        };
        invoke_matched(result, self.anchor.as_deref(), &self.children, env, context)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// Builds `<map:match>`, choosing the prepared form whenever the pattern
/// is a constant and the matcher supports it.
pub struct MatchNodeBuilder {
    policy: ParentNodeBuilder,
}

impl MatchNodeBuilder {
    pub fn create(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }
}

impl ProcessingNodeBuilder for MatchNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let location = config.location().clone();
        let hint = tree.resolve_hint(Category::Matcher, config)?;
        let source = config.required_attribute("pattern")?;
        let pattern = tree.required_expression(config, "pattern")?;
        let anchor = config.attribute("name").map(str::to_string);
        let components = Arc::clone(tree.component_manager());

        let selector = components
            .matchers()
            .map_err(|e| BuildError::component(&location, e))?;
        let preparable = selector
            .select(&hint)
            .map_err(|e| BuildError::component(&location, e))?
            .is_preparable();

        let prepared = if preparable && !pattern.needs_resolve() {
            let prepared = selector
                .select(&hint)
                .and_then(|matcher| matcher.prepare(pattern.expression()))
                .map_err(|source_err| BuildError::Pattern {
                    pattern: source.to_string(),
                    location: location.clone(),
                    source: source_err,
                })?;
            let slot = ComponentSlot::for_hint(selector, &hint)
                .map_err(|e| BuildError::component(&location, e))?;
            Some((prepared, slot))
        } else {
            None
        };

        let children = self.policy.build_children(config, tree, true)?;
        let node: NodeRef = match prepared {
            Some((pattern, slot)) => Arc::new(PreparableMatchNode {
                hint,
                pattern,
                slot,
                anchor,
                parameters: children.parameters,
                components,
                children: children.nodes,
                location,
            }),
            None => Arc::new(MatchNode {
                hint,
                pattern,
                anchor,
                parameters: children.parameters,
                components,
                children: children.nodes,
                location,
            }),
        };
        Ok(tree.setup_node(node))
    }
}
