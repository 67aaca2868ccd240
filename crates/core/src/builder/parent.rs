use super::{NodeSpec, TreeBuilder};
use crate::configuration::Configuration;
use crate::error::{BuildError, ConfigurationError};
use crate::node::{NodeParameters, NodeRef};
use crate::variables::VariableResolver;
use std::collections::BTreeSet;

/// Children and parameters of a container element.
#[derive(Debug)]
pub struct BuiltChildren {
    pub nodes: Vec<NodeRef>,
    pub parameters: NodeParameters,
}

/// Child filtering shared by every container builder.
///
/// In order, a child element is:
/// 1. a parameter, when it is the language's parameter element
/// 2. skipped, when it is listed as ignored
/// 3. rejected, when it is not allowed or explicitly forbidden
/// 4. otherwise built as a node
#[derive(Debug, Clone)]
pub struct ParentNodeBuilder {
    element: String,
    parameter_element: String,
    allowed: Option<BTreeSet<String>>,
    forbidden: Option<BTreeSet<String>>,
    ignored: BTreeSet<String>,
}

impl ParentNodeBuilder {
    pub fn from_spec(spec: &NodeSpec) -> Self {
        Self {
            element: spec.element().to_string(),
            parameter_element: spec.parameter_element().to_string(),
            allowed: spec.allowed_children().cloned(),
            forbidden: spec.forbidden_children().cloned(),
            ignored: spec.ignored_children().clone(),
        }
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    fn is_parameter(&self, child: &Configuration, tree: &TreeBuilder) -> bool {
        child.local_name() == self.parameter_element
            && child.namespace() == tree.language().namespace()
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        let allowed = self.allowed.as_ref().is_none_or(|set| set.contains(name));
        let forbidden = self.forbidden.as_ref().is_some_and(|set| set.contains(name));
        allowed && !forbidden
    }

    fn compile_parameter(
        child: &Configuration,
        tree: &TreeBuilder,
    ) -> Result<(VariableResolver, VariableResolver), BuildError> {
        Ok((
            tree.required_expression(child, "name")?,
            tree.required_expression(child, "value")?,
        ))
    }

    /// Builds the node children of `config` and collects its parameters.
    pub fn build_children(
        &self,
        config: &Configuration,
        tree: &mut TreeBuilder,
        accepts_parameters: bool,
    ) -> Result<BuiltChildren, BuildError> {
        let mut nodes = Vec::new();
        let mut parameters = Vec::new();

        for child in config.children() {
            if self.is_parameter(child, tree) {
                if !accepts_parameters {
                    return Err(ConfigurationError::ParametersNotAllowed {
                        element: config.name().to_string(),
                        location: child.location().clone(),
                    }
                    .into());
                }
                parameters.push(Self::compile_parameter(child, tree)?);
                continue;
            }

            if self.is_ignored(child.local_name()) {
                log::debug!("Ignoring '{}' at {}", child.name(), child.location());
                continue;
            }

            if !self.is_allowed(child.local_name()) {
                return Err(ConfigurationError::DisallowedChild {
                    element: child.name().to_string(),
                    parent: config.name().to_string(),
                    location: child.location().clone(),
                }
                .into());
            }

            let node = tree
                .build_node(child)
                .map_err(|e| e.wrap(child.name(), child.location()))?;
            nodes.push(node);
        }

        Ok(BuiltChildren {
            nodes,
            parameters: NodeParameters::new(parameters, config.location().clone()),
        })
    }

    /// Only the parameter children of `config`; other children are left to
    /// the caller.
    pub fn build_parameters(
        &self,
        config: &Configuration,
        tree: &TreeBuilder,
    ) -> Result<NodeParameters, BuildError> {
        let parameters = config
            .children()
            .iter()
            .filter(|child| self.is_parameter(child, tree))
            .map(|child| Self::compile_parameter(child, tree))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(NodeParameters::new(parameters, config.location().clone()))
    }
}
