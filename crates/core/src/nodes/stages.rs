use crate::builder::{NodeSpec, ParentNodeBuilder, ProcessingNodeBuilder, TreeBuilder};
use crate::components::Category;
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::{NodeParameters, NodeRef, ProcessingNode};
use crate::variables::VariableResolver;
use std::sync::Arc;
use trellis_traits::{Environment, resolve_uri};

/// Resolves a stage source against the directory of the sitemap whose
/// addressing is current when the stage is added.
fn resolve_source(
    source: &VariableResolver,
    env: &dyn Environment,
    context: &InvokeContext,
) -> Result<String, ProcessingError> {
    let source = source.resolve(context, env)?;
    Ok(resolve_uri(&source, &env.addressing().context))
}

/// Runs the pipeline once its last stage is in place, or just reports
/// success when the caller only wants the pipeline assembled.
fn finish_pipeline(
    env: &mut dyn Environment,
    context: &mut InvokeContext,
    location: &Location,
) -> Result<bool, ProcessingError> {
    if context.is_build_pipeline_only() {
        return Ok(true);
    }
    let pipeline = context.processing_pipeline(&*env)?;
    log::debug!("Processing '{}' with {}", env.addressing().full_uri(), pipeline.describe());
    pipeline
        .process(env)
        .map_err(|e| ProcessingError::component(location, e))
}

/// `<map:generate>`
#[derive(Debug)]
pub struct GenerateNode {
    hint: String,
    source: Option<VariableResolver>,
    parameters: NodeParameters,
    location: Location,
}

impl ProcessingNode for GenerateNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let source = self
            .source
            .as_ref()
            .map(|source| resolve_source(source, env, context))
            .transpose()?;
        let parameters = self.parameters.resolve(context, env)?;
        context
            .processing_pipeline(&*env)?
            .set_generator(&self.hint, source.as_deref(), parameters)
            .map_err(|e| ProcessingError::component(&self.location, e))?;
        Ok(false)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// `<map:transform>`
#[derive(Debug)]
pub struct TransformNode {
    hint: String,
    source: Option<VariableResolver>,
    parameters: NodeParameters,
    location: Location,
}

impl ProcessingNode for TransformNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let source = self
            .source
            .as_ref()
            .map(|source| resolve_source(source, env, context))
            .transpose()?;
        let parameters = self.parameters.resolve(context, env)?;
        context
            .processing_pipeline(&*env)?
            .add_transformer(&self.hint, source.as_deref(), parameters)
            .map_err(|e| ProcessingError::component(&self.location, e))?;
        Ok(false)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// `<map:serialize>`: closes the pipeline and runs it.
#[derive(Debug)]
pub struct SerializeNode {
    hint: String,
    mime_type: Option<VariableResolver>,
    parameters: NodeParameters,
    location: Location,
}

impl ProcessingNode for SerializeNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let mime_type = self
            .mime_type
            .as_ref()
            .map(|mime| mime.resolve(context, env))
            .transpose()?;
        let parameters = self.parameters.resolve(context, env)?;
        context
            .processing_pipeline(&*env)?
            .set_serializer(&self.hint, mime_type.as_deref(), parameters)
            .map_err(|e| ProcessingError::component(&self.location, e))?;
        finish_pipeline(env, context, &self.location)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

/// `<map:read>`: a single-stage pipeline that streams `src` as-is.
#[derive(Debug)]
pub struct ReadNode {
    hint: String,
    source: VariableResolver,
    mime_type: Option<VariableResolver>,
    parameters: NodeParameters,
    location: Location,
}

impl ReadNode {
    pub fn source(&self) -> &str {
        self.source.expression()
    }
}

impl ProcessingNode for ReadNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let source = resolve_source(&self.source, env, context)?;
        let mime_type = self
            .mime_type
            .as_ref()
            .map(|mime| mime.resolve(context, env))
            .transpose()?;
        let parameters = self.parameters.resolve(context, env)?;
        context
            .processing_pipeline(&*env)?
            .set_reader(&self.hint, &source, mime_type.as_deref(), parameters)
            .map_err(|e| ProcessingError::component(&self.location, e))?;
        finish_pipeline(env, context, &self.location)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Generate,
    Transform,
    Serialize,
    Read,
}

impl StageKind {
    fn category(self) -> Category {
        match self {
            Self::Generate => Category::Generator,
            Self::Transform => Category::Transformer,
            Self::Serialize => Category::Serializer,
            Self::Read => Category::Reader,
        }
    }
}

/// Builds the four pipeline stage elements. Stages take parameters but no
/// other children.
pub struct StageNodeBuilder {
    kind: StageKind,
    policy: ParentNodeBuilder,
}

impl StageNodeBuilder {
    fn boxed(kind: StageKind, spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self {
            kind,
            policy: ParentNodeBuilder::from_spec(spec),
        }))
    }

    pub fn generate(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Self::boxed(StageKind::Generate, spec)
    }

    pub fn transform(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Self::boxed(StageKind::Transform, spec)
    }

    pub fn serialize(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Self::boxed(StageKind::Serialize, spec)
    }

    pub fn read(spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Self::boxed(StageKind::Read, spec)
    }
}

impl ProcessingNodeBuilder for StageNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let hint = tree.resolve_hint(self.kind.category(), config)?;
        let parameters = self.policy.build_children(config, tree, true)?.parameters;
        let location = config.location().clone();

        let node: NodeRef = match self.kind {
            StageKind::Generate => Arc::new(GenerateNode {
                hint,
                source: tree.expression(config, "src")?,
                parameters,
                location,
            }),
            StageKind::Transform => Arc::new(TransformNode {
                hint,
                source: tree.expression(config, "src")?,
                parameters,
                location,
            }),
            StageKind::Serialize => Arc::new(SerializeNode {
                hint,
                mime_type: tree.expression(config, "mime-type")?,
                parameters,
                location,
            }),
            StageKind::Read => Arc::new(ReadNode {
                hint,
                source: tree.required_expression(config, "src")?,
                mime_type: tree.expression(config, "mime-type")?,
                parameters,
                location,
            }),
        };
        Ok(tree.setup_node(node))
    }
}
