//! Processing pipelines and the factories that produce them.

use super::{ComponentHandle, ComponentManager};
use itertools::Itertools;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use trellis_traits::{
    ComponentError, Environment, Generator, Parameters, ProcessingPipeline, Reader, Serializer,
    Transformer,
};

/// Produces pipelines of one type (`<map:pipe>`).
pub trait PipelineFactory: Send + Sync {
    /// `components` is the manager of the sitemap level that asked for the
    /// pipeline; stages are looked up through it.
    fn create(&self, components: Arc<ComponentManager>) -> Box<dyn ProcessingPipeline>;

    /// Called once when a pipeline handed out by `create` is given back.
    fn release(&self, _pipeline: &mut dyn ProcessingPipeline) {}
}

/// A pipeline on loan from its factory.
pub struct PipelineHandle {
    hint: String,
    pipeline: Box<dyn ProcessingPipeline>,
    factory: ComponentHandle<dyn PipelineFactory>,
}

impl PipelineHandle {
    pub(crate) fn new(
        hint: &str,
        pipeline: Box<dyn ProcessingPipeline>,
        factory: ComponentHandle<dyn PipelineFactory>,
    ) -> Self {
        Self {
            hint: hint.to_string(),
            pipeline,
            factory,
        }
    }

    /// The pipeline type this handle was created from.
    pub fn hint(&self) -> &str {
        &self.hint
    }
}

impl Deref for PipelineHandle {
    type Target = dyn ProcessingPipeline;

    fn deref(&self) -> &Self::Target {
        &*self.pipeline
    }
}

impl DerefMut for PipelineHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.pipeline
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        log::debug!("Releasing {} pipeline", self.hint);
        self.factory.release(&mut *self.pipeline);
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("hint", &self.hint)
            .field("pipeline", &self.pipeline.describe())
            .finish()
    }
}

/// Factory for [`StagedPipeline`]s, registered as the `noncaching` pipe.
#[derive(Debug, Default)]
pub struct NonCachingPipelineFactory;

impl PipelineFactory for NonCachingPipelineFactory {
    fn create(&self, components: Arc<ComponentManager>) -> Box<dyn ProcessingPipeline> {
        Box::new(StagedPipeline::new(components))
    }
}

struct Stage<T: ?Sized + 'static> {
    hint: String,
    component: ComponentHandle<T>,
    source: Option<String>,
    parameters: Parameters,
}

impl<T: ?Sized + 'static> Stage<T> {
    fn label(&self, kind: &str) -> String {
        match &self.source {
            Some(source) => format!("{kind}:{}({source})", self.hint),
            None => format!("{kind}:{}", self.hint),
        }
    }
}

/// Generator, transformers and serializer run in sequence, or a single
/// reader. Nothing is cached between requests.
pub struct StagedPipeline {
    components: Arc<ComponentManager>,
    parameters: Parameters,
    generator: Option<Stage<dyn Generator>>,
    transformers: Vec<Stage<dyn Transformer>>,
    serializer: Option<(Stage<dyn Serializer>, Option<String>)>,
    reader: Option<(Stage<dyn Reader>, Option<String>)>,
}

impl StagedPipeline {
    pub fn new(components: Arc<ComponentManager>) -> Self {
        Self {
            components,
            parameters: Parameters::new(),
            generator: None,
            transformers: Vec::new(),
            serializer: None,
            reader: None,
        }
    }

    /// Parameters given to the pipeline itself by `<map:pipeline>`.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn ensure_open(&self, stage: &str) -> Result<(), ComponentError> {
        if self.reader.is_some() || self.serializer.is_some() {
            return Err(ComponentError::setup(format!(
                "cannot add {stage}: the pipeline already ends in {}",
                self.describe()
            )));
        }
        Ok(())
    }
}

impl ProcessingPipeline for StagedPipeline {
    fn setup(&mut self, parameters: &Parameters) -> Result<(), ComponentError> {
        self.parameters = parameters.clone();
        Ok(())
    }

    fn set_generator(
        &mut self,
        hint: &str,
        source: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError> {
        self.ensure_open("a generator")?;
        if self.generator.is_some() {
            return Err(ComponentError::setup("the pipeline already has a generator"));
        }
        let component = self.components.generators()?.select(hint)?;
        self.generator = Some(Stage {
            hint: hint.to_string(),
            component,
            source: source.map(str::to_string),
            parameters,
        });
        Ok(())
    }

    fn add_transformer(
        &mut self,
        hint: &str,
        source: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError> {
        self.ensure_open("a transformer")?;
        if self.generator.is_none() {
            return Err(ComponentError::setup("a transformer needs a generator before it"));
        }
        let component = self.components.transformers()?.select(hint)?;
        self.transformers.push(Stage {
            hint: hint.to_string(),
            component,
            source: source.map(str::to_string),
            parameters,
        });
        Ok(())
    }

    fn set_serializer(
        &mut self,
        hint: &str,
        mime_type: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError> {
        self.ensure_open("a serializer")?;
        let component = self.components.serializers()?.select(hint)?;
        let stage = Stage {
            hint: hint.to_string(),
            component,
            source: None,
            parameters,
        };
        self.serializer = Some((stage, mime_type.map(str::to_string)));
        Ok(())
    }

    fn set_reader(
        &mut self,
        hint: &str,
        source: &str,
        mime_type: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError> {
        self.ensure_open("a reader")?;
        if self.generator.is_some() {
            return Err(ComponentError::setup("a reader cannot follow a generator"));
        }
        let component = self.components.readers()?.select(hint)?;
        let stage = Stage {
            hint: hint.to_string(),
            component,
            source: Some(source.to_string()),
            parameters,
        };
        self.reader = Some((stage, mime_type.map(str::to_string)));
        Ok(())
    }

    fn process(&mut self, env: &mut dyn Environment) -> Result<bool, ComponentError> {
        if let Some((reader, mime_type)) = &self.reader {
            let source = reader.source.as_deref().unwrap_or_default();
            let mime_type = mime_type
                .as_deref()
                .unwrap_or_else(|| reader.component.mime_type(source));
            env.set_content_type(mime_type);
            reader.component.read(source, &reader.parameters, env)?;
            return Ok(true);
        }

        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| ComponentError::setup("the pipeline has no generator"))?;
        let (serializer, mime_type) = self
            .serializer
            .as_ref()
            .ok_or_else(|| ComponentError::setup("the pipeline has no serializer"))?;

        let mut content = generator.component.generate(
            generator.source.as_deref(),
            &generator.parameters,
            env,
        )?;
        for transformer in &self.transformers {
            content = transformer.component.transform(
                content,
                transformer.source.as_deref(),
                &transformer.parameters,
                env,
            )?;
        }

        let mime_type = mime_type
            .as_deref()
            .unwrap_or_else(|| serializer.component.mime_type());
        env.set_content_type(mime_type);
        serializer.component.serialize(content, env)?;
        Ok(true)
    }

    fn describe(&self) -> String {
        if let Some((reader, _)) = &self.reader {
            return reader.label("read");
        }
        self.generator
            .iter()
            .map(|g| g.label("generate"))
            .chain(self.transformers.iter().map(|t| t.label("transform")))
            .chain(self.serializer.iter().map(|(s, _)| s.label("serialize")))
            .join(" > ")
    }
}
