//! The processing pipeline assembled by a matched sitemap branch.

use crate::component::{ComponentError, Parameters};
use crate::environment::Environment;

/// A generator, zero or more transformers and a serializer, or a single reader.
///
/// Stages are named by resolved component hints. The pipeline looks the
/// components up itself, so it can also hand them back when it is released.
pub trait ProcessingPipeline: Send {
    /// Called once, right after the pipeline is acquired, with the
    /// parameters declared on the enclosing `<pipeline>` element.
    fn setup(&mut self, parameters: &Parameters) -> Result<(), ComponentError>;

    fn set_generator(
        &mut self,
        hint: &str,
        source: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError>;

    fn add_transformer(
        &mut self,
        hint: &str,
        source: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError>;

    fn set_serializer(
        &mut self,
        hint: &str,
        mime_type: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError>;

    fn set_reader(
        &mut self,
        hint: &str,
        source: &str,
        mime_type: Option<&str>,
        parameters: Parameters,
    ) -> Result<(), ComponentError>;

    /// Runs the assembled pipeline against the request.
    fn process(&mut self, env: &mut dyn Environment) -> Result<bool, ComponentError>;

    /// Human-readable summary of the assembled stages, for logs.
    fn describe(&self) -> String;
}
