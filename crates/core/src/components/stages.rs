//! Built-in generator, serializers and reader.

use std::path::Path;
use std::sync::Arc;
use trellis_traits::{
    ComponentError, Content, Environment, Generator, Parameters, Reader, ResourceProvider,
    Serializer, Transformer,
};

fn load_text(provider: &dyn ResourceProvider, uri: &str) -> Result<Content, ComponentError> {
    let bytes = provider.load(uri)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ComponentError::execution(format!("'{uri}' is not valid UTF-8: {e}")))
}

/// Reads its `src` through the resource provider. Sources arrive already
/// resolved against the sitemap that configured the stage.
#[derive(Debug)]
pub struct FileGenerator {
    provider: Arc<dyn ResourceProvider>,
}

impl FileGenerator {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }
}

impl Generator for FileGenerator {
    fn generate(
        &self,
        source: Option<&str>,
        _parameters: &Parameters,
        _env: &mut dyn Environment,
    ) -> Result<Content, ComponentError> {
        let source =
            source.ok_or_else(|| ComponentError::setup("the file generator needs a 'src'"))?;
        load_text(self.provider.as_ref(), source)
    }
}

/// Passes content through untouched. With a `prefix` or `suffix`
/// parameter it wraps the content, which is enough to see a chain of
/// transformers at work.
#[derive(Debug, Default)]
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
    fn transform(
        &self,
        content: Content,
        _source: Option<&str>,
        parameters: &Parameters,
        _env: &mut dyn Environment,
    ) -> Result<Content, ComponentError> {
        let prefix = parameters.get("prefix").map(String::as_str).unwrap_or_default();
        let suffix = parameters.get("suffix").map(String::as_str).unwrap_or_default();
        Ok(format!("{prefix}{content}{suffix}"))
    }
}

/// Writes the content unchanged under a fixed MIME type.
#[derive(Debug, Clone)]
pub struct TextSerializer {
    mime_type: String,
}

impl TextSerializer {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
        }
    }
}

impl Serializer for TextSerializer {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn serialize(&self, content: Content, env: &mut dyn Environment) -> Result<(), ComponentError> {
        env.write(content.as_bytes())?;
        Ok(())
    }
}

/// Streams a resource to the response as-is.
#[derive(Debug)]
pub struct ResourceReader {
    provider: Arc<dyn ResourceProvider>,
}

impl ResourceReader {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }
}

impl Reader for ResourceReader {
    fn mime_type(&self, source: &str) -> &str {
        let extension = Path::new(source)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension.to_ascii_lowercase().as_str() {
            "html" | "htm" => "text/html",
            "xml" | "xmap" => "text/xml",
            "txt" => "text/plain",
            "css" => "text/css",
            "js" => "application/javascript",
            "json" => "application/json",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "svg" => "image/svg+xml",
            "pdf" => "application/pdf",
            _ => "application/octet-stream",
        }
    }

    fn read(
        &self,
        source: &str,
        _parameters: &Parameters,
        env: &mut dyn Environment,
    ) -> Result<(), ComponentError> {
        let bytes = self.provider.load(source)?;
        env.write(&bytes)?;
        Ok(())
    }
}
