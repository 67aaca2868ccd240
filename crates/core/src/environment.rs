//! In-process request environment.

use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use trellis_traits::{Addressing, Environment, EnvironmentError, ObjectModel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub uri: String,
    pub permanent: bool,
}

/// A request held entirely in memory: parameters and attributes in, body,
/// content type and redirect out.
#[derive(Debug, Default)]
pub struct RequestEnvironment {
    addressing: Addressing,
    parameters: BTreeMap<String, String>,
    attributes: HashMap<String, Value>,
    object_model: ObjectModel,
    internal: bool,
    content_type: Option<String>,
    output: Vec<u8>,
    redirect: Option<Redirect>,
}

impl RequestEnvironment {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            addressing: Addressing::new(uri),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.addressing.context = context.into();
        self
    }

    /// Marks the request as issued by the processor itself, which lets it
    /// reach internal-only pipelines.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// The output decoded as UTF-8, lossily.
    pub fn body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn redirection(&self) -> Option<&Redirect> {
        self.redirect.as_ref()
    }

    pub fn into_output(self) -> Vec<u8> {
        self.output
    }
}

impl Environment for RequestEnvironment {
    fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    fn replace_addressing(&mut self, addressing: Addressing) -> Addressing {
        std::mem::replace(&mut self.addressing, addressing)
    }

    fn object_model(&self) -> &ObjectModel {
        &self.object_model
    }

    fn object_model_mut(&mut self) -> &mut ObjectModel {
        &mut self.object_model
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    fn set_attribute(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    fn is_internal(&self) -> bool {
        self.internal
    }

    fn redirect(&mut self, uri: &str, permanent: bool) -> Result<(), EnvironmentError> {
        if self.redirect.is_some() {
            return Err(EnvironmentError::AlreadyRedirected(uri.to_string()));
        }
        log::debug!("Redirecting '{}' to '{}'", self.addressing.full_uri(), uri);
        self.redirect = Some(Redirect {
            uri: uri.to_string(),
            permanent,
        });
        Ok(())
    }

    fn set_content_type(&mut self, mime_type: &str) {
        self.content_type = Some(mime_type.to_string());
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), EnvironmentError> {
        if self.redirect.is_some() {
            return Err(EnvironmentError::Output(
                "cannot write a body after a redirect".to_string(),
            ));
        }
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    fn reset_response(&mut self) -> bool {
        if self.redirect.is_some() {
            return false;
        }
        self.output.clear();
        self.content_type = None;
        true
    }
}
