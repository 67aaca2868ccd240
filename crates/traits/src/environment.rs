//! The request environment seen by processing nodes.
//!
//! An [`Environment`] is one in-flight request. Its addressing triple
//! (URI, prefix, context) is an immutable [`Addressing`] value: mounting a
//! sub-sitemap computes a new value with [`Addressing::change_context`] and
//! installs it through an [`AddressingScope`], which puts the previous value
//! back when it goes out of scope.

use serde_json::Value;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Per-request object model shared between the processor and its components.
pub type ObjectModel = HashMap<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("The current URI '{uri}' does not start with the prefix '{prefix}'")]
    PrefixMismatch { uri: String, prefix: String },

    #[error("Redirect to '{0}' refused: a redirect was already issued")]
    AlreadyRedirected(String),

    #[error("Output error: {0}")]
    Output(String),
}

/// The URI/prefix/context triple of a request.
///
/// `uri` is relative to the sitemap currently handling the request,
/// `prefix` is what enclosing mounts have stripped from it, and `context`
/// is the directory against which relative sources are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Addressing {
    pub uri: String,
    pub prefix: String,
    pub context: String,
}

impl Addressing {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            uri: uri.trim_start_matches('/').to_string(),
            prefix: String::new(),
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Computes the addressing seen by a mounted sitemap.
    ///
    /// `prefix` is stripped from the URI and appended to the accumulated
    /// prefix; `context` becomes the new resolution directory.
    pub fn change_context(&self, prefix: &str, context: &str) -> Result<Addressing, EnvironmentError> {
        let remainder = self
            .uri
            .strip_prefix(prefix)
            .ok_or_else(|| EnvironmentError::PrefixMismatch {
                uri: self.uri.clone(),
                prefix: prefix.to_string(),
            })?;
        Ok(Addressing {
            uri: remainder.trim_start_matches('/').to_string(),
            prefix: format!("{}{}", self.prefix, prefix),
            context: context.to_string(),
        })
    }

    /// The full request URI, including everything enclosing mounts stripped.
    pub fn full_uri(&self) -> String {
        format!("{}{}", self.prefix, self.uri)
    }
}

/// One request travelling through the processor.
pub trait Environment: Send {
    fn addressing(&self) -> &Addressing;

    /// Installs a new addressing triple and returns the previous one.
    fn replace_addressing(&mut self, addressing: Addressing) -> Addressing;

    fn object_model(&self) -> &ObjectModel;
    fn object_model_mut(&mut self) -> &mut ObjectModel;

    /// Request parameter (query string or form field).
    fn parameter(&self, name: &str) -> Option<&str>;

    /// Names of all request parameters.
    fn parameter_names(&self) -> Vec<String>;

    fn attribute(&self, name: &str) -> Option<&Value>;
    fn set_attribute(&mut self, name: &str, value: Value);
    fn remove_attribute(&mut self, name: &str) -> Option<Value>;

    /// True for requests issued by the processor itself rather than a client.
    fn is_internal(&self) -> bool {
        false
    }

    fn redirect(&mut self, uri: &str, permanent: bool) -> Result<(), EnvironmentError>;

    fn set_content_type(&mut self, mime_type: &str);

    fn write(&mut self, bytes: &[u8]) -> Result<(), EnvironmentError>;

    /// Discards any output written so far. Returns false when the response
    /// can no longer be reset.
    fn reset_response(&mut self) -> bool;
}

/// Installs an [`Addressing`] on an environment for the lifetime of the scope.
///
/// The previous addressing is restored on drop, so it comes back on every
/// exit path: normal return, `?` propagation and unwinding.
pub struct AddressingScope<'a> {
    env: &'a mut dyn Environment,
    saved: Option<Addressing>,
}

impl<'a> AddressingScope<'a> {
    pub fn enter(env: &'a mut dyn Environment, addressing: Addressing) -> Self {
        let saved = env.replace_addressing(addressing);
        Self {
            env,
            saved: Some(saved),
        }
    }
}

impl<'a> Deref for AddressingScope<'a> {
    type Target = dyn Environment + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.env
    }
}

impl<'a> DerefMut for AddressingScope<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.env
    }
}

impl Drop for AddressingScope<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.env.replace_addressing(saved);
        }
    }
}
