//! Sitemap components: the pluggable pieces a sitemap refers to by type.
//!
//! Every trait here takes `&self`. Whether one instance may be shared by
//! concurrent requests or must be handed out from a pool is decided when the
//! component is registered, not by the trait.

use crate::environment::{Environment, EnvironmentError};
use crate::resource::ResourceError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Resolved name/value parameters, and the result maps pushed by matchers
/// and actions.
pub type Parameters = HashMap<String, String>;

/// Content flowing from a generator through transformers to a serializer.
pub type Content = String;

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("No {role} registered for hint '{hint}'")]
    Unavailable { role: String, hint: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Pipeline setup failed: {0}")]
    Setup(String),

    #[error("Component failed: {0}")]
    Execution(String),

    #[error("Component manager has been disposed")]
    Disposed,

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

impl ComponentError {
    pub fn unavailable(role: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Unavailable {
            role: role.into(),
            hint: hint.into(),
        }
    }

    pub fn pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// A matcher pattern compiled once at tree-build time.
#[derive(Clone)]
pub struct PreparedPattern {
    source: String,
    compiled: Arc<dyn Any + Send + Sync>,
}

impl PreparedPattern {
    pub fn new<T: Any + Send + Sync>(source: impl Into<String>, compiled: T) -> Self {
        Self {
            source: source.into(),
            compiled: Arc::new(compiled),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.compiled.downcast_ref::<T>()
    }
}

impl fmt::Debug for PreparedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedPattern")
            .field("source", &self.source)
            .finish()
    }
}

/// Tests a request against a pattern. A match yields the result map that
/// children of the match see as their innermost scope.
pub trait Matcher: Send + Sync {
    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError>;

    /// Whether [`Matcher::prepare`] can pre-compile patterns.
    fn is_preparable(&self) -> bool {
        false
    }

    fn prepare(&self, pattern: &str) -> Result<PreparedPattern, ComponentError> {
        Err(ComponentError::pattern(pattern, "matcher does not support prepared patterns"))
    }

    fn prepared_match(
        &self,
        pattern: &PreparedPattern,
        env: &dyn Environment,
        parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError> {
        self.matches(pattern.source(), env, parameters)
    }
}

/// Evaluates the `test` expression of a `<when>` branch.
pub trait Selector: Send + Sync {
    fn select(
        &self,
        expression: &str,
        env: &dyn Environment,
        parameters: &Parameters,
    ) -> Result<bool, ComponentError>;
}

/// Performs a side effect; `Some` result means success and becomes the
/// scope of the action's children.
pub trait Action: Send + Sync {
    fn act(
        &self,
        env: &mut dyn Environment,
        source: Option<&str>,
        parameters: &Parameters,
    ) -> Result<Option<Parameters>, ComponentError>;
}

/// Supplies values to `{module:expression}` placeholders.
pub trait InputModule: Send + Sync {
    fn attribute(&self, name: &str, env: &dyn Environment) -> Result<Option<String>, ComponentError>;
}

pub trait Generator: Send + Sync {
    fn generate(
        &self,
        source: Option<&str>,
        parameters: &Parameters,
        env: &mut dyn Environment,
    ) -> Result<Content, ComponentError>;
}

pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        content: Content,
        source: Option<&str>,
        parameters: &Parameters,
        env: &mut dyn Environment,
    ) -> Result<Content, ComponentError>;
}

pub trait Serializer: Send + Sync {
    fn mime_type(&self) -> &str;

    fn serialize(&self, content: Content, env: &mut dyn Environment) -> Result<(), ComponentError>;
}

/// Streams a source straight to the response, bypassing generation.
pub trait Reader: Send + Sync {
    fn mime_type(&self, source: &str) -> &str;

    fn read(
        &self,
        source: &str,
        parameters: &Parameters,
        env: &mut dyn Environment,
    ) -> Result<(), ComponentError>;
}
