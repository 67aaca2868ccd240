//! Error types for building and invoking processing trees.

use crate::configuration::Location;
use thiserror::Error;
use trellis_traits::{ComponentError, EnvironmentError, ResourceError};

/// A sitemap that is well-formed XML but not a valid sitemap.
///
/// Every variant names the offending element (or value) and where it was
/// declared, so a failed build can always be traced back to the source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown element '{element}' at {location}")]
    UnknownElement { element: String, location: Location },

    #[error("Element '{element}' at {location} is in namespace '{namespace}', expected '{expected}'")]
    InvalidNamespace {
        element: String,
        namespace: String,
        expected: String,
        location: Location,
    },

    #[error("Element '{element}' is not allowed inside '{parent}' at {location}")]
    DisallowedChild {
        element: String,
        parent: String,
        location: Location,
    },

    #[error("Element '{element}' at {location} does not accept parameters")]
    ParametersNotAllowed { element: String, location: Location },

    #[error("Element '{element}' at {location} requires a '{child}' child")]
    MissingChild {
        child: String,
        element: String,
        location: Location,
    },

    #[error("Missing required attribute '{attribute}' on '{element}' at {location}")]
    MissingAttribute {
        attribute: String,
        element: String,
        location: Location,
    },

    #[error("No type given on '{element}' at {location} and no default {category} is declared")]
    MissingDefault {
        category: String,
        element: String,
        location: Location,
    },

    #[error("Unknown {category} '{hint}' referenced at {location}")]
    UnknownComponent {
        category: String,
        hint: String,
        location: Location,
    },

    #[error("Duplicate {kind} '{name}' at {location}")]
    Duplicate {
        kind: String,
        name: String,
        location: Location,
    },

    #[error("Reference to undeclared {kind} '{name}' at {location}")]
    UnresolvedReference {
        kind: String,
        name: String,
        location: Location,
    },

    #[error("No node builder '{builder}' is registered (required by element '{element}')")]
    UnknownBuilder { builder: String, element: String },

    #[error("Invalid value '{value}' for '{attribute}' at {location}: {message}")]
    InvalidValue {
        attribute: String,
        value: String,
        message: String,
        location: Location,
    },
}

impl ConfigurationError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::UnknownElement { location, .. }
            | Self::InvalidNamespace { location, .. }
            | Self::DisallowedChild { location, .. }
            | Self::ParametersNotAllowed { location, .. }
            | Self::MissingChild { location, .. }
            | Self::MissingAttribute { location, .. }
            | Self::MissingDefault { location, .. }
            | Self::UnknownComponent { location, .. }
            | Self::Duplicate { location, .. }
            | Self::UnresolvedReference { location, .. }
            | Self::InvalidValue { location, .. } => Some(location),
            Self::UnknownBuilder { .. } => None,
        }
    }
}

/// Anything that stops a sitemap from being turned into a processing tree.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A known element whose construction failed for a reason that is not
    /// itself a configuration error.
    #[error("Failed to build '{element}' at {location}: {source}")]
    Node {
        element: String,
        location: Location,
        #[source]
        source: Box<BuildError>,
    },

    #[error("Invalid pattern '{pattern}' at {location}: {source}")]
    Pattern {
        pattern: String,
        location: Location,
        #[source]
        source: ComponentError,
    },

    #[error("Invalid expression '{expression}' at {location}: {message}")]
    Expression {
        expression: String,
        message: String,
        location: Location,
    },

    #[error("Malformed XML in '{uri}': {message}")]
    Xml { uri: String, message: String },

    #[error("Cannot load sitemap '{uri}': {source}")]
    Resource {
        uri: String,
        #[source]
        source: ResourceError,
    },

    #[error("Registered node '{name}' was requested before the tree was complete")]
    RegistryNotReady { name: String },

    #[error("Component setup failed at {location}: {source}")]
    Component {
        location: Location,
        #[source]
        source: ComponentError,
    },
}

impl BuildError {
    pub fn xml(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Xml {
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub fn component(location: &Location, source: ComponentError) -> Self {
        Self::Component {
            location: location.clone(),
            source,
        }
    }

    /// Configuration errors pass through parent builders untouched; all
    /// other failures get wrapped once with the failing element.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Node { .. })
    }

    pub(crate) fn wrap(self, element: &str, location: &Location) -> Self {
        if self.is_configuration() {
            self
        } else {
            Self::Node {
                element: element.to_string(),
                location: location.clone(),
                source: Box::new(self),
            }
        }
    }
}

/// Failures while a request travels through a built tree.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("No pipeline matched '{uri}'")]
    NotFound { uri: String },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("{source} (at {location})")]
    Component {
        location: Location,
        #[source]
        source: ComponentError,
    },

    #[error("Cannot resolve '{expression}': {message}")]
    Variable { expression: String, message: String },

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("Redirect to '{uri}' at {location} is not allowed while only building a pipeline")]
    RedirectInBuildMode { uri: String, location: Location },

    #[error("Internal processor error: {0}")]
    Internal(String),
}

impl ProcessingError {
    pub fn not_found(uri: impl Into<String>) -> Self {
        Self::NotFound { uri: uri.into() }
    }

    pub fn component(location: &Location, source: ComponentError) -> Self {
        Self::Component {
            location: location.clone(),
            source,
        }
    }

    pub fn variable(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Variable {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short classification used by error handlers: `"not-found"` for
    /// unmatched requests, `"server-error"` for everything else.
    pub fn kind(&self) -> &'static str {
        if self.is_not_found() {
            "not-found"
        } else {
            "server-error"
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Component { location, .. } | Self::RedirectInBuildMode { location, .. } => {
                Some(location)
            }
            Self::Build(BuildError::Configuration(err)) => err.location(),
            Self::Build(BuildError::Node { location, .. }) => Some(location),
            _ => None,
        }
    }
}
