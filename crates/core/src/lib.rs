//! # trellis-core
//!
//! Compiles sitemap configuration into trees of processing nodes and walks
//! requests through them.
//!
//! - **builder**: the two-pass tree builder and the data-driven sitemap language
//! - **nodes**: the built-in processing nodes (pipelines, match, select, act, mount, ...)
//! - **context**: per-request scope stack and processing pipeline
//! - **components**: component registry, per-sitemap managers and built-in components
//! - **variables**: `{..}` expression resolution
//! - **processor**: [`TreeProcessor`], the entry point
//!
//! The crate does no I/O of its own. Sitemaps and content are loaded
//! through a [`ResourceProvider`], and requests arrive as an
//! [`Environment`].

pub use trellis_traits as traits;

pub mod builder;
pub mod components;
pub mod configuration;
pub mod context;
pub mod environment;
pub mod error;
pub mod node;
pub mod nodes;
pub mod processor;
pub mod variables;

pub use builder::{BuildPhase, Language, OutlineEntry, ProcessingNodeBuilder, TreeBuilder};
pub use components::{ComponentManager, ComponentRegistry, PipelineHandle};
pub use configuration::{Configuration, Location, SITEMAP_NAMESPACE};
pub use context::InvokeContext;
pub use environment::{Redirect, RequestEnvironment};
pub use error::{BuildError, ConfigurationError, ProcessingError};
pub use node::{NodeRef, ProcessingNode};
pub use processor::{DEFAULT_SITEMAP, ProcessingTree, ProcessorShared, TreeProcessor};

pub use traits::{
    Addressing, ComponentError, Environment, InMemoryResourceProvider, ResourceError,
    ResourceProvider,
};
