//! Collaborator contracts consumed by the trellis tree processor.
//!
//! The processor itself never touches files, sockets or XML transformation.
//! It talks to the outside world through the traits defined here:
//!
//! - [`ResourceProvider`]: loads sitemap sources and content by URI
//! - [`Environment`]: one in-flight request (addressing, object model, output)
//! - [`component`]: matchers, selectors, actions, pipeline stages, input modules
//! - [`ProcessingPipeline`]: the generator/transformer/serializer chain
//! - [`Executor`]: runs a batch of requests, possibly in parallel

pub mod component;
pub mod environment;
pub mod executor;
pub mod pipeline;
pub mod resource;

pub use component::{
    Action, ComponentError, Content, Generator, InputModule, Matcher, Parameters,
    PreparedPattern, Reader, Selector, Serializer, Transformer,
};
pub use environment::{Addressing, AddressingScope, Environment, EnvironmentError, ObjectModel};
pub use executor::{Executor, SyncExecutor};
pub use pipeline::ProcessingPipeline;
pub use resource::{
    InMemoryResourceProvider, ResourceError, ResourceProvider, SharedResourceData, resolve_uri,
};
