//! # trellis
//!
//! Serves sitemaps: compiles a sitemap into a processing tree once, then
//! dispatches requests through it, one at a time or in batches on an
//! executor.
//!
//! ```no_run
//! use trellis::{ProcessorBuilder, RequestSpec};
//!
//! let dispatcher = ProcessorBuilder::new().with_sitemap("site/sitemap.xmap").build()?;
//! let outcome = dispatcher.dispatch(&RequestSpec::new("docs/index"));
//! println!("{:?}: {}", outcome.status, outcome.body_text());
//! # Ok::<(), trellis::TrellisError>(())
//! ```

mod builder;
mod dispatch;
mod error;

pub use builder::ProcessorBuilder;
pub use dispatch::{Dispatcher, Outcome, RequestSpec, Status};
pub use error::TrellisError;

// Re-export the workspace crates
pub use trellis_core as core;
pub use trellis_executor as executor;
pub use trellis_resource as resource;
pub use trellis_traits as traits;

pub use trellis_core::{
    BuildError, ComponentRegistry, ConfigurationError, Language, ProcessingError, TreeProcessor,
};
pub use trellis_executor::{ExecutorImpl, SyncExecutor};
#[cfg(feature = "rayon-executor")]
pub use trellis_executor::RayonExecutor;
