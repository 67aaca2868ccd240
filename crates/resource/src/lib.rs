//! Resource providers for the trellis sitemap processor.
//!
//! - [`FilesystemResourceProvider`]: sitemaps and content under a site directory
//! - [`InMemoryResourceProvider`]: re-exported from trellis-traits

mod filesystem;

pub use filesystem::FilesystemResourceProvider;

pub use trellis_traits::InMemoryResourceProvider;
