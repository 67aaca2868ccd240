#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;
use trellis::core::SITEMAP_NAMESPACE;
use trellis::traits::InMemoryResourceProvider;
use trellis::{ComponentRegistry, Dispatcher, ProcessorBuilder, SyncExecutor, TrellisError};
use trellis::executor::ExecutorImpl;
use trellis::traits::ResourceProvider;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Wraps `body` in a `<map:sitemap>` root.
pub fn sitemap(body: &str) -> String {
    format!(r#"<map:sitemap xmlns:map="{SITEMAP_NAMESPACE}">{body}</map:sitemap>"#)
}

/// A sitemap consisting of one `<map:pipelines>` section.
pub fn pipelines(body: &str) -> String {
    sitemap(&format!("<map:pipelines>{body}</map:pipelines>"))
}

/// An in-memory site holding `files`.
pub fn memory_site(files: &[(&str, &str)]) -> Arc<InMemoryResourceProvider> {
    let provider = Arc::new(InMemoryResourceProvider::new());
    for (path, data) in files {
        provider.add(*path, *data).expect("in-memory store");
    }
    provider
}

/// A sequential dispatcher over `provider`, serving `sitemap.xmap`.
pub fn dispatcher(provider: Arc<dyn ResourceProvider>) -> Result<Dispatcher, TrellisError> {
    dispatcher_with(provider, None)
}

/// Like [`dispatcher`], with custom components.
pub fn dispatcher_with(
    provider: Arc<dyn ResourceProvider>,
    registry: Option<ComponentRegistry>,
) -> Result<Dispatcher, TrellisError> {
    let mut builder = ProcessorBuilder::new()
        .with_provider(provider)
        .with_sitemap("sitemap.xmap")
        .with_executor(ExecutorImpl::Sync(SyncExecutor::new()));
    if let Some(registry) = registry {
        builder = builder.with_registry(registry);
    }
    builder.build()
}
