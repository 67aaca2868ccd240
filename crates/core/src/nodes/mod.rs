//! The built-in processing nodes and the builders that compile them.

mod act;
mod error_handler;
mod matching;
mod mount;
mod pipeline;
mod pipelines;
mod redirect;
mod resource;
mod select;
mod sitemap;
mod stages;

pub use act::{ActNode, ActNodeBuilder};
pub use error_handler::{ErrorFilter, HandleErrorsNode, HandleErrorsNodeBuilder};
pub use matching::{MatchNode, MatchNodeBuilder, PreparableMatchNode};
pub use mount::{MountNode, MountNodeBuilder};
pub use pipeline::{PipelineNode, PipelineNodeBuilder};
pub use pipelines::{PipelinesNode, PipelinesNodeBuilder};
pub use redirect::{RedirectToNode, RedirectToNodeBuilder};
pub use resource::{CallNode, CallNodeBuilder, ContainerNode, ResourceNodeBuilder};
pub use select::{SelectNode, SelectNodeBuilder};
pub use sitemap::SitemapNodeBuilder;
pub use stages::{GenerateNode, ReadNode, SerializeNode, StageNodeBuilder, TransformNode};

use crate::builder::Language;

/// Prefix under which `<map:resource>` nodes are registered.
pub const RESOURCE_PREFIX: &str = "resource:";

pub(crate) fn register_builtin_builders(language: &mut Language) {
    language
        .register_builder("sitemap", SitemapNodeBuilder::create)
        .register_builder("pipelines", PipelinesNodeBuilder::create)
        .register_builder("pipeline", PipelineNodeBuilder::create)
        .register_builder("handle-errors", HandleErrorsNodeBuilder::create)
        .register_builder("match", MatchNodeBuilder::create)
        .register_builder("select", SelectNodeBuilder::create)
        .register_builder("act", ActNodeBuilder::create)
        .register_builder("mount", MountNodeBuilder::create)
        .register_builder("resource", ResourceNodeBuilder::create)
        .register_builder("call", CallNodeBuilder::create)
        .register_builder("generate", StageNodeBuilder::generate)
        .register_builder("transform", StageNodeBuilder::transform)
        .register_builder("serialize", StageNodeBuilder::serialize)
        .register_builder("read", StageNodeBuilder::read)
        .register_builder("redirect-to", RedirectToNodeBuilder::create);
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::builder::{BuiltTree, TreeBuilder};
    use crate::components::ComponentManager;
    use crate::configuration::SITEMAP_NAMESPACE;
    use crate::processor::ProcessorShared;
    use std::sync::Arc;
    use trellis_traits::InMemoryResourceProvider;

    pub fn sitemap(body: &str) -> String {
        format!(r#"<map:sitemap xmlns:map="{SITEMAP_NAMESPACE}">{body}</map:sitemap>"#)
    }

    pub fn pipelines(body: &str) -> String {
        sitemap(&format!("<map:pipelines>{body}</map:pipelines>"))
    }

    pub fn provider(files: &[(&str, &str)]) -> Arc<InMemoryResourceProvider> {
        let provider = Arc::new(InMemoryResourceProvider::new());
        for (path, data) in files {
            provider.add(*path, *data).unwrap();
        }
        provider
    }

    pub fn shared(files: &[(&str, &str)]) -> Arc<ProcessorShared> {
        Arc::new(ProcessorShared::new(provider(files)).unwrap())
    }

    pub fn build(shared: &Arc<ProcessorShared>, uri: &str) -> Result<BuiltTree, crate::error::BuildError> {
        let components = ComponentManager::root(Arc::clone(&shared.registry));
        TreeBuilder::new(Arc::clone(shared), components).build(uri)
    }
}
