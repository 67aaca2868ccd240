use crate::builder::{NodeSpec, ProcessingNodeBuilder, TreeBuilder};
use crate::components::ComponentManager;
use crate::configuration::{Configuration, Location};
use crate::context::InvokeContext;
use crate::error::{BuildError, ProcessingError};
use crate::node::{NodeRef, ProcessingNode};
use crate::processor::{DEFAULT_SITEMAP, ProcessorShared, TreeProcessor};
use crate::variables::VariableResolver;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use trellis_traits::{AddressingScope, Environment, resolve_uri};

/// `<map:mount>`: hands the request to another sitemap.
///
/// Child processors are created on first use and cached per resolved
/// source for the lifetime of the node, so every request to the same
/// mount shares one child tree.
#[derive(Debug)]
pub struct MountNode {
    prefix: VariableResolver,
    source: VariableResolver,
    check_reload: bool,
    pass_through: bool,
    shared: Arc<ProcessorShared>,
    components: Arc<ComponentManager>,
    processors: RwLock<HashMap<String, Arc<TreeProcessor>>>,
    creation: Mutex<()>,
    location: Location,
}

fn poisoned(what: &str) -> ProcessingError {
    ProcessingError::internal(format!("mount {what} lock poisoned"))
}

impl MountNode {
    /// Number of child processors created so far.
    pub fn processor_count(&self) -> usize {
        self.processors.read().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    /// The child processor for `key`, created at most once.
    fn processor(&self, key: &str) -> Result<Arc<TreeProcessor>, ProcessingError> {
        if let Some(processor) = self.processors.read().map_err(|_| poisoned("cache"))?.get(key) {
            return Ok(Arc::clone(processor));
        }

        let _creating = self.creation.lock().map_err(|_| poisoned("creation"))?;
        if let Some(processor) = self.processors.read().map_err(|_| poisoned("cache"))?.get(key) {
            return Ok(Arc::clone(processor));
        }

        let sitemap = if key.is_empty() || key.ends_with('/') {
            format!("{key}{DEFAULT_SITEMAP}")
        } else {
            key.to_string()
        };
        log::info!("Creating child processor for '{sitemap}' mounted at {}", self.location);
        let processor = Arc::new(TreeProcessor::child(
            Arc::clone(&self.shared),
            &sitemap,
            Arc::clone(&self.components),
            self.check_reload,
        ));
        self.processors
            .write()
            .map_err(|_| poisoned("cache"))?
            .insert(key.to_string(), Arc::clone(&processor));
        Ok(processor)
    }
}

impl ProcessingNode for MountNode {
    fn invoke(
        &self,
        env: &mut dyn Environment,
        context: &mut InvokeContext,
    ) -> Result<bool, ProcessingError> {
        let mut prefix = self.prefix.resolve(context, env)?;
        let source = self.source.resolve(context, env)?;
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        let key = resolve_uri(&source, &env.addressing().context);
        let processor = self.processor(&key)?;
        let addressing = env.addressing().change_context(&prefix, processor.context_dir())?;
        log::debug!(
            "Mounting '{}' onto '{}' (prefix '{prefix}')",
            env.addressing().full_uri(),
            processor.source()
        );

        // The scope puts the caller's addressing back on every exit path.
        let mut scoped = AddressingScope::enter(env, addressing);
        if context.is_build_pipeline_only() {
            match processor.build_pipeline_with(&mut *scoped, self.pass_through)? {
                Some(pipeline) => {
                    context.set_processing_pipeline(pipeline);
                    Ok(true)
                }
                None => Ok(false),
            }
        } else {
            processor.process_with(&mut *scoped, self.pass_through)
        }
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn requires_dispose(&self) -> bool {
        true
    }

    fn dispose(&self) {
        match self.processors.write() {
            Ok(mut processors) => {
                for (key, processor) in processors.drain() {
                    log::debug!("Disposing child processor for '{key}'");
                    processor.dispose();
                }
            }
            Err(_) => log::warn!("Mount cache at {} is poisoned, child processors not disposed", self.location),
        }
    }
}

pub struct MountNodeBuilder;

impl MountNodeBuilder {
    pub fn create(_spec: &NodeSpec) -> Result<Box<dyn ProcessingNodeBuilder>, BuildError> {
        Ok(Box::new(Self))
    }
}

impl ProcessingNodeBuilder for MountNodeBuilder {
    fn build_node(
        &mut self,
        config: &Configuration,
        tree: &mut TreeBuilder,
    ) -> Result<NodeRef, BuildError> {
        let prefix = tree.required_expression(config, "uri-prefix")?;
        let source = tree.required_expression(config, "src")?;
        let node: NodeRef = Arc::new(MountNode {
            prefix,
            source,
            check_reload: config.attribute_as_bool("check-reload", true)?,
            pass_through: config.attribute_as_bool("pass-through", false)?,
            shared: Arc::clone(tree.shared()),
            components: Arc::clone(tree.component_manager()),
            processors: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
            location: config.location().clone(),
        });
        Ok(tree.setup_node(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;
    use crate::node::{node_as, node_ref};
    use crate::nodes::{PipelinesNode, PreparableMatchNode};
    use crate::nodes::testing::{pipelines, provider};
    use trellis_traits::Addressing;

    const SUB: &str = r#"<map:pipeline>
        <map:match pattern="page"><map:read src="page.txt"/></map:match>
      </map:pipeline>"#;

    fn processor(mount: &str) -> TreeProcessor {
        let main = pipelines(&format!(
            r#"<map:pipeline><map:match pattern="sub/**">{mount}</map:match></map:pipeline>"#
        ));
        let sub = pipelines(SUB);
        TreeProcessor::new(
            provider(&[
                ("sitemap.xmap", &main),
                ("sub/sitemap.xmap", &sub),
                ("sub/page.txt", "sub page"),
            ]),
            "sitemap.xmap",
        )
        .unwrap()
    }

    fn mount_node(processor: &TreeProcessor) -> Arc<MountNode> {
        let tree = processor.tree().unwrap();
        let root = node_ref::<PipelinesNode>(tree.root()).unwrap();
        let matcher = node_ref::<PreparableMatchNode>(&root.pipelines()[0].children()[0]).unwrap();
        node_as::<MountNode>(&matcher.children()[0]).unwrap()
    }

    #[test]
    fn test_mount_resolves_relative_to_child_sitemap() {
        let _ = env_logger::builder().is_test(true).try_init();

        let processor = processor(r#"<map:mount uri-prefix="sub" src="sub/"/>"#);
        let mut env = RequestEnvironment::new("sub/page");
        assert!(processor.process(&mut env).unwrap());
        assert_eq!(env.body(), "sub page");
        assert_eq!(env.addressing(), &Addressing::new("sub/page"));
    }

    #[test]
    fn test_sequential_requests_share_child_processor() {
        let processor = processor(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#);
        for _ in 0..3 {
            let mut env = RequestEnvironment::new("sub/page");
            assert!(processor.process(&mut env).unwrap());
        }
        assert_eq!(mount_node(&processor).processor_count(), 1);
    }

    #[test]
    fn test_addressing_restored_after_error() {
        let processor = processor(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#);
        let mut env = RequestEnvironment::new("sub/nothing");
        assert!(processor.process(&mut env).unwrap_err().is_not_found());
        assert_eq!(env.addressing(), &Addressing::new("sub/nothing"));
    }

    #[test]
    fn test_pass_through_reports_no_match() {
        let processor = processor(r#"<map:mount uri-prefix="sub/" src="sub/" pass-through="true"/>"#);
        let mut env = RequestEnvironment::new("sub/nothing");
        // The child declines; the parent's last pipeline then reports 404.
        let err = processor.process(&mut env).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(env.addressing(), &Addressing::new("sub/nothing"));
    }

    #[test]
    fn test_build_only_mode_without_match_is_false() {
        let processor = processor(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#);
        let mut env = RequestEnvironment::new("sub/nothing");
        assert!(processor.build_pipeline(&mut env).unwrap().is_none());

        let mut env = RequestEnvironment::new("sub/page");
        let pipeline = processor.build_pipeline(&mut env).unwrap().unwrap();
        assert!(pipeline.describe().contains("read:resource"));
        assert!(env.output().is_empty());
    }

    #[test]
    fn test_dispose_disposes_children() {
        let processor = processor(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#);
        let mut env = RequestEnvironment::new("sub/page");
        processor.process(&mut env).unwrap();
        let mount = mount_node(&processor);
        mount.dispose();
        assert_eq!(mount.processor_count(), 0);
    }
}
