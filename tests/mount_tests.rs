mod common;

use common::fixtures::CountingProvider;
use common::{TestResult, dispatcher, pipelines};
use std::sync::{Arc, Barrier};
use trellis::core::node::{node_as, node_ref};
use trellis::core::nodes::{MountNode, PipelinesNode, PreparableMatchNode};
use trellis::core::{RequestEnvironment, TreeProcessor};
use trellis::traits::{Addressing, Environment, InMemoryResourceProvider};
use trellis::{RequestSpec, Status};

fn main_sitemap(mount: &str) -> String {
    pipelines(&format!(
        r#"<map:pipeline><map:match pattern="sub/**">{mount}</map:match></map:pipeline>
           <map:pipeline><map:match pattern="**"><map:read src="fallback.txt"/></map:match></map:pipeline>"#
    ))
}

fn sub_sitemap() -> String {
    pipelines(
        r#"<map:pipeline>
             <map:match pattern="page"><map:read src="page.txt"/></map:match>
             <map:match pattern="broken"><map:read src="missing.txt"/></map:match>
           </map:pipeline>"#,
    )
}

fn site(mount: &str) -> InMemoryResourceProvider {
    let provider = InMemoryResourceProvider::new();
    let main = main_sitemap(mount);
    let sub = sub_sitemap();
    for (path, data) in [
        ("sitemap.xmap", main.as_str()),
        ("sub/sitemap.xmap", sub.as_str()),
        ("sub/page.txt", "sub page"),
        ("fallback.txt", "fallback"),
    ] {
        provider.add(path, data).expect("in-memory store");
    }
    provider
}

fn mount_node(processor: &TreeProcessor) -> Result<Arc<MountNode>, Box<dyn std::error::Error>> {
    let tree = processor.tree()?;
    let root = node_ref::<PipelinesNode>(tree.root()).ok_or("root is not a pipelines node")?;
    let matcher = node_ref::<PreparableMatchNode>(&root.pipelines()[0].children()[0])
        .ok_or("first child is not a wildcard match")?;
    Ok(node_as::<MountNode>(&matcher.children()[0]).ok_or("match does not hold a mount")?)
}

#[test]
fn test_sequential_requests_reuse_child_tree() -> TestResult {
    let _ = env_logger::builder().is_test(true).try_init();

    let provider = Arc::new(CountingProvider::new(
        site(r#"<map:mount uri-prefix="sub" src="sub/"/>"#),
        "sub/sitemap.xmap",
    ));
    let dispatcher = dispatcher(provider.clone())?;
    for _ in 0..5 {
        let outcome = dispatcher.dispatch(&RequestSpec::new("sub/page"));
        assert_eq!(outcome.body_text(), "sub page");
    }

    assert_eq!(provider.loads(), 1);
    assert_eq!(mount_node(dispatcher.processor())?.processor_count(), 1);
    Ok(())
}

#[test]
fn test_concurrent_first_requests_build_child_once() -> TestResult {
    const THREADS: usize = 8;

    let provider = Arc::new(CountingProvider::new(
        site(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#),
        "sub/sitemap.xmap",
    ));
    let dispatcher = dispatcher(provider.clone())?;
    let barrier = Barrier::new(THREADS);

    let bodies: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    dispatcher.dispatch(&RequestSpec::new("sub/page")).body_text()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("request thread panicked"))
            .collect()
    });

    assert!(bodies.iter().all(|b| b == "sub page"));
    assert_eq!(provider.loads(), 1);
    assert_eq!(mount_node(dispatcher.processor())?.processor_count(), 1);
    Ok(())
}

#[test]
fn test_addressing_restored_on_every_exit() -> TestResult {
    let processor = TreeProcessor::new(
        Arc::new(site(r#"<map:mount uri-prefix="sub/" src="sub/" pass-through="true"/>"#)),
        "sitemap.xmap",
    )?;

    let mut matched = RequestEnvironment::new("sub/page");
    assert!(processor.process(&mut matched)?);
    assert_eq!(matched.body(), "sub page");
    assert_eq!(matched.addressing(), &Addressing::new("sub/page"));

    // The child declines; the parent's fallback must resolve against the
    // parent's own directory again.
    let mut declined = RequestEnvironment::new("sub/nothing");
    assert!(processor.process(&mut declined)?);
    assert_eq!(declined.body(), "fallback");
    assert_eq!(declined.addressing(), &Addressing::new("sub/nothing"));

    let mut failed = RequestEnvironment::new("sub/broken");
    assert!(processor.process(&mut failed).is_err());
    assert_eq!(failed.addressing(), &Addressing::new("sub/broken"));
    Ok(())
}

#[test]
fn test_build_only_through_mount() -> TestResult {
    let provider = Arc::new(site(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#));
    let dispatcher = dispatcher(provider)?;

    let description = dispatcher.describe_pipeline(&RequestSpec::new("sub/page"))?;
    assert_eq!(description.as_deref(), Some("read:resource(sub/page.txt)"));

    // Nothing in the child matches, so the parent's fallback pipeline is
    // the one assembled.
    let mut env = RequestEnvironment::new("sub/nothing");
    let pipeline = dispatcher.processor().build_pipeline(&mut env)?.ok_or("no pipeline")?;
    assert_eq!(pipeline.describe(), "read:resource(fallback.txt)");
    assert!(env.output().is_empty());

    let outcome = dispatcher.dispatch(&RequestSpec::new("sub/page"));
    assert_eq!(outcome.status, Status::Ok);
    assert_eq!(outcome.body_text(), "sub page");
    Ok(())
}

#[test]
fn test_child_sitemap_change_rebuilds_child_only() -> TestResult {
    let inner = Arc::new(site(r#"<map:mount uri-prefix="sub/" src="sub/"/>"#));
    let dispatcher = dispatcher(inner.clone())?;
    let main_tree = dispatcher.processor().tree()?;
    assert_eq!(dispatcher.dispatch(&RequestSpec::new("sub/page")).body_text(), "sub page");

    inner.add(
        "sub/sitemap.xmap",
        pipelines(r#"<map:pipeline><map:match pattern="page"><map:read src="other.txt"/></map:match></map:pipeline>"#),
    )?;
    inner.add("sub/other.txt", "changed")?;

    assert_eq!(dispatcher.dispatch(&RequestSpec::new("sub/page")).body_text(), "changed");
    assert!(Arc::ptr_eq(&main_tree, &dispatcher.processor().tree()?));
    Ok(())
}
