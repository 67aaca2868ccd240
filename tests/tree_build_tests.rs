mod common;

use common::{TestResult, memory_site, pipelines};
use std::sync::Arc;
use trellis::core::node::node_ref;
use trellis::core::nodes::PipelinesNode;
use trellis::core::{ProcessingTree, TreeProcessor};
use trellis::{BuildError, ConfigurationError, ProcessingError};

const SITE: &str = r#"
  <map:pipeline>
    <map:match pattern="docs/*">
      <map:generate src="docs/{1}.xml"/>
      <map:transform/>
      <map:serialize type="xml"/>
    </map:match>
    <map:select type="request-parameter">
      <map:parameter name="parameter-name" value="format"/>
      <map:when test="raw"><map:read src="raw.txt"/></map:when>
      <map:otherwise><map:read src="index.txt"/></map:otherwise>
    </map:select>
  </map:pipeline>
  <map:pipeline internal-only="true">
    <map:match pattern="*"><map:read src="{1}.txt"/></map:match>
  </map:pipeline>"#;

fn build(xml: &str) -> Result<Arc<ProcessingTree>, ProcessingError> {
    let processor = TreeProcessor::new(memory_site(&[("sitemap.xmap", xml)]), "sitemap.xmap")?;
    processor.tree()
}

fn pipelines_node(tree: &ProcessingTree) -> &PipelinesNode {
    node_ref::<PipelinesNode>(tree.root()).expect("root is a pipelines node")
}

#[test]
fn test_building_twice_is_deterministic() -> TestResult {
    let _ = env_logger::builder().is_test(true).try_init();

    let xml = pipelines(SITE);
    let first = build(&xml)?;
    let second = build(&xml)?;

    assert_eq!(first.node_count(), second.node_count());
    assert_eq!(first.outline(), second.outline());

    let hints = |tree: &ProcessingTree| -> Vec<(String, bool, usize)> {
        pipelines_node(tree)
            .pipelines()
            .iter()
            .map(|p| (p.hint().to_string(), p.is_internal_only(), p.children().len()))
            .collect()
    };
    assert_eq!(hints(&first), hints(&second));
    Ok(())
}

#[test]
fn test_outline_records_document_order() -> TestResult {
    let tree = build(&pipelines(SITE))?;
    let elements: Vec<_> = tree.outline().iter().map(|e| e.element.as_str()).collect();
    assert_eq!(
        elements,
        vec![
            "sitemap", "pipelines", "pipeline", "match", "generate", "transform", "serialize",
            "select", "read", "read", "pipeline", "match", "read",
        ]
    );
    assert_eq!(tree.outline()[0].depth, 0);
    assert_eq!(tree.outline()[3].depth, 3);
    Ok(())
}

#[test]
fn test_unknown_element_names_element_and_location() {
    let xml = pipelines("<map:pipeline>\n<map:bogus/>\n</map:pipeline>");
    match build(&xml) {
        Err(ProcessingError::Build(BuildError::Configuration(ConfigurationError::UnknownElement {
            element,
            location,
        }))) => {
            assert_eq!(element, "map:bogus");
            assert_eq!(location.uri(), "sitemap.xmap");
            assert_eq!(location.line(), 2);
        }
        other => panic!("expected an unknown element error, got {other:?}"),
    }
}

#[test]
fn test_failing_registered_element_is_wrapped_differently() {
    let xml = pipelines(r#"<map:pipeline><map:match type="regexp" pattern="[unclosed"/></map:pipeline>"#);
    match build(&xml) {
        Err(ProcessingError::Build(BuildError::Node { element, source, .. })) => {
            assert_eq!(element, "map:match");
            assert!(matches!(*source, BuildError::Pattern { .. }));
        }
        other => panic!("expected a wrapped node error, got {other:?}"),
    }
}

#[test]
fn test_only_final_pipeline_is_last() -> TestResult {
    let tree = build(&pipelines("<map:pipeline/><map:pipeline/><map:pipeline/>"))?;
    let marks: Vec<bool> = pipelines_node(&tree).pipelines().iter().map(|p| p.is_last()).collect();
    assert_eq!(marks, vec![false, false, true]);

    let single = build(&pipelines("<map:pipeline/>"))?;
    let pipelines = pipelines_node(&single).pipelines();
    assert_eq!(pipelines.len(), 1);
    assert!(pipelines[0].is_last());
    Ok(())
}

#[test]
fn test_wrong_namespace_is_rejected() {
    let xml = r#"<sitemap xmlns="urn:other"><pipelines/></sitemap>"#;
    assert!(matches!(
        build(xml),
        Err(ProcessingError::Build(BuildError::Configuration(
            ConfigurationError::InvalidNamespace { .. }
        )))
    ));
}

#[test]
fn test_parameters_rejected_where_not_supported() {
    let xml = pipelines(
        r#"<map:pipeline><map:select><map:when test="a"><map:parameter name="x" value="y"/></map:when></map:select></map:pipeline>"#,
    );
    assert!(matches!(
        build(&xml),
        Err(ProcessingError::Build(BuildError::Configuration(
            ConfigurationError::ParametersNotAllowed { .. }
        )))
    ));
}

#[test]
fn test_ignored_children_are_skipped() -> TestResult {
    let xml = pipelines(
        r#"<map:pipeline><map:description>docs</map:description><map:match pattern="a"/></map:pipeline>"#,
    );
    let tree = build(&xml)?;
    assert_eq!(pipelines_node(&tree).pipelines()[0].children().len(), 1);
    Ok(())
}
