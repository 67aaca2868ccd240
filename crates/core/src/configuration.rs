//! Namespace-aware configuration tree parsed from sitemap XML.
//!
//! The tree keeps what the builders need and nothing more: the resolved
//! namespace and local name of every element, its attributes in document
//! order, trimmed text content, children, and the line/column it started
//! at. Comments, processing instructions and namespace declarations are
//! dropped after parsing.

use crate::error::{BuildError, ConfigurationError};
use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Namespace of sitemap elements.
pub const SITEMAP_NAMESPACE: &str = "http://apache.org/cocoon/sitemap/1.0";

/// Where an element was declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    uri: Arc<str>,
    line: usize,
    column: usize,
}

impl Location {
    pub fn new(uri: &str, line: usize, column: usize) -> Self {
        Self {
            uri: Arc::from(uri),
            line,
            column,
        }
    }

    pub fn unknown() -> Self {
        Self::new("<unknown>", 0, 0)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.uri, self.line, self.column)
    }
}

/// One element of a parsed configuration document.
#[derive(Debug, Clone)]
pub struct Configuration {
    name: String,
    local_name: String,
    namespace: String,
    attributes: Vec<(String, String)>,
    children: Vec<Configuration>,
    value: Option<String>,
    location: Location,
}

impl Configuration {
    /// Parses an XML document into a configuration tree rooted at its
    /// document element.
    pub fn parse(source: &str, uri: &str) -> Result<Configuration, BuildError> {
        ConfigurationParser::new(source, uri).parse()
    }

    /// Qualified name as written in the document (`map:match`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Resolved namespace URI, empty for elements in no namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn required_attribute(&self, name: &str) -> Result<&str, ConfigurationError> {
        self.attribute(name)
            .ok_or_else(|| ConfigurationError::MissingAttribute {
                attribute: name.to_string(),
                element: self.name.clone(),
                location: self.location.clone(),
            })
    }

    /// Reads a `true`/`false`/`yes`/`no` attribute, falling back to `default`
    /// when it is absent.
    pub fn attribute_as_bool(&self, name: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.attribute(name) {
            None => Ok(default),
            Some(value) => match value.trim() {
                "true" | "yes" => Ok(true),
                "false" | "no" => Ok(false),
                other => Err(ConfigurationError::InvalidValue {
                    attribute: name.to_string(),
                    value: other.to_string(),
                    message: "expected true or false".to_string(),
                    location: self.location.clone(),
                }),
            },
        }
    }

    pub fn children(&self) -> &[Configuration] {
        &self.children
    }

    /// Children with the given local name, in document order.
    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a Configuration> + 'a {
        self.children
            .iter()
            .filter(move |c| c.local_name == local_name)
    }

    pub fn child(&self, local_name: &str) -> Option<&Configuration> {
        self.children.iter().find(|c| c.local_name == local_name)
    }

    /// Trimmed text content, if the element has any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Byte offsets of line starts, for turning reader positions into line and
/// column numbers without rescanning the document for every element.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn line_col(&self, source: &str, pos: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&pos) {
            Ok(exact) => exact,
            Err(next) => next.saturating_sub(1),
        };
        let start = self.starts.get(line).copied().unwrap_or(0);
        let column = source
            .get(start..pos)
            .map_or(pos - start, |prefix| prefix.chars().count());
        (line + 1, column + 1)
    }
}

struct ConfigurationParser<'a> {
    source: &'a str,
    uri: &'a str,
    lines: LineIndex,
    open: Vec<Configuration>,
    namespaces: Vec<HashMap<String, String>>,
    root: Option<Configuration>,
}

impl<'a> ConfigurationParser<'a> {
    fn new(source: &'a str, uri: &'a str) -> Self {
        Self {
            source,
            uri,
            lines: LineIndex::new(source),
            open: Vec::new(),
            namespaces: vec![HashMap::new()],
            root: None,
        }
    }

    fn location_at(&self, pos: usize) -> Location {
        let (line, column) = self.lines.line_col(self.source, pos);
        Location::new(self.uri, line, column)
    }

    fn parse(mut self) -> Result<Configuration, BuildError> {
        let mut reader = Reader::from_str(self.source);
        reader.config_mut().trim_text(false);

        loop {
            let pos = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let element = self.open_element(&e, pos)?;
                    self.open.push(element);
                }
                Ok(Event::Empty(e)) => {
                    let element = self.open_element(&e, pos)?;
                    self.namespaces.pop();
                    self.close_element(element)?;
                }
                Ok(Event::End(_)) => {
                    let element = self.open.pop().ok_or_else(|| {
                        BuildError::xml(self.uri, format!("unbalanced end tag at {}", self.location_at(pos)))
                    })?;
                    self.namespaces.pop();
                    self.close_element(element)?;
                }
                Ok(Event::Text(e)) => {
                    let raw = std::str::from_utf8(&e)
                        .map_err(|err| BuildError::xml(self.uri, err.to_string()))?;
                    let text = unescape(raw).map_err(|err| {
                        BuildError::xml(self.uri, format!("{err} at {}", self.location_at(pos)))
                    })?;
                    self.append_text(&text);
                }
                Ok(Event::GeneralRef(e)) => {
                    let name = e
                        .decode()
                        .map_err(|err| BuildError::xml(self.uri, err.to_string()))?;
                    let resolved = match e.resolve_char_ref() {
                        Ok(Some(ch)) => ch.to_string(),
                        _ => resolve_predefined_entity(&name)
                            .map(str::to_string)
                            .ok_or_else(|| {
                                BuildError::xml(
                                    self.uri,
                                    format!("unknown entity '&{name};' at {}", self.location_at(pos)),
                                )
                            })?,
                    };
                    self.append_text(&resolved);
                }
                Ok(Event::CData(e)) => {
                    let text = std::str::from_utf8(&e)
                        .map_err(|err| BuildError::xml(self.uri, err.to_string()))?
                        .to_string();
                    self.append_text(&text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(BuildError::xml(
                        self.uri,
                        format!("{e} at {}", self.location_at(pos)),
                    ));
                }
                _ => {}
            }
        }

        if let Some(unclosed) = self.open.last() {
            return Err(BuildError::xml(
                self.uri,
                format!("element '{}' at {} is never closed", unclosed.name, unclosed.location),
            ));
        }
        self.root
            .ok_or_else(|| BuildError::xml(self.uri, "document has no root element"))
    }

    fn open_element(&mut self, e: &BytesStart<'_>, pos: usize) -> Result<Configuration, BuildError> {
        let location = self.location_at(pos);
        let name = std::str::from_utf8(e.name().as_ref())
            .map_err(|err| BuildError::xml(self.uri, err.to_string()))?
            .to_string();

        let mut scope = self.namespaces.last().cloned().unwrap_or_default();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| BuildError::xml(self.uri, format!("{err} at {location}")))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|err| BuildError::xml(self.uri, err.to_string()))?;
            let raw = std::str::from_utf8(&attr.value)
                .map_err(|err| BuildError::xml(self.uri, err.to_string()))?;
            let value = unescape(raw)
                .map_err(|err| BuildError::xml(self.uri, format!("{err} at {location}")))?
                .into_owned();

            if key == "xmlns" {
                scope.insert(String::new(), value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.insert(prefix.to_string(), value);
            } else {
                attributes.push((key.to_string(), value));
            }
        }

        let (prefix, local_name) = match name.split_once(':') {
            Some((prefix, local)) => (prefix, local.to_string()),
            None => ("", name.clone()),
        };
        let namespace = match scope.get(prefix) {
            Some(ns) => ns.clone(),
            None if prefix.is_empty() => String::new(),
            None => {
                return Err(BuildError::xml(
                    self.uri,
                    format!("undeclared namespace prefix '{prefix}' on '{name}' at {location}"),
                ));
            }
        };
        self.namespaces.push(scope);

        Ok(Configuration {
            name,
            local_name,
            namespace,
            attributes,
            children: Vec::new(),
            value: None,
            location,
        })
    }

    fn close_element(&mut self, mut element: Configuration) -> Result<(), BuildError> {
        element.value = element
            .value
            .take()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        if let Some(parent) = self.open.last_mut() {
            parent.children.push(element);
            return Ok(());
        }
        if self.root.is_some() {
            return Err(BuildError::xml(
                self.uri,
                format!("second root element '{}' at {}", element.name, element.location),
            ));
        }
        self.root = Some(element);
        Ok(())
    }

    /// Text is collected untrimmed and trimmed once the element closes, so
    /// entity references splitting a run of text keep their surrounding spaces.
    fn append_text(&mut self, text: &str) {
        if let Some(current) = self.open.last_mut() {
            current.value.get_or_insert_with(String::new).push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITEMAP: &str = r#"<?xml version="1.0"?>
<map:sitemap xmlns:map="http://apache.org/cocoon/sitemap/1.0">
  <!-- routes -->
  <map:pipelines>
    <map:pipeline internal-only="no">
      <map:match pattern="docs/*.html">
        <map:generate src="docs/{1}.xml"/>
      </map:match>
    </map:pipeline>
  </map:pipelines>
</map:sitemap>"#;

    #[test]
    fn test_parses_namespaced_tree() {
        let root = Configuration::parse(SITEMAP, "sitemap.xmap").unwrap();
        assert_eq!(root.name(), "map:sitemap");
        assert_eq!(root.local_name(), "sitemap");
        assert_eq!(root.namespace(), SITEMAP_NAMESPACE);
        assert_eq!(root.children().len(), 1);

        let pipeline = &root.children()[0].children()[0];
        assert_eq!(pipeline.local_name(), "pipeline");
        assert!(!pipeline.attribute_as_bool("internal-only", true).unwrap());

        let generate = &pipeline.children()[0].children()[0];
        assert_eq!(generate.attribute("src"), Some("docs/{1}.xml"));
        assert_eq!(generate.namespace(), SITEMAP_NAMESPACE);
        // No xmlns declarations leak into attributes.
        assert_eq!(root.attributes().count(), 0);
    }

    #[test]
    fn test_records_line_and_column() {
        let root = Configuration::parse(SITEMAP, "sitemap.xmap").unwrap();
        assert_eq!(root.location().line(), 2);
        assert_eq!(root.location().column(), 1);

        let matcher = &root.children()[0].children()[0].children()[0];
        assert_eq!(matcher.location().line(), 6);
        assert_eq!(matcher.location().column(), 7);
        assert_eq!(matcher.location().to_string(), "sitemap.xmap:6:7");
    }

    #[test]
    fn test_default_namespace_and_text() {
        let xml = r#"<nodes xmlns="urn:test"><node name="a">  some text &amp; more </node></nodes>"#;
        let root = Configuration::parse(xml, "nodes.xml").unwrap();
        assert_eq!(root.namespace(), "urn:test");
        let node = root.child("node").unwrap();
        assert_eq!(node.namespace(), "urn:test");
        assert_eq!(node.value(), Some("some text & more"));
        assert_eq!(node.required_attribute("name").unwrap(), "a");
    }

    #[test]
    fn test_missing_attribute_names_element() {
        let root = Configuration::parse("<a/>", "a.xml").unwrap();
        let err = root.required_attribute("src").unwrap_err();
        assert!(err.to_string().contains("'src'"));
        assert!(err.to_string().contains("a.xml:1:1"));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let root = Configuration::parse(r#"<a flag="maybe"/>"#, "a.xml").unwrap();
        assert!(matches!(
            root.attribute_as_bool("flag", false),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_documents_fail() {
        assert!(matches!(
            Configuration::parse("<a><b></a>", "bad.xml"),
            Err(BuildError::Xml { .. })
        ));
        assert!(Configuration::parse("", "empty.xml").is_err());
        assert!(Configuration::parse("<x:a/>", "prefix.xml").is_err());
        assert!(Configuration::parse("<a>", "open.xml").is_err());
    }
}
