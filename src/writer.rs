//! Serialization back to XML text
//!
//! The writer aims for the smallest textual diff against the loaded file:
//!
//! - an unmodified document is returned byte for byte;
//! - the prolog and epilog around the root are copied from the source;
//! - a subtree with no changes is copied from its source span;
//! - a changed element whose attributes are untouched keeps its original
//!   start and end tags, and only its children are re-emitted.
//!
//! Regenerated start tags list namespace declarations first, then the
//! attributes the schema declares (required before optional, in rule
//! order), then everything else in the order it was set. Values always use
//! double quotes.

use std::borrow::Cow;

use quick_xml::escape::{escape, partial_escape};
use tracing::trace;

use crate::documents::{Document, Element, NodeId, NodeKind};
use crate::rules::SchemaRules;

/// Declaration written at the top of documents built in memory
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Serializes documents under one set of schema rules
#[derive(Debug, Clone, Copy)]
pub struct Writer<'r> {
    rules: &'r SchemaRules,
}

impl<'r> Writer<'r> {
    /// Create a writer
    pub fn new(rules: &'r SchemaRules) -> Self {
        Self { rules }
    }

    /// Serialize a document
    pub fn write(&self, doc: &Document) -> String {
        if let Some(source) = doc.source() {
            if !doc.is_dirty() {
                return source.to_string();
            }
        }

        let root = doc.root();
        let root_span = doc.node(root).and_then(|n| n.span.as_ref());
        let mut out = String::new();
        match (doc.source(), root_span) {
            (Some(source), Some(span)) => {
                out.push_str(&source[..span.outer.start]);
                self.write_node(doc, root, &mut out);
                out.push_str(&source[span.outer.end..]);
            }
            _ => {
                out.push_str(XML_DECLARATION);
                out.push('\n');
                self.write_node(doc, root, &mut out);
                out.push('\n');
            }
        }
        out
    }

    fn write_node(&self, doc: &Document, id: NodeId, out: &mut String) {
        let Some(node) = doc.node(id) else { return };

        if !node.dirty {
            if let (Some(source), Some(span)) = (doc.source(), node.span.as_ref()) {
                out.push_str(&source[span.outer.clone()]);
                return;
            }
        }

        match &node.kind {
            NodeKind::Element(el) => self.write_element(doc, id, el, out),
            NodeKind::Text(text) => out.push_str(&partial_escape(text)),
            NodeKind::CData(text) => {
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>");
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Instruction(text) => {
                out.push_str("<?");
                out.push_str(text);
                out.push_str("?>");
            }
        }
    }

    fn write_element(&self, doc: &Document, id: NodeId, el: &Element, out: &mut String) {
        let children = el.children();
        let node = doc.node(id);
        let source = doc.source();
        let span = node.and_then(|n| n.span.as_ref());
        let attrs_changed = node.map(|n| n.attrs_changed).unwrap_or(true);

        // `<Tag/>` that gained children can't keep its start tag
        let original_tags = match (source, span) {
            (Some(src), Some(span)) if !attrs_changed && (span.end_tag.is_some() || children.is_empty()) => {
                Some((&src[span.start_tag.clone()], span.end_tag.clone().map(|r| &src[r])))
            }
            _ => None,
        };

        match original_tags {
            Some((start, end)) => {
                out.push_str(start);
                for child in children {
                    self.write_node(doc, *child, out);
                }
                if let Some(end) = end {
                    out.push_str(end);
                }
            }
            None => {
                trace!(element = el.name(), "regenerating start tag");
                self.write_start_tag(el, children.is_empty(), out);
                if !children.is_empty() {
                    for child in children {
                        self.write_node(doc, *child, out);
                    }
                    out.push_str("</");
                    out.push_str(el.name());
                    out.push('>');
                }
            }
        }
    }

    fn write_start_tag(&self, el: &Element, empty: bool, out: &mut String) {
        out.push('<');
        out.push_str(el.name());
        for (name, value) in self.ordered_attributes(el) {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push_str(if empty { "/>" } else { ">" });
    }

    /// Attributes in canonical order
    pub fn ordered_attributes<'e>(&self, el: &'e Element) -> Vec<(&'e str, &'e str)> {
        let all: Vec<(&str, &str)> = el.attributes().collect();
        let is_xmlns = |name: &str| name == "xmlns" || name.starts_with("xmlns:");

        let mut ordered: Vec<(&str, &str)> = all.iter().copied().filter(|(n, _)| is_xmlns(n)).collect();
        if let Some(rules) = self.rules.rules_for(el.local_name()) {
            for rule in rules.declared_attrs() {
                if let Some(pair) = all.iter().find(|(n, _)| *n == rule.name) {
                    ordered.push(*pair);
                }
            }
        }
        for pair in &all {
            if !ordered.iter().any(|(n, _)| *n == pair.0) {
                ordered.push(*pair);
            }
        }
        ordered
    }
}

/// Escape an attribute value so that line breaks and tabs survive
/// attribute-value normalization in other parsers
fn escape_attr(value: &str) -> Cow<'_, str> {
    let escaped = escape(value);
    if !escaped.contains(['\n', '\r', '\t']) {
        return escaped;
    }
    Cow::Owned(
        escaped
            .replace('\n', "&#10;")
            .replace('\r', "&#13;")
            .replace('\t', "&#9;"),
    )
}

/// Serialize a document with the given rules
pub fn write(doc: &Document, rules: &SchemaRules) -> String {
    Writer::new(rules).write(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROJECT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!-- produced by hand -->
<Project   xmlns:ext='urn:ext'>
  <Id>p1</Id>
  <Dataset type='Raster' id="d1" >
    <Name>DEM &amp; friends</Name>
    <ext:Note flag="x"/>
  </Dataset>
  <Dataset id="d2"/>
</Project>
"#;

    fn rules() -> SchemaRules {
        SchemaRules::riverscapes_v2()
    }

    #[test]
    fn test_unmodified_is_byte_identical() {
        let doc = Document::parse(PROJECT).unwrap();
        assert_eq!(write(&doc, &rules()), PROJECT);
    }

    #[test]
    fn test_text_change_keeps_everything_else() {
        let mut doc = Document::parse(PROJECT).unwrap();
        let d1 = doc.first_child_named(doc.root(), "Dataset").unwrap();
        let name = doc.first_child_named(d1, "Name").unwrap();
        doc.set_text(name, "Elevation <m>").unwrap();

        let expected = PROJECT.replace("DEM &amp; friends", "Elevation &lt;m&gt;");
        assert_eq!(write(&doc, &rules()), expected);
    }

    #[test]
    fn test_attribute_change_regenerates_only_that_tag() {
        let mut doc = Document::parse(PROJECT).unwrap();
        let d2 = doc.children_named(doc.root(), "Dataset").nth(1).unwrap();
        doc.set_attr(d2, "type", &"Vector".to_string()).unwrap();

        let expected = PROJECT.replace(r#"<Dataset id="d2"/>"#, r#"<Dataset id="d2" type="Vector"/>"#);
        assert_eq!(write(&doc, &rules()), expected);
    }

    #[test]
    fn test_canonical_attribute_order() {
        let mut doc = Document::parse(PROJECT).unwrap();
        let d1 = doc.first_child_named(doc.root(), "Dataset").unwrap();
        doc.set_attr(d1, "guid", &"g-1".to_string()).unwrap();

        let out = write(&doc, &rules());
        assert!(out.contains(r#"<Dataset id="d1" type="Raster" guid="g-1">"#), "{}", out);
        // children of the regenerated element are still copied verbatim
        assert!(out.contains(r#"<ext:Note flag="x"/>"#));
    }

    #[test]
    fn test_empty_element_gains_children() {
        let mut doc = Document::parse(PROJECT).unwrap();
        let d2 = doc.children_named(doc.root(), "Dataset").nth(1).unwrap();
        let name = doc.create_text_element("Name", "Slope").unwrap();
        doc.insert_element_indented(d2, 0, name).unwrap();

        let out = write(&doc, &rules());
        assert!(
            out.contains("<Dataset id=\"d2\">\n    <Name>Slope</Name>\n  </Dataset>"),
            "{}",
            out
        );
    }

    #[test]
    fn test_new_document_gets_declaration() {
        let mut doc = Document::new("Project").unwrap();
        let root = doc.root();
        let id = doc.create_text_element("Id", "p & q").unwrap();
        doc.append_child(root, id).unwrap();

        assert_eq!(
            write(&doc, &rules()),
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Project><Id>p &amp; q</Id></Project>\n"
        );
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        let mut doc = Document::new("Meta").unwrap();
        let root = doc.root();
        doc.set_attr(root, "name", &"a \"quoted\" <key>".to_string()).unwrap();
        let out = write(&doc, &rules());
        assert!(out.contains(r#"name="a &quot;quoted&quot; &lt;key&gt;""#), "{}", out);
    }

    #[test]
    fn test_attribute_whitespace_uses_character_references() {
        let mut doc = Document::new("Meta").unwrap();
        let root = doc.root();
        doc.set_attr(root, "name", &"line one\nline\ttwo\r".to_string()).unwrap();
        let out = write(&doc, &rules());
        assert!(out.contains(r#"name="line one&#10;line&#9;two&#13;""#), "{}", out);

        let parsed = roxmltree::Document::parse(&out).unwrap();
        assert_eq!(parsed.root_element().attribute("name"), Some("line one\nline\ttwo\r"));

        let reparsed = Document::parse(&out).unwrap();
        assert_eq!(reparsed.element(reparsed.root()).unwrap().attr("name"), Some("line one\nline\ttwo\r"));
    }
}
