//! XML document tree
//!
//! A [`Document`] owns every node of one parsed XML file in an arena and
//! hands out [`NodeId`] handles. Besides the tree it keeps the original
//! source text and, for each parsed node, the byte span it came from, so
//! that the writer can copy untouched subtrees verbatim.
//!
//! Mutations go through the document so that the change can be recorded:
//! the changed node and every ancestor up to the root are flagged dirty.

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::ops::Range;
use tracing::{debug, trace};

use crate::error::{Error, MalformedXmlError, Result};
use crate::limits::Limits;
use crate::names::{split_qname, validate_qname};
use crate::namespaces::{
    is_riverscapes_namespace, resolve_in, schema_version_from_uri, NamespaceContext, QName,
    XSI_NAMESPACE,
};
use crate::values::{coerce, AttrValue};

/// Highest Riverscapes project schema version this crate understands
pub const SUPPORTED_SCHEMA_VERSION: u32 = 2;

/// Handle to a node inside one [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the document's arena
    pub fn index(&self) -> usize {
        self.0
    }
}

/// An XML element: tag, ordered attributes and child nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Tag exactly as written, including any prefix
    name: String,
    /// Attributes in source order, values unescaped
    attributes: IndexMap<String, String>,
    /// Namespace declarations made on this element
    namespaces: NamespaceContext,
    /// Child nodes in document order
    children: Vec<NodeId>,
}

impl Element {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: IndexMap::new(),
            namespaces: NamespaceContext::new(),
            children: Vec::new(),
        }
    }

    /// Tag as written (`Dataset`, `ext:Note`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag without prefix
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// Prefix of the tag, if any
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Namespace declarations made on this element
    pub fn namespaces(&self) -> &NamespaceContext {
        &self.namespaces
    }

    /// Child node handles in document order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Attributes in their current order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Raw attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// Whether the attribute is present
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Typed attribute value; fails when absent or not convertible
    pub fn get_attr<T: AttrValue>(&self, name: &str) -> Result<T> {
        match self.attr(name) {
            Some(text) => coerce(name, text),
            None => Err(Error::MissingAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Typed attribute value with a default for the absent case
    pub fn get_attr_or<T: AttrValue>(&self, name: &str, default: T) -> Result<T> {
        match self.attr(name) {
            Some(text) => coerce(name, text),
            None => Ok(default),
        }
    }

    /// Typed attribute value, `None` when absent
    pub fn attr_opt<T: AttrValue>(&self, name: &str) -> Result<Option<T>> {
        self.attr(name).map(|text| coerce(name, text)).transpose()
    }
}

/// Kinds of node stored in the arena
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// An element
    Element(Element),
    /// Character data, unescaped
    Text(String),
    /// CDATA section content
    CData(String),
    /// Comment content
    Comment(String),
    /// Processing instruction content
    Instruction(String),
}

/// Byte ranges a parsed node occupied in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceSpan {
    /// Whole node
    pub outer: Range<usize>,
    /// Start tag (or the whole empty-element tag); equals `outer` for non-elements
    pub start_tag: Range<usize>,
    /// End tag, absent for `<Tag/>`
    pub end_tag: Option<Range<usize>>,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub span: Option<SourceSpan>,
    /// Tag or attributes changed: the start tag has to be regenerated
    pub attrs_changed: bool,
    /// This node or a descendant changed: no verbatim copy of the subtree
    pub dirty: bool,
}

impl Node {
    fn fresh(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            span: None,
            attrs_changed: true,
            dirty: true,
        }
    }
}

/// Options controlling [`Document::parse_with`]
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Resource limits
    pub limits: Limits,
    /// Newest schema version accepted
    pub max_schema_version: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            max_schema_version: SUPPORTED_SCHEMA_VERSION,
        }
    }
}

impl ParseOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the newest accepted schema version
    pub fn with_max_schema_version(mut self, version: u32) -> Self {
        self.max_schema_version = version;
        self
    }
}

/// A parsed (or newly built) XML document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    /// Original text; `None` for documents built in memory
    source: Option<String>,
    schema_version: Option<u32>,
    namespace: Option<String>,
}

impl Document {
    /// Create an empty document with the given root tag
    pub fn new(root_tag: &str) -> Result<Self> {
        validate_qname(root_tag)?;
        let root = Node::fresh(NodeKind::Element(Element::new(root_tag)));
        Ok(Self {
            nodes: vec![root],
            root: NodeId(0),
            source: None,
            schema_version: None,
            namespace: None,
        })
    }

    /// Parse an XML document from a string
    pub fn parse(xml: &str) -> Result<Self> {
        Self::parse_with(xml, &ParseOptions::default())
    }

    /// Parse an XML document from bytes, which must be UTF-8
    pub fn parse_bytes(xml: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(xml).map_err(|e| {
            MalformedXmlError::new(format!("input is not UTF-8: {}", e))
                .with_position(e.valid_up_to())
        })?;
        Self::parse(text)
    }

    /// Parse with explicit limits and schema version bound
    pub fn parse_with(xml: &str, options: &ParseOptions) -> Result<Self> {
        options.limits.check_xml_size(xml.len())?;
        let mut doc = TreeBuilder::new(xml, &options.limits).build()?;
        doc.detect_schema()?;

        if let Some(found) = doc.schema_version {
            if found > options.max_schema_version {
                return Err(Error::UnsupportedSchemaVersion {
                    found,
                    supported: options.max_schema_version,
                });
            }
        }

        debug!(
            nodes = doc.nodes.len(),
            bytes = xml.len(),
            schema_version = ?doc.schema_version,
            "parsed document"
        );
        Ok(doc)
    }

    fn detect_schema(&mut self) -> Result<()> {
        let root = self.expect_element(self.root)?;
        let mut version = None;

        for (name, value) in root.attributes() {
            let (prefix, local) = split_qname(name);
            let Some(prefix) = prefix else { continue };
            if root.namespaces().get_namespace(prefix) != Some(XSI_NAMESPACE) {
                continue;
            }
            if local == "noNamespaceSchemaLocation" || local == "schemaLocation" {
                version = value.split_whitespace().find_map(schema_version_from_uri);
                if version.is_some() {
                    break;
                }
            }
        }

        let namespace = root.namespaces().get_default_namespace().map(str::to_string);
        if version.is_none() {
            version = namespace
                .as_deref()
                .filter(|ns| is_riverscapes_namespace(ns))
                .and_then(schema_version_from_uri);
        }

        self.schema_version = version;
        self.namespace = namespace;
        Ok(())
    }

    /// Root element handle
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Declared schema version, if the document states one
    pub fn schema_version(&self) -> Option<u32> {
        self.schema_version
    }

    /// Default namespace declared on the root
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Original text, for documents that were parsed
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Whether any node changed since load
    pub fn is_dirty(&self) -> bool {
        self.nodes[self.root.0].dirty
    }

    /// Whether the subtree under `id` changed since load
    pub fn is_node_dirty(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.dirty).unwrap_or(false)
    }

    /// Number of nodes ever allocated, including detached ones
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Node payload
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    /// Element payload, `None` for other node kinds
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id) {
            Some(NodeKind::Element(el)) => Some(el),
            _ => None,
        }
    }

    /// Element payload or a `NotFound` error
    pub fn expect_element(&self, id: NodeId) -> Result<&Element> {
        self.element(id)
            .ok_or_else(|| Error::NotFound(format!("element node #{}", id.0)))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element(el)) => Ok(el),
            _ => Err(Error::NotFound(format!("element node #{}", id.0))),
        }
    }

    /// Parent handle; `None` for the root and detached nodes
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Whether the node is reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// All child nodes (elements, text, comments) of an element
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.element(id).map(|el| el.children()).unwrap_or(&[])
    }

    /// Child elements in document order
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |child| self.element(*child).is_some())
    }

    /// Child elements with the given tag, lazily and in document order
    ///
    /// The iterator is `Clone`, so a lookup can be restarted from a saved copy.
    pub fn children_named<'a>(&'a self, id: NodeId, tag: &'a str) -> ChildrenNamed<'a> {
        ChildrenNamed {
            doc: self,
            children: self.children(id),
            position: 0,
            tag,
        }
    }

    /// First child element with the given tag
    pub fn first_child_named(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.children_named(id, tag).next()
    }

    /// Elements of the subtree rooted at `id`, in document order
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: vec![id],
            modeled_only: false,
        }
    }

    /// Like [`Document::descendants`], but foreign-namespace elements are
    /// skipped together with their whole subtree
    pub fn modeled_descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: vec![id],
            modeled_only: true,
        }
    }

    /// Concatenated text and CDATA content of an element
    pub fn text(&self, id: NodeId) -> Option<String> {
        let mut out: Option<String> = None;
        for child in self.children(id) {
            match self.kind(*child) {
                Some(NodeKind::Text(t)) | Some(NodeKind::CData(t)) => {
                    out.get_or_insert_with(String::new).push_str(t);
                }
                _ => {}
            }
        }
        out
    }

    /// Text of the first child element with the given tag, trimmed
    pub fn child_text(&self, id: NodeId, tag: &str) -> Option<String> {
        self.first_child_named(id, tag)
            .and_then(|child| self.text(child))
            .map(|t| t.trim().to_string())
    }

    /// Resolve the namespace of an element's tag
    pub fn namespace_of(&self, id: NodeId) -> Result<QName> {
        let name = self.expect_element(id)?.name().to_string();
        let scopes: Vec<&NamespaceContext> = self
            .ancestors_inclusive(id)
            .filter_map(|n| self.element(n).map(|el| el.namespaces()))
            .collect();
        resolve_in(&name, scopes)
    }

    /// Whether the element belongs to the modeled schema namespace
    pub fn is_riverscapes(&self, id: NodeId) -> bool {
        self.namespace_of(id)
            .map(|q| q.is_riverscapes())
            .unwrap_or(false)
    }

    fn ancestors_inclusive(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |n| self.parent(*n))
    }

    /// Slash separated location such as `/Project/Dataset[2]/Name`
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        for node in self.ancestors_inclusive(id) {
            let Some(el) = self.element(node) else { continue };
            let segment = match self.parent(node) {
                Some(parent) => {
                    let same: Vec<NodeId> = self.children_named(parent, el.name()).collect();
                    if same.len() > 1 {
                        let pos = same.iter().position(|n| *n == node).unwrap_or(0);
                        format!("{}[{}]", el.name(), pos + 1)
                    } else {
                        el.name().to_string()
                    }
                }
                None => el.name().to_string(),
            };
            segments.push(segment);
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    // ---- mutation ----

    /// Flag a node and its ancestors as changed
    fn mark_dirty(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node) = current {
            let Some(n) = self.nodes.get_mut(node.0) else { break };
            n.dirty = true;
            current = n.parent;
        }
    }

    /// Set an attribute from a typed value, in canonical text form
    ///
    /// Existing attributes keep their position; new ones are appended.
    /// Setting the value it already has is not a change.
    pub fn set_attr<T: AttrValue>(&mut self, id: NodeId, name: &str, value: &T) -> Result<()> {
        validate_qname(name)?;
        let text = value.to_value();
        let el = self.element_mut(id)?;
        if el.attributes.get(name) == Some(&text) {
            return Ok(());
        }
        el.namespaces.observe_attribute(name, &text);
        el.attributes.insert(name.to_string(), text);
        trace!(node = id.0, attribute = name, "attribute set");
        self.nodes[id.0].attrs_changed = true;
        self.mark_dirty(id);
        Ok(())
    }

    /// Remove an attribute, returning its previous value
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<Option<String>> {
        let el = self.element_mut(id)?;
        let previous = el.attributes.shift_remove(name);
        if previous.is_some() {
            self.nodes[id.0].attrs_changed = true;
            self.mark_dirty(id);
        }
        Ok(previous)
    }

    /// Replace the text content of an element
    ///
    /// Text and CDATA children are replaced by a single text node placed where
    /// the first of them was. Element children are left alone.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        if self.text(id).as_deref() == Some(text) {
            return Ok(());
        }
        let children = self.expect_element(id)?.children().to_vec();
        let is_text: Vec<bool> = children
            .iter()
            .map(|c| matches!(self.kind(*c), Some(NodeKind::Text(_)) | Some(NodeKind::CData(_))))
            .collect();
        let insert_at = is_text.iter().position(|t| *t).unwrap_or(children.len());
        let replacement = self.alloc(NodeKind::Text(text.to_string()), Some(id));

        let mut kept = Vec::with_capacity(children.len() + 1);
        for (i, child) in children.iter().enumerate() {
            if i == insert_at {
                kept.push(replacement);
            }
            if is_text[i] {
                self.nodes[child.0].parent = None;
            } else {
                kept.push(*child);
            }
        }
        if insert_at == children.len() {
            kept.push(replacement);
        }

        self.element_mut(id)?.children = kept;
        self.mark_dirty(id);
        Ok(())
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::fresh(kind);
        node.parent = parent;
        self.nodes.push(node);
        id
    }

    /// Create a detached element
    pub fn create_element(&mut self, name: &str) -> Result<NodeId> {
        validate_qname(name)?;
        Ok(self.alloc(NodeKind::Element(Element::new(name)), None))
    }

    /// Create a detached element with text content
    pub fn create_text_element(&mut self, name: &str, text: &str) -> Result<NodeId> {
        let id = self.create_element(name)?;
        let text_node = self.alloc(NodeKind::Text(text.to_string()), Some(id));
        self.element_mut(id)?.children.push(text_node);
        Ok(id)
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.expect_element(parent)?;
        if self.node(child).is_none() {
            return Err(Error::NotFound(format!("node #{}", child.0)));
        }
        if self.parent(child).is_some() || child == self.root {
            return Err(Error::schema(
                self.path_of(child),
                "node is already part of the tree",
            ));
        }
        if self.ancestors_inclusive(parent).any(|n| n == child) {
            return Err(Error::schema(
                self.path_of(parent),
                "cannot insert a node below itself",
            ));
        }
        Ok(())
    }

    /// Append a detached node as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let len = self.children(parent).len();
        self.insert_child_at(parent, len, child)
    }

    /// Insert a detached node at `index` in `parent`'s child list
    pub fn insert_child_at(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.check_insertable(parent, child)?;
        let el = self.element_mut(parent)?;
        let index = index.min(el.children.len());
        el.children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        self.mark_dirty(parent);
        Ok(())
    }

    /// Insert an element before the element child at `element_index`
    /// (or after the last one), copying the surrounding indentation
    ///
    /// `element_index` counts element children only.
    pub fn insert_element_indented(
        &mut self,
        parent: NodeId,
        element_index: usize,
        child: NodeId,
    ) -> Result<()> {
        self.check_insertable(parent, child)?;
        let children = self.children(parent).to_vec();
        let element_positions: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, c)| self.element(**c).is_some())
            .map(|(i, _)| i)
            .collect();

        let whitespace_before = |pos: usize| -> Option<String> {
            let prev = pos.checked_sub(1).map(|p| children[p])?;
            match self.kind(prev) {
                Some(NodeKind::Text(t)) if t.trim().is_empty() => Some(t.clone()),
                _ => None,
            }
        };

        if let Some(&pos) = element_positions.get(element_index) {
            // ws <next>  =>  ws <new> ws <next>
            let indent = whitespace_before(pos);
            self.insert_child_at(parent, pos, child)?;
            if let Some(ws) = indent {
                let ws_node = self.alloc(NodeKind::Text(ws), None);
                self.insert_child_at(parent, pos + 1, ws_node)?;
            }
        } else if let Some(&last) = element_positions.last() {
            // ws <last> tail  =>  ws <last> ws <new> tail
            let indent = whitespace_before(last);
            let mut at = last + 1;
            if let Some(ws) = indent {
                let ws_node = self.alloc(NodeKind::Text(ws), None);
                self.insert_child_at(parent, at, ws_node)?;
                at += 1;
            }
            self.insert_child_at(parent, at, child)?;
        } else if children.iter().all(|c| self.is_blank_text(*c)) {
            // <p/>  =>  <p> ws+unit <new> ws </p>
            let parent_indent = self.indent_of(parent);
            let child_indent = format!("{}{}", parent_indent, self.indent_unit());
            let lead = self.alloc(NodeKind::Text(format!("\n{}", child_indent)), None);
            self.insert_child_at(parent, 0, lead)?;
            self.insert_child_at(parent, 1, child)?;
            if children.is_empty() {
                let tail = self.alloc(NodeKind::Text(format!("\n{}", parent_indent)), None);
                self.insert_child_at(parent, 2, tail)?;
            }
        } else {
            let len = children.len();
            self.insert_child_at(parent, len, child)?;
        }
        Ok(())
    }

    fn is_blank_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Text(t)) if t.trim().is_empty())
    }

    /// Indentation of the line an element starts on
    fn indent_of(&self, id: NodeId) -> String {
        let Some(parent) = self.parent(id) else {
            return String::new();
        };
        let siblings = self.children(parent);
        let Some(pos) = siblings.iter().position(|c| *c == id) else {
            return String::new();
        };
        match pos.checked_sub(1).and_then(|p| self.kind(siblings[p])) {
            Some(NodeKind::Text(t)) if t.trim().is_empty() => {
                t.rsplit('\n').next().unwrap_or_default().to_string()
            }
            _ => String::new(),
        }
    }

    /// One level of indentation, taken from the root's first indented child
    fn indent_unit(&self) -> String {
        self.children(self.root)
            .iter()
            .find_map(|c| match self.kind(*c) {
                Some(NodeKind::Text(t)) if t.contains('\n') && t.trim().is_empty() => {
                    let unit = t.rsplit('\n').next().unwrap_or_default();
                    (!unit.is_empty()).then(|| unit.to_string())
                }
                _ => None,
            })
            .unwrap_or_else(|| "  ".to_string())
    }

    /// Detach a node from its parent
    ///
    /// Whitespace-only text directly before a detached element goes with it
    /// so that removals do not leave blank lines behind.
    pub fn remove_child(&mut self, child: NodeId) -> Result<()> {
        let parent = self
            .parent(child)
            .ok_or_else(|| Error::NotFound(format!("parent of node #{}", child.0)))?;
        let is_element = self.element(child).is_some();
        let children = self.children(parent).to_vec();
        let Some(pos) = children.iter().position(|c| *c == child) else {
            return Err(Error::NotFound(format!("node #{} in its parent", child.0)));
        };

        let mut drop_positions = vec![pos];
        if is_element && pos > 0 {
            if let Some(NodeKind::Text(t)) = self.kind(children[pos - 1]) {
                if t.trim().is_empty() {
                    drop_positions.push(pos - 1);
                }
            }
        }

        let kept: Vec<NodeId> = children
            .iter()
            .enumerate()
            .filter(|(i, _)| !drop_positions.contains(i))
            .map(|(_, c)| *c)
            .collect();
        for i in drop_positions {
            self.nodes[children[i].0].parent = None;
        }
        self.element_mut(parent)?.children = kept;
        self.mark_dirty(parent);
        Ok(())
    }
}

/// Lazy iterator over same-tag child elements
#[derive(Debug, Clone)]
pub struct ChildrenNamed<'a> {
    doc: &'a Document,
    children: &'a [NodeId],
    position: usize,
    tag: &'a str,
}

impl<'a> Iterator for ChildrenNamed<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(child) = self.children.get(self.position) {
            self.position += 1;
            if let Some(el) = self.doc.element(*child) {
                if el.name() == self.tag {
                    return Some(*child);
                }
            }
        }
        None
    }
}

/// Pre-order iterator over the elements of a subtree
#[derive(Debug, Clone)]
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
    modeled_only: bool,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if let Some(el) = self.doc.element(id) {
                if self.modeled_only && !self.doc.is_riverscapes(id) {
                    continue;
                }
                self.stack.extend(el.children().iter().rev().copied());
                return Some(id);
            }
        }
        None
    }
}

/// Event-driven builder turning quick-xml events into the node arena
struct TreeBuilder<'a> {
    xml: &'a str,
    limits: &'a Limits,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    /// Currently open elements
    stack: Vec<NodeId>,
}

impl<'a> TreeBuilder<'a> {
    fn new(xml: &'a str, limits: &'a Limits) -> Self {
        Self {
            xml,
            limits,
            nodes: Vec::new(),
            root: None,
            stack: Vec::new(),
        }
    }

    fn malformed(&self, message: impl Into<String>, position: usize) -> Error {
        let start = floor_char_boundary(self.xml, position.saturating_sub(40));
        let end = floor_char_boundary(self.xml, (position + 40).min(self.xml.len()));
        MalformedXmlError::new(message)
            .with_position(position)
            .with_snippet(&self.xml[start..end])
            .into()
    }

    fn push_node(&mut self, kind: NodeKind, span: SourceSpan) -> Result<NodeId> {
        self.limits.check_nodes(self.nodes.len() + 1)?;
        let id = NodeId(self.nodes.len());
        let parent = self.stack.last().copied();
        self.nodes.push(Node {
            kind,
            parent,
            span: Some(span),
            attrs_changed: false,
            dirty: false,
        });
        if let Some(parent) = parent {
            if let NodeKind::Element(el) = &mut self.nodes[parent.0].kind {
                el.children.push(id);
            }
        }
        Ok(id)
    }

    fn open_element(&mut self, start: &BytesStart, range: Range<usize>, empty: bool) -> Result<NodeId> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(self.malformed("document has more than one root element", range.start));
        }
        self.limits.check_xml_depth(self.stack.len() + 1)?;

        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| self.malformed(format!("invalid element name: {}", e), range.start))?
            .to_string();
        let mut element = Element::new(name);

        for attr_result in start.attributes() {
            let attr = attr_result
                .map_err(|e| self.malformed(format!("failed to parse attribute: {}", e), range.start))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| self.malformed(format!("invalid attribute name: {}", e), range.start))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| self.malformed(format!("failed to unescape attribute '{}': {}", key, e), range.start))?
                .to_string();
            element.namespaces.observe_attribute(&key, &value);
            element.attributes.insert(key, value);
        }
        self.limits.check_attributes(element.attributes.len())?;

        let span = SourceSpan {
            outer: range.clone(),
            start_tag: range,
            end_tag: None,
        };
        let id = self.push_node(NodeKind::Element(element), span)?;
        if self.stack.is_empty() {
            self.root = Some(id);
        }
        if !empty {
            self.stack.push(id);
        }
        Ok(id)
    }

    fn close_element(&mut self, range: Range<usize>) -> Result<()> {
        let Some(id) = self.stack.pop() else {
            return Err(self.malformed("end tag without a matching start tag", range.start));
        };
        if let Some(span) = self.nodes[id.0].span.as_mut() {
            span.outer = span.outer.start..range.end;
            span.end_tag = Some(range);
        }
        Ok(())
    }

    fn leaf(&mut self, kind: NodeKind, range: Range<usize>) -> Result<()> {
        if self.stack.is_empty() {
            // Outside the root only markup and whitespace are allowed; both
            // are kept verbatim as part of the prolog or epilog.
            if let NodeKind::Text(t) = &kind {
                if !t.trim().is_empty() {
                    return Err(self.malformed("text outside the root element", range.start));
                }
            }
            return Ok(());
        }
        self.push_node(
            kind,
            SourceSpan {
                outer: range.clone(),
                start_tag: range,
                end_tag: None,
            },
        )?;
        Ok(())
    }

    fn build(mut self) -> Result<Document> {
        // The reader skips a byte order mark without counting it, so spans
        // are taken over the body and shifted back into `xml`.
        let xml = self.xml;
        let bom = if xml.starts_with('\u{FEFF}') { '\u{FEFF}'.len_utf8() } else { 0 };
        let mut reader = Reader::from_str(&xml[bom..]);
        reader.trim_text(false);
        reader.check_end_names(true);
        reader.expand_empty_elements(false);

        loop {
            let before = bom + reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|e| self.malformed(e.to_string(), bom + reader.buffer_position()))?;
            let range = before..bom + reader.buffer_position();

            match event {
                Event::Start(e) => {
                    self.open_element(&e, range, false)?;
                }
                Event::Empty(e) => {
                    self.open_element(&e, range, true)?;
                }
                Event::End(_) => self.close_element(range)?,
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|err| self.malformed(format!("failed to unescape text: {}", err), range.start))?
                        .to_string();
                    self.leaf(NodeKind::Text(text), range)?;
                }
                Event::CData(e) => {
                    let text = String::from_utf8(e.into_inner().into_owned())
                        .map_err(|err| self.malformed(err.to_string(), range.start))?;
                    self.leaf(NodeKind::CData(text), range)?;
                }
                Event::Comment(e) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    self.leaf(NodeKind::Comment(text), range)?;
                }
                Event::PI(e) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    self.leaf(NodeKind::Instruction(text), range)?;
                }
                Event::Decl(_) | Event::DocType(_) => {
                    if !self.stack.is_empty() || self.root.is_some() {
                        return Err(self.malformed("declaration after the root element started", range.start));
                    }
                }
                Event::Eof => break,
            }
        }

        if let Some(open) = self.stack.last() {
            let name = match &self.nodes[open.0].kind {
                NodeKind::Element(el) => el.name().to_string(),
                _ => String::new(),
            };
            return Err(self.malformed(format!("unclosed element '{}'", name), self.xml.len()));
        }
        let Some(root) = self.root else {
            return Err(self.malformed("document has no root element", 0));
        };

        Ok(Document {
            nodes: self.nodes,
            root,
            source: Some(self.xml.to_string()),
            schema_version: None,
            namespace: None,
        })
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
