//! The project graph: a document, its rules, and the resolved edge overlay
//!
//! [`ProjectGraph`] is what most callers hold. It owns the [`Document`],
//! shares the immutable [`SchemaRules`], and keeps the identifier index and
//! reference edges produced by the last resolve.
//!
//! Every mutation is checked against the rules before anything changes, so
//! a failed call leaves the document exactly as it was. Structural
//! mutations (adding or removing identified nodes or references) mark the
//! identifiers they touch as stale; reading edges that involve a stale
//! identifier fails with [`Error::StaleGraph`] until [`ProjectGraph::reresolve`]
//! is called.

use indexmap::IndexSet;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::documents::{Document, NodeId, ParseOptions};
use crate::error::{Error, Result};
use crate::names::validate_identifier;
use crate::namespaces::XSI_NAMESPACE;
use crate::nodes::{
    self, Dataset, DatasetMut, MetaEntry, MetaOwner, Project, ProjectMut, Realization,
    RealizationMut, TypedNode,
};
use crate::resolver::{check_lineage, ReferenceEdge, Resolution, Resolver, Role};
use crate::rules::{AttrKind, ElementRules, SchemaRules};
use crate::util::parse_metadata;
use crate::validation::{Validator, Violation};
use crate::values::{AttrValue, MetaType};
use crate::writer::Writer;

/// Parse, check and resolve a document into a [`ProjectGraph`]
pub fn resolve(document: Document, rules: Arc<SchemaRules>) -> Result<ProjectGraph> {
    ProjectGraph::resolve(document, rules)
}

/// A resolved project document
#[derive(Debug, Clone)]
pub struct ProjectGraph {
    document: Document,
    rules: Arc<SchemaRules>,
    resolution: Resolution,
    /// Identifiers whose edges changed since the last resolve
    stale: BTreeSet<String>,
}

impl ProjectGraph {
    /// Resolve a parsed document
    pub fn resolve(document: Document, rules: Arc<SchemaRules>) -> Result<Self> {
        check_root(&document, &rules)?;
        let resolution = Resolver::new(&rules).resolve(&document)?;
        Ok(Self {
            document,
            rules,
            resolution,
            stale: BTreeSet::new(),
        })
    }

    /// Parse and resolve XML text
    pub fn parse(xml: &str, rules: Arc<SchemaRules>) -> Result<Self> {
        let options = ParseOptions::new().with_max_schema_version(rules.version());
        Self::resolve(Document::parse_with(xml, &options)?, rules)
    }

    /// A new project holding only its `Id`
    pub fn new_project(id: &str, rules: Arc<SchemaRules>) -> Result<Self> {
        let mut document = Document::new(rules.root_tag())?;
        let root = document.root();
        if !rules.schema_location().is_empty() {
            document.set_attr(root, "xmlns:xsi", &XSI_NAMESPACE.to_string())?;
            document.set_attr(
                root,
                "xsi:noNamespaceSchemaLocation",
                &rules.schema_location().to_string(),
            )?;
        }

        let mut graph = Self {
            document,
            rules,
            resolution: Resolution::default(),
            stale: BTreeSet::new(),
        };
        graph.set_child_text(root, "Id", id)?;
        info!(project = id, "created project");
        Ok(graph)
    }

    /// The underlying document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Give up the graph, keeping the document
    pub fn into_document(self) -> Document {
        self.document
    }

    /// Rules the graph was resolved with
    pub fn rules(&self) -> &Arc<SchemaRules> {
        &self.rules
    }

    /// Whether any edge data is stale
    pub fn is_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    /// Identifiers touched since the last resolve
    pub fn stale_identifiers(&self) -> impl Iterator<Item = &str> {
        self.stale.iter().map(|s| s.as_str())
    }

    /// Recompute the index and edges from the current document
    ///
    /// On failure the previous resolution and stale set are kept.
    pub fn reresolve(&mut self) -> Result<()> {
        let resolution = Resolver::new(&self.rules).resolve(&self.document)?;
        debug!(cleared = self.stale.len(), "re-resolved graph");
        self.resolution = resolution;
        self.stale.clear();
        Ok(())
    }

    /// Serialize the document
    pub fn write(&self) -> String {
        Writer::new(&self.rules).write(&self.document)
    }

    /// Collect every schema violation in the document
    pub fn validate(&self) -> Vec<Violation> {
        Validator::new(&self.rules).validate(self)
    }

    // ---- lookup ----

    /// Identifiers in index order
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.resolution.identifiers()
    }

    /// Element carrying an identifier
    pub fn node_of(&self, id: &str) -> Option<NodeId> {
        self.resolution.node_of(id)
    }

    fn lookup(&self, id: &str) -> Result<NodeId> {
        self.node_of(id)
            .ok_or_else(|| Error::NotFound(format!("identifier '{}'", id)))
    }

    fn lookup_kind(&self, id: &str, tag: &str) -> Result<NodeId> {
        let node = self.lookup(id)?;
        let found = self.document.expect_element(node)?.local_name();
        if found != tag {
            return Err(Error::schema(
                self.document.path_of(node),
                format!("'{}' is a {}, not a {}", id, found, tag),
            ));
        }
        Ok(node)
    }

    fn owner_node(&self, owner: MetaOwner<'_>) -> Result<NodeId> {
        match owner {
            MetaOwner::Project => Ok(self.document.root()),
            MetaOwner::Identified(id) => self.lookup(id),
        }
    }

    fn rules_of(&self, node: NodeId) -> Result<&ElementRules> {
        let el = self.document.expect_element(node)?;
        self.rules.expect_rules(el.local_name())
    }

    // ---- typed views ----

    /// The project root
    pub fn project(&self) -> Result<Project<'_>> {
        Project::from_node(&self.document, &self.rules, self.document.root())
    }

    /// Dataset by identifier
    pub fn dataset(&self, id: &str) -> Result<Dataset<'_>> {
        Dataset::from_node(&self.document, &self.rules, self.lookup(id)?)
    }

    /// Realization by identifier
    pub fn realization(&self, id: &str) -> Result<Realization<'_>> {
        Realization::from_node(&self.document, &self.rules, self.lookup(id)?)
    }

    /// Datasets in document order
    pub fn datasets(&self) -> Result<Vec<Dataset<'_>>> {
        self.views_named(Dataset::TAG, |doc, rules, node| Dataset::from_node(doc, rules, node))
    }

    /// Realizations in document order
    pub fn realizations(&self) -> Result<Vec<Realization<'_>>> {
        self.views_named(Realization::TAG, |doc, rules, node| Realization::from_node(doc, rules, node))
    }

    fn views_named<'a, T>(
        &'a self,
        tag: &'a str,
        make: impl Fn(&'a Document, &SchemaRules, NodeId) -> Result<T>,
    ) -> Result<Vec<T>> {
        let root = self.document.root();
        let rules: &SchemaRules = &self.rules;
        self.document
            .children_named(root, tag)
            .map(|node| make(&self.document, rules, node))
            .collect()
    }

    /// Mutable lens over the project root
    pub fn project_mut(&mut self) -> Result<ProjectMut<'_>> {
        let root = self.document.root();
        Project::from_node(&self.document, &self.rules, root)?;
        Ok(ProjectMut::new(self, root))
    }

    /// Mutable lens over a dataset
    pub fn dataset_mut(&mut self, id: &str) -> Result<DatasetMut<'_>> {
        let node = self.lookup_kind(id, Dataset::TAG)?;
        Ok(DatasetMut::new(self, node, id))
    }

    /// Mutable lens over a realization
    pub fn realization_mut(&mut self, id: &str) -> Result<RealizationMut<'_>> {
        let node = self.lookup_kind(id, Realization::TAG)?;
        Ok(RealizationMut::new(self, node, id))
    }

    // ---- edges ----

    /// All edges; fails while anything is stale
    pub fn edges(&self) -> Result<&[ReferenceEdge]> {
        if let Some(id) = self.stale.iter().next() {
            return Err(Error::StaleGraph { identifier: id.clone() });
        }
        Ok(&self.resolution.edges)
    }

    fn edges_touching(&self, id: &str) -> Result<impl Iterator<Item = &ReferenceEdge>> {
        self.lookup(id)?;
        if self.stale.contains(id) {
            return Err(Error::StaleGraph { identifier: id.to_string() });
        }
        Ok(self.resolution.edges.iter())
    }

    /// Datasets a realization consumes
    pub fn inputs_of(&self, realization: &str) -> Result<Vec<Dataset<'_>>> {
        self.edges_touching(realization)?
            .filter(|e| e.role == Role::Input && e.source == realization)
            .map(|e| self.dataset(&e.target))
            .collect()
    }

    /// Datasets a realization produces
    pub fn outputs_of(&self, realization: &str) -> Result<Vec<Dataset<'_>>> {
        self.edges_touching(realization)?
            .filter(|e| e.role == Role::Output && e.source == realization)
            .map(|e| self.dataset(&e.target))
            .collect()
    }

    /// Realizations that take a dataset as input
    pub fn consumers_of(&self, dataset: &str) -> Result<Vec<Realization<'_>>> {
        self.edges_touching(dataset)?
            .filter(|e| e.role == Role::Input && e.target == dataset)
            .map(|e| self.realization(&e.source))
            .collect()
    }

    /// Realizations that output a dataset
    pub fn producers_of(&self, dataset: &str) -> Result<Vec<Realization<'_>>> {
        self.edges_touching(dataset)?
            .filter(|e| e.role == Role::Output && e.target == dataset)
            .map(|e| self.realization(&e.source))
            .collect()
    }

    /// Datasets a dataset was derived from
    pub fn derived_from(&self, dataset: &str) -> Result<Vec<Dataset<'_>>> {
        self.edges_touching(dataset)?
            .filter(|e| e.role == Role::DerivedFrom && e.source == dataset)
            .map(|e| self.dataset(&e.target))
            .collect()
    }

    /// Datasets derived from a dataset
    pub fn derivatives_of(&self, dataset: &str) -> Result<Vec<Dataset<'_>>> {
        self.edges_touching(dataset)?
            .filter(|e| e.role == Role::DerivedFrom && e.target == dataset)
            .map(|e| self.dataset(&e.source))
            .collect()
    }

    /// Identifiers a node links to with `RelatedTo`
    pub fn related_to(&self, id: &str) -> Result<Vec<&str>> {
        Ok(self
            .edges_touching(id)?
            .filter(|e| e.role == Role::RelatedTo && e.source == id)
            .map(|e| e.target.as_str())
            .collect())
    }

    /// Everything `id` transitively depends on, nearest first
    pub fn upstream_of(&self, id: &str) -> Result<Vec<String>> {
        self.lookup(id)?;
        let edges = self.edges()?;
        Ok(walk_lineage(edges, id, |(dependent, dependency)| (dependent, dependency)))
    }

    /// Everything that transitively depends on `id`, nearest first
    pub fn downstream_of(&self, id: &str) -> Result<Vec<String>> {
        self.lookup(id)?;
        let edges = self.edges()?;
        Ok(walk_lineage(edges, id, |(dependent, dependency)| (dependency, dependent)))
    }

    // ---- metadata ----

    /// Metadata entries of the project or an identified node
    pub fn meta<'a>(&self, owner: impl Into<MetaOwner<'a>>) -> Result<Vec<MetaEntry<'_>>> {
        let node = self.owner_node(owner.into())?;
        Ok(nodes::meta_entries(&self.document, node))
    }

    /// Typed value of the last entry named `key`
    pub fn meta_value<'a, T: AttrValue>(&self, owner: impl Into<MetaOwner<'a>>, key: &str) -> Result<Option<T>> {
        let node = self.owner_node(owner.into())?;
        nodes::find_meta(&self.document, node, key)
            .map(|entry| entry.value_as())
            .transpose()
    }

    /// Set the value of the last entry named `key`, or append one
    pub fn set_meta<'a>(&mut self, owner: impl Into<MetaOwner<'a>>, key: &str, value: &str) -> Result<()> {
        let node = self.owner_node(owner.into())?;
        self.set_meta_at(node, key, value, None)
    }

    /// Like [`set_meta`](Self::set_meta), also declaring the value type
    pub fn set_meta_typed<'a>(
        &mut self,
        owner: impl Into<MetaOwner<'a>>,
        key: &str,
        value: &str,
        meta_type: MetaType,
    ) -> Result<()> {
        let node = self.owner_node(owner.into())?;
        self.set_meta_at(node, key, value, Some(meta_type))
    }

    /// Append an entry even if the key already exists
    pub fn add_meta<'a>(&mut self, owner: impl Into<MetaOwner<'a>>, key: &str, value: &str) -> Result<()> {
        let node = self.owner_node(owner.into())?;
        self.add_meta_at(node, key, value, None)
    }

    /// Remove every entry named `key`, returning how many were removed
    pub fn remove_meta<'a>(&mut self, owner: impl Into<MetaOwner<'a>>, key: &str) -> Result<usize> {
        let node = self.owner_node(owner.into())?;
        let doomed: Vec<NodeId> = nodes::meta_entries(&self.document, node)
            .into_iter()
            .filter(|e| e.name() == key)
            .map(|e| e.node())
            .collect();
        for entry in &doomed {
            self.document.remove_child(*entry)?;
        }
        Ok(doomed.len())
    }

    /// Apply a `key=value,key2=value2` string with [`set_meta`](Self::set_meta)
    ///
    /// The whole string is parsed before anything is written.
    pub fn apply_metadata<'a>(&mut self, owner: impl Into<MetaOwner<'a>>, input: &str) -> Result<()> {
        let node = self.owner_node(owner.into())?;
        let pairs = parse_metadata(input)?;
        for key in pairs.keys() {
            check_meta_key(&self.document, node, key)?;
        }
        for (key, value) in &pairs {
            self.set_meta_at(node, key, value, None)?;
        }
        Ok(())
    }

    pub(crate) fn set_meta_at(
        &mut self,
        owner: NodeId,
        key: &str,
        value: &str,
        meta_type: Option<MetaType>,
    ) -> Result<()> {
        check_meta_key(&self.document, owner, key)?;
        let existing = nodes::find_meta(&self.document, owner, key).map(|e| e.node());
        let Some(entry) = existing else {
            return self.add_meta_at(owner, key, value, meta_type);
        };

        let declared = match meta_type {
            Some(t) => Some(t),
            None => nodes::find_meta(&self.document, owner, key).and_then(|e| e.meta_type().ok().flatten()),
        };
        if let Some(t) = declared {
            nodes::check_meta_value(key, t, value)?;
        }
        if let Some(t) = meta_type {
            self.document.set_attr(entry, "type", &t)?;
        }
        self.document.set_text(entry, value)
    }

    pub(crate) fn add_meta_at(
        &mut self,
        owner: NodeId,
        key: &str,
        value: &str,
        meta_type: Option<MetaType>,
    ) -> Result<()> {
        check_meta_key(&self.document, owner, key)?;
        if let Some(t) = meta_type {
            nodes::check_meta_value(key, t, value)?;
        }
        let rules = Arc::clone(&self.rules);
        if self.document.first_child_named(owner, "MetaData").is_none() {
            // fail before creating anything
            self.rules_of(owner)?
                .insertion_index(&self.document, owner, "MetaData")?;
        }
        let container = self.ensure_child(owner, "MetaData")?;
        let index = rules
            .expect_rules("MetaData")?
            .insertion_index(&self.document, container, "Meta")?;

        let entry = self.document.create_text_element("Meta", value)?;
        self.document.set_attr(entry, "name", &key.to_string())?;
        if let Some(t) = meta_type {
            self.document.set_attr(entry, "type", &t)?;
        }
        self.document.insert_element_indented(container, index, entry)?;
        debug!(key, "added metadata entry");
        Ok(())
    }

    // ---- structural mutation ----

    /// Add an empty dataset, placed after the existing ones
    pub fn add_dataset(&mut self, id: &str) -> Result<DatasetMut<'_>> {
        let node = self.add_identified(Dataset::TAG, id)?;
        Ok(DatasetMut::new(self, node, id))
    }

    /// Add an empty realization, placed after the existing ones
    pub fn add_realization(&mut self, id: &str) -> Result<RealizationMut<'_>> {
        let node = self.add_identified(Realization::TAG, id)?;
        Ok(RealizationMut::new(self, node, id))
    }

    fn add_identified(&mut self, tag: &str, id: &str) -> Result<NodeId> {
        validate_identifier(id)?;
        if let Some(existing) = self.node_of(id) {
            return Err(Error::DuplicateIdentifier {
                id: id.to_string(),
                first: self.document.path_of(existing),
                second: format!("{}/{}", self.document.path_of(self.document.root()), tag),
            });
        }
        let root = self.document.root();
        let attr = self
            .rules
            .identifier_attr(tag)
            .ok_or_else(|| Error::schema(tag, format!("'{}' carries no identifier", tag)))?
            .to_string();
        let index = self.rules_of(root)?.insertion_index(&self.document, root, tag)?;

        let node = self.document.create_element(tag)?;
        self.document.set_attr(node, &attr, &id.to_string())?;
        self.document.insert_element_indented(root, index, node)?;

        self.resolution.index.insert(id.to_string(), node);
        self.stale.insert(id.to_string());
        info!(id, tag, "added node");
        Ok(node)
    }

    /// Remove a realization and everything inside it
    ///
    /// Fails while another node still references it.
    pub fn remove_realization(&mut self, id: &str) -> Result<()> {
        self.remove_identified(Realization::TAG, id)
    }

    /// Remove a dataset; fails while anything still references it
    pub fn remove_dataset(&mut self, id: &str) -> Result<()> {
        self.remove_identified(Dataset::TAG, id)
    }

    fn remove_identified(&mut self, tag: &str, id: &str) -> Result<()> {
        let node = self.lookup_kind(id, tag)?;
        let resolver = Resolver::new(&self.rules);

        let incoming = resolver
            .reference_sites(&self.document)
            .into_iter()
            .find(|site| site.target == id && site.source != id);
        if let Some(site) = incoming {
            return Err(Error::schema(
                self.document.path_of(node),
                format!("'{}' is still referenced by '{}' ({})", id, site.source, site.role),
            ));
        }

        let touched: Vec<String> = resolver
            .reference_sites_under(&self.document, node)
            .into_iter()
            .map(|site| site.target)
            .collect();
        self.document.remove_child(node)?;

        self.resolution.index.shift_remove(id);
        self.stale.insert(id.to_string());
        self.stale.extend(touched);
        info!(id, tag, "removed node");
        Ok(())
    }

    /// Record that a realization consumes a dataset
    pub fn add_input(&mut self, realization: &str, dataset: &str) -> Result<()> {
        self.add_reference(realization, Role::Input, dataset)
    }

    /// Record that a realization produces a dataset
    pub fn add_output(&mut self, realization: &str, dataset: &str) -> Result<()> {
        self.add_reference(realization, Role::Output, dataset)
    }

    /// Record that a dataset was derived from another one
    pub fn add_derived_from(&mut self, dataset: &str, source: &str) -> Result<()> {
        self.add_reference(dataset, Role::DerivedFrom, source)
    }

    /// Add an informational link between two identified nodes
    pub fn add_related(&mut self, source: &str, target: &str) -> Result<()> {
        self.add_reference(source, Role::RelatedTo, target)
    }

    /// Add a reference element under `source`
    ///
    /// Adding a reference that already exists is not a change. Lineage
    /// references that would close a cycle are refused.
    pub fn add_reference(&mut self, source: &str, role: Role, target: &str) -> Result<()> {
        let source_node = match role.source_tag() {
            Some(tag) => self.lookup_kind(source, tag)?,
            None => self.lookup(source)?,
        };
        if self.node_of(target).is_none() {
            return Err(Error::DanglingReference {
                source_id: source.to_string(),
                target: target.to_string(),
                role,
            });
        }
        if let Some(tag) = role.target_tag() {
            self.lookup_kind(target, tag)?;
        }

        let resolver = Resolver::new(&self.rules);
        let exists = resolver
            .reference_sites_under(&self.document, source_node)
            .iter()
            .any(|site| site.role == role && site.target == target && site.source == source);
        if exists {
            return Ok(());
        }
        if role.is_lineage() {
            let mut edges: Vec<ReferenceEdge> = resolver
                .reference_sites(&self.document)
                .into_iter()
                .map(|site| ReferenceEdge::new(site.source, site.target, site.role))
                .collect();
            edges.push(ReferenceEdge::new(source, target, role));
            check_lineage(&edges)?;
        }

        let rules = Arc::clone(&self.rules);
        let element_tag = role.element_tag();
        let (attr, _) = rules
            .reference_attr(element_tag)
            .ok_or_else(|| Error::schema(element_tag, format!("'{}' carries no reference", element_tag)))?;

        let parent = match role.container_tag() {
            Some(container) => {
                if self.document.first_child_named(source_node, container).is_none() {
                    self.rules_of(source_node)?
                        .insertion_index(&self.document, source_node, container)?;
                }
                self.ensure_child(source_node, container)?
            }
            None => source_node,
        };
        let index = self.rules_of(parent)?.insertion_index(&self.document, parent, element_tag)?;

        let reference = self.document.create_element(element_tag)?;
        self.document.set_attr(reference, attr, &target.to_string())?;
        self.document.insert_element_indented(parent, index, reference)?;

        self.stale.insert(source.to_string());
        self.stale.insert(target.to_string());
        debug!(source, target, %role, "added reference");
        Ok(())
    }

    /// Remove a reference element, returning whether one was found
    pub fn remove_reference(&mut self, source: &str, role: Role, target: &str) -> Result<bool> {
        let source_node = self.lookup(source)?;
        let doomed: Vec<NodeId> = Resolver::new(&self.rules)
            .reference_sites_under(&self.document, source_node)
            .into_iter()
            .filter(|site| site.role == role && site.target == target && site.source == source)
            .map(|site| site.node)
            .collect();
        for node in &doomed {
            self.document.remove_child(*node)?;
        }
        if !doomed.is_empty() {
            self.stale.insert(source.to_string());
            self.stale.insert(target.to_string());
            debug!(source, target, %role, "removed reference");
        }
        Ok(!doomed.is_empty())
    }

    // ---- field helpers used by the mutable lenses ----

    /// Existing child with `tag`, or a new empty one at its schema position
    pub(crate) fn ensure_child(&mut self, parent: NodeId, tag: &str) -> Result<NodeId> {
        if let Some(child) = self.document.first_child_named(parent, tag) {
            return Ok(child);
        }
        let index = self.rules_of(parent)?.insertion_index(&self.document, parent, tag)?;
        let child = self.document.create_element(tag)?;
        self.document.insert_element_indented(parent, index, child)?;
        Ok(child)
    }

    /// Set the text of a child element, creating it at its schema position
    pub(crate) fn set_child_text(&mut self, parent: NodeId, tag: &str, text: &str) -> Result<()> {
        if let Some(child) = self.document.first_child_named(parent, tag) {
            return self.document.set_text(child, text);
        }
        let index = self.rules_of(parent)?.insertion_index(&self.document, parent, tag)?;
        let child = self.document.create_text_element(tag, text)?;
        self.document.insert_element_indented(parent, index, child)
    }

    /// Set a declared attribute after checking its value space
    ///
    /// Identifier and reference attributes only change through the
    /// structural operations.
    pub(crate) fn set_checked_attr<T: AttrValue>(&mut self, node: NodeId, name: &str, value: &T) -> Result<()> {
        let text = value.to_value();
        let path = self.document.path_of(node);
        let rules = self.rules_of(node)?;
        if let Some(rule) = rules.attr_rule(name) {
            if matches!(rule.kind, AttrKind::Identifier | AttrKind::Reference(_)) {
                return Err(Error::schema(
                    path,
                    format!("attribute '{}' can only change through graph operations", name),
                ));
            }
        }
        rules.check_attr_value(&path, name, &text)?;
        self.document.set_attr(node, name, value)
    }

    /// Remove an optional attribute
    pub(crate) fn remove_checked_attr(&mut self, node: NodeId, name: &str) -> Result<()> {
        if self.rules_of(node)?.is_required(name) {
            return Err(Error::schema(
                self.document.path_of(node),
                format!("required attribute '{}' cannot be removed", name),
            ));
        }
        self.document.remove_attr(node, name)?;
        Ok(())
    }

    /// Summary used to compare graphs; fails while anything is stale
    pub fn summary(&self) -> Result<GraphSummary> {
        let mut edges = self.edges()?.to_vec();
        edges.sort();

        let mut nodes: Vec<NodeSummary> = self
            .resolution
            .index
            .iter()
            .map(|(id, node)| self.node_summary(id, *node))
            .collect::<Result<_>>()?;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let root = self.document.root();
        let project_id = self.document.child_text(root, "Id").unwrap_or_default();
        Ok(GraphSummary {
            project: self.node_summary(&project_id, root)?,
            nodes,
            edges,
        })
    }

    fn node_summary(&self, id: &str, node: NodeId) -> Result<NodeSummary> {
        let el = self.document.expect_element(node)?;
        let attributes = el
            .attributes()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut fields = BTreeMap::new();
        for child in self.document.child_elements(node) {
            let Some(child_el) = self.document.element(child) else { continue };
            let tag = child_el.local_name();
            let is_text = self
                .rules
                .rules_for(tag)
                .map(|r| r.text_kind().is_some() && r.child_order().is_empty())
                .unwrap_or(false);
            if is_text && tag != "Meta" {
                let text = self.document.text(child).unwrap_or_default();
                fields.insert(tag.to_string(), text.trim().to_string());
            }
        }

        let meta = nodes::meta_entries(&self.document, node)
            .iter()
            .map(|e| (e.name().to_string(), e.value().trim().to_string()))
            .collect();

        Ok(NodeSummary {
            id: id.to_string(),
            kind: el.local_name().to_string(),
            attributes,
            fields,
            meta,
        })
    }
}

/// Identifier set, edge set and field values of a graph
///
/// Two graphs with equal summaries describe the same project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    /// The project root (`id` is the project's `Id` text)
    pub project: NodeSummary,
    /// Identified nodes sorted by identifier
    pub nodes: Vec<NodeSummary>,
    /// Edges, sorted
    pub edges: Vec<ReferenceEdge>,
}

impl GraphSummary {
    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::schema("/", format!("cannot render summary: {}", e)))
    }
}

/// Field values of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    /// Identifier
    pub id: String,
    /// Element kind
    pub kind: String,
    /// Attribute values as stored
    pub attributes: BTreeMap<String, String>,
    /// Text children such as `Name` and `Path`
    pub fields: BTreeMap<String, String>,
    /// Metadata entries in document order
    pub meta: Vec<(String, String)>,
}

fn check_root(doc: &Document, rules: &SchemaRules) -> Result<()> {
    let root = doc.root();
    let el = doc.expect_element(root)?;
    if el.local_name() != rules.root_tag() || !doc.is_riverscapes(root) {
        return Err(Error::schema(
            doc.path_of(root),
            format!("root element must be '{}'", rules.root_tag()),
        ));
    }
    if let Some(found) = doc.schema_version() {
        if found > rules.version() {
            return Err(Error::UnsupportedSchemaVersion {
                found,
                supported: rules.version(),
            });
        }
    }
    // Lookups and inserted children use bare tag names
    if let Some(prefixed) = doc
        .modeled_descendants(root)
        .find(|n| doc.element(*n).is_some_and(|el| el.prefix().is_some()))
    {
        return Err(Error::schema(
            doc.path_of(prefixed),
            "schema elements must use the default namespace, not a prefix",
        ));
    }
    Ok(())
}

fn check_meta_key(doc: &Document, owner: NodeId, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::schema(doc.path_of(owner), "metadata name must not be empty"));
    }
    Ok(())
}

/// Breadth-first walk over lineage dependencies starting at `start`
fn walk_lineage<'e>(
    edges: &'e [ReferenceEdge],
    start: &str,
    orient: impl Fn((&'e str, &'e str)) -> (&'e str, &'e str),
) -> Vec<String> {
    let mut seen: IndexSet<&str> = IndexSet::new();
    let mut frontier = vec![start];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for node in frontier {
            for (from, to) in edges.iter().filter_map(|e| e.lineage_dependency()).map(&orient) {
                if from == node && to != start && seen.insert(to) {
                    next.push(to);
                }
            }
        }
        frontier = next;
    }
    seen.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"<Project>
  <Id>p1</Id>
  <Dataset id="dem"/>
  <Dataset id="slope"/>
  <Realization id="r1">
    <Inputs>
      <Input ref="dem"/>
    </Inputs>
    <Outputs>
      <Output ref="slope"/>
    </Outputs>
  </Realization>
</Project>
"#;

    fn graph() -> ProjectGraph {
        ProjectGraph::parse(PROJECT, Arc::new(SchemaRules::riverscapes_v2())).unwrap()
    }

    fn ids<'a, T: TypedNode<'a>>(views: Vec<T>) -> Vec<String> {
        views
            .iter()
            .map(|v| v.element().attr("id").unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_navigation_both_ways() {
        let g = graph();
        assert_eq!(ids(g.inputs_of("r1").unwrap()), vec!["dem"]);
        assert_eq!(ids(g.outputs_of("r1").unwrap()), vec!["slope"]);
        assert_eq!(ids(g.consumers_of("dem").unwrap()), vec!["r1"]);
        assert_eq!(ids(g.producers_of("slope").unwrap()), vec!["r1"]);
        assert!(g.consumers_of("slope").unwrap().is_empty());
        assert_eq!(g.upstream_of("slope").unwrap(), vec!["r1", "dem"]);
        assert_eq!(g.downstream_of("dem").unwrap(), vec!["r1", "slope"]);
    }

    #[test]
    fn test_add_input_requires_reresolve() {
        let mut g = graph();
        g.add_dataset("hillshade").unwrap();
        g.add_input("r1", "hillshade").unwrap();

        assert!(matches!(g.inputs_of("r1"), Err(Error::StaleGraph { .. })));
        assert!(matches!(g.edges(), Err(Error::StaleGraph { .. })));
        // untouched identifiers stay readable
        assert_eq!(ids(g.producers_of("slope").unwrap()), vec!["r1"]);

        g.reresolve().unwrap();
        assert_eq!(ids(g.inputs_of("r1").unwrap()), vec!["dem", "hillshade"]);
    }

    #[test]
    fn test_add_dataset_goes_before_realizations() {
        let mut g = graph();
        g.add_dataset("hillshade").unwrap();
        let out = g.write();
        let dataset = out.find(r#"<Dataset id="hillshade"/>"#).unwrap();
        let realization = out.find("<Realization").unwrap();
        assert!(dataset < realization);
        assert!(out.contains("  <Dataset id=\"slope\"/>\n  <Dataset id=\"hillshade\"/>\n  <Realization"));
    }

    #[test]
    fn test_duplicate_dataset_is_refused() {
        let mut g = graph();
        let before = g.write();
        assert!(matches!(g.add_dataset("dem"), Err(Error::DuplicateIdentifier { .. })));
        assert!(matches!(g.add_dataset("not valid"), Err(Error::InvalidName(_))));
        assert_eq!(g.write(), before);
        assert!(!g.is_stale());
    }

    #[test]
    fn test_cycle_is_refused_before_mutation() {
        let mut g = graph();
        let before = g.write();
        // r1 produces slope; feeding slope back into r1 closes a loop
        let err = g.add_input("r1", "slope").unwrap_err();
        assert!(matches!(err, Error::CyclicLineage { .. }));
        assert_eq!(g.write(), before);
    }

    #[test]
    fn test_reference_target_kind_is_checked() {
        let mut g = graph();
        assert!(matches!(g.add_input("r1", "r1"), Err(Error::SchemaViolation { .. })));
        assert!(matches!(g.add_input("dem", "slope"), Err(Error::SchemaViolation { .. })));
        assert!(matches!(g.add_input("r1", "ghost"), Err(Error::DanglingReference { .. })));
    }

    #[test]
    fn test_remove_referenced_dataset_fails() {
        let mut g = graph();
        let err = g.remove_dataset("dem").unwrap_err();
        assert!(err.to_string().contains("still referenced by 'r1'"));

        g.remove_realization("r1").unwrap();
        assert!(matches!(g.consumers_of("dem"), Err(Error::StaleGraph { .. })));
        g.remove_dataset("dem").unwrap();
        g.reresolve().unwrap();
        assert_eq!(g.identifiers().collect::<Vec<_>>(), vec!["slope"]);
        assert!(g.edges().unwrap().is_empty());
    }

    #[test]
    fn test_meta_last_write_wins_but_keeps_duplicates() {
        let mut g = graph();
        g.add_meta("dem", "source", "usgs").unwrap();
        g.add_meta("dem", "source", "lidar").unwrap();
        assert_eq!(g.meta_value::<String>("dem", "source").unwrap().as_deref(), Some("lidar"));
        assert_eq!(g.meta("dem").unwrap().len(), 2);

        g.set_meta("dem", "source", "survey").unwrap();
        let values: Vec<String> = g.meta("dem").unwrap().iter().map(|e| e.value()).collect();
        assert_eq!(values, vec!["usgs", "survey"]);

        assert_eq!(g.remove_meta("dem", "source").unwrap(), 2);
        assert!(g.meta("dem").unwrap().is_empty());
    }

    #[test]
    fn test_typed_meta_checks_value() {
        let mut g = graph();
        g.set_meta_typed(MetaOwner::Project, "cells", "1024", MetaType::Int).unwrap();
        assert_eq!(g.meta_value::<i64>(MetaOwner::Project, "cells").unwrap(), Some(1024));
        assert!(matches!(
            g.set_meta(MetaOwner::Project, "cells", "many"),
            Err(Error::TypeCoercion { .. })
        ));
        assert!(matches!(
            g.set_meta(MetaOwner::Project, "  ", "x"),
            Err(Error::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_apply_metadata_is_all_or_nothing() {
        let mut g = graph();
        assert!(g.apply_metadata("r1", "a=1,b").is_err());
        assert!(g.meta("r1").unwrap().is_empty());

        g.apply_metadata("r1", "model=VBET,version=2.1").unwrap();
        assert_eq!(g.meta_value::<String>("r1", "version").unwrap().as_deref(), Some("2.1"));
    }

    #[test]
    fn test_new_project_writes_declaration_and_schema_location() {
        let rules = Arc::new(SchemaRules::riverscapes_v2());
        let mut g = ProjectGraph::new_project("p9", rules.clone()).unwrap();
        g.add_dataset("d1").unwrap();
        let out = g.write();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Project xmlns:xsi="));
        assert!(out.contains("\n  <Id>p9</Id>\n  <Dataset id=\"d1\"/>\n</Project>\n"), "{}", out);

        let reparsed = ProjectGraph::parse(&out, rules).unwrap();
        assert_eq!(reparsed.project().unwrap().id().as_deref(), Some("p9"));
    }

    #[test]
    fn test_summary_matches_after_round_trip() {
        let mut g = graph();
        g.dataset_mut("dem").unwrap().set_name("Elevation").unwrap();
        g.set_meta("r1", "model", "VBET").unwrap();
        let out = g.write();

        let reparsed = ProjectGraph::parse(&out, g.rules().clone()).unwrap();
        assert_eq!(reparsed.summary().unwrap(), g.summary().unwrap());
    }

    #[test]
    fn test_wrong_root_is_refused() {
        let err = ProjectGraph::parse("<Other/>", Arc::new(SchemaRules::riverscapes_v2())).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { .. }));
    }
}
