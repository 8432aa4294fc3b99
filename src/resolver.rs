//! Identifier index and reference edges
//!
//! Datasets and realizations carry an identifier attribute; reference
//! elements (`<Input ref="..."/>` and friends) point at identifiers. The
//! resolver walks a [`Document`], builds the identifier index and the list
//! of [`ReferenceEdge`]s, and refuses documents with duplicate identifiers,
//! dangling references, or cycles through lineage roles.
//!
//! Edges are an overlay keyed by identifier, never pointers into the tree,
//! so a document can always be re-resolved after it changes.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::documents::{Document, NodeId};
use crate::error::{Error, Result};
use crate::rules::SchemaRules;

/// Role of a reference edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Role {
    /// A realization consumes a dataset
    Input,
    /// A realization produces a dataset
    Output,
    /// A dataset was derived from another dataset
    DerivedFrom,
    /// Informational cross-link, not part of the lineage
    RelatedTo,
}

impl Role {
    /// Whether edges of this role take part in lineage (and cycle checks)
    pub fn is_lineage(&self) -> bool {
        !matches!(self, Role::RelatedTo)
    }

    /// Tag the source node must have, if restricted
    pub fn source_tag(&self) -> Option<&'static str> {
        match self {
            Role::Input | Role::Output => Some("Realization"),
            Role::DerivedFrom => Some("Dataset"),
            Role::RelatedTo => None,
        }
    }

    /// Tag the target node must have, if restricted
    pub fn target_tag(&self) -> Option<&'static str> {
        match self {
            Role::Input | Role::Output | Role::DerivedFrom => Some("Dataset"),
            Role::RelatedTo => None,
        }
    }

    /// Tag of the reference element
    pub fn element_tag(&self) -> &'static str {
        match self {
            Role::Input => "Input",
            Role::Output => "Output",
            Role::DerivedFrom => "DerivedFrom",
            Role::RelatedTo => "RelatedTo",
        }
    }

    /// Container the reference element lives in, if any
    pub fn container_tag(&self) -> Option<&'static str> {
        match self {
            Role::Input => Some("Inputs"),
            Role::Output => Some("Outputs"),
            Role::DerivedFrom | Role::RelatedTo => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_tag())
    }
}

/// Directed relation between two identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReferenceEdge {
    /// Identifier of the node holding the reference
    pub source: String,
    /// Referenced identifier
    pub target: String,
    /// Role of the reference
    pub role: Role,
}

impl ReferenceEdge {
    /// Create an edge
    pub fn new(source: impl Into<String>, target: impl Into<String>, role: Role) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            role,
        }
    }

    /// `(dependent, dependency)` for lineage edges
    ///
    /// A realization depends on its inputs, an output dataset depends on the
    /// realization that produced it, and a derived dataset depends on its
    /// source.
    pub fn lineage_dependency(&self) -> Option<(&str, &str)> {
        match self.role {
            Role::Input | Role::DerivedFrom => Some((&self.source, &self.target)),
            Role::Output => Some((&self.target, &self.source)),
            Role::RelatedTo => None,
        }
    }
}

/// Result of resolving a document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Identifier to element, in document order
    pub index: IndexMap<String, NodeId>,
    /// Edges in document order
    pub edges: Vec<ReferenceEdge>,
}

impl Resolution {
    /// Element carrying an identifier
    pub fn node_of(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Identifiers in document order
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(|k| k.as_str())
    }
}

/// A reference element found in the tree
#[derive(Debug, Clone)]
pub struct ReferenceSite {
    /// The reference element
    pub node: NodeId,
    /// Identifier of the nearest identified ancestor, or its path
    pub source: String,
    /// Referenced identifier
    pub target: String,
    /// Role of the reference
    pub role: Role,
}

/// Builds [`Resolution`]s according to one set of [`SchemaRules`]
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'r> {
    rules: &'r SchemaRules,
}

impl<'r> Resolver<'r> {
    /// Create a resolver
    pub fn new(rules: &'r SchemaRules) -> Self {
        Self { rules }
    }

    /// Index identifiers, collect edges, check lineage for cycles
    pub fn resolve(&self, doc: &Document) -> Result<Resolution> {
        let index = self.collect_identifiers(doc)?;
        let mut edges = Vec::new();

        for site in self.reference_sites(doc) {
            let Some(target) = index.get(&site.target) else {
                return Err(Error::DanglingReference {
                    source_id: site.source,
                    target: site.target,
                    role: site.role,
                });
            };
            self.check_target_kind(doc, &site, *target)?;
            edges.push(ReferenceEdge::new(site.source, site.target, site.role));
        }

        check_lineage(&edges)?;
        debug!(
            identifiers = index.len(),
            edges = edges.len(),
            "resolved document"
        );
        Ok(Resolution { index, edges })
    }

    /// Identifier of every modeled element that carries one
    pub fn collect_identifiers(&self, doc: &Document) -> Result<IndexMap<String, NodeId>> {
        let mut index: IndexMap<String, NodeId> = IndexMap::new();
        for node in doc.modeled_descendants(doc.root()) {
            let Some(id) = self.identifier_of(doc, node) else { continue };
            if let Some(first) = index.get(id) {
                return Err(Error::DuplicateIdentifier {
                    id: id.to_string(),
                    first: doc.path_of(*first),
                    second: doc.path_of(node),
                });
            }
            index.insert(id.to_string(), node);
        }
        Ok(index)
    }

    /// Identifier carried by this element itself
    pub fn identifier_of<'d>(&self, doc: &'d Document, node: NodeId) -> Option<&'d str> {
        let el = doc.element(node)?;
        if !doc.is_riverscapes(node) {
            return None;
        }
        let attr = self.rules.identifier_attr(el.local_name())?;
        el.attr(attr)
    }

    /// Identifier of the nearest identified ancestor-or-self
    pub fn owner_of(&self, doc: &Document, node: NodeId) -> Option<String> {
        let mut current = Some(node);
        while let Some(n) = current {
            if let Some(id) = self.identifier_of(doc, n) {
                return Some(id.to_string());
            }
            current = doc.parent(n);
        }
        None
    }

    /// Every reference element under the root, in document order
    pub fn reference_sites(&self, doc: &Document) -> Vec<ReferenceSite> {
        self.reference_sites_under(doc, doc.root())
    }

    /// Reference elements in one subtree
    pub fn reference_sites_under(&self, doc: &Document, root: NodeId) -> Vec<ReferenceSite> {
        let mut sites = Vec::new();
        for node in doc.modeled_descendants(root) {
            let Some(el) = doc.element(node) else { continue };
            if !doc.is_riverscapes(node) {
                continue;
            }
            let Some((attr, role)) = self.rules.reference_attr(el.local_name()) else {
                continue;
            };
            let Some(target) = el.attr(attr) else { continue };
            let source = self
                .owner_of(doc, node)
                .unwrap_or_else(|| doc.path_of(node));
            sites.push(ReferenceSite {
                node,
                source,
                target: target.trim().to_string(),
                role,
            });
        }
        sites
    }

    fn check_target_kind(&self, doc: &Document, site: &ReferenceSite, target: NodeId) -> Result<()> {
        let Some(expected) = site.role.target_tag() else {
            return Ok(());
        };
        let found = doc.element(target).map(|el| el.local_name()).unwrap_or_default();
        if found != expected {
            return Err(Error::schema(
                doc.path_of(site.node),
                format!(
                    "{} reference '{}' must point at a {}, found {}",
                    site.role, site.target, expected, found
                ),
            ));
        }
        Ok(())
    }
}

/// Fail with [`Error::CyclicLineage`] if lineage edges close a cycle
pub fn check_lineage(edges: &[ReferenceEdge]) -> Result<()> {
    match find_lineage_cycle(edges) {
        Some(cycle) => Err(Error::CyclicLineage { cycle }),
        None => Ok(()),
    }
}

/// First cycle through lineage edges, as a path that ends where it starts
///
/// Depth-first search with an explicit recursion stack, following
/// dependent -> dependency. Nodes are visited in order of first appearance,
/// so the reported cycle is deterministic.
pub fn find_lineage_cycle(edges: &[ReferenceEdge]) -> Option<Vec<String>> {
    let mut adjacency: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for edge in edges {
        let Some((dependent, dependency)) = edge.lineage_dependency() else { continue };
        adjacency.entry(dependent).or_default().push(dependency);
        adjacency.entry(dependency).or_default();
    }

    let mut done: IndexSet<&str> = IndexSet::new();
    for &start in adjacency.keys() {
        if done.contains(start) {
            continue;
        }
        // (node, index of the next neighbour to visit)
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut on_stack: IndexSet<&str> = IndexSet::from([start]);

        while let Some((node, next)) = stack.last_mut() {
            let neighbours = &adjacency[*node];
            if *next >= neighbours.len() {
                done.insert(*node);
                on_stack.shift_remove(*node);
                stack.pop();
                continue;
            }
            let neighbour = neighbours[*next];
            *next += 1;

            if on_stack.contains(neighbour) {
                let from = stack.iter().position(|(n, _)| *n == neighbour).unwrap_or(0);
                let mut cycle: Vec<String> = stack[from..].iter().map(|(n, _)| n.to_string()).collect();
                cycle.push(neighbour.to_string());
                return Some(cycle);
            }
            if !done.contains(neighbour) {
                on_stack.insert(neighbour);
                stack.push((neighbour, 0));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(xml: &str) -> Result<Resolution> {
        let rules = SchemaRules::riverscapes_v2();
        let doc = Document::parse(xml)?;
        Resolver::new(&rules).resolve(&doc)
    }

    #[test]
    fn test_index_and_edges() {
        let res = resolve(
            r#"<Project><Id>p</Id>
                <Dataset id="dem"/>
                <Dataset id="slope"><DerivedFrom ref="dem"/></Dataset>
                <Realization id="r1">
                    <Inputs><Input ref="dem"/></Inputs>
                    <Outputs><Output ref="slope"/></Outputs>
                </Realization>
            </Project>"#,
        )
        .unwrap();

        assert_eq!(res.identifiers().collect::<Vec<_>>(), vec!["dem", "slope", "r1"]);
        assert_eq!(
            res.edges,
            vec![
                ReferenceEdge::new("slope", "dem", Role::DerivedFrom),
                ReferenceEdge::new("r1", "dem", Role::Input),
                ReferenceEdge::new("r1", "slope", Role::Output),
            ]
        );
    }

    #[test]
    fn test_duplicate_identifier() {
        let err = resolve(r#"<Project><Id>p</Id><Dataset id="d1"/><Dataset id="d1"/></Project>"#)
            .unwrap_err();
        match err {
            Error::DuplicateIdentifier { id, first, second } => {
                assert_eq!(id, "d1");
                assert_eq!(first, "/Project/Dataset[1]");
                assert_eq!(second, "/Project/Dataset[2]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dangling_reference() {
        let err = resolve(
            r#"<Project><Id>p</Id><Realization id="r1"><Inputs><Input ref="ghost"/></Inputs></Realization></Project>"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference { ref target, role: Role::Input, .. } if target == "ghost"
        ));
    }

    #[test]
    fn test_input_must_target_dataset() {
        let err = resolve(
            r#"<Project><Id>p</Id><Realization id="r1"/><Realization id="r2"><Inputs><Input ref="r1"/></Inputs></Realization></Project>"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { .. }));
    }

    #[test]
    fn test_related_to_may_form_loops() {
        let res = resolve(
            r#"<Project><Id>p</Id>
                <Dataset id="a"><RelatedTo ref="b"/></Dataset>
                <Dataset id="b"><RelatedTo ref="a"/></Dataset>
            </Project>"#,
        );
        assert!(res.is_ok());
    }

    #[test]
    fn test_foreign_elements_are_not_indexed() {
        let res = resolve(
            r#"<Project xmlns:ext="urn:ext"><Id>p</Id><ext:Dataset id="x"/><Dataset id="x"/></Project>"#,
        )
        .unwrap();
        assert_eq!(res.index.len(), 1);
    }

    #[test]
    fn test_foreign_wrapper_hides_its_subtree() {
        let res = resolve(
            r#"<Project xmlns:ext="urn:ext"><Id>p</Id>
                <ext:Wrap><Dataset id="d1"><DerivedFrom ref="nowhere"/></Dataset></ext:Wrap>
                <Dataset id="d1"/>
            </Project>"#,
        )
        .unwrap();
        assert_eq!(res.index.keys().collect::<Vec<_>>(), vec!["d1"]);
        assert!(res.edges.is_empty());
    }

    #[test]
    fn test_find_cycle_through_realizations() {
        // d1 -> r1 -> d2 -> r2 -> d1
        let edges = vec![
            ReferenceEdge::new("r1", "d1", Role::Input),
            ReferenceEdge::new("r1", "d2", Role::Output),
            ReferenceEdge::new("r2", "d2", Role::Input),
            ReferenceEdge::new("r2", "d1", Role::Output),
        ];
        let cycle = find_lineage_cycle(&edges).unwrap();
        assert_eq!(cycle, vec!["r1", "d1", "r2", "d2", "r1"]);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let edges = vec![
            ReferenceEdge::new("b", "a", Role::DerivedFrom),
            ReferenceEdge::new("c", "a", Role::DerivedFrom),
            ReferenceEdge::new("d", "b", Role::DerivedFrom),
            ReferenceEdge::new("d", "c", Role::DerivedFrom),
        ];
        assert!(find_lineage_cycle(&edges).is_none());
    }
}
