//! Validation pass
//!
//! Unlike the fail-fast checks on mutation, [`Validator`] walks the whole
//! document and collects every problem it finds as a [`Violation`]. Nothing
//! here returns an error: a document that cannot even be indexed still gets
//! a report. Elements outside the Riverscapes namespace are skipped along
//! with their subtrees.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::documents::{Document, NodeId, NodeKind};
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;
use crate::nodes::check_meta_value;
use crate::resolver::{find_lineage_cycle, ReferenceEdge, Resolver};
use crate::rules::{ElementRules, SchemaRules, ValueProblem};
use crate::values::MetaType;

/// What kind of rule a [`Violation`] breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required child element is absent
    MissingChild,
    /// More children of one kind than allowed
    TooManyChildren,
    /// A child appears before one that must precede it
    ChildOrder,
    /// A required attribute is absent
    MissingAttribute,
    /// An attribute value does not convert to its declared type
    InvalidAttributeValue,
    /// A numeric value lies outside its declared range
    OutOfRange,
    /// An element the schema does not allow here
    UnexpectedElement,
    /// Character data in an element that only holds elements
    UnexpectedText,
    /// Two nodes share one identifier
    DuplicateIdentifier,
    /// A reference names an identifier that does not exist
    DanglingReference,
    /// A reference names a node of the wrong kind
    InvalidReferenceTarget,
    /// Lineage references close a cycle
    CyclicLineage,
    /// A metadata value does not match its declared type
    InvalidMetaValue,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::MissingChild => "missing child",
            ViolationKind::TooManyChildren => "too many children",
            ViolationKind::ChildOrder => "child order",
            ViolationKind::MissingAttribute => "missing attribute",
            ViolationKind::InvalidAttributeValue => "invalid attribute value",
            ViolationKind::OutOfRange => "out of range",
            ViolationKind::UnexpectedElement => "unexpected element",
            ViolationKind::UnexpectedText => "unexpected text",
            ViolationKind::DuplicateIdentifier => "duplicate identifier",
            ViolationKind::DanglingReference => "dangling reference",
            ViolationKind::InvalidReferenceTarget => "invalid reference target",
            ViolationKind::CyclicLineage => "cyclic lineage",
            ViolationKind::InvalidMetaValue => "invalid metadata value",
        };
        f.write_str(name)
    }
}

/// One schema problem found by the validation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// The broken rule
    pub kind: ViolationKind,
    /// Location such as `/Project/Dataset[2]`
    pub path: String,
    /// Human readable description
    pub message: String,
    /// Tag of the element involved, if there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

impl Violation {
    /// Create a violation
    pub fn new(kind: ViolationKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
            element: None,
        }
    }

    /// Set the element tag
    pub fn with_element(mut self, tag: impl Into<String>) -> Self {
        self.element = Some(tag.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.path, self.message)
    }
}

/// Collected violations, ready for serialization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Whether no violations were found
    pub valid: bool,
    /// Violations in document order, structural ones last
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Wrap a list of violations
    pub fn new(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    /// Number of violations of one kind
    pub fn count_of(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::schema("/", format!("cannot render report: {}", e)))
    }
}

/// Validate a resolved graph
pub fn validate(graph: &ProjectGraph) -> Vec<Violation> {
    Validator::new(graph.rules()).validate(graph)
}

/// Checks documents against one set of [`SchemaRules`]
#[derive(Debug, Clone, Copy)]
pub struct Validator<'r> {
    rules: &'r SchemaRules,
}

impl<'r> Validator<'r> {
    /// Create a validator
    pub fn new(rules: &'r SchemaRules) -> Self {
        Self { rules }
    }

    /// Validate the document held by a graph
    pub fn validate(&self, graph: &ProjectGraph) -> Vec<Violation> {
        self.validate_document(graph.document())
    }

    /// Validate a document, whether or not it resolves
    pub fn validate_document(&self, doc: &Document) -> Vec<Violation> {
        let mut violations = Vec::new();
        let root = doc.root();
        let root_tag = doc.element(root).map(|el| el.local_name()).unwrap_or_default();

        if root_tag != self.rules.root_tag() || !doc.is_riverscapes(root) {
            violations.push(
                Violation::new(
                    ViolationKind::UnexpectedElement,
                    doc.path_of(root),
                    format!("root element must be '{}'", self.rules.root_tag()),
                )
                .with_element(root_tag),
            );
        }
        if let Some(rules) = self.rules.rules_for(root_tag) {
            self.check_element(doc, root, rules, &mut violations);
        }
        self.check_references(doc, &mut violations);

        debug!(violations = violations.len(), "validated document");
        violations
    }

    /// Validate and wrap the result in a report
    pub fn report(&self, doc: &Document) -> ValidationReport {
        ValidationReport::new(self.validate_document(doc))
    }

    fn check_element(&self, doc: &Document, node: NodeId, rules: &ElementRules, out: &mut Vec<Violation>) {
        let Some(el) = doc.element(node) else { return };
        let path = doc.path_of(node);
        let tag = el.local_name();

        for rule in rules.required_attrs() {
            if !el.has_attr(&rule.name) {
                out.push(
                    Violation::new(
                        ViolationKind::MissingAttribute,
                        &path,
                        format!("required attribute '{}' is missing", rule.name),
                    )
                    .with_element(tag),
                );
            }
        }
        for (name, value) in el.attributes() {
            let Some(rule) = rules.attr_rule(name) else { continue };
            if let Err(problem) = rule.kind.check(value) {
                out.push(value_violation(&path, tag, &format!("attribute '{}'", name), problem));
            }
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut furthest: Option<(usize, &str)> = None;
        let mut text = String::new();

        for &child in doc.children(node) {
            match doc.kind(child) {
                Some(NodeKind::Element(child_el)) => {
                    if !doc.is_riverscapes(child) {
                        continue;
                    }
                    let child_tag = child_el.local_name();
                    let child_rules = self.rules.rules_for(child_tag);
                    let (Some(rank), Some(child_rules)) = (rules.rank_of(child_tag), child_rules) else {
                        out.push(
                            Violation::new(
                                ViolationKind::UnexpectedElement,
                                doc.path_of(child),
                                format!("'{}' is not allowed inside '{}'", child_tag, tag),
                            )
                            .with_element(child_tag),
                        );
                        continue;
                    };

                    *counts.entry(child_tag).or_default() += 1;
                    match furthest {
                        Some((seen, seen_tag)) if rank < seen => out.push(
                            Violation::new(
                                ViolationKind::ChildOrder,
                                doc.path_of(child),
                                format!("'{}' must come before '{}'", child_tag, seen_tag),
                            )
                            .with_element(child_tag),
                        ),
                        _ => furthest = Some((rank, child_tag)),
                    }
                    self.check_element(doc, child, child_rules, out);
                }
                Some(NodeKind::Text(t)) | Some(NodeKind::CData(t)) => text.push_str(t),
                _ => {}
            }
        }

        for child_rule in rules.child_order() {
            let count = counts.get(child_rule.tag.as_str()).copied().unwrap_or(0);
            if child_rule.multiplicity.is_missing(count) {
                out.push(
                    Violation::new(
                        ViolationKind::MissingChild,
                        &path,
                        format!("'{}' requires a '{}' child", tag, child_rule.tag),
                    )
                    .with_element(tag),
                );
            } else if child_rule.multiplicity.is_exceeded(count) {
                out.push(
                    Violation::new(
                        ViolationKind::TooManyChildren,
                        &path,
                        format!(
                            "'{}' allows {} '{}', found {}",
                            tag, child_rule.multiplicity, child_rule.tag, count
                        ),
                    )
                    .with_element(tag),
                );
            }
        }

        match rules.text_kind() {
            Some(kind) => {
                if let Err(problem) = kind.check(text.trim()) {
                    out.push(value_violation(&path, tag, "text", problem));
                }
            }
            None if !text.trim().is_empty() => out.push(
                Violation::new(
                    ViolationKind::UnexpectedText,
                    &path,
                    format!("'{}' holds only elements", tag),
                )
                .with_element(tag),
            ),
            None => {}
        }

        if tag == "Meta" {
            self.check_meta(doc, node, &path, out);
        }
    }

    fn check_meta(&self, doc: &Document, node: NodeId, path: &str, out: &mut Vec<Violation>) {
        let Some(el) = doc.element(node) else { return };
        // an unknown type token is already reported as an attribute problem
        let Some(Ok(meta_type)) = el.attr("type").map(|t| t.parse::<MetaType>()) else {
            return;
        };
        let name = el.attr("name").unwrap_or_default();
        let value = doc.text(node).unwrap_or_default();
        if let Err(e) = check_meta_value(name, meta_type, &value) {
            out.push(Violation::new(ViolationKind::InvalidMetaValue, path, e.to_string()).with_element("Meta"));
        }
    }

    fn check_references(&self, doc: &Document, out: &mut Vec<Violation>) {
        let resolver = Resolver::new(self.rules);

        let mut index: HashMap<&str, NodeId> = HashMap::new();
        for node in doc.modeled_descendants(doc.root()) {
            let Some(id) = resolver.identifier_of(doc, node) else { continue };
            if let Some(first) = index.get(id) {
                out.push(
                    Violation::new(
                        ViolationKind::DuplicateIdentifier,
                        doc.path_of(node),
                        format!("identifier '{}' is already used at {}", id, doc.path_of(*first)),
                    )
                    .with_element(doc.element(node).map(|el| el.local_name()).unwrap_or_default()),
                );
                continue;
            }
            index.insert(id, node);
        }

        let mut edges = Vec::new();
        for site in resolver.reference_sites(doc) {
            let path = doc.path_of(site.node);
            let Some(&target) = index.get(site.target.as_str()) else {
                out.push(
                    Violation::new(
                        ViolationKind::DanglingReference,
                        path,
                        format!("{} reference to unknown identifier '{}'", site.role, site.target),
                    )
                    .with_element(site.role.element_tag()),
                );
                continue;
            };
            if let Some(expected) = site.role.target_tag() {
                let found = doc.element(target).map(|el| el.local_name()).unwrap_or_default();
                if found != expected {
                    out.push(
                        Violation::new(
                            ViolationKind::InvalidReferenceTarget,
                            path,
                            format!(
                                "{} reference '{}' must point at a {}, found {}",
                                site.role, site.target, expected, found
                            ),
                        )
                        .with_element(site.role.element_tag()),
                    );
                    continue;
                }
            }
            edges.push(ReferenceEdge::new(site.source, site.target, site.role));
        }

        if let Some(cycle) = find_lineage_cycle(&edges) {
            let path = cycle
                .first()
                .and_then(|id| index.get(id.as_str()))
                .map(|node| doc.path_of(*node))
                .unwrap_or_else(|| doc.path_of(doc.root()));
            out.push(Violation::new(
                ViolationKind::CyclicLineage,
                path,
                format!("lineage cycle: {}", cycle.join(" -> ")),
            ));
        }
    }
}

fn value_violation(path: &str, tag: &str, what: &str, problem: ValueProblem) -> Violation {
    let kind = match problem {
        ValueProblem::Coercion(_) => ViolationKind::InvalidAttributeValue,
        ValueProblem::OutOfRange(_) => ViolationKind::OutOfRange,
    };
    Violation::new(kind, path, format!("{}: {}", what, problem)).with_element(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn violations(xml: &str) -> Vec<Violation> {
        let doc = Document::parse(xml).unwrap();
        Validator::new(&SchemaRules::riverscapes_v2()).validate_document(&doc)
    }

    fn kinds(xml: &str) -> Vec<ViolationKind> {
        violations(xml).into_iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_valid_project_has_no_violations() {
        let xml = r#"<Project>
  <Id>p1</Id>
  <Name>Test</Name>
  <ProjectBounds>
    <Centroid lat="45.0" lng="-120.0"/>
    <BoundingBox minLat="44" minLng="-121" maxLat="46" maxLng="-119"/>
  </ProjectBounds>
  <Dataset id="dem" type="DEM"><Name>DEM</Name></Dataset>
  <Realization id="r1" dateCreated="2023-01-01T00:00:00">
    <Inputs><Input ref="dem"/></Inputs>
  </Realization>
</Project>"#;
        assert_eq!(violations(xml), vec![]);
    }

    #[test]
    fn test_collects_every_problem() {
        let xml = r#"<Project>
  <Name>A</Name>
  <Name>B</Name>
  <Dataset type="Teapot"/>
  <Realization id="r1"><Inputs><Input ref="ghost"/></Inputs></Realization>
  <Dataset id="late"/>
</Project>"#;
        let found = kinds(xml);
        assert!(found.contains(&ViolationKind::MissingChild));
        assert!(found.contains(&ViolationKind::TooManyChildren));
        assert!(found.contains(&ViolationKind::MissingAttribute));
        assert!(found.contains(&ViolationKind::InvalidAttributeValue));
        assert!(found.contains(&ViolationKind::DanglingReference));
        assert!(found.contains(&ViolationKind::ChildOrder));
    }

    #[test]
    fn test_violation_paths_are_indexed() {
        let xml = r#"<Project><Id>p</Id><Dataset id="a"/><Dataset id="a"/></Project>"#;
        let found = violations(xml);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::DuplicateIdentifier);
        assert_eq!(found[0].path, "/Project/Dataset[2]");
        assert!(found[0].message.contains("/Project/Dataset[1]"));
    }

    #[test]
    fn test_range_and_unexpected_content() {
        let xml = r#"<Project>
  <Id>p</Id>
  <ProjectBounds>stray<Centroid lat="123" lng="0"/><BoundingBox minLat="0" minLng="0" maxLat="1" maxLng="1"/></ProjectBounds>
  <Bogus/>
</Project>"#;
        let found = violations(xml);
        let out_of_range = found.iter().find(|v| v.kind == ViolationKind::OutOfRange).unwrap();
        assert_eq!(out_of_range.path, "/Project/ProjectBounds/Centroid");
        assert!(found.iter().any(|v| v.kind == ViolationKind::UnexpectedText));
        assert!(found
            .iter()
            .any(|v| v.kind == ViolationKind::UnexpectedElement && v.path == "/Project/Bogus"));
    }

    #[test]
    fn test_foreign_elements_are_ignored() {
        let xml = r#"<Project xmlns:ext="urn:tool"><Id>p</Id><ext:Thing><Whatever/></ext:Thing></Project>"#;
        assert!(violations(xml).is_empty());

        // identifiers and references inside a foreign wrapper are not checked either
        let wrapped = r#"<Project xmlns:ext="urn:tool"><Id>p</Id>
  <ext:Wrap><Dataset id="d1"><DerivedFrom ref="gone"/></Dataset></ext:Wrap>
  <Dataset id="d1"/>
</Project>"#;
        assert_eq!(violations(wrapped), vec![]);
    }

    #[test]
    fn test_reference_kind_cycle_and_meta() {
        let xml = r#"<Project>
  <Id>p</Id>
  <MetaData><Meta name="cells" type="int">lots</Meta></MetaData>
  <Dataset id="a"><DerivedFrom ref="b"/></Dataset>
  <Dataset id="b"><DerivedFrom ref="a"/></Dataset>
  <Realization id="r1"><Outputs><Output ref="r1"/></Outputs></Realization>
</Project>"#;
        let found = violations(xml);
        let cycle = found.iter().find(|v| v.kind == ViolationKind::CyclicLineage).unwrap();
        assert_eq!(cycle.message, "lineage cycle: a -> b -> a");
        assert!(found.iter().any(|v| v.kind == ViolationKind::InvalidReferenceTarget));
        let meta = found.iter().find(|v| v.kind == ViolationKind::InvalidMetaValue).unwrap();
        assert_eq!(meta.path, "/Project/MetaData/Meta");
    }

    #[test]
    fn test_graph_validation_and_report() {
        let rules = Arc::new(SchemaRules::riverscapes_v2());
        let mut graph = ProjectGraph::new_project("p1", rules).unwrap();
        graph.add_dataset("d1").unwrap();
        assert!(graph.validate().is_empty());

        let report = Validator::new(graph.rules()).report(graph.document());
        assert!(report.valid);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"valid\": true"));
    }

    #[test]
    fn test_report_serializes_kinds() {
        let report = ValidationReport::new(violations("<Project/>"));
        assert!(!report.valid);
        assert_eq!(report.count_of(ViolationKind::MissingChild), 1);
        assert!(report.to_json().unwrap().contains("\"missing_child\""));
    }
}
