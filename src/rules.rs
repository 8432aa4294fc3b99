//! Schema rules for the Riverscapes project format
//!
//! A [`SchemaRules`] value is the static knowledge the rest of the crate
//! needs about one schema version: which attributes each element kind
//! requires or allows and what values they take, which child kinds may
//! appear, how often, and in which order. It is built once, never mutated,
//! and passed explicitly (usually as `Arc<SchemaRules>`) to the resolver,
//! validator and writer, so several versions can be used side by side.

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use std::fmt;

use crate::documents::{Document, NodeId};
use crate::error::{Error, Result};
use crate::names::is_valid_ncname;
use crate::namespaces::{RIVERSCAPES_NAMESPACE, RIVERSCAPES_SCHEMA_LOCATION};
use crate::resolver::Role;
use crate::values::{AttrValue, DatasetType, MetaType};

/// How many times a child kind may occur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    /// Exactly one
    ExactlyOne,
    /// Optional
    ZeroOrOne,
    /// Any number
    ZeroOrMore,
}

impl Multiplicity {
    /// Minimum number of occurrences
    pub fn min(&self) -> usize {
        match self {
            Multiplicity::ExactlyOne => 1,
            Multiplicity::ZeroOrOne | Multiplicity::ZeroOrMore => 0,
        }
    }

    /// Maximum number of occurrences (None = unbounded)
    pub fn max(&self) -> Option<usize> {
        match self {
            Multiplicity::ExactlyOne | Multiplicity::ZeroOrOne => Some(1),
            Multiplicity::ZeroOrMore => None,
        }
    }

    /// Check if occurrence count is under the minimum
    pub fn is_missing(&self, count: usize) -> bool {
        count < self.min()
    }

    /// Check if occurrence count is at or over the maximum
    pub fn is_over(&self, count: usize) -> bool {
        self.max().map(|max| count >= max).unwrap_or(false)
    }

    /// Check if occurrence count exceeds the maximum
    pub fn is_exceeded(&self, count: usize) -> bool {
        self.max().map(|max| count > max).unwrap_or(false)
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Multiplicity::ExactlyOne => "exactly-one",
            Multiplicity::ZeroOrOne => "zero-or-one",
            Multiplicity::ZeroOrMore => "zero-or-more",
        })
    }
}

/// Value space of an attribute (or of element text)
#[derive(Debug, Clone, PartialEq)]
pub enum AttrKind {
    /// Any string
    String,
    /// Integer, optionally bounded (inclusive)
    Integer {
        /// Lower bound
        min: Option<i64>,
        /// Upper bound
        max: Option<i64>,
    },
    /// Finite float, optionally bounded (inclusive)
    Float {
        /// Lower bound
        min: Option<f64>,
        /// Upper bound
        max: Option<f64>,
    },
    /// `true` / `false`
    Boolean,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// One of a closed set of tokens
    Enumeration(Vec<String>),
    /// Identifier of a dataset or realization
    Identifier,
    /// Reference to an identifier, in the given role
    Reference(Role),
}

/// Why a value does not fit its [`AttrKind`]
#[derive(Debug, Clone, PartialEq)]
pub enum ValueProblem {
    /// The text does not convert to the kind's type
    Coercion(String),
    /// The value converts but lies outside the declared range
    OutOfRange(String),
}

impl fmt::Display for ValueProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueProblem::Coercion(msg) | ValueProblem::OutOfRange(msg) => f.write_str(msg),
        }
    }
}

impl AttrKind {
    /// Enumeration over a token list
    pub fn enumeration(tokens: &[&str]) -> Self {
        AttrKind::Enumeration(tokens.iter().map(|t| t.to_string()).collect())
    }

    /// Float bounded on both ends
    pub fn float_range(min: f64, max: f64) -> Self {
        AttrKind::Float {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Integer with a lower bound
    pub fn integer_at_least(min: i64) -> Self {
        AttrKind::Integer {
            min: Some(min),
            max: None,
        }
    }

    /// Check a stored text value
    pub fn check(&self, text: &str) -> std::result::Result<(), ValueProblem> {
        match self {
            AttrKind::String => Ok(()),
            AttrKind::Integer { min, max } => {
                let value = i64::parse_value(text).map_err(ValueProblem::Coercion)?;
                check_range(value, *min, *max)
            }
            AttrKind::Float { min, max } => {
                let value = f64::parse_value(text).map_err(ValueProblem::Coercion)?;
                check_range(value, *min, *max)
            }
            AttrKind::Boolean => bool::parse_value(text).map(|_| ()).map_err(ValueProblem::Coercion),
            AttrKind::Date => NaiveDate::parse_value(text).map(|_| ()).map_err(ValueProblem::Coercion),
            AttrKind::DateTime => NaiveDateTime::parse_value(text)
                .map(|_| ())
                .map_err(ValueProblem::Coercion),
            AttrKind::Enumeration(tokens) => {
                if tokens.iter().any(|t| t == text.trim()) {
                    Ok(())
                } else {
                    Err(ValueProblem::Coercion(format!(
                        "'{}' is not one of: {}",
                        text,
                        tokens.join(", ")
                    )))
                }
            }
            AttrKind::Identifier | AttrKind::Reference(_) => {
                if is_valid_ncname(text) {
                    Ok(())
                } else {
                    Err(ValueProblem::Coercion(format!("'{}' is not a valid identifier", text)))
                }
            }
        }
    }
}

fn check_range<T: PartialOrd + fmt::Display>(
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> std::result::Result<(), ValueProblem> {
    if let Some(min) = min {
        if value < min {
            return Err(ValueProblem::OutOfRange(format!("{} is below the minimum {}", value, min)));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err(ValueProblem::OutOfRange(format!("{} is above the maximum {}", value, max)));
        }
    }
    Ok(())
}

/// Rule for one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRule {
    /// Attribute name as written
    pub name: String,
    /// Value space
    pub kind: AttrKind,
}

/// Rule for one child kind
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRule {
    /// Child tag
    pub tag: String,
    /// Allowed occurrences
    pub multiplicity: Multiplicity,
}

/// Everything the schema says about one element kind
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRules {
    tag: String,
    required_attrs: Vec<AttrRule>,
    optional_attrs: Vec<AttrRule>,
    child_order: Vec<ChildRule>,
    text: Option<AttrKind>,
}

impl ElementRules {
    /// Rules for `tag` with no attributes, children or text
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            required_attrs: Vec::new(),
            optional_attrs: Vec::new(),
            child_order: Vec::new(),
            text: None,
        }
    }

    /// Add a required attribute
    pub fn required(mut self, name: impl Into<String>, kind: AttrKind) -> Self {
        self.required_attrs.push(AttrRule { name: name.into(), kind });
        self
    }

    /// Add an optional attribute
    pub fn optional(mut self, name: impl Into<String>, kind: AttrKind) -> Self {
        self.optional_attrs.push(AttrRule { name: name.into(), kind });
        self
    }

    /// Append a child kind; call order defines the sibling order
    pub fn child(mut self, tag: impl Into<String>, multiplicity: Multiplicity) -> Self {
        self.child_order.push(ChildRule {
            tag: tag.into(),
            multiplicity,
        });
        self
    }

    /// Allow text content of the given kind
    pub fn with_text(mut self, kind: AttrKind) -> Self {
        self.text = Some(kind);
        self
    }

    /// Element tag
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Required attributes in canonical order
    pub fn required_attrs(&self) -> &[AttrRule] {
        &self.required_attrs
    }

    /// Optional attributes in canonical order
    pub fn optional_attrs(&self) -> &[AttrRule] {
        &self.optional_attrs
    }

    /// Declared attributes, required first
    pub fn declared_attrs(&self) -> impl Iterator<Item = &AttrRule> {
        self.required_attrs.iter().chain(self.optional_attrs.iter())
    }

    /// Rule for a named attribute
    pub fn attr_rule(&self, name: &str) -> Option<&AttrRule> {
        self.declared_attrs().find(|r| r.name == name)
    }

    /// Whether the attribute must be present
    pub fn is_required(&self, name: &str) -> bool {
        self.required_attrs.iter().any(|r| r.name == name)
    }

    /// Child kinds in their strict sibling order
    pub fn child_order(&self) -> &[ChildRule] {
        &self.child_order
    }

    /// Multiplicity of a child kind
    pub fn cardinality(&self, tag: &str) -> Option<Multiplicity> {
        self.child_order
            .iter()
            .find(|c| c.tag == tag)
            .map(|c| c.multiplicity)
    }

    /// Position of a child kind in the sibling order
    pub fn rank_of(&self, tag: &str) -> Option<usize> {
        self.child_order.iter().position(|c| c.tag == tag)
    }

    /// Text content kind, `None` when the element holds no text
    pub fn text_kind(&self) -> Option<&AttrKind> {
        self.text.as_ref()
    }

    /// Check that a value may be stored in a declared attribute
    ///
    /// Undeclared attributes are accepted as-is.
    pub fn check_attr_value(&self, path: &str, name: &str, text: &str) -> Result<()> {
        let Some(rule) = self.attr_rule(name) else {
            return Ok(());
        };
        rule.kind.check(text).map_err(|problem| match problem {
            ValueProblem::Coercion(reason) => Error::TypeCoercion {
                field: name.to_string(),
                value: text.to_string(),
                target: "schema value",
                reason,
            },
            ValueProblem::OutOfRange(reason) => {
                Error::schema(path, format!("attribute '{}': {}", name, reason))
            }
        })
    }

    /// Where a new `tag` child goes among `parent`'s element children
    ///
    /// Returns an index counting element children only: before the first
    /// modeled sibling that sorts after `tag`, otherwise at the end. Fails if
    /// `tag` is not a child kind of this element or another one would exceed
    /// its multiplicity.
    pub fn insertion_index(&self, doc: &Document, parent: NodeId, tag: &str) -> Result<usize> {
        let path = doc.path_of(parent);
        let Some(rank) = self.rank_of(tag) else {
            return Err(Error::schema(
                path,
                format!("'{}' is not allowed inside '{}'", tag, self.tag),
            ));
        };
        let existing = doc.children_named(parent, tag).count();
        if self.child_order[rank].multiplicity.is_over(existing) {
            return Err(Error::schema(
                path,
                format!(
                    "'{}' allows {} '{}', found {} already",
                    self.tag, self.child_order[rank].multiplicity, tag, existing
                ),
            ));
        }

        let mut count = 0;
        for child in doc.child_elements(parent) {
            let name = doc.element(child).map(|el| el.name()).unwrap_or_default();
            if let Some(other) = self.rank_of(name) {
                if other > rank {
                    return Ok(count);
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Reject a node that lacks required attributes
    pub fn check_required(&self, doc: &Document, node: NodeId) -> Result<()> {
        let el = doc.expect_element(node)?;
        if el.local_name() != self.tag {
            return Err(Error::schema(
                doc.path_of(node),
                format!("expected '{}', found '{}'", self.tag, el.name()),
            ));
        }
        for rule in &self.required_attrs {
            if !el.has_attr(&rule.name) {
                return Err(Error::schema(
                    doc.path_of(node),
                    format!("required attribute '{}' is missing", rule.name),
                ));
            }
        }
        Ok(())
    }
}

/// Rules for one schema version
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRules {
    version: u32,
    namespace: String,
    schema_location: String,
    root: String,
    elements: IndexMap<String, ElementRules>,
}

impl SchemaRules {
    /// Empty rule set for a version
    pub fn new(version: u32, root: impl Into<String>) -> Self {
        Self {
            version,
            namespace: String::new(),
            schema_location: String::new(),
            root: root.into(),
            elements: IndexMap::new(),
        }
    }

    /// Set the namespace and schema location written into new documents
    pub fn with_location(mut self, namespace: impl Into<String>, location: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.schema_location = location.into();
        self
    }

    /// Add or replace the rules of one element kind
    pub fn with_element(mut self, rules: ElementRules) -> Self {
        self.elements.insert(rules.tag.clone(), rules);
        self
    }

    /// Schema version these rules describe
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Schema namespace URI
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Schema location written into new documents
    pub fn schema_location(&self) -> &str {
        &self.schema_location
    }

    /// Root element tag
    pub fn root_tag(&self) -> &str {
        &self.root
    }

    /// Rules for a tag (local name)
    pub fn rules_for(&self, tag: &str) -> Option<&ElementRules> {
        self.elements.get(tag)
    }

    /// Rules for a tag, failing with a schema violation for unknown tags
    pub fn expect_rules(&self, tag: &str) -> Result<&ElementRules> {
        self.rules_for(tag)
            .ok_or_else(|| Error::schema(tag, format!("no schema rules for '{}'", tag)))
    }

    /// All element kinds
    pub fn elements(&self) -> impl Iterator<Item = &ElementRules> {
        self.elements.values()
    }

    /// Name of the identifier attribute of a tag, if it has one
    pub fn identifier_attr(&self, tag: &str) -> Option<&str> {
        self.rules_for(tag)?
            .declared_attrs()
            .find(|r| r.kind == AttrKind::Identifier)
            .map(|r| r.name.as_str())
    }

    /// Reference attribute and role of a tag, if it carries a reference
    pub fn reference_attr(&self, tag: &str) -> Option<(&str, Role)> {
        self.rules_for(tag)?.declared_attrs().find_map(|r| match r.kind {
            AttrKind::Reference(role) => Some((r.name.as_str(), role)),
            _ => None,
        })
    }

    /// Riverscapes project schema, version 2
    pub fn riverscapes_v2() -> Self {
        use Multiplicity::{ExactlyOne, ZeroOrMore, ZeroOrOne};

        let latitude = || AttrKind::float_range(-90.0, 90.0);
        let longitude = || AttrKind::float_range(-180.0, 180.0);
        let text = || AttrKind::String;

        let mut rules = SchemaRules::new(2, "Project")
            .with_location(RIVERSCAPES_NAMESPACE, RIVERSCAPES_SCHEMA_LOCATION)
            .with_element(
                ElementRules::new("Project")
                    .optional("xsi:noNamespaceSchemaLocation", AttrKind::String)
                    .optional("xsi:schemaLocation", AttrKind::String)
                    .child("Id", ExactlyOne)
                    .child("Name", ZeroOrOne)
                    .child("ProjectType", ZeroOrOne)
                    .child("Summary", ZeroOrOne)
                    .child("Description", ZeroOrOne)
                    .child("Citation", ZeroOrOne)
                    .child("MetaData", ZeroOrOne)
                    .child("ProjectBounds", ZeroOrOne)
                    .child("Warehouse", ZeroOrOne)
                    .child("Dataset", ZeroOrMore)
                    .child("Realization", ZeroOrMore),
            )
            .with_element(
                ElementRules::new("Dataset")
                    .required("id", AttrKind::Identifier)
                    .optional("type", AttrKind::enumeration(DatasetType::TOKENS))
                    .optional("guid", AttrKind::String)
                    .optional("extRef", AttrKind::String)
                    .child("Name", ZeroOrOne)
                    .child("Path", ZeroOrOne)
                    .child("Summary", ZeroOrOne)
                    .child("Description", ZeroOrOne)
                    .child("Citation", ZeroOrOne)
                    .child("MetaData", ZeroOrOne)
                    .child("DerivedFrom", ZeroOrMore)
                    .child("RelatedTo", ZeroOrMore),
            )
            .with_element(
                ElementRules::new("Realization")
                    .required("id", AttrKind::Identifier)
                    .optional("dateCreated", AttrKind::DateTime)
                    .optional("productVersion", AttrKind::String)
                    .optional("guid", AttrKind::String)
                    .child("Name", ZeroOrOne)
                    .child("Summary", ZeroOrOne)
                    .child("Description", ZeroOrOne)
                    .child("MetaData", ZeroOrOne)
                    .child("Inputs", ZeroOrOne)
                    .child("Outputs", ZeroOrOne)
                    .child("RelatedTo", ZeroOrMore),
            )
            .with_element(ElementRules::new("Inputs").child("Input", ZeroOrMore))
            .with_element(ElementRules::new("Outputs").child("Output", ZeroOrMore))
            .with_element(ElementRules::new("Input").required("ref", AttrKind::Reference(Role::Input)))
            .with_element(ElementRules::new("Output").required("ref", AttrKind::Reference(Role::Output)))
            .with_element(
                ElementRules::new("DerivedFrom").required("ref", AttrKind::Reference(Role::DerivedFrom)),
            )
            .with_element(
                ElementRules::new("RelatedTo").required("ref", AttrKind::Reference(Role::RelatedTo)),
            )
            .with_element(ElementRules::new("MetaData").child("Meta", ZeroOrMore))
            .with_element(
                ElementRules::new("Meta")
                    .required("name", AttrKind::String)
                    .optional("type", AttrKind::enumeration(MetaType::TOKENS))
                    .optional("ext", AttrKind::String)
                    .optional("locked", AttrKind::Boolean)
                    .with_text(AttrKind::String),
            )
            .with_element(
                ElementRules::new("ProjectBounds")
                    .child("Centroid", ExactlyOne)
                    .child("BoundingBox", ExactlyOne)
                    .child("Path", ZeroOrOne),
            )
            .with_element(
                ElementRules::new("Centroid")
                    .required("lat", latitude())
                    .required("lng", longitude()),
            )
            .with_element(
                ElementRules::new("BoundingBox")
                    .required("minLat", latitude())
                    .required("minLng", longitude())
                    .required("maxLat", latitude())
                    .required("maxLng", longitude()),
            )
            .with_element(
                ElementRules::new("Warehouse")
                    .optional("id", AttrKind::String)
                    .optional("apiUrl", AttrKind::String),
            );

        for tag in ["Id", "Name", "ProjectType", "Summary", "Description", "Citation", "Path"] {
            rules = rules.with_element(ElementRules::new(tag).with_text(text()));
        }
        rules
    }
}

impl Default for SchemaRules {
    fn default() -> Self {
        Self::riverscapes_v2()
    }
}
