//! Typed views over project elements
//!
//! The document tree stays the single source of truth; the types here are
//! thin borrowed lenses that read (and, for the `*Mut` variants, write)
//! through it with schema-aware conversions.

/// Implements [`TypedNode`] for a `{ doc, node, el }` view struct
macro_rules! typed_node {
    ($ty:ident, $tag:literal) => {
        impl<'a> $crate::nodes::TypedNode<'a> for $ty<'a> {
            const TAG: &'static str = $tag;

            fn from_node(
                doc: &'a $crate::documents::Document,
                rules: &$crate::rules::SchemaRules,
                node: $crate::documents::NodeId,
            ) -> $crate::error::Result<Self> {
                rules.expect_rules(Self::TAG)?.check_required(doc, node)?;
                let el = doc.expect_element(node)?;
                Ok(Self { doc, node, el })
            }

            fn document(&self) -> &'a $crate::documents::Document {
                self.doc
            }

            fn node(&self) -> $crate::documents::NodeId {
                self.node
            }

            fn element(&self) -> &'a $crate::documents::Element {
                self.el
            }
        }
    };
}

mod dataset;
mod meta;
mod project;
mod realization;

pub use dataset::{Dataset, DatasetMut};
pub use meta::{MetaEntry, MetaOwner};
pub(crate) use meta::{check_meta_value, find_meta, meta_entries};
pub use project::{BoundingBox, Centroid, Project, ProjectBounds, ProjectMut, Warehouse};
pub use realization::{Realization, RealizationMut};

use crate::documents::{Document, Element, NodeId};
use crate::error::Result;
use crate::rules::SchemaRules;

/// A read-only view over one element of a known kind
pub trait TypedNode<'a>: Sized {
    /// Tag of the viewed element
    const TAG: &'static str;

    /// Wrap an element, checking its tag and required attributes
    fn from_node(doc: &'a Document, rules: &SchemaRules, node: NodeId) -> Result<Self>;

    /// The document the view borrows
    fn document(&self) -> &'a Document;

    /// Handle of the viewed element
    fn node(&self) -> NodeId;

    /// The viewed element
    fn element(&self) -> &'a Element;

    /// Location of the element, for messages
    fn location(&self) -> String {
        self.document().path_of(self.node())
    }

    /// Trimmed text of a child element
    fn child_text(&self, tag: &str) -> Option<String> {
        self.document().child_text(self.node(), tag)
    }

    /// Metadata entries in document order
    fn meta(&self) -> Vec<MetaEntry<'a>> {
        meta_entries(self.document(), self.node())
    }

    /// Last metadata entry with the given name
    fn meta_entry(&self, name: &str) -> Option<MetaEntry<'a>> {
        find_meta(self.document(), self.node(), name)
    }
}

/// `ref` targets of the reference children with the given tag
pub(crate) fn reference_targets<'a>(doc: &'a Document, parent: NodeId, tag: &'a str) -> Vec<&'a str> {
    doc.children_named(parent, tag)
        .filter_map(|n| doc.element(n).and_then(|el| el.attr("ref")))
        .collect()
}
