//! # rsxml
//!
//! Object model and round-trip serializer for Riverscapes project XML.
//!
//! Project files describe datasets, the realizations (tool runs) that
//! consumed and produced them, and free-form metadata. This crate parses
//! such a file into an arena [`Document`], resolves identifiers and
//! references into a [`ProjectGraph`], offers typed views and checked
//! mutations, and writes the document back so that everything that was not
//! touched comes out byte-for-byte as it went in.
//!
//! ## Features
//!
//! - Lossless parsing: comments, processing instructions, whitespace,
//!   foreign-namespace elements and unknown attributes all survive
//! - Identifier index and lineage edges with cycle detection
//! - Typed read views and mutable lenses that keep schema child order
//! - A validation pass that reports every violation at once
//! - Minimal-diff writer
//!
//! ## Example
//!
//! ```rust,ignore
//! use rsxml::{ProjectGraph, SchemaRules};
//! use std::sync::Arc;
//!
//! let rules = Arc::new(SchemaRules::riverscapes_v2());
//! let mut graph = ProjectGraph::parse(&xml, rules)?;
//!
//! graph.add_dataset("hillshade")?.set_path("topo/hillshade.tif")?;
//! graph.add_input("vbet_run", "hillshade")?;
//! graph.reresolve()?;
//!
//! for violation in graph.validate() {
//!     println!("{}", violation);
//! }
//! std::fs::write("project.rs.xml", graph.write())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod limits;
pub mod names;
pub mod namespaces;
pub mod values;

// Document model
pub mod documents;
pub mod rules;

// Graph layer
pub mod graph;
pub mod nodes;
pub mod resolver;

// Passes over a document
pub mod validation;
pub mod writer;

// Files and helpers
pub mod loaders;
pub mod util;

pub use documents::{Document, NodeId, NodeKind, ParseOptions};
pub use error::{Error, MalformedXmlError, Result};
pub use graph::{resolve, GraphSummary, NodeSummary, ProjectGraph};
pub use limits::Limits;
pub use loaders::{load_document, save_document, Loader};
pub use nodes::{
    BoundingBox, Centroid, Dataset, DatasetMut, MetaEntry, MetaOwner, Project, ProjectBounds,
    ProjectMut, Realization, RealizationMut, TypedNode, Warehouse,
};
pub use resolver::{ReferenceEdge, Resolver, Role};
pub use rules::{AttrKind, ElementRules, Multiplicity, SchemaRules};
pub use util::{file_compare, parse_metadata, pretty_duration, safe_makedirs, sizeof_fmt};
pub use validation::{validate, ValidationReport, Validator, Violation, ViolationKind};
pub use values::{AttrValue, DatasetType, MetaType};
pub use writer::{write, Writer};

/// Version of the rsxml library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
