//! `Realization` nodes

use chrono::NaiveDateTime;

use super::{reference_targets, TypedNode};
use crate::documents::{Document, Element, NodeId};
use crate::error::Result;
use crate::graph::ProjectGraph;
use crate::resolver::Role;
use crate::values::MetaType;

/// Read-only view over `<Realization>`
#[derive(Debug, Clone, Copy)]
pub struct Realization<'a> {
    doc: &'a Document,
    node: NodeId,
    el: &'a Element,
}

typed_node!(Realization, "Realization");

impl<'a> Realization<'a> {
    /// Identifier
    pub fn id(&self) -> &'a str {
        self.el.attr("id").unwrap_or_default()
    }

    /// When the realization was produced
    pub fn date_created(&self) -> Result<Option<NaiveDateTime>> {
        self.el.attr_opt("dateCreated")
    }

    /// Version of the tool that produced it
    pub fn product_version(&self) -> Option<&'a str> {
        self.el.attr("productVersion")
    }

    /// The `guid` attribute
    pub fn guid(&self) -> Option<&'a str> {
        self.el.attr("guid")
    }

    /// Text of `<Name>`
    pub fn name(&self) -> Option<String> {
        self.child_text("Name")
    }

    /// Text of `<Summary>`
    pub fn summary(&self) -> Option<String> {
        self.child_text("Summary")
    }

    /// Text of `<Description>`
    pub fn description(&self) -> Option<String> {
        self.child_text("Description")
    }

    /// Identifiers listed under `<Inputs>`
    pub fn input_refs(&self) -> Vec<&'a str> {
        self.container_refs("Inputs", "Input")
    }

    /// Identifiers listed under `<Outputs>`
    pub fn output_refs(&self) -> Vec<&'a str> {
        self.container_refs("Outputs", "Output")
    }

    /// Identifiers listed in `<RelatedTo>` children
    pub fn related_refs(&self) -> Vec<&'a str> {
        reference_targets(self.doc, self.node, "RelatedTo")
    }

    fn container_refs(&self, container: &'a str, tag: &'a str) -> Vec<&'a str> {
        self.doc
            .children_named(self.node, container)
            .flat_map(|c| reference_targets(self.doc, c, tag))
            .collect()
    }
}

/// Mutable lens over `<Realization>`
#[derive(Debug)]
pub struct RealizationMut<'g> {
    graph: &'g mut ProjectGraph,
    node: NodeId,
    id: String,
}

impl<'g> RealizationMut<'g> {
    pub(crate) fn new(graph: &'g mut ProjectGraph, node: NodeId, id: &str) -> Self {
        Self {
            graph,
            node,
            id: id.to_string(),
        }
    }

    /// Identifier of the realization
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read view of the current state
    pub fn view(&self) -> Result<Realization<'_>> {
        let graph: &ProjectGraph = &*self.graph;
        Realization::from_node(graph.document(), graph.rules(), self.node)
    }

    /// Set `<Name>`
    pub fn set_name(&mut self, name: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Name", name)?;
        Ok(self)
    }

    /// Set `<Summary>`
    pub fn set_summary(&mut self, summary: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Summary", summary)?;
        Ok(self)
    }

    /// Set `<Description>`
    pub fn set_description(&mut self, description: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Description", description)?;
        Ok(self)
    }

    /// Set `dateCreated`
    pub fn set_date_created(&mut self, created: NaiveDateTime) -> Result<&mut Self> {
        self.graph.set_checked_attr(self.node, "dateCreated", &created)?;
        Ok(self)
    }

    /// Set `productVersion`
    pub fn set_product_version(&mut self, version: &str) -> Result<&mut Self> {
        self.graph
            .set_checked_attr(self.node, "productVersion", &version.to_string())?;
        Ok(self)
    }

    /// Set the `guid` attribute
    pub fn set_guid(&mut self, guid: &str) -> Result<&mut Self> {
        self.graph.set_checked_attr(self.node, "guid", &guid.to_string())?;
        Ok(self)
    }

    /// Set a metadata value (last entry with the key wins)
    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        self.graph.set_meta_at(self.node, key, value, None)?;
        Ok(self)
    }

    /// Set a metadata value with a declared type
    pub fn set_meta_typed(&mut self, key: &str, value: &str, meta_type: MetaType) -> Result<&mut Self> {
        self.graph.set_meta_at(self.node, key, value, Some(meta_type))?;
        Ok(self)
    }

    /// Record a dataset this realization consumes
    pub fn add_input(&mut self, dataset: &str) -> Result<&mut Self> {
        let id = self.id.clone();
        self.graph.add_reference(&id, Role::Input, dataset)?;
        Ok(self)
    }

    /// Record a dataset this realization produces
    pub fn add_output(&mut self, dataset: &str) -> Result<&mut Self> {
        let id = self.id.clone();
        self.graph.add_reference(&id, Role::Output, dataset)?;
        Ok(self)
    }

    /// Link this realization to another identified node
    pub fn add_related(&mut self, target: &str) -> Result<&mut Self> {
        let id = self.id.clone();
        self.graph.add_reference(&id, Role::RelatedTo, target)?;
        Ok(self)
    }
}
