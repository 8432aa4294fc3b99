//! `Dataset` nodes

use super::{reference_targets, TypedNode};
use crate::documents::{Document, Element, NodeId};
use crate::error::Result;
use crate::graph::ProjectGraph;
use crate::resolver::Role;
use crate::values::{DatasetType, MetaType};

/// Read-only view over `<Dataset>`
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    doc: &'a Document,
    node: NodeId,
    el: &'a Element,
}

typed_node!(Dataset, "Dataset");

impl<'a> Dataset<'a> {
    /// Identifier
    pub fn id(&self) -> &'a str {
        self.el.attr("id").unwrap_or_default()
    }

    /// Declared payload type
    pub fn dataset_type(&self) -> Result<Option<DatasetType>> {
        self.el.attr_opt("type")
    }

    /// The `guid` attribute
    pub fn guid(&self) -> Option<&'a str> {
        self.el.attr("guid")
    }

    /// The `extRef` attribute
    pub fn ext_ref(&self) -> Option<&'a str> {
        self.el.attr("extRef")
    }

    /// Text of `<Name>`
    pub fn name(&self) -> Option<String> {
        self.child_text("Name")
    }

    /// Text of `<Path>`, relative to the project file
    pub fn path(&self) -> Option<String> {
        self.child_text("Path")
    }

    /// Text of `<Summary>`
    pub fn summary(&self) -> Option<String> {
        self.child_text("Summary")
    }

    /// Text of `<Description>`
    pub fn description(&self) -> Option<String> {
        self.child_text("Description")
    }

    /// Text of `<Citation>`
    pub fn citation(&self) -> Option<String> {
        self.child_text("Citation")
    }

    /// Identifiers listed in `<DerivedFrom>` children
    pub fn derived_from_refs(&self) -> Vec<&'a str> {
        reference_targets(self.doc, self.node, "DerivedFrom")
    }

    /// Identifiers listed in `<RelatedTo>` children
    pub fn related_refs(&self) -> Vec<&'a str> {
        reference_targets(self.doc, self.node, "RelatedTo")
    }
}

/// Mutable lens over `<Dataset>`
#[derive(Debug)]
pub struct DatasetMut<'g> {
    graph: &'g mut ProjectGraph,
    node: NodeId,
    id: String,
}

impl<'g> DatasetMut<'g> {
    pub(crate) fn new(graph: &'g mut ProjectGraph, node: NodeId, id: &str) -> Self {
        Self {
            graph,
            node,
            id: id.to_string(),
        }
    }

    /// Identifier of the dataset
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read view of the current state
    pub fn view(&self) -> Result<Dataset<'_>> {
        let graph: &ProjectGraph = &*self.graph;
        Dataset::from_node(graph.document(), graph.rules(), self.node)
    }

    /// Set `<Name>`
    pub fn set_name(&mut self, name: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Name", name)?;
        Ok(self)
    }

    /// Set `<Path>`
    pub fn set_path(&mut self, path: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Path", path)?;
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

    /// Set `<Citation>`
    pub fn set_citation(&mut self, citation: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Citation", citation)?;
        Ok(self)
    }

    /// Set the payload type
    pub fn set_type(&mut self, dataset_type: DatasetType) -> Result<&mut Self> {
        self.graph.set_checked_attr(self.node, "type", &dataset_type)?;
        Ok(self)
    }

    /// Set the `guid` attribute
    pub fn set_guid(&mut self, guid: &str) -> Result<&mut Self> {
        self.graph.set_checked_attr(self.node, "guid", &guid.to_string())?;
        Ok(self)
    }

    /// Set the `extRef` attribute
    pub fn set_ext_ref(&mut self, ext_ref: &str) -> Result<&mut Self> {
        self.graph.set_checked_attr(self.node, "extRef", &ext_ref.to_string())?;
        Ok(self)
    }

    /// Drop the `extRef` attribute
    pub fn clear_ext_ref(&mut self) -> Result<&mut Self> {
        self.graph.remove_checked_attr(self.node, "extRef")?;
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

    /// Record that this dataset was derived from `source`
    pub fn add_derived_from(&mut self, source: &str) -> Result<&mut Self> {
        let id = self.id.clone();
        self.graph.add_reference(&id, Role::DerivedFrom, source)?;
        Ok(self)
    }

    /// Link this dataset to another identified node
    pub fn add_related(&mut self, target: &str) -> Result<&mut Self> {
        let id = self.id.clone();
        self.graph.add_reference(&id, Role::RelatedTo, target)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::rules::SchemaRules;
    use std::sync::Arc;

    const PROJECT: &str = r#"<Project>
  <Id>p1</Id>
  <Dataset id="dem" type="DEM" guid="abc">
    <Name>Elevation</Name>
    <Path>topography/dem.tif</Path>
  </Dataset>
  <Dataset id="slope" type="Teapot">
    <DerivedFrom ref="dem"/>
  </Dataset>
</Project>"#;

    fn graph() -> ProjectGraph {
        ProjectGraph::parse(PROJECT, Arc::new(SchemaRules::riverscapes_v2())).unwrap()
    }

    #[test]
    fn test_typed_getters() {
        let g = graph();
        let dem = g.dataset("dem").unwrap();
        assert_eq!(dem.id(), "dem");
        assert_eq!(dem.dataset_type().unwrap(), Some(DatasetType::Dem));
        assert_eq!(dem.guid(), Some("abc"));
        assert_eq!(dem.name().as_deref(), Some("Elevation"));
        assert_eq!(dem.path().as_deref(), Some("topography/dem.tif"));
        assert_eq!(dem.summary(), None);

        let slope = g.dataset("slope").unwrap();
        assert!(matches!(slope.dataset_type(), Err(Error::TypeCoercion { .. })));
        assert_eq!(slope.derived_from_refs(), vec!["dem"]);
    }

    #[test]
    fn test_setters_follow_child_order() {
        let mut g = graph();
        {
            let mut slope = g.dataset_mut("slope").unwrap();
            slope.set_path("analysis/slope.tif").unwrap();
            slope.set_name("Slope").unwrap();
            slope.set_type(DatasetType::Raster).unwrap();
        }
        let out = g.write();
        assert!(
            out.contains(
                "<Dataset id=\"slope\" type=\"Raster\">\n    <Name>Slope</Name>\n    <Path>analysis/slope.tif</Path>\n    <DerivedFrom ref=\"dem\"/>"
            ),
            "{}",
            out
        );
    }

    #[test]
    fn test_identifier_attribute_is_protected() {
        let mut g = graph();
        let mut dem = g.dataset_mut("dem").unwrap();
        assert!(matches!(dem.clear_ext_ref(), Ok(_)));
        let node = dem.view().unwrap().node();
        drop(dem);
        assert!(matches!(
            g.set_checked_attr(node, "id", &"renamed".to_string()),
            Err(Error::SchemaViolation { .. })
        ));
        assert!(matches!(g.remove_checked_attr(node, "id"), Err(Error::SchemaViolation { .. })));
    }

    #[test]
    fn test_dataset_mut_rejects_realization() {
        let mut g = ProjectGraph::parse(
            r#"<Project><Id>p</Id><Realization id="r1"/></Project>"#,
            Arc::new(SchemaRules::riverscapes_v2()),
        )
        .unwrap();
        assert!(matches!(g.dataset_mut("r1"), Err(Error::SchemaViolation { .. })));
        assert!(matches!(g.dataset_mut("nope"), Err(Error::NotFound(_))));
    }
}
