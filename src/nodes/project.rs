//! The `Project` root

use serde::Serialize;

use super::TypedNode;
use crate::documents::{Document, Element, NodeId};
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;

/// Read-only view over `<Project>`
#[derive(Debug, Clone, Copy)]
pub struct Project<'a> {
    doc: &'a Document,
    node: NodeId,
    el: &'a Element,
}

typed_node!(Project, "Project");

/// Centre point of the project extent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Centroid {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

/// Project extent in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Southern edge
    pub min_lat: f64,
    /// Western edge
    pub min_lng: f64,
    /// Northern edge
    pub max_lat: f64,
    /// Eastern edge
    pub max_lng: f64,
}

/// `<ProjectBounds>` content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectBounds {
    /// Centre point
    pub centroid: Centroid,
    /// Extent
    pub bounding_box: BoundingBox,
    /// Optional path to a GeoJSON outline
    pub path: Option<String>,
}

/// `<Warehouse>` attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warehouse {
    /// Warehouse-side project id
    pub id: Option<String>,
    /// API endpoint
    pub api_url: Option<String>,
}

impl<'a> Project<'a> {
    /// Text of `<Id>`
    pub fn id(&self) -> Option<String> {
        self.child_text("Id")
    }

    /// Text of `<Name>`
    pub fn name(&self) -> Option<String> {
        self.child_text("Name")
    }

    /// Text of `<ProjectType>`
    pub fn project_type(&self) -> Option<String> {
        self.child_text("ProjectType")
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

    /// Extent, if the project declares one
    pub fn bounds(&self) -> Result<Option<ProjectBounds>> {
        let Some(bounds) = self.doc.first_child_named(self.node, "ProjectBounds") else {
            return Ok(None);
        };
        let required = |tag: &str| {
            self.doc
                .first_child_named(bounds, tag)
                .and_then(|n| self.doc.element(n))
                .ok_or_else(|| Error::schema(self.doc.path_of(bounds), format!("'{}' is missing", tag)))
        };

        let centroid = required("Centroid")?;
        let bbox = required("BoundingBox")?;
        Ok(Some(ProjectBounds {
            centroid: Centroid {
                lat: centroid.get_attr("lat")?,
                lng: centroid.get_attr("lng")?,
            },
            bounding_box: BoundingBox {
                min_lat: bbox.get_attr("minLat")?,
                min_lng: bbox.get_attr("minLng")?,
                max_lat: bbox.get_attr("maxLat")?,
                max_lng: bbox.get_attr("maxLng")?,
            },
            path: self.doc.child_text(bounds, "Path"),
        }))
    }

    /// Warehouse link, if present
    pub fn warehouse(&self) -> Option<Warehouse> {
        let node = self.doc.first_child_named(self.node, "Warehouse")?;
        let el = self.doc.element(node)?;
        Some(Warehouse {
            id: el.attr("id").map(str::to_string),
            api_url: el.attr("apiUrl").map(str::to_string),
        })
    }
}

/// Mutable lens over `<Project>`
#[derive(Debug)]
pub struct ProjectMut<'g> {
    graph: &'g mut ProjectGraph,
    node: NodeId,
}

impl<'g> ProjectMut<'g> {
    pub(crate) fn new(graph: &'g mut ProjectGraph, node: NodeId) -> Self {
        Self { graph, node }
    }

    /// Read view of the current state
    pub fn view(&self) -> Result<Project<'_>> {
        let graph: &ProjectGraph = &*self.graph;
        Project::from_node(graph.document(), graph.rules(), self.node)
    }

    /// Set `<Id>`
    pub fn set_id(&mut self, id: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Id", id)?;
        Ok(self)
    }

    /// Set `<Name>`
    pub fn set_name(&mut self, name: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "Name", name)?;
        Ok(self)
    }

    /// Set `<ProjectType>`
    pub fn set_project_type(&mut self, project_type: &str) -> Result<&mut Self> {
        self.graph.set_child_text(self.node, "ProjectType", project_type)?;
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

    /// Set a project-level metadata value
    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        self.graph.set_meta_at(self.node, key, value, None)?;
        Ok(self)
    }

    /// Replace the project extent
    ///
    /// Every coordinate is range-checked before anything is written.
    pub fn set_bounds(&mut self, bounds: &ProjectBounds) -> Result<&mut Self> {
        let centroid = [("lat", bounds.centroid.lat), ("lng", bounds.centroid.lng)];
        let bbox = [
            ("minLat", bounds.bounding_box.min_lat),
            ("minLng", bounds.bounding_box.min_lng),
            ("maxLat", bounds.bounding_box.max_lat),
            ("maxLng", bounds.bounding_box.max_lng),
        ];
        {
            let rules = self.graph.rules();
            let path = format!("{}/ProjectBounds", self.graph.document().path_of(self.node));
            let centroid_rules = rules.expect_rules("Centroid")?;
            for (name, value) in centroid {
                centroid_rules.check_attr_value(&format!("{}/Centroid", path), name, &value.to_string())?;
            }
            let bbox_rules = rules.expect_rules("BoundingBox")?;
            for (name, value) in bbox {
                bbox_rules.check_attr_value(&format!("{}/BoundingBox", path), name, &value.to_string())?;
            }
        }

        let container = self.graph.ensure_child(self.node, "ProjectBounds")?;
        let centroid_node = self.graph.ensure_child(container, "Centroid")?;
        for (name, value) in centroid {
            self.graph.set_checked_attr(centroid_node, name, &value)?;
        }
        let bbox_node = self.graph.ensure_child(container, "BoundingBox")?;
        for (name, value) in bbox {
            self.graph.set_checked_attr(bbox_node, name, &value)?;
        }
        if let Some(path) = &bounds.path {
            self.graph.set_child_text(container, "Path", path)?;
        }
        Ok(self)
    }
}
