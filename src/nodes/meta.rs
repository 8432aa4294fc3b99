//! `MetaData` / `Meta` entries

use chrono::{NaiveDate, NaiveDateTime};

use crate::documents::{Document, Element, NodeId};
use crate::error::{Error, Result};
use crate::values::{coerce, AttrValue, MetaType};

/// Whose metadata an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaOwner<'a> {
    /// The project root
    Project,
    /// A dataset or realization, by identifier
    Identified(&'a str),
}

impl<'a> From<&'a str> for MetaOwner<'a> {
    fn from(id: &'a str) -> Self {
        MetaOwner::Identified(id)
    }
}

/// One `<Meta name="...">value</Meta>` entry
#[derive(Debug, Clone, Copy)]
pub struct MetaEntry<'a> {
    doc: &'a Document,
    node: NodeId,
    el: &'a Element,
}

typed_node!(MetaEntry, "Meta");

impl<'a> MetaEntry<'a> {
    /// Entry name (the `name` attribute)
    pub fn name(&self) -> &'a str {
        self.el.attr("name").unwrap_or_default()
    }

    /// Declared value type
    pub fn meta_type(&self) -> Result<Option<MetaType>> {
        self.el.attr_opt("type")
    }

    /// The `ext` attribute
    pub fn ext(&self) -> Option<&'a str> {
        self.el.attr("ext")
    }

    /// Whether the entry is locked against edits in viewers
    pub fn locked(&self) -> Result<bool> {
        self.el.get_attr_or("locked", false)
    }

    /// Raw text value
    pub fn value(&self) -> String {
        self.doc.text(self.node).unwrap_or_default()
    }

    /// Value converted to `T`
    pub fn value_as<T: AttrValue>(&self) -> Result<T> {
        let text = self.value();
        coerce(self.name(), text.trim())
    }

    /// Check the value against the declared type, if any
    pub fn check_value(&self) -> Result<()> {
        match self.meta_type()? {
            Some(meta_type) => check_meta_value(self.name(), meta_type, &self.value()),
            None => Ok(()),
        }
    }
}

/// Entries of `owner`'s `MetaData` block in document order
pub(crate) fn meta_entries(doc: &Document, owner: NodeId) -> Vec<MetaEntry<'_>> {
    let Some(container) = doc.first_child_named(owner, "MetaData") else {
        return Vec::new();
    };
    doc.children_named(container, "Meta")
        .filter_map(|node| doc.element(node).map(|el| MetaEntry { doc, node, el }))
        .collect()
}

/// Last entry named `name`
pub(crate) fn find_meta<'a>(doc: &'a Document, owner: NodeId, name: &str) -> Option<MetaEntry<'a>> {
    meta_entries(doc, owner)
        .into_iter()
        .rev()
        .find(|entry| entry.name() == name)
}

/// Check that a value fits a declared metadata type
pub(crate) fn check_meta_value(name: &str, meta_type: MetaType, value: &str) -> Result<()> {
    let text = value.trim();
    match meta_type {
        MetaType::Int => coerce::<i64>(name, text).map(|_| ()),
        MetaType::Float => coerce::<f64>(name, text).map(|_| ()),
        MetaType::Boolean => coerce::<bool>(name, text).map(|_| ()),
        MetaType::IsoDate => coerce::<NaiveDate>(name, text).map(|_| ()),
        MetaType::Timestamp => coerce::<NaiveDateTime>(name, text).map(|_| ()),
        MetaType::Json => serde_json::from_str::<serde_json::Value>(text)
            .map(|_| ())
            .map_err(|e| Error::coercion(name, value, "json", e.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"<Dataset id="d1">
  <MetaData>
    <Meta name="cells" type="int">12</Meta>
    <Meta name="source" locked="true">usgs</Meta>
    <Meta name="cells" type="int"> 48 </Meta>
    <Meta name="config" type="json">{"a": </Meta>
  </MetaData>
</Dataset>"#;

    #[test]
    fn test_entries_keep_duplicates() {
        let doc = Document::parse(DATASET).unwrap();
        let names: Vec<&str> = meta_entries(&doc, doc.root()).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["cells", "source", "cells", "config"]);
    }

    #[test]
    fn test_find_returns_last() {
        let doc = Document::parse(DATASET).unwrap();
        let cells = find_meta(&doc, doc.root(), "cells").unwrap();
        assert_eq!(cells.value_as::<i64>().unwrap(), 48);
        assert_eq!(cells.meta_type().unwrap(), Some(MetaType::Int));
        assert!(find_meta(&doc, doc.root(), "missing").is_none());
    }

    #[test]
    fn test_locked_flag() {
        let doc = Document::parse(DATASET).unwrap();
        assert!(find_meta(&doc, doc.root(), "source").unwrap().locked().unwrap());
        assert!(!find_meta(&doc, doc.root(), "cells").unwrap().locked().unwrap());
    }

    #[test]
    fn test_check_value() {
        let doc = Document::parse(DATASET).unwrap();
        assert!(find_meta(&doc, doc.root(), "cells").unwrap().check_value().is_ok());
        assert!(matches!(
            find_meta(&doc, doc.root(), "config").unwrap().check_value(),
            Err(Error::TypeCoercion { .. })
        ));
        assert!(check_meta_value("when", MetaType::IsoDate, "2023-01-31").is_ok());
        assert!(check_meta_value("flag", MetaType::Boolean, "maybe").is_err());
    }
}
