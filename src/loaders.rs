//! Reading and writing project files

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::documents::{Document, ParseOptions};
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;
use crate::limits::Limits;
use crate::rules::SchemaRules;
use crate::util::{safe_makedirs, sizeof_fmt};

/// Read and parse a document from disk
pub fn load_document(path: impl AsRef<Path>, options: &ParseOptions) -> Result<Document> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    info!(path = %path.display(), size = %sizeof_fmt(bytes.len() as u64), "loading document");
    options.limits.check_xml_size(bytes.len())?;
    let text = String::from_utf8(bytes).map_err(|e| {
        Error::MalformedXml(crate::error::MalformedXmlError::new(format!(
            "'{}' is not valid UTF-8: {}",
            path.display(),
            e
        )))
    })?;
    Document::parse_with(&text, options)
}

/// Write serialized text, creating the parent directory when needed
pub fn save_document(path: impl AsRef<Path>, text: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            safe_makedirs(parent)?;
        }
    }
    fs::write(path, text)?;
    info!(path = %path.display(), size = %sizeof_fmt(text.len() as u64), "saved document");
    Ok(())
}

/// Loads project files into graphs under one set of rules and limits
#[derive(Debug, Clone)]
pub struct Loader {
    rules: Arc<SchemaRules>,
    limits: Limits,
}

impl Loader {
    /// Create a loader for the given rules
    pub fn new(rules: Arc<SchemaRules>) -> Self {
        Self {
            rules,
            limits: Limits::default(),
        }
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Parse options derived from the limits and rules
    pub fn options(&self) -> ParseOptions {
        ParseOptions::new()
            .with_limits(self.limits.clone())
            .with_max_schema_version(self.rules.version())
    }

    /// Load and resolve a project file
    pub fn load(&self, path: impl AsRef<Path>) -> Result<ProjectGraph> {
        let document = load_document(path, &self.options())?;
        ProjectGraph::resolve(document, Arc::clone(&self.rules))
    }

    /// Write a graph back to disk, returning the path written
    pub fn save(&self, graph: &ProjectGraph, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let text = graph.write();
        save_document(path, &text)?;
        debug!(dirty = graph.document().is_dirty(), "graph written");
        Ok(path.to_path_buf())
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(Arc::new(SchemaRules::default()))
    }
}
