//! Error types for rsxml
//!
//! Every fallible operation in the crate returns [`Result`]. Hard failures
//! (malformed input, broken references, misuse of a stale graph) are
//! variants of [`Error`]; soft, reportable schema problems are collected as
//! [`crate::validation::Violation`] values instead and never show up here.

use std::fmt;
use thiserror::Error;

use crate::resolver::Role;

/// Result type alias using the rsxml Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rsxml operations
#[derive(Error, Debug)]
pub enum Error {
    /// Input is not well-formed XML; no partial document is produced
    #[error("malformed XML: {0}")]
    MalformedXml(#[from] MalformedXmlError),

    /// An attribute or text value cannot be converted to the requested type
    #[error("cannot convert {field} value '{value}' to {target}: {reason}")]
    TypeCoercion {
        /// Attribute name (or `#text` for element content)
        field: String,
        /// The stored string
        value: String,
        /// Name of the requested type
        target: &'static str,
        /// Why the conversion failed
        reason: String,
    },

    /// A required attribute is absent and no default was supplied
    #[error("element '{element}' has no attribute '{attribute}'")]
    MissingAttribute {
        /// Tag of the element that was queried
        element: String,
        /// The missing attribute
        attribute: String,
    },

    /// A mutation or construction would break a schema rule
    #[error("schema violation at {path}: {message}")]
    SchemaViolation {
        /// Path of the offending node
        path: String,
        /// What rule was broken
        message: String,
    },

    /// Two nodes share one identifier
    #[error("duplicate identifier '{id}' at {first} and {second}")]
    DuplicateIdentifier {
        /// The identifier
        id: String,
        /// Path of the first node carrying it
        first: String,
        /// Path of the second node carrying it
        second: String,
    },

    /// A reference targets an identifier that does not exist
    #[error("{role} reference from '{source_id}' to unknown identifier '{target}'")]
    DanglingReference {
        /// Identifier of the referencing node (or the node path when it has none)
        source_id: String,
        /// The unresolved identifier
        target: String,
        /// Role of the reference
        role: Role,
    },

    /// Lineage edges close a cycle
    #[error("lineage cycle: {}", .cycle.join(" -> "))]
    CyclicLineage {
        /// Identifiers along the cycle; the first one is repeated at the end
        cycle: Vec<String>,
    },

    /// Edge data was read after a structural mutation without re-resolving
    #[error("edges touching '{identifier}' are stale; call reresolve() first")]
    StaleGraph {
        /// An identifier touched by the invalidating mutation
        identifier: String,
    },

    /// The document declares a schema version newer than the rules support
    #[error("unsupported schema version {found} (supported up to {supported})")]
    UnsupportedSchemaVersion {
        /// Declared version
        found: u32,
        /// Highest supported version
        supported: u32,
    },

    /// No node with the given identifier or path
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid XML name for a tag or attribute
    #[error("name error: {0}")]
    InvalidName(String),

    /// Limit exceeded error
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Directory path rejected by the safety checks
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Malformed `key=value` metadata string
    #[error("error parsing metadata '{input}': {reason}")]
    Metadata {
        /// The raw input
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::SchemaViolation`]
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SchemaViolation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::TypeCoercion`]
    pub fn coercion(
        field: impl Into<String>,
        value: impl Into<String>,
        target: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Error::TypeCoercion {
            field: field.into(),
            value: value.into(),
            target,
            reason: reason.into(),
        }
    }
}

/// Details of a well-formedness failure
#[derive(Debug, Clone)]
pub struct MalformedXmlError {
    /// Error message
    pub message: String,
    /// Byte offset in the input where the failure was detected
    pub position: Option<usize>,
    /// Snippet of the input around the failure
    pub snippet: Option<String>,
}

impl MalformedXmlError {
    /// Create a new malformed XML error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
            snippet: None,
        }
    }

    /// Set the byte offset
    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the snippet
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

impl fmt::Display for MalformedXmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(pos) = self.position {
            write!(f, " (at byte {})", pos)?;
        }

        if let Some(ref snippet) = self.snippet {
            write!(f, "\n\nNear:\n{}", snippet)?;
        }

        Ok(())
    }
}

impl std::error::Error for MalformedXmlError {}
