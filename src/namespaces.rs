//! XML namespace handling
//!
//! Project documents are usually namespace-less, but tools embed extension
//! elements under their own prefixes. This module resolves prefixes against
//! the `xmlns` declarations in scope and recognises the Riverscapes schema
//! location so the document's schema version can be read.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

/// Riverscapes project namespace (V2)
pub const RIVERSCAPES_NAMESPACE: &str = "https://xml.riverscapes.net/Projects/XSD/V2";

/// Canonical V2 schema location
pub const RIVERSCAPES_SCHEMA_LOCATION: &str =
    "https://xml.riverscapes.net/Projects/XSD/V2/RiverscapesProject.xsd";

/// XML Schema instance namespace
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XML namespace
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

static SCHEMA_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/XSD/V(\d+)(?:/|$)").unwrap());

/// Qualified name (QName) - combination of namespace and local name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI (None for no namespace)
    pub namespace: Option<String>,
    /// Local name
    pub local_name: String,
}

impl QName {
    /// Create a QName without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a namespace
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local_name: local_name.into(),
        }
    }

    /// Whether this name belongs to the modeled schema
    ///
    /// No namespace and any Riverscapes project namespace version both count.
    pub fn is_riverscapes(&self) -> bool {
        match &self.namespace {
            None => true,
            Some(ns) => is_riverscapes_namespace(ns),
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

/// Namespace declarations made on one element, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceContext {
    /// Mapping from prefix to namespace URI
    prefixes: IndexMap<String, String>,
    /// Default namespace (no prefix)
    default_namespace: Option<String>,
}

impl NamespaceContext {
    /// Create a new empty namespace context
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribute if it is a namespace declaration
    ///
    /// Returns `true` when the attribute was `xmlns` or `xmlns:*`.
    pub fn observe_attribute(&mut self, name: &str, value: &str) -> bool {
        if name == "xmlns" {
            self.default_namespace = Some(value.to_string());
            true
        } else if let Some(prefix) = name.strip_prefix("xmlns:") {
            self.prefixes.insert(prefix.to_string(), value.to_string());
            true
        } else {
            false
        }
    }

    /// Get the namespace for a prefix
    pub fn get_namespace(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(|s| s.as_str())
    }

    /// Get the default namespace
    pub fn get_default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    /// Whether nothing is declared here
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.default_namespace.is_none()
    }
}

/// Resolve a prefixed name against a chain of contexts, innermost first
pub fn resolve_in<'a, I>(prefixed_name: &str, scopes: I) -> Result<QName>
where
    I: IntoIterator<Item = &'a NamespaceContext>,
{
    let (prefix, local) = crate::names::split_qname(prefixed_name);
    match prefix {
        Some("xml") => Ok(QName::namespaced(XML_NAMESPACE, local)),
        Some(prefix) => {
            for scope in scopes {
                if let Some(ns) = scope.get_namespace(prefix) {
                    return Ok(QName::namespaced(ns, local));
                }
            }
            Err(Error::NotFound(format!("namespace prefix '{}'", prefix)))
        }
        None => {
            for scope in scopes {
                if let Some(ns) = scope.get_default_namespace() {
                    return Ok(if ns.is_empty() {
                        QName::local(local)
                    } else {
                        QName::namespaced(ns, local)
                    });
                }
            }
            Ok(QName::local(local))
        }
    }
}

/// Whether a namespace URI is a Riverscapes project namespace
pub fn is_riverscapes_namespace(ns: &str) -> bool {
    ns.trim_end_matches('/')
        .to_ascii_lowercase()
        .starts_with("https://xml.riverscapes.net/projects/xsd/v")
}

/// Extract the schema version from a schema location or namespace URI
///
/// `https://xml.riverscapes.net/Projects/XSD/V2/RiverscapesProject.xsd` is version 2.
pub fn schema_version_from_uri(uri: &str) -> Option<u32> {
    SCHEMA_VERSION
        .captures(uri)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_display() {
        let qname = QName::namespaced("urn:ext", "Note");
        assert_eq!(qname.to_string(), "{urn:ext}Note");
        assert_eq!(QName::local("Project").to_string(), "Project");
    }

    #[test]
    fn test_observe_attribute() {
        let mut ctx = NamespaceContext::new();
        assert!(ctx.observe_attribute("xmlns:ext", "urn:ext"));
        assert!(ctx.observe_attribute("xmlns", RIVERSCAPES_NAMESPACE));
        assert!(!ctx.observe_attribute("id", "d1"));

        assert_eq!(ctx.get_namespace("ext"), Some("urn:ext"));
        assert_eq!(ctx.get_default_namespace(), Some(RIVERSCAPES_NAMESPACE));
    }

    #[test]
    fn test_resolve_innermost_wins() {
        let mut outer = NamespaceContext::new();
        outer.observe_attribute("xmlns:ext", "urn:outer");
        let mut inner = NamespaceContext::new();
        inner.observe_attribute("xmlns:ext", "urn:inner");

        let qname = resolve_in("ext:Note", [&inner, &outer]).unwrap();
        assert_eq!(qname.namespace.as_deref(), Some("urn:inner"));

        let qname = resolve_in("Dataset", [&inner, &outer]).unwrap();
        assert_eq!(qname, QName::local("Dataset"));
        assert!(qname.is_riverscapes());
    }

    #[test]
    fn test_resolve_unknown_prefix() {
        let ctx = NamespaceContext::new();
        assert!(resolve_in("nope:Thing", [&ctx]).is_err());
    }

    #[test]
    fn test_schema_version_from_uri() {
        assert_eq!(schema_version_from_uri(RIVERSCAPES_SCHEMA_LOCATION), Some(2));
        assert_eq!(
            schema_version_from_uri("https://xml.riverscapes.net/Projects/XSD/V3"),
            Some(3)
        );
        assert_eq!(schema_version_from_uri("urn:something-else"), None);
    }

    #[test]
    fn test_is_riverscapes_namespace() {
        assert!(is_riverscapes_namespace(RIVERSCAPES_NAMESPACE));
        assert!(!is_riverscapes_namespace("urn:ext"));
    }
}
