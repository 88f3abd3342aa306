//! Literal FHIR references (`Patient/123`).

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::path::values_at_path;

/// A resolved `Type/id` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// The referenced resource type.
    pub resource_type: String,
    /// The referenced logical id.
    pub id: String,
}

impl ResourceRef {
    /// Creates a reference.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Parses a relative or absolute literal reference.
    ///
    /// `Patient/123`, `http://example.org/fhir/Patient/123` and
    /// `Patient/123/_history/2` all yield `Patient`/`123`. Contained (`#x`)
    /// and malformed references yield `None`.
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = match reference.split_once("/_history/") {
            Some((head, _)) => head,
            None => reference,
        };
        let (type_part, id) = reference.rsplit_once('/')?;
        let resource_type = type_part.rsplit('/').next().unwrap_or(type_part);

        let starts_upper = resource_type
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false);
        if !starts_upper || id.is_empty() {
            return None;
        }

        Some(Self::new(resource_type, id))
    }

    /// Reads the reference of a stored resource from its `resourceType`/`id`.
    pub fn of_resource(resource: &Value) -> Option<Self> {
        let resource_type = resource.get("resourceType")?.as_str()?;
        let id = resource.get("id")?.as_str()?;
        Some(Self::new(resource_type, id))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// Extracts the references found at `path` in each document, in encounter
/// order. Duplicates are kept.
pub fn collect_references(documents: &[Value], path: &str) -> Vec<ResourceRef> {
    documents
        .iter()
        .flat_map(|doc| values_at_path(doc, path))
        .filter_map(Value::as_str)
        .filter_map(ResourceRef::parse)
        .collect()
}

/// Distinct ids of references pointing at `target_type`, in encounter order.
pub fn ids_for_type(references: &[ResourceRef], target_type: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    references
        .iter()
        .filter(|r| r.resource_type == target_type)
        .filter(|r| seen.insert(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect()
}
