//! Header Classifier
//!
//! Column names are partitioned once per data file:
//!
//! - `label##property` is a property key (exactly one `##`, both parts non-empty)
//! - a bare label whose template matches are all containers is a visibility key
//! - everything else is an element-value key
//!
//! The result is a pure function of the column-name set and the template's
//! label index, and is stored in sorted collections so that input order never
//! shows.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{AutogenError, Result};
use crate::index::{normalize_label, LabelIndex};
use crate::template::{Document, NodeKind};

pub const PROPERTY_SEPARATOR: &str = "##";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PropertyKey {
    pub label: String,
    pub property: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub element_keys: BTreeSet<String>,
    /// Column name to its decomposed `(label, property)`.
    pub property_keys: BTreeMap<String, PropertyKey>,
    pub visibility_keys: BTreeSet<String>,
    /// Columns whose label addresses no template node. They stay in their
    /// category; this set only drives once-per-run reporting.
    pub misses: BTreeSet<String>,
}

impl Classification {
    pub fn total(&self) -> usize {
        self.element_keys.len() + self.property_keys.len() + self.visibility_keys.len()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.element_keys.contains(column)
            || self.property_keys.contains_key(column)
            || self.visibility_keys.contains(column)
    }
}

/// Split `label##property`. Returns `Ok(None)` for names without a separator.
pub fn decompose_property_key(column: &str) -> Result<Option<PropertyKey>> {
    if !column.contains(PROPERTY_SEPARATOR) {
        return Ok(None);
    }

    let parts: Vec<&str> = column.split(PROPERTY_SEPARATOR).collect();
    let malformed = |reason: &str| {
        AutogenError::configuration(format!(
            "malformed property column '{}': {}",
            column, reason
        ))
    };

    if parts.len() != 2 || parts[0].ends_with('#') || parts[1].starts_with('#') {
        return Err(malformed("expected exactly one '##' separator"));
    }

    let label = normalize_label(parts[0]);
    let property = parts[1].trim();
    if label.is_empty() {
        return Err(malformed("label part is empty"));
    }
    if property.is_empty() {
        return Err(malformed("property part is empty"));
    }
    if property.contains(char::is_whitespace) {
        return Err(malformed("property name contains whitespace"));
    }

    Ok(Some(PropertyKey {
        label: label.to_string(),
        property: property.to_string(),
    }))
}

/// Classify every column name against the template.
pub fn classify<'c, I>(columns: I, document: &Document, index: &LabelIndex) -> Result<Classification>
where
    I: IntoIterator<Item = &'c str>,
{
    let mut result = Classification::default();

    for column in columns {
        if let Some(key) = decompose_property_key(column)? {
            if !index.contains(&key.label) {
                result.misses.insert(column.to_string());
            }
            result.property_keys.insert(column.to_string(), key);
            continue;
        }

        let kinds = index.kinds(document, column);
        if kinds.is_empty() {
            result.misses.insert(column.to_string());
            result.element_keys.insert(column.to_string());
        } else if kinds.iter().all(|k| *k == NodeKind::Container) {
            result.visibility_keys.insert(column.to_string());
        } else {
            result.element_keys.insert(column.to_string());
        }
    }

    debug!(
        "classified columns: {} element, {} property, {} visibility, {} unmatched",
        result.element_keys.len(),
        result.property_keys.len(),
        result.visibility_keys.len(),
        result.misses.len()
    );
    Ok(result)
}
