//! Attribute diff computation
//!
//! A diff between a prior-state attribute snapshot and the currently
//! declared (validated) attributes, field by field, in schema order.
//! Classification into create/update/replace/delete lives in the planner;
//! this module only answers "what changed".

use crate::schema::Schema;
use crate::validator::ValidatedAttributes;
use crate::value::AttrValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One changed field: `old` absent means the field is new, `new` absent
/// means it was removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<AttrValue>,
    pub new: Option<AttrValue>,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old, &self.new) {
            (Some(old), Some(new)) => write!(f, "{}: {old} -> {new}", self.field),
            (None, Some(new)) => write!(f, "{}: {new}", self.field),
            (Some(old), None) => write!(f, "{}: {old} removed", self.field),
            (None, None) => write!(f, "{}", self.field),
        }
    }
}

/// All field-level changes for one resource instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDiff {
    pub fields: Vec<FieldChange>,
}

impl AttributeDiff {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// The names of changed fields, in diff order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|c| c.field.as_str()).collect()
    }

    /// Whether any changed field is marked `force_replace` in the schema
    pub fn forces_replace(&self, schema: &Schema) -> bool {
        self.fields
            .iter()
            .any(|c| schema.attr(&c.field).is_some_and(|a| a.force_replace))
    }
}

/// Diff a prior snapshot against current validated attributes
///
/// Changed and new fields come first in current (schema) order, then
/// fields present only in the prior snapshot, in snapshot order.
pub fn diff_attributes(
    prior: &IndexMap<String, AttrValue>,
    current: &ValidatedAttributes,
) -> AttributeDiff {
    let mut fields = Vec::new();

    for (name, new) in current.iter() {
        match prior.get(name) {
            Some(old) if old == new => {}
            Some(old) => fields.push(FieldChange {
                field: name.clone(),
                old: Some(old.clone()),
                new: Some(new.clone()),
            }),
            None => fields.push(FieldChange {
                field: name.clone(),
                old: None,
                new: Some(new.clone()),
            }),
        }
    }

    for (name, old) in prior {
        if current.get(name).is_none() {
            fields.push(FieldChange {
                field: name.clone(),
                old: Some(old.clone()),
                new: None,
            });
        }
    }

    AttributeDiff { fields }
}

/// Diff for a brand-new instance: every attribute is new
pub fn creation_diff(current: &ValidatedAttributes) -> AttributeDiff {
    AttributeDiff {
        fields: current
            .iter()
            .map(|(name, value)| FieldChange {
                field: name.clone(),
                old: None,
                new: Some(value.clone()),
            })
            .collect(),
    }
}

/// Diff for a deleted instance: every attribute is removed
pub fn deletion_diff(prior: &IndexMap<String, AttrValue>) -> AttributeDiff {
    AttributeDiff {
        fields: prior
            .iter()
            .map(|(name, value)| FieldChange {
                field: name.clone(),
                old: Some(value.clone()),
                new: None,
            })
            .collect(),
    }
}
