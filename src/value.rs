//! Attribute value representation
//!
//! Attribute values form a small tagged union: scalar literals, lists,
//! nested records, and symbolic references to another instance's output.
//! References stay structured through validation, graph building and
//! planning; rendering to the `${kind.name.attr}` interpolation form is
//! deferred to the executor boundary via `Display`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a declared resource instance: kind plus user-chosen logical
/// name, unique within a declaration scope.
///
/// Ordering is (kind, name) — the global lock acquisition order for
/// multi-key state commits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse a `kind.name` key, as used by the file state backend.
    ///
    /// Kinds never contain dots; everything after the first dot is the
    /// logical name.
    pub fn parse(key: &str) -> Option<Self> {
        let (kind, name) = key.split_once('.')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(kind, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

/// A placeholder for the eventual output of another declared resource
///
/// Carried as a structured value until execution; `Display` renders the
/// external interpolation form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolicReference {
    pub target: ResourceId,
    pub attribute: String,
}

impl SymbolicReference {
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for SymbolicReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.attribute)
    }
}

/// All possible attribute value types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<AttrValue>),
    Record(IndexMap<String, AttrValue>),
    Ref(SymbolicReference),
}

impl AttrValue {
    /// Type name used in `TypeMismatch` diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Ref(_) => "reference",
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    /// Collect every symbolic reference reachable from this value,
    /// including those nested in lists and records.
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a SymbolicReference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Self::Record(fields) => {
                for value in fields.values() {
                    value.collect_refs(out);
                }
            }
            Self::String(_) | Self::Int(_) | Self::Bool(_) => {}
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Record(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} = {value}")?;
                }
                write!(f, "}}")
            }
            Self::Ref(r) => write!(f, "{r}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(value: Vec<AttrValue>) -> Self {
        Self::List(value)
    }
}

impl From<SymbolicReference> for AttrValue {
    fn from(value: SymbolicReference) -> Self {
        Self::Ref(value)
    }
}
