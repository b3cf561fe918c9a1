//! Resource kind schemas and the schema registry
//!
//! A schema fixes, per resource kind, the set of attributes, their types,
//! required/optional status, defaults and constraints. Schemas are loaded
//! once (builder API or embedded TOML definitions) and the registry is
//! read-only afterwards; it is passed by reference into the validator and
//! planner rather than living in a global.

use crate::error::SchemaError;
use crate::value::AttrValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of an attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    String,
    Int,
    Bool,
    /// A string constrained to the attribute's `allowed` values
    Enum,
    /// A list with a fixed element type
    List(Box<AttrType>),
    /// A nested key/value record; inner field shapes are provider-defined
    Record,
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Enum => write!(f, "enum"),
            Self::List(elem) => write!(f, "list of {elem}"),
            Self::Record => write!(f, "record"),
        }
    }
}

/// Inclusive integer range constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Schema for a single attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSchema {
    #[serde(rename = "type")]
    pub ty: AttrType,

    /// Must be present (or have a default) in every declaration
    #[serde(default)]
    pub required: bool,

    /// Value filled in when the declaration omits the attribute
    #[serde(default)]
    pub default: Option<AttrValue>,

    /// A change to this attribute cannot be applied in place; the instance
    /// is deleted and re-created
    #[serde(default)]
    pub force_replace: bool,

    /// Allowed values for `Enum`-typed attributes
    #[serde(default)]
    pub allowed: Option<Vec<String>>,

    /// Range constraint for `Int`-typed attributes
    #[serde(default)]
    pub range: Option<IntRange>,
}

impl AttrSchema {
    fn typed(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            default: None,
            force_replace: false,
            allowed: None,
            range: None,
        }
    }

    pub fn string() -> Self {
        Self::typed(AttrType::String)
    }

    pub fn int() -> Self {
        Self::typed(AttrType::Int)
    }

    pub fn boolean() -> Self {
        Self::typed(AttrType::Bool)
    }

    pub fn enumeration<S: Into<String>>(allowed: impl IntoIterator<Item = S>) -> Self {
        let mut schema = Self::typed(AttrType::Enum);
        schema.allowed = Some(allowed.into_iter().map(Into::into).collect());
        schema
    }

    pub fn list(elem: AttrType) -> Self {
        Self::typed(AttrType::List(Box::new(elem)))
    }

    pub fn record() -> Self {
        Self::typed(AttrType::Record)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<AttrValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn force_replace(mut self) -> Self {
        self.force_replace = true;
        self
    }

    pub fn in_range(mut self, min: i64, max: i64) -> Self {
        self.range = Some(IntRange { min, max });
        self
    }
}

/// Ordered attribute schema for one resource kind
///
/// Attribute order is declaration order and drives canonical attribute
/// records, diff output and error ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub attributes: IndexMap<String, AttrSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: AttrSchema) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrSchema> {
        self.attributes.get(name)
    }
}

/// Read-only registry of schemas, keyed by kind
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    kinds: IndexMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Last registration wins; intended for boot only.
    pub fn register(&mut self, kind: impl Into<String>, schema: Schema) {
        self.kinds.insert(kind.into(), schema);
    }

    /// Look up the schema for a kind. An unregistered kind is fatal to the
    /// declaration that names it.
    pub fn lookup(&self, kind: &str) -> Result<&Schema, SchemaError> {
        self.kinds.get(kind).ok_or_else(|| SchemaError::NotFound {
            kind: kind.to_string(),
        })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Load a registry from embedded TOML definitions, usable with
    /// `include_str!`:
    ///
    /// ```toml
    /// [kinds.db_cluster.attributes.engine]
    /// type = "string"
    /// required = true
    ///
    /// [kinds.db_cluster.attributes.retention_days]
    /// type = "int"
    /// default = { int = 7 }
    /// range = { min = 0, max = 35 }
    /// ```
    pub fn from_toml(definitions: &str) -> Result<Self, SchemaError> {
        #[derive(Deserialize)]
        struct SchemaFile {
            kinds: IndexMap<String, Schema>,
        }

        let file: SchemaFile = toml::from_str(definitions)?;
        log::debug!(
            "loaded {} schema kind(s) from embedded definitions",
            file.kinds.len()
        );
        Ok(Self { kinds: file.kinds })
    }
}
