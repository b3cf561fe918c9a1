//! Error types for the planning engine
//!
//! Validation problems are collected per resource and batch-reported so a
//! user sees every problem in one pass; graph and planning errors fail fast
//! because nothing downstream is meaningful once the graph is invalid.

use crate::value::ResourceId;
use std::fmt;
use thiserror::Error;

/// Errors from schema registry lookups and loading
#[derive(Error, Debug)]
pub enum SchemaError {
    /// No schema registered for the requested resource kind
    #[error("no schema registered for kind '{kind}'")]
    NotFound { kind: String },

    /// Embedded schema definitions failed to parse
    #[error("invalid schema definitions: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while declaring resources into a scope
#[derive(Error, Debug)]
pub enum DeclareError {
    /// A (kind, name) pair was declared twice in the same scope
    #[error("duplicate declaration of {id}")]
    Duplicate { id: ResourceId },

    /// The declared kind has no registered schema
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A single attribute-level validation problem
///
/// Every variant names the offending field so failures are actionable
/// without re-reading the declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A required attribute with no default was not supplied
    #[error("missing required attribute '{field}'")]
    MissingRequiredAttribute { field: String },

    /// The supplied value has the wrong type
    #[error("attribute '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    /// The supplied value is not one of the allowed enum values
    #[error("attribute '{field}': '{got}' is not one of [{}]", allowed.join(", "))]
    InvalidEnumValue {
        field: String,
        got: String,
        allowed: Vec<String>,
    },

    /// The supplied value falls outside the declared numeric range
    #[error("attribute '{field}': {got} is outside [{min}, {max}]")]
    OutOfRange {
        field: String,
        got: i64,
        min: i64,
        max: i64,
    },

    /// The attribute does not exist in the schema (fail closed on typos)
    #[error("unknown attribute '{field}'")]
    UnknownAttribute { field: String },
}

impl ValidationIssue {
    /// The offending field name
    pub fn field(&self) -> &str {
        match self {
            Self::MissingRequiredAttribute { field }
            | Self::TypeMismatch { field, .. }
            | Self::InvalidEnumValue { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::UnknownAttribute { field } => field,
        }
    }
}

/// All validation failures for a single resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub id: ResourceId,
    pub issues: Vec<ValidationIssue>,
}

/// Batched validation failures across a declaration scope
///
/// Sibling resources are validated even when one fails, so the report
/// carries every problem found in the scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub failures: Vec<ResourceFailure>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of attribute-level issues
    pub fn issue_count(&self) -> usize {
        self.failures.iter().map(|f| f.issues.len()).sum()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "validation failed for {} resource(s):", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "  {}:", failure.id)?;
            for issue in &failure.issues {
                writeln!(f, "    - {issue}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Errors from batch validation of a declaration scope
#[derive(Error, Debug)]
pub enum ValidateError {
    /// One or more resources failed validation; the report carries all of
    /// them
    #[error(transparent)]
    Invalid(ValidationReport),

    /// A declared kind lost its schema between declare and validate.
    /// Cannot happen with a registry that is read-only after boot.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Validation was cancelled cooperatively
    #[error("validation cancelled")]
    Cancelled,
}

/// Errors from dependency graph construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A reference chain reaches back to its own source
    ///
    /// The path lists every instance on the cycle, with the first instance
    /// repeated at the end.
    #[error("dependency cycle: {}", format_path(path))]
    Cycle { path: Vec<ResourceId> },

    /// An attribute references an instance that was never declared
    #[error("{source_id} attribute '{attribute}' references undeclared instance {target}")]
    UnknownTarget {
        source_id: ResourceId,
        attribute: String,
        target: ResourceId,
    },
}

fn format_path(path: &[ResourceId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors from change-set computation
#[derive(Error, Debug)]
pub enum PlanError {
    /// A kind present in prior state or declarations has no schema
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Replacement semantics introduced an ordering requirement that cannot
    /// be satisfied together with the dependency ordering rules
    #[error("cannot order replacement of {first} against {second}")]
    UnresolvableReplaceOrder {
        first: ResourceId,
        second: ResourceId,
    },

    /// The plan was cancelled cooperatively; no partial change set is returned
    #[error("plan cancelled")]
    Cancelled,
}

/// Errors from the state store
#[derive(Error, Debug)]
pub enum StateError {
    /// Another commit already holds the advisory lock for this key;
    /// the caller should retry once it completes
    #[error("concurrent commit in flight for {id}")]
    ConcurrentModification { id: ResourceId },

    /// State file IO failure
    #[error("state IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State file is not valid TOML
    #[error("invalid state file: {0}")]
    Parse(#[from] toml::de::Error),

    /// State file holds a record key that is not `kind.name`
    #[error("malformed state record key '{key}'")]
    Corrupt { key: String },

    /// State could not be serialized
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
}
