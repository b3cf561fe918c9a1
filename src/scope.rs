//! Declaration scope
//!
//! A scope accumulates resource declarations (kind, logical name, raw
//! attributes) in declaration order, hands out output references for
//! authoring later resources, and validates the whole batch in one pass.
//! Instances live only as long as the scope; the state store is the only
//! cross-run persistence.

use crate::cancel::CancelToken;
use crate::error::{DeclareError, ResourceFailure, ValidateError, ValidationReport};
use crate::schema::SchemaRegistry;
use crate::validator::{self, ValidatedAttributes};
use crate::value::{AttrValue, ResourceId, SymbolicReference};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::HashSet;

/// One declared resource: identity plus raw attributes as authored
#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: ResourceId,
    pub attrs: IndexMap<String, AttrValue>,
}

/// Accumulates declarations against a read-only schema registry
#[derive(Debug)]
pub struct DeclarationScope<'r> {
    registry: &'r SchemaRegistry,
    declarations: Vec<Declaration>,
    declared: HashSet<ResourceId>,
}

impl<'r> DeclarationScope<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            declarations: Vec::new(),
            declared: HashSet::new(),
        }
    }

    /// Declare a resource instance
    ///
    /// The kind must be registered and the (kind, name) pair must be new in
    /// this scope. Attribute validation is deferred to [`Self::validate`]
    /// so every problem in the scope surfaces in one report.
    pub fn declare<K, V, I>(&mut self, kind: &str, name: &str, attrs: I) -> Result<ResourceId, DeclareError>
    where
        K: Into<String>,
        V: Into<AttrValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.registry.lookup(kind)?;

        let id = ResourceId::new(kind, name);
        if !self.declared.insert(id.clone()) {
            return Err(DeclareError::Duplicate { id });
        }

        let attrs = attrs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        log::debug!("declared {id}");
        self.declarations.push(Declaration {
            id: id.clone(),
            attrs,
        });
        Ok(id)
    }

    /// An attribute value standing for another instance's eventual output
    pub fn output_ref(&self, target: &ResourceId, attribute: &str) -> AttrValue {
        AttrValue::Ref(SymbolicReference::new(target.clone(), attribute))
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Declared ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.declarations.iter().map(|d| &d.id)
    }

    /// Validate every declaration in the scope
    ///
    /// Instances are independent, so validation fans out across the rayon
    /// pool; results come back in declaration order. Failures are batched
    /// across resources — a broken sibling never hides another resource's
    /// problems.
    pub fn validate(&self, cancel: &CancelToken) -> Result<ValidatedScope, ValidateError> {
        log::debug!("validating {} declaration(s)", self.declarations.len());

        let results = self
            .declarations
            .par_iter()
            .map(|decl| {
                if cancel.is_cancelled() {
                    return Err(ValidateError::Cancelled);
                }
                let schema = self.registry.lookup(&decl.id.kind)?;
                Ok(validator::validate(schema, &decl.attrs)
                    .map(|validated| (decl.id.clone(), validated))
                    .map_err(|issues| ResourceFailure {
                        id: decl.id.clone(),
                        issues,
                    }))
            })
            .collect::<Result<Vec<_>, ValidateError>>()?;

        let mut attributes = IndexMap::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok((id, validated)) => {
                    attributes.insert(id, validated);
                }
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(ValidatedScope { attributes })
        } else {
            log::debug!("validation failed for {} resource(s)", failures.len());
            Err(ValidateError::Invalid(ValidationReport { failures }))
        }
    }
}

/// A fully validated scope: canonical attributes per instance, in
/// declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedScope {
    attributes: IndexMap<ResourceId, ValidatedAttributes>,
}

impl ValidatedScope {
    pub fn get(&self, id: &ResourceId) -> Option<&ValidatedAttributes> {
        self.attributes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ValidatedAttributes)> {
        self.attributes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.attributes.keys()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.attributes.contains_key(id)
    }

    /// Position of an instance in declaration order
    pub fn declaration_index(&self, id: &ResourceId) -> Option<usize> {
        self.attributes.get_index_of(id)
    }
}
