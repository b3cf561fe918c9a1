//! Attribute validation
//!
//! Validation is pure: it sees one schema and one raw attribute mapping,
//! and consults neither the state store nor the graph. The output is a
//! canonical [`ValidatedAttributes`] record with defaults filled in and
//! attributes in schema order, so re-validating a validated record is
//! idempotent.
//!
//! Issues are collected across fields rather than failing on the first,
//! in schema declaration order followed by unknown attributes in input
//! order. Within a single field the first failed check wins (a type
//! mismatch is not also reported as a range violation), which keeps error
//! output deterministic.

use crate::error::ValidationIssue;
use crate::schema::{AttrSchema, AttrType, Schema};
use crate::value::{AttrValue, SymbolicReference};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Canonical, immutable attribute record produced only by [`validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedAttributes {
    values: IndexMap<String, AttrValue>,
}

impl ValidatedAttributes {
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The underlying attribute mapping, in schema order
    pub fn raw(&self) -> &IndexMap<String, AttrValue> {
        &self.values
    }

    pub fn into_raw(self) -> IndexMap<String, AttrValue> {
        self.values
    }

    /// Every symbolic reference held by this record, paired with the
    /// top-level attribute that carries it (possibly nested inside).
    pub fn references(&self) -> Vec<(&str, &SymbolicReference)> {
        let mut out = Vec::new();
        for (name, value) in &self.values {
            let mut refs = Vec::new();
            value.collect_refs(&mut refs);
            out.extend(refs.into_iter().map(|r| (name.as_str(), r)));
        }
        out
    }
}

/// Validate a raw attribute mapping against a kind's schema
///
/// On success returns the canonical record; on failure returns every issue
/// found, never just the first.
pub fn validate(
    schema: &Schema,
    raw: &IndexMap<String, AttrValue>,
) -> Result<ValidatedAttributes, Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let mut values = IndexMap::with_capacity(schema.attributes.len());

    for (name, attr) in &schema.attributes {
        match raw.get(name) {
            Some(value) => match check_value(name, attr, value) {
                Ok(()) => {
                    values.insert(name.clone(), value.clone());
                }
                Err(issue) => issues.push(issue),
            },
            None => {
                if let Some(default) = &attr.default {
                    values.insert(name.clone(), default.clone());
                } else if attr.required {
                    issues.push(ValidationIssue::MissingRequiredAttribute {
                        field: name.clone(),
                    });
                }
            }
        }
    }

    // Fail closed: attributes the schema does not know are rejected so a
    // typo never silently drops an intended setting.
    for name in raw.keys() {
        if schema.attr(name).is_none() {
            issues.push(ValidationIssue::UnknownAttribute {
                field: name.clone(),
            });
        }
    }

    if issues.is_empty() {
        Ok(ValidatedAttributes { values })
    } else {
        Err(issues)
    }
}

/// Check one present attribute: type first, then constraints.
fn check_value(field: &str, attr: &AttrSchema, value: &AttrValue) -> Result<(), ValidationIssue> {
    // References are resolved at execution time and satisfy any type.
    if value.is_ref() {
        return Ok(());
    }

    if !type_matches(&attr.ty, value) {
        return Err(ValidationIssue::TypeMismatch {
            field: field.to_string(),
            expected: attr.ty.to_string(),
            got: value.type_name().to_string(),
        });
    }

    if let (Some(allowed), AttrValue::String(s)) = (&attr.allowed, value)
        && !allowed.contains(s)
    {
        return Err(ValidationIssue::InvalidEnumValue {
            field: field.to_string(),
            got: s.clone(),
            allowed: allowed.clone(),
        });
    }

    if let (Some(range), AttrValue::Int(i)) = (&attr.range, value)
        && !range.contains(*i)
    {
        return Err(ValidationIssue::OutOfRange {
            field: field.to_string(),
            got: *i,
            min: range.min,
            max: range.max,
        });
    }

    Ok(())
}

fn type_matches(ty: &AttrType, value: &AttrValue) -> bool {
    match (ty, value) {
        (AttrType::String | AttrType::Enum, AttrValue::String(_))
        | (AttrType::Int, AttrValue::Int(_))
        | (AttrType::Bool, AttrValue::Bool(_))
        | (AttrType::Record, AttrValue::Record(_)) => true,
        (AttrType::List(elem), AttrValue::List(items)) => {
            items.iter().all(|v| v.is_ref() || type_matches(elem, v))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ResourceId;

    fn db_schema() -> Schema {
        Schema::new()
            .with_attribute("engine", AttrSchema::string().required())
            .with_attribute(
                "retention_days",
                AttrSchema::int().in_range(0, 35).with_default(7),
            )
            .with_attribute(
                "class",
                AttrSchema::enumeration(["db.small", "db.large"]),
            )
            .with_attribute("zones", AttrSchema::list(AttrType::String))
            .with_attribute("tags", AttrSchema::record())
    }

    fn attrs(entries: Vec<(&str, AttrValue)>) -> IndexMap<String, AttrValue> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn defaults_are_filled_in_schema_order() {
        let validated = validate(
            &db_schema(),
            &attrs(vec![("engine", AttrValue::from("postgres"))]),
        )
        .unwrap();
        let names: Vec<&str> = validated.raw().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["engine", "retention_days"]);
        assert_eq!(validated.get("retention_days"), Some(&AttrValue::Int(7)));
    }

    #[test]
    fn revalidation_is_idempotent() {
        let raw = attrs(vec![
            ("retention_days", AttrValue::Int(12)),
            ("engine", AttrValue::from("postgres")),
        ]);
        let once = validate(&db_schema(), &raw).unwrap();
        let twice = validate(&db_schema(), once.raw()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_required_attribute_is_reported() {
        let issues = validate(&db_schema(), &attrs(vec![])).unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::MissingRequiredAttribute {
                field: "engine".into()
            }]
        );
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let issues = validate(
            &db_schema(),
            &attrs(vec![("engine", AttrValue::Int(5))]),
        )
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field(), "engine");
        assert!(matches!(
            &issues[0],
            ValidationIssue::TypeMismatch { expected, got, .. }
                if expected == "string" && got == "int"
        ));
    }

    #[test]
    fn enum_value_must_be_allowed() {
        let issues = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                ("class", AttrValue::from("db.huge")),
            ]),
        )
        .unwrap_err();
        assert!(matches!(
            &issues[0],
            ValidationIssue::InvalidEnumValue { field, got, .. }
                if field == "class" && got == "db.huge"
        ));
    }

    #[test]
    fn out_of_range_int_is_rejected_with_value() {
        let issues = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                ("retention_days", AttrValue::Int(40)),
            ]),
        )
        .unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::OutOfRange {
                field: "retention_days".into(),
                got: 40,
                min: 0,
                max: 35,
            }]
        );
    }

    #[test]
    fn unknown_attributes_fail_closed() {
        let issues = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                ("retention", AttrValue::Int(7)),
            ]),
        )
        .unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::UnknownAttribute {
                field: "retention".into()
            }]
        );
    }

    #[test]
    fn issues_are_collected_across_fields_in_schema_order() {
        let issues = validate(
            &db_schema(),
            &attrs(vec![
                ("retention_days", AttrValue::Int(99)),
                ("class", AttrValue::Bool(true)),
                ("oops", AttrValue::Int(1)),
            ]),
        )
        .unwrap_err();
        let fields: Vec<&str> = issues.iter().map(ValidationIssue::field).collect();
        assert_eq!(fields, vec!["engine", "retention_days", "class", "oops"]);
    }

    #[test]
    fn references_satisfy_any_declared_type() {
        let r = SymbolicReference::new(ResourceId::new("db_cluster", "main"), "retention");
        let validated = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                ("retention_days", AttrValue::Ref(r.clone())),
            ]),
        )
        .unwrap();
        assert_eq!(validated.get("retention_days"), Some(&AttrValue::Ref(r)));
    }

    #[test]
    fn typed_lists_check_elements() {
        let ok = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                (
                    "zones",
                    AttrValue::List(vec![AttrValue::from("eu-1a"), AttrValue::from("eu-1b")]),
                ),
            ]),
        );
        assert!(ok.is_ok());

        let issues = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                ("zones", AttrValue::List(vec![AttrValue::Int(1)])),
            ]),
        )
        .unwrap_err();
        assert_eq!(issues[0].field(), "zones");
    }

    #[test]
    fn references_list_top_level_attribute() {
        let r = SymbolicReference::new(ResourceId::new("net", "a"), "id");
        let validated = validate(
            &db_schema(),
            &attrs(vec![
                ("engine", AttrValue::from("postgres")),
                ("zones", AttrValue::List(vec![AttrValue::Ref(r.clone())])),
            ]),
        )
        .unwrap();
        assert_eq!(validated.references(), vec![("zones", &r)]);
    }
}
