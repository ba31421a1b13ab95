//! Value validation against property definitions
//!
//! Validation never stops at the first problem: every violation found is
//! pushed onto the caller's list so a request can report all of them at
//! once. Constraints that depend on stored state (final, required on
//! delete, uniqueness, version guard) are checked by the engine and use the
//! same `ValidationViolation` type.

use crate::definition::{DataModel, PropertyDefinition, PropertyKind, ScalarKind};
use crate::key::Key;
use crate::reference::PropertyReference;
use crate::value::{Value, Values};
use crate::version::Version;
use thiserror::Error;

/// One broken constraint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationViolation {
    /// Required property missing or deleted
    #[error("{reference} is required")]
    Required {
        /// Offending property
        reference: PropertyReference,
    },

    /// Final property changed after being set
    #[error("{reference} is final and cannot be changed")]
    Final {
        /// Offending property
        reference: PropertyReference,
    },

    /// Value of the wrong kind
    #[error("{reference} expects {expected}, got {actual}")]
    InvalidType {
        /// Offending property
        reference: PropertyReference,
        /// Kind required by the definition
        expected: String,
        /// Kind supplied
        actual: String,
    },

    /// Value outside the inclusive bounds
    #[error("{reference} value {value} is out of range")]
    OutOfRange {
        /// Offending property
        reference: PropertyReference,
        /// Supplied value
        value: Value,
    },

    /// Container size outside the bounds
    #[error("{reference} size {size} is outside {}..={}", fmt_bound(.min), fmt_bound(.max))]
    InvalidSize {
        /// Offending property
        reference: PropertyReference,
        /// Size after the change
        size: u64,
        /// Minimum size
        min: Option<u32>,
        /// Maximum size
        max: Option<u32>,
    },

    /// Value rejected for another reason, such as a regex mismatch
    #[error("{reference} has an invalid value: {reason}")]
    InvalidValue {
        /// Offending property
        reference: PropertyReference,
        /// Description
        reason: String,
    },

    /// Unique value owned by another row
    #[error("{reference} value already exists on {key}")]
    AlreadyExists {
        /// Unique property
        reference: PropertyReference,
        /// Owning row
        key: Key,
    },

    /// Optimistic version guard failed
    #[error("version mismatch: expected {expected}, row is at {actual}")]
    VersionMismatch {
        /// Version supplied by the caller
        expected: Version,
        /// Current version of the row
        actual: Version,
    },

    /// Check change found a different value
    #[error("check on {reference} failed: expected {expected}, found {}", .actual.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "nothing".into()))]
    CheckFailed {
        /// Checked property
        reference: PropertyReference,
        /// Expected value
        expected: Value,
        /// Stored value
        actual: Option<Value>,
    },
}

fn fmt_bound(bound: &Option<u32>) -> String {
    bound.map(|b| b.to_string()).unwrap_or_default()
}

/// Validate a full value, including container items and embedded fields
pub fn validate_value(
    def: &PropertyDefinition,
    value: &Value,
    reference: &PropertyReference,
    out: &mut Vec<ValidationViolation>,
) {
    match (&def.kind, value) {
        (PropertyKind::Scalar(kind), _) => validate_scalar(def, *kind, value, reference, out),
        (PropertyKind::List(item), Value::List(items)) => {
            validate_size(def, items.len() as u64, reference, out);
            for (i, v) in items.iter().enumerate() {
                let index = u32::try_from(i).unwrap_or(u32::MAX);
                validate_value(item, v, &reference.clone().item(index), out);
            }
        }
        (PropertyKind::Set(item), Value::Set(items)) => {
            validate_size(def, items.len() as u64, reference, out);
            for v in items {
                validate_value(item, v, &reference.clone().set_item(v.clone()), out);
            }
        }
        (
            PropertyKind::Map { key, value: value_def }
            | PropertyKind::IncrementingMap {
                key,
                value: value_def,
            },
            Value::Map(entries),
        ) => {
            validate_size(def, entries.len() as u64, reference, out);
            for (k, v) in entries {
                validate_value(key, k, &reference.clone().map_key(k.clone()), out);
                validate_value(value_def, v, &reference.clone().map_value(k.clone()), out);
            }
        }
        (PropertyKind::Embed(model), Value::Embed(values)) => {
            validate_values(model, values, Some(reference), out);
        }
        (PropertyKind::MultiType(types), Value::Typed(typed)) => match types.get(&typed.type_index) {
            Some(type_def) => validate_value(
                type_def,
                &typed.value,
                &reference.clone().typed(typed.type_index),
                out,
            ),
            None => out.push(ValidationViolation::InvalidValue {
                reference: reference.clone(),
                reason: format!("unknown type {}", typed.type_index),
            }),
        },
        (kind, other) => out.push(ValidationViolation::InvalidType {
            reference: reference.clone(),
            expected: kind.name().to_string(),
            actual: other.kind_name().to_string(),
        }),
    }
}

/// Validate the fields of a row or embedded object
///
/// Reports required properties that are absent and fields with no
/// definition in the model.
pub fn validate_values(
    model: &DataModel,
    values: &Values,
    parent: Option<&PropertyReference>,
    out: &mut Vec<ValidationViolation>,
) {
    let child = |index: u32| match parent {
        Some(p) => p.clone().field(index),
        None => PropertyReference::property(index),
    };
    for (index, def) in model.properties() {
        match values.get(index) {
            Some(value) => validate_value(def, value, &child(index), out),
            None if def.required => out.push(ValidationViolation::Required {
                reference: child(index),
            }),
            None => {}
        }
    }
    for (index, _) in values.iter().filter(|(i, _)| model.get(*i).is_none()) {
        out.push(ValidationViolation::InvalidValue {
            reference: child(index),
            reason: format!("model '{}' has no property {index}", model.name),
        });
    }
}

/// Check a container size against the definition bounds
pub fn validate_size(
    def: &PropertyDefinition,
    size: u64,
    reference: &PropertyReference,
    out: &mut Vec<ValidationViolation>,
) {
    let too_small = def.min_size.map_or(false, |min| size < u64::from(min));
    let too_large = def.max_size.map_or(false, |max| size > u64::from(max));
    if too_small || too_large {
        out.push(ValidationViolation::InvalidSize {
            reference: reference.clone(),
            size,
            min: def.min_size,
            max: def.max_size,
        });
    }
}

fn validate_scalar(
    def: &PropertyDefinition,
    kind: ScalarKind,
    value: &Value,
    reference: &PropertyReference,
    out: &mut Vec<ValidationViolation>,
) {
    if !kind.matches(value) {
        out.push(ValidationViolation::InvalidType {
            reference: reference.clone(),
            expected: kind.name().to_string(),
            actual: value.kind_name().to_string(),
        });
        return;
    }
    if let (ScalarKind::Enum { cases }, Value::Enum(case)) = (kind, value) {
        if *case >= cases {
            out.push(ValidationViolation::InvalidValue {
                reference: reference.clone(),
                reason: format!("enum case {case} not below {cases}"),
            });
        }
    }
    let below = def.min_value.as_ref().map_or(false, |min| value < min);
    let above = def.max_value.as_ref().map_or(false, |max| value > max);
    if below || above {
        out.push(ValidationViolation::OutOfRange {
            reference: reference.clone(),
            value: value.clone(),
        });
    }
    if let (Some(regex), Value::Text(text)) = (&def.regex, value) {
        if !regex.is_match(text) {
            out.push(ValidationViolation::InvalidValue {
                reference: reference.clone(),
                reason: format!("{text:?} does not match {}", regex.as_str()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn person() -> DataModel {
        DataModel::new("person")
            .property(1, PropertyDefinition::text("name").with_required())
            .unwrap()
            .property(
                2,
                PropertyDefinition::uint("age").with_range(Some(Value::UInt(0)), Some(Value::UInt(150))),
            )
            .unwrap()
            .property(
                3,
                PropertyDefinition::list("tags", PropertyDefinition::text("tag"))
                    .with_size(None, Some(2)),
            )
            .unwrap()
            .property(4, PropertyDefinition::text("code").with_regex("[A-Z]{3}").unwrap())
            .unwrap()
            .property(5, PropertyDefinition::enumeration("state", 2))
            .unwrap()
    }

    fn run(values: &Values) -> Vec<ValidationViolation> {
        let mut out = Vec::new();
        validate_values(&person(), values, None, &mut out);
        out
    }

    #[test]
    fn test_valid_values() {
        let values = Values::new().with(1, "Ann").with(2, 30u64).with(4, "ABC");
        assert!(run(&values).is_empty());
    }

    #[test]
    fn test_collects_every_violation() {
        let values = Values::new()
            .with(2, 200u64)
            .with(3, Value::List(vec!["a".into(), "b".into(), "c".into()]))
            .with(4, "abc")
            .with(5, Value::Enum(2));
        let violations = run(&values);
        assert_eq!(violations.len(), 5);
        assert!(violations.contains(&ValidationViolation::Required {
            reference: PropertyReference::property(1)
        }));
        assert!(violations
            .iter()
            .any(|v| matches!(v, ValidationViolation::OutOfRange { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, ValidationViolation::InvalidSize { size: 3, .. })));
    }

    #[test]
    fn test_wrong_kind() {
        let values = Values::new().with(1, 5i64);
        let violations = run(&values);
        assert_eq!(
            violations,
            vec![ValidationViolation::InvalidType {
                reference: PropertyReference::property(1),
                expected: "text".into(),
                actual: "int".into(),
            }]
        );
    }

    #[test]
    fn test_unknown_field() {
        let values = Values::new().with(1, "Ann").with(9, true);
        let violations = run(&values);
        assert!(matches!(
            &violations[..],
            [ValidationViolation::InvalidValue { reference, .. }] if *reference == PropertyReference::property(9)
        ));
    }

    #[test]
    fn test_nested_references() {
        let inner = DataModel::new("inner")
            .property(1, PropertyDefinition::int("n").with_required())
            .unwrap();
        let def = PropertyDefinition::map(
            "m",
            PropertyDefinition::text("k"),
            PropertyDefinition::embed("e", inner),
        );
        let mut entries = BTreeMap::new();
        entries.insert(Value::Text("x".into()), Value::Embed(Values::new()));
        let mut out = Vec::new();
        validate_value(&def, &Value::Map(entries), &PropertyReference::property(7), &mut out);
        assert_eq!(
            out,
            vec![ValidationViolation::Required {
                reference: PropertyReference::property(7).map_value("x").field(1)
            }]
        );
    }

    #[test]
    fn test_display() {
        let v = ValidationViolation::InvalidSize {
            reference: PropertyReference::property(3),
            size: 3,
            min: None,
            max: Some(2),
        };
        assert_eq!(v.to_string(), "3 size 3 is outside ..=2");
    }
}
