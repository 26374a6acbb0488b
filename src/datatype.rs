//! Data values validated against primitive and user-defined data types

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::catalog::{TypeKind, TypeRegistry};
use crate::constraint::Constraint;
use crate::error::{Result, ToscaError};
use crate::functions::is_function;
use crate::scalar_unit::{ScalarUnit, ScalarUnitKind};
use crate::schema::{
    Schema, BOOLEAN, ENTRY_SCHEMA, FLOAT, INTEGER, LIST, MAP, NUMBER, RANGE, STRING, TIMESTAMP,
    VERSION,
};
use crate::value::{display, entries, str_to_num};

/// Upper bound marker accepted in ranges
pub const UNBOUNDED: &str = "UNBOUNDED";

/// Parse the YAML timestamp forms: RFC 3339, `YYYY-MM-DD`, and
/// `YYYY-MM-DD HH:MM:SS[.f][ ][Z|±hh:mm]`. Naive times are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }

    let normalized = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(rest) => format!("{}+00:00", rest.trim_end()),
        None => s.to_string(),
    };
    let normalized = normalized.replacen('t', "T", 1);

    const ZONED: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f %#z",
    ];
    for fmt in ZONED {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt);
        }
    }

    let utc = FixedOffset::east_opt(0)?;
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(utc.from_utc_datetime(&naive));
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+(\.\d+)?(\.\w+)?(-\d+)?$").expect("version pattern is valid")
    })
}

fn invalid(value: &Value, what: &str) -> ToscaError {
    ToscaError::Validation(format!("\"{}\" is not {}.", display(value), what))
}

pub fn validate_string(value: &Value) -> Result<Value> {
    match value {
        Value::String(_) => Ok(value.clone()),
        _ => Err(invalid(value, "a string")),
    }
}

/// Integers and integral numeral strings; booleans are rejected
pub fn validate_integer(value: &Value) -> Result<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(value, "an integer")),
        _ => Err(invalid(value, "an integer")),
    }
}

/// Floats, integers, and numeral strings
pub fn validate_float(value: &Value) -> Result<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => str_to_num(s)
            .and_then(|v| v.as_f64())
            .map(Value::from)
            .ok_or_else(|| invalid(value, "a float")),
        _ => Err(invalid(value, "a float")),
    }
}

pub fn validate_number(value: &Value) -> Result<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => str_to_num(s).ok_or_else(|| invalid(value, "a numeric")),
        _ => Err(invalid(value, "a numeric")),
    }
}

pub fn validate_boolean(value: &Value) -> Result<Value> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        _ => Err(invalid(value, "a boolean")),
    }
}

pub fn validate_timestamp(value: &Value) -> Result<Value> {
    match value.as_str().and_then(parse_timestamp) {
        Some(_) => Ok(value.clone()),
        None => Err(invalid(value, "a valid timestamp")),
    }
}

pub fn validate_list(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Sequence(items) => Ok(items),
        _ => Err(invalid(value, "a list")),
    }
}

pub fn validate_map(value: &Value) -> Result<&Mapping> {
    match value {
        Value::Mapping(m) => Ok(m),
        _ => Err(invalid(value, "a map")),
    }
}

/// `[min, max]` with integer bounds; `max` may be `UNBOUNDED`
pub fn validate_range(value: &Value) -> Result<Value> {
    let items = validate_list(value)?;
    if items.len() != 2 {
        return Err(ToscaError::Validation(format!(
            "\"{}\" is invalid. Range must be a list of two values.",
            display(value)
        )));
    }
    let bound = |v: &Value| -> Result<Option<i64>> {
        match v {
            Value::String(s) if s == UNBOUNDED => Ok(None),
            other => validate_integer(other)?
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(other, "an integer")),
        }
    };
    let min = bound(&items[0])?.ok_or_else(|| {
        ToscaError::Validation(format!(
            "\"{}\" is invalid. The minimum of a range cannot be \"{}\".",
            display(value),
            UNBOUNDED
        ))
    })?;
    if let Some(max) = bound(&items[1])? {
        if min > max {
            return Err(ToscaError::Validation(format!(
                "\"{}\" is invalid. The minimum \"{}\" must not exceed the maximum \"{}\".",
                display(value),
                min,
                max
            )));
        }
    }
    Ok(value.clone())
}

/// TOSCA version strings such as `1.0`, `2.1.3.beta-4`
pub fn validate_version(value: &Value) -> Result<Value> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if version_regex().is_match(&text) {
        Ok(Value::from(text))
    } else {
        Err(ToscaError::Validation(format!(
            "Value of TOSCA version property \"{}\" is invalid.",
            display(value)
        )))
    }
}

/// Validate a value against a type name, returning its normalized form.
///
/// Values that are intrinsic functions are returned untouched; they are
/// checked by the function pass instead.
pub fn validate_datatype(
    type_name: &str,
    value: &Value,
    entry_schema: Option<&Value>,
    registry: &TypeRegistry,
    prop_name: Option<&str>,
) -> Result<Value> {
    if is_function(value) {
        return Ok(value.clone());
    }
    match type_name {
        STRING => validate_string(value),
        INTEGER => validate_integer(value),
        FLOAT => validate_float(value),
        NUMBER => validate_number(value),
        BOOLEAN => validate_boolean(value),
        TIMESTAMP => validate_timestamp(value),
        RANGE => validate_range(value),
        VERSION => validate_version(value),
        LIST => {
            let items = validate_list(value)?;
            match entry_schema {
                Some(schema) => items
                    .iter()
                    .map(|item| validate_entry(item, schema, registry))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Sequence),
                None => Ok(value.clone()),
            }
        }
        MAP => {
            let map = validate_map(value)?;
            match entry_schema {
                Some(schema) => {
                    let mut out = Mapping::with_capacity(map.len());
                    for (k, v) in map {
                        out.insert(k.clone(), validate_entry(v, schema, registry)?);
                    }
                    Ok(Value::Mapping(out))
                }
                None => Ok(value.clone()),
            }
        }
        other => match ScalarUnitKind::from_type_name(other) {
            Some(kind) => ScalarUnit::parse(kind, value).map(|s| Value::from(s.normalized())),
            None => DataEntity::new(other, value.clone(), prop_name).validate(registry),
        },
    }
}

/// Validate one list element or map value against an `entry_schema`
pub fn validate_entry(value: &Value, entry_schema: &Value, registry: &TypeRegistry) -> Result<Value> {
    let schema = Schema::new(ENTRY_SCHEMA, entry_schema)?;
    let normalized = validate_datatype(
        schema.type_name(),
        value,
        schema.entry_schema(),
        registry,
        None,
    )?;
    if !is_function(&normalized) {
        schema.validate_constraints(&normalized)?;
    }
    Ok(normalized)
}

/// A candidate value for a named data type
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntity {
    pub datatype_name: String,
    pub value: Value,
    pub prop_name: Option<String>,
}

impl DataEntity {
    pub fn new(datatype_name: impl Into<String>, value: Value, prop_name: Option<&str>) -> Self {
        Self {
            datatype_name: datatype_name.into(),
            value,
            prop_name: prop_name.map(String::from),
        }
    }

    /// Validate and normalize the value; absent optional fields get their defaults
    pub fn validate(&self, registry: &TypeRegistry) -> Result<Value> {
        let datatype = registry.resolve(TypeKind::Data, &self.datatype_name)?;

        // Constrained alias over another type
        if let Some(value_type) = &datatype.value_type {
            let normalized = validate_datatype(
                value_type,
                &self.value,
                datatype.raw.get(ENTRY_SCHEMA),
                registry,
                self.prop_name.as_deref(),
            )?;
            if !is_function(&normalized) {
                let name = self.prop_name.as_deref().unwrap_or(&datatype.name);
                for raw in &datatype.constraints {
                    Constraint::new(name, value_type, raw)?.validate(&normalized)?;
                }
            }
            return Ok(normalized);
        }

        if is_function(&self.value) {
            return Ok(self.value.clone());
        }
        let Value::Mapping(given) = &self.value else {
            return Err(ToscaError::mismatch(
                format!("\"{}\"", display(&self.value)),
                &datatype.name,
            ));
        };

        let what = format!("Data value of type \"{}\"", datatype.name);
        for (key, _) in entries(given) {
            if !datatype.properties.contains_key(key) {
                return Err(ToscaError::unknown(&what, key));
            }
        }

        let mut result = given.clone();
        let mut schemas = Vec::with_capacity(datatype.properties.len());
        let mut missing = Vec::new();
        for (name, raw) in entries(&datatype.properties) {
            let schema = Schema::new(name, raw)?;
            if !result.contains_key(name) {
                match schema.default() {
                    Some(default) => {
                        result.insert(Value::from(name), default.clone());
                    }
                    None if schema.required() => missing.push(name),
                    None => {}
                }
            }
            schemas.push(schema);
        }
        if !missing.is_empty() {
            return Err(ToscaError::missing(&what, missing.join(", ")));
        }

        for schema in &schemas {
            let Some(field) = result.get(schema.name()) else {
                continue;
            };
            let normalized = validate_datatype(
                schema.type_name(),
                field,
                schema.entry_schema(),
                registry,
                Some(schema.name()),
            )?;
            if !is_function(&normalized) {
                schema.validate_constraints(&normalized)?;
            }
            result.insert(Value::from(schema.name()), normalized);
        }

        Ok(Value::Mapping(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CustomDefinitions, TypeCatalog};

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn registry(src: &str) -> TypeRegistry {
        let doc = yaml(src);
        let custom = CustomDefinitions::from_document(doc.as_mapping().unwrap(), None);
        TypeRegistry::new(TypeCatalog::normative().unwrap(), custom)
    }

    const CONTACT: &str = r#"
data_types:
  my.datatypes.Contact:
    derived_from: tosca.datatypes.Root
    properties:
      name:
        type: string
      email:
        type: string
        required: false
      priority:
        type: integer
        default: 3
        constraints:
          - in_range: [1, 5]
      tags:
        type: list
        required: false
        entry_schema:
          type: string
  my.datatypes.Team:
    derived_from: tosca.datatypes.Root
    properties:
      lead:
        type: my.datatypes.Contact
  my.datatypes.Percent:
    derived_from: tosca.datatypes.Root
    type: integer
    constraints:
      - in_range: [0, 100]
"#;

    #[test]
    fn test_timestamps() {
        assert!(parse_timestamp("2001-12-14t21:59:43.10-05:00").is_some());
        assert!(parse_timestamp("2001-12-14 21:59:43.10 -05:00").is_some());
        assert!(parse_timestamp("2001-12-15 2:59:43.10").is_some());
        assert!(parse_timestamp("2002-12-14").is_some());
        assert!(parse_timestamp("2020-01-01T00:00:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_primitives() {
        assert_eq!(validate_integer(&Value::from("8")).unwrap(), Value::from(8));
        assert!(validate_integer(&Value::from(true)).is_err());
        assert!(validate_integer(&Value::from(1.5)).is_err());
        assert!(validate_float(&Value::from(2)).is_ok());
        assert_eq!(validate_boolean(&Value::from("True")).unwrap(), Value::Bool(true));
        assert!(validate_string(&Value::from(1)).is_err());
        assert_eq!(validate_version(&yaml("1.0")).unwrap(), Value::from("1.0"));
        assert!(validate_version(&Value::from("one")).is_err());
    }

    #[test]
    fn test_ranges() {
        assert!(validate_range(&yaml("[1, 10]")).is_ok());
        assert!(validate_range(&yaml("[1, UNBOUNDED]")).is_ok());
        assert!(validate_range(&yaml("[10, 1]")).is_err());
        assert!(validate_range(&yaml("[UNBOUNDED, 1]")).is_err());
        assert!(validate_range(&yaml("[1]")).is_err());
    }

    #[test]
    fn test_list_entry_schema() {
        let reg = registry("{}");
        let v = validate_datatype(LIST, &yaml("['1', 2]"), Some(&yaml("integer")), &reg, None).unwrap();
        assert_eq!(v, yaml("[1, 2]"));
        assert!(validate_datatype(LIST, &yaml("[a]"), Some(&yaml("integer")), &reg, None).is_err());
        assert!(validate_datatype(LIST, &yaml("{a: 1}"), None, &reg, None).is_err());
    }

    #[test]
    fn test_scalar_unit_normalized() {
        let reg = registry("{}");
        let v = validate_datatype("scalar-unit.size", &Value::from("4gb"), None, &reg, None).unwrap();
        assert_eq!(v, Value::from("4 GB"));
    }

    #[test]
    fn test_record_defaults_and_required() {
        let reg = registry(CONTACT);
        let entity = DataEntity::new("my.datatypes.Contact", yaml("{name: ops}"), None);
        let v = entity.validate(&reg).unwrap();
        assert_eq!(v, yaml("{name: ops, priority: 3}"));

        let err = DataEntity::new("my.datatypes.Contact", yaml("{email: a@b}"), None)
            .validate(&reg)
            .unwrap_err();
        assert!(matches!(err, ToscaError::MissingRequiredField { ref required, .. } if required == "name"));

        let err = DataEntity::new("my.datatypes.Contact", yaml("{name: a, phone: 1}"), None)
            .validate(&reg)
            .unwrap_err();
        assert!(matches!(err, ToscaError::UnknownField { ref field, .. } if field == "phone"));
    }

    #[test]
    fn test_record_must_be_mapping() {
        let reg = registry(CONTACT);
        let err = DataEntity::new("my.datatypes.Contact", yaml("[1]"), None)
            .validate(&reg)
            .unwrap_err();
        assert!(matches!(err, ToscaError::TypeMismatch { .. }));
    }

    #[test]
    fn test_nested_record_and_constraints() {
        let reg = registry(CONTACT);
        let v = DataEntity::new("my.datatypes.Team", yaml("{lead: {name: x}}"), None)
            .validate(&reg)
            .unwrap();
        assert_eq!(v, yaml("{lead: {name: x, priority: 3}}"));

        let err = DataEntity::new("my.datatypes.Team", yaml("{lead: {name: x, priority: 9}}"), None)
            .validate(&reg)
            .unwrap_err();
        assert!(matches!(err, ToscaError::Validation(_)));
    }

    #[test]
    fn test_alias_type_constraints() {
        let reg = registry(CONTACT);
        assert!(DataEntity::new("my.datatypes.Percent", Value::from(50), None).validate(&reg).is_ok());
        assert!(DataEntity::new("my.datatypes.Percent", Value::from(150), None).validate(&reg).is_err());
        assert!(DataEntity::new("PortDef", Value::from(70000), None).validate(&reg).is_err());
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let reg = registry(CONTACT);
        let once = DataEntity::new("my.datatypes.Team", yaml("{lead: {name: x, tags: [a]}}"), None)
            .validate(&reg)
            .unwrap();
        let twice = DataEntity::new("my.datatypes.Team", once.clone(), None)
            .validate(&reg)
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_functions_are_skipped() {
        let reg = registry(CONTACT);
        let v = yaml("{name: {get_input: who}}");
        assert_eq!(
            DataEntity::new("my.datatypes.Contact", v, None).validate(&reg).unwrap(),
            yaml("{name: {get_input: who}, priority: 3}")
        );
    }

    #[test]
    fn test_unknown_datatype() {
        let reg = registry("{}");
        let err = validate_datatype("no.such.Type", &Value::from(1), None, &reg, None).unwrap_err();
        assert!(matches!(err, ToscaError::InvalidType { .. }));
    }
}
