//! Property and input schemas

use std::cell::OnceCell;

use serde_yaml::{Mapping, Value};

use crate::constraint::Constraint;
use crate::error::{Result, ToscaError};
use crate::value::{get_str, unknown_keys};

pub const TYPE: &str = "type";
pub const REQUIRED: &str = "required";
pub const DESCRIPTION: &str = "description";
pub const DEFAULT: &str = "default";
pub const CONSTRAINTS: &str = "constraints";
pub const ENTRY_SCHEMA: &str = "entry_schema";
pub const STATUS: &str = "status";

/// Keys allowed in a property/input definition
pub const SCHEMA_KEYS: &[&str] = &[TYPE, REQUIRED, DESCRIPTION, DEFAULT, CONSTRAINTS, ENTRY_SCHEMA, STATUS];

// Primitive and collection type names
pub const INTEGER: &str = "integer";
pub const STRING: &str = "string";
pub const BOOLEAN: &str = "boolean";
pub const FLOAT: &str = "float";
pub const NUMBER: &str = "number";
pub const TIMESTAMP: &str = "timestamp";
pub const RANGE: &str = "range";
pub const LIST: &str = "list";
pub const MAP: &str = "map";
pub const VERSION: &str = "version";
pub const PORTDEF: &str = "PortDef";
pub const PORTSPEC: &str = "PortSpec";

/// Types validated without a datatype lookup
pub const PRIMITIVE_TYPES: &[&str] = &[
    INTEGER,
    STRING,
    BOOLEAN,
    FLOAT,
    NUMBER,
    TIMESTAMP,
    RANGE,
    LIST,
    MAP,
    VERSION,
    crate::scalar_unit::SCALAR_UNIT_SIZE,
    crate::scalar_unit::SCALAR_UNIT_TIME,
    crate::scalar_unit::SCALAR_UNIT_FREQUENCY,
];

/// Schema of a single property or input
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    raw: Mapping,
    type_name: String,
    constraints: OnceCell<Vec<Constraint>>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.raw == other.raw
    }
}

impl Schema {
    /// Build a schema from its raw definition
    pub fn new(name: impl Into<String>, raw: &Value) -> Result<Self> {
        let name = name.into();
        let raw = match raw {
            Value::Mapping(m) => m.clone(),
            // `entry_schema: string` shorthand
            Value::String(s) if name.ends_with(ENTRY_SCHEMA) => {
                let mut m = Mapping::new();
                m.insert(Value::from(TYPE), Value::from(s.clone()));
                m
            }
            _ => {
                return Err(ToscaError::InvalidSchema(format!(
                    "Schema definition of \"{}\" must be a dict.",
                    name
                )))
            }
        };
        let type_name = get_str(&raw, TYPE)
            .ok_or_else(|| {
                ToscaError::InvalidSchema(format!(
                    "Schema definition of \"{}\" must have a \"type\" attribute.",
                    name
                ))
            })?
            .to_string();

        Ok(Self {
            name,
            raw,
            type_name,
            constraints: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Defaults to `true` when absent
    pub fn required(&self) -> bool {
        self.raw.get(REQUIRED).and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn description(&self) -> Option<&str> {
        get_str(&self.raw, DESCRIPTION)
    }

    pub fn default(&self) -> Option<&Value> {
        self.raw.get(DEFAULT)
    }

    pub fn status(&self) -> Option<&str> {
        get_str(&self.raw, STATUS)
    }

    pub fn entry_schema(&self) -> Option<&Value> {
        self.raw.get(ENTRY_SCHEMA)
    }

    pub fn raw(&self) -> &Mapping {
        &self.raw
    }

    /// Keys not valid in a schema definition
    pub fn unknown_keys(&self) -> Vec<&str> {
        unknown_keys(&self.raw, SCHEMA_KEYS)
    }

    /// Constraints, constructed on first access
    pub fn constraints(&self) -> Result<&[Constraint]> {
        if let Some(built) = self.constraints.get() {
            return Ok(built);
        }
        let built = match self.raw.get(CONSTRAINTS) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|c| Constraint::new(&self.name, &self.type_name, c))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(ToscaError::InvalidSchema(format!(
                    "Constraints of \"{}\" must be a list.",
                    self.name
                )))
            }
        };
        Ok(self.constraints.get_or_init(|| built))
    }

    /// Check a value against every constraint of this schema
    pub fn validate_constraints(&self, value: &Value) -> Result<()> {
        for constraint in self.constraints()? {
            constraint.validate(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_schema_requires_type() {
        let err = Schema::new("cpus", &yaml("required: true")).unwrap_err();
        assert!(matches!(err, ToscaError::InvalidSchema(_)));
        assert!(err.to_string().contains("\"type\""));
    }

    #[test]
    fn test_schema_must_be_mapping() {
        let err = Schema::new("cpus", &yaml("[1, 2]")).unwrap_err();
        assert!(matches!(err, ToscaError::InvalidSchema(_)));
    }

    #[test]
    fn test_schema_defaults() {
        let schema = Schema::new("cpus", &yaml("type: integer\ndefault: 4")).unwrap();
        assert_eq!(schema.type_name(), "integer");
        assert!(schema.required());
        assert_eq!(schema.default(), Some(&Value::from(4)));
        assert!(schema.constraints().unwrap().is_empty());
    }

    #[test]
    fn test_schema_constraints_built_lazily() {
        let schema = Schema::new(
            "cpus",
            &yaml("type: integer\nconstraints:\n  - greater_or_equal: 1\n  - less_than: 64"),
        )
        .unwrap();
        assert_eq!(schema.constraints().unwrap().len(), 2);
        assert!(schema.validate_constraints(&Value::from(8)).is_ok());
        assert!(schema.validate_constraints(&Value::from(0)).is_err());
    }

    #[test]
    fn test_entry_schema_shorthand() {
        let schema = Schema::new("ports.entry_schema", &Value::from("integer")).unwrap();
        assert_eq!(schema.type_name(), "integer");
    }
}
