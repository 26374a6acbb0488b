//! Topology inputs and outputs

use serde_yaml::{Mapping, Value};

use super::property::PropertyValue;
use super::{check_fields, DESCRIPTION};
use crate::catalog::{TypeKind, TypeRegistry};
use crate::constraint::Constraint;
use crate::datatype::validate_datatype;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::schema::{Schema, PRIMITIVE_TYPES, SCHEMA_KEYS};
use crate::value::get_str;

const VALUE: &str = "value";
const OUTPUT_KEYS: &[&str] = &[DESCRIPTION, VALUE];

/// A declared topology input
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub name: String,
    pub schema: Schema,
}

impl Input {
    /// Parse an input definition, reporting unknown keys and unknown types
    pub fn build(name: &str, raw: &Value, registry: &TypeRegistry, diag: &mut Diagnostics) -> Result<Option<Self>> {
        let schema = match Schema::new(name, raw) {
            Ok(s) => s,
            Err(e) => {
                diag.report(e)?;
                return Ok(None);
            }
        };
        let mut allowed = SCHEMA_KEYS.to_vec();
        allowed.push("metadata");
        check_fields(schema.raw(), &allowed, &format!("Input \"{}\"", name), diag)?;

        let type_name = schema.type_name();
        if !PRIMITIVE_TYPES.contains(&type_name) && registry.lookup(TypeKind::Data, type_name).is_none() {
            diag.report(ToscaError::invalid_type(type_name))?;
            return Ok(None);
        }
        if let Err(e) = schema.constraints() {
            diag.report(e)?;
        }
        Ok(Some(Self { name: name.to_string(), schema }))
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn description(&self) -> Option<&str> {
        self.schema.description()
    }

    pub fn default(&self) -> Option<&Value> {
        self.schema.default()
    }

    pub fn required(&self) -> bool {
        self.schema.required()
    }

    pub fn constraints(&self) -> Result<&[Constraint]> {
        self.schema.constraints()
    }

    /// Validate a supplied or default value, returning it normalized
    pub fn validate(&self, value: &Value, registry: &TypeRegistry) -> Result<Value> {
        let normalized = validate_datatype(
            self.schema.type_name(),
            value,
            self.schema.entry_schema(),
            registry,
            Some(&self.name),
        )?;
        self.schema.validate_constraints(&normalized)?;
        Ok(normalized)
    }
}

/// A declared topology output
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub name: String,
    pub description: Option<String>,
    pub value: PropertyValue,
}

impl Output {
    pub fn build(name: &str, raw: &Value, diag: &mut Diagnostics) -> Result<Option<Self>> {
        let what = format!("Output \"{}\"", name);
        let Some(body) = raw.as_mapping() else {
            diag.report(ToscaError::mismatch(&what, "map"))?;
            return Ok(None);
        };
        check_fields(body, OUTPUT_KEYS, &what, diag)?;
        let Some(value) = body.get(VALUE) else {
            diag.report(ToscaError::missing(&what, VALUE))?;
            return Ok(None);
        };
        Ok(Some(Self {
            name: name.to_string(),
            description: get_str(body, DESCRIPTION).map(String::from),
            value: PropertyValue::parse(value, TemplateContext::Outputs),
        }))
    }
}

/// Parse `name=value` parameter pairs, YAML-decoding each value
pub fn parse_params<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Mapping> {
    let mut params = Mapping::new();
    for pair in pairs {
        let (name, raw) = pair.split_once('=').ok_or_else(|| {
            ToscaError::Validation(format!("Parameter \"{}\" must be of the form name=value.", pair))
        })?;
        let value = serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        params.insert(Value::from(name.trim()), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_input_accessors_and_validation() {
        let reg = TypeRegistry::normative().unwrap();
        let mut diag = Diagnostics::collecting();
        let input = Input::build(
            "cpus",
            &yaml("{type: integer, default: 4, description: cores, constraints: [{valid_values: [1, 2, 4, 8]}]}"),
            &reg,
            &mut diag,
        )
        .unwrap()
        .unwrap();
        assert!(diag.is_empty());
        assert_eq!(input.type_name(), "integer");
        assert_eq!(input.default(), Some(&Value::from(4)));
        assert_eq!(input.description(), Some("cores"));
        assert_eq!(input.constraints().unwrap().len(), 1);
        assert_eq!(input.validate(&Value::from("8"), &reg).unwrap(), Value::from(8));
        assert!(input.validate(&Value::from(3), &reg).is_err());
    }

    #[test]
    fn test_input_unknown_key_and_type() {
        let reg = TypeRegistry::normative().unwrap();
        let mut diag = Diagnostics::collecting();
        Input::build("a", &yaml("{type: string, defalt: x}"), &reg, &mut diag).unwrap();
        Input::build("b", &yaml("{type: strung}"), &reg, &mut diag).unwrap();
        assert_eq!(diag.of_kind("UnknownField").count(), 1);
        assert_eq!(diag.of_kind("InvalidType").count(), 1);
    }

    #[test]
    fn test_output_requires_value() {
        let mut diag = Diagnostics::collecting();
        assert!(Output::build("ip", &yaml("{description: address}"), &mut diag).unwrap().is_none());
        assert_eq!(diag.of_kind("MissingRequiredField").count(), 1);

        let out = Output::build("ip", &yaml("{value: {get_attribute: [server, private_address]}}"), &mut diag)
            .unwrap()
            .unwrap();
        assert!(out.value.is_function());
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(["cpus=8", "name=web server", "ports=[80, 443]"]).unwrap();
        assert_eq!(params.get("cpus"), Some(&Value::from(8)));
        assert_eq!(params.get("name"), Some(&Value::from("web server")));
        assert_eq!(params.get("ports"), Some(&yaml("[80, 443]")));
        assert!(parse_params(["oops"]).is_err());
    }
}
