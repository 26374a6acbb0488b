//! Property values and their schemas

use serde_yaml::{Mapping, Value};

use crate::catalog::TypeRegistry;
use crate::datatype::validate_datatype;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::{Function, TemplateContext};
use crate::schema::Schema;
use crate::value::entries;

/// A literal value or an intrinsic function awaiting resolution
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Value(Value),
    Function(Function),
}

impl PropertyValue {
    /// Wrap a raw value, recognising intrinsic functions
    pub fn parse(raw: &Value, context: TemplateContext) -> Self {
        match Function::parse(raw, context) {
            Some(f) => Self::Function(f),
            None => Self::Value(raw.clone()),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            Self::Value(_) => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// The value as written in the document
    pub fn raw(&self) -> &Value {
        match self {
            Self::Value(v) => v,
            Self::Function(f) => f.raw(),
        }
    }
}

/// A property of a template, tied to its schema
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
    pub schema: Schema,
}

impl Property {
    pub fn new(name: impl Into<String>, raw: &Value, schema: Schema, context: TemplateContext) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::parse(raw, context),
            schema,
        }
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn required(&self) -> bool {
        self.schema.required()
    }

    pub fn default(&self) -> Option<&Value> {
        self.schema.default()
    }

    /// Validate a literal value and replace it with its normalized form
    pub fn validate(&mut self, registry: &TypeRegistry) -> Result<()> {
        let PropertyValue::Value(raw) = &self.value else {
            return Ok(());
        };
        let normalized = validate_datatype(
            self.schema.type_name(),
            raw,
            self.schema.entry_schema(),
            registry,
            Some(&self.name),
        )?;
        if !crate::functions::is_function(&normalized) {
            self.schema.validate_constraints(&normalized)?;
        }
        self.value = PropertyValue::Value(normalized);
        Ok(())
    }
}

/// Build the properties of one template from a merged definition set.
///
/// Unknown names, missing required values and invalid values are reported;
/// properties without a value or default are omitted.
pub(crate) fn build_properties(
    what: &str,
    defs: &Mapping,
    given: Option<&Mapping>,
    context: TemplateContext,
    registry: &TypeRegistry,
    diag: &mut Diagnostics,
) -> Result<Vec<Property>> {
    let empty = Mapping::new();
    let given = given.unwrap_or(&empty);

    for (key, _) in entries(given) {
        if !defs.contains_key(key) {
            diag.report(ToscaError::unknown(what, key))?;
        }
    }

    let mut properties = Vec::with_capacity(defs.len());
    let mut missing = Vec::new();
    for (name, raw) in entries(defs) {
        let schema = match Schema::new(name, raw) {
            Ok(s) => s,
            Err(e) => {
                diag.report(e)?;
                continue;
            }
        };
        let value = match given.get(name).filter(|v| !v.is_null()) {
            Some(v) => v.clone(),
            None => match schema.default() {
                Some(d) => d.clone(),
                None => {
                    if schema.required() {
                        missing.push(name);
                    }
                    continue;
                }
            },
        };
        let mut property = Property::new(name, &value, schema, context);
        if let Err(e) = property.validate(registry) {
            diag.report(e)?;
        }
        properties.push(property);
    }

    if !missing.is_empty() {
        diag.report(ToscaError::missing(what, missing.join(", ")))?;
    }
    Ok(properties)
}
