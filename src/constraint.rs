//! Property constraints
//!
//! The constraint vocabulary is closed: every kind is a [`ConstraintKind`]
//! variant and [`Constraint::new`] is the single dispatch point from the
//! YAML key to the typed bound it carries.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_yaml::Value;

use crate::datatype::parse_timestamp;
use crate::error::{Result, ToscaError};
use crate::scalar_unit::{ScalarUnit, ScalarUnitKind};
use crate::schema::{FLOAT, INTEGER, LIST, MAP, NUMBER, STRING, TIMESTAMP};
use crate::value::{as_f64, as_i64, display, fmt_num, single_entry, values_equal};

const UNBOUNDED: &str = "UNBOUNDED";

const ORDERED_TYPES: &[&str] = &[
    INTEGER,
    FLOAT,
    NUMBER,
    TIMESTAMP,
    crate::scalar_unit::SCALAR_UNIT_SIZE,
    crate::scalar_unit::SCALAR_UNIT_TIME,
    crate::scalar_unit::SCALAR_UNIT_FREQUENCY,
];

const SIZED_TYPES: &[&str] = &[STRING, LIST, MAP];

// =============================================================================
// Constraint Kind
// =============================================================================

/// The closed set of constraint operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Equal,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    InRange,
    ValidValues,
    Length,
    MinLength,
    MaxLength,
    Pattern,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 11] = [
        Self::Equal,
        Self::GreaterThan,
        Self::GreaterOrEqual,
        Self::LessThan,
        Self::LessOrEqual,
        Self::InRange,
        Self::ValidValues,
        Self::Length,
        Self::MinLength,
        Self::MaxLength,
        Self::Pattern,
    ];

    /// YAML key of this constraint
    pub fn key(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::GreaterThan => "greater_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessThan => "less_than",
            Self::LessOrEqual => "less_or_equal",
            Self::InRange => "in_range",
            Self::ValidValues => "valid_values",
            Self::Length => "length",
            Self::MinLength => "min_length",
            Self::MaxLength => "max_length",
            Self::Pattern => "pattern",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.key() == key)
    }

    /// Property types this constraint may be applied to; `None` means any
    pub fn valid_prop_types(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Equal | Self::ValidValues => None,
            Self::GreaterThan
            | Self::GreaterOrEqual
            | Self::LessThan
            | Self::LessOrEqual
            | Self::InRange => Some(ORDERED_TYPES),
            Self::Length | Self::MinLength | Self::MaxLength => Some(SIZED_TYPES),
            Self::Pattern => Some(&[STRING]),
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// =============================================================================
// Ordinal values
// =============================================================================

/// A value that supports ordering comparisons
#[derive(Debug, Clone, Copy, PartialEq)]
enum Ordinal {
    Number(f64),
    Timestamp(DateTime<FixedOffset>),
}

impl PartialOrd for Ordinal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", fmt_num(*n)),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Convert a value to an ordinal under the given property type
fn to_ordinal(property_type: &str, value: &Value) -> Option<Ordinal> {
    if let Some(kind) = ScalarUnitKind::from_type_name(property_type) {
        return ScalarUnit::parse(kind, value)
            .ok()
            .map(|s| Ordinal::Number(s.normalized_num()));
    }
    if property_type == TIMESTAMP {
        return value.as_str().and_then(parse_timestamp).map(Ordinal::Timestamp);
    }
    as_f64(value).map(Ordinal::Number)
}

/// Normalize a value for equality comparison under the given property type
fn normalize(property_type: &str, value: &Value) -> Value {
    match ScalarUnitKind::from_type_name(property_type) {
        Some(kind) => ScalarUnit::parse(kind, value)
            .map(|s| Value::from(s.normalized_num()))
            .unwrap_or_else(|_| value.clone()),
        None => value.clone(),
    }
}

// =============================================================================
// Constraint
// =============================================================================

#[derive(Debug, Clone)]
enum Bound {
    Value(Value),
    Ordinal(Ordinal),
    Range { min: Ordinal, max: Option<Ordinal> },
    Set(Vec<Value>),
    Length(usize),
    Pattern(Regex),
}

/// A single constraint on a property value
#[derive(Debug, Clone)]
pub struct Constraint {
    kind: ConstraintKind,
    property_name: String,
    property_type: String,
    /// The comparison value as written in the schema
    raw: Value,
    bound: Bound,
}

impl Constraint {
    /// Build a constraint from a single-key mapping such as `{in_range: [1, 4]}`
    pub fn new(property_name: &str, property_type: &str, raw: &Value) -> Result<Self> {
        let (key, value) = single_entry(raw)
            .ok_or_else(|| ToscaError::InvalidSchema("Invalid constraint schema.".to_string()))?;
        let kind = ConstraintKind::from_key(key)
            .ok_or_else(|| ToscaError::InvalidSchema(format!("Invalid property \"{}\".", key)))?;

        if let Some(valid) = kind.valid_prop_types() {
            if !valid.contains(&property_type) {
                return Err(ToscaError::InvalidSchema(format!(
                    "Property \"{}\" is not valid for data type \"{}\".",
                    kind, property_type
                )));
            }
        }

        let expects = |what: &str| {
            ToscaError::InvalidSchema(format!(
                "The property \"{}\" expects {}.",
                property_name, what
            ))
        };

        let bound = match kind {
            ConstraintKind::Equal => Bound::Value(normalize(property_type, value)),
            ConstraintKind::GreaterThan
            | ConstraintKind::GreaterOrEqual
            | ConstraintKind::LessThan
            | ConstraintKind::LessOrEqual => Bound::Ordinal(
                to_ordinal(property_type, value).ok_or_else(|| expects("comparable values"))?,
            ),
            ConstraintKind::InRange => {
                let items = value
                    .as_sequence()
                    .filter(|s| s.len() == 2)
                    .ok_or_else(|| expects("a list of two values"))?;
                let min = to_ordinal(property_type, &items[0])
                    .ok_or_else(|| expects("comparable values"))?;
                let max = match &items[1] {
                    Value::String(s) if s == UNBOUNDED => None,
                    other => Some(
                        to_ordinal(property_type, other)
                            .ok_or_else(|| expects("comparable values"))?,
                    ),
                };
                if let Some(max) = max {
                    if min.partial_cmp(&max).map_or(true, |o| o == Ordering::Greater) {
                        return Err(expects("a range whose minimum does not exceed its maximum"));
                    }
                }
                Bound::Range { min, max }
            }
            ConstraintKind::ValidValues => {
                let items = value.as_sequence().ok_or_else(|| expects("a list"))?;
                Bound::Set(items.iter().map(|v| normalize(property_type, v)).collect())
            }
            ConstraintKind::Length | ConstraintKind::MinLength | ConstraintKind::MaxLength => {
                let n = as_i64(value)
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| expects("an integer"))?;
                Bound::Length(n as usize)
            }
            ConstraintKind::Pattern => {
                let pattern = value.as_str().ok_or_else(|| expects("a string"))?;
                let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    ToscaError::InvalidSchema(format!(
                        "The pattern \"{}\" of property \"{}\" is invalid: {}",
                        pattern, property_name, e
                    ))
                })?;
                Bound::Pattern(regex)
            }
        };

        Ok(Self {
            kind,
            property_name: property_name.to_string(),
            property_type: property_type.to_string(),
            raw: value.clone(),
            bound,
        })
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub fn property_type(&self) -> &str {
        &self.property_type
    }

    /// Comparison value as declared
    pub fn value(&self) -> &Value {
        &self.raw
    }

    /// Validate a candidate value
    pub fn validate(&self, value: &Value) -> Result<()> {
        if self.is_valid(value) {
            Ok(())
        } else {
            Err(ToscaError::Validation(self.message(value)))
        }
    }

    fn is_valid(&self, value: &Value) -> bool {
        let ordinal = || to_ordinal(&self.property_type, value);
        match (&self.bound, self.kind) {
            (Bound::Value(expected), _) => {
                values_equal(&normalize(&self.property_type, value), expected)
            }
            (Bound::Ordinal(bound), kind) => match ordinal().and_then(|v| v.partial_cmp(bound)) {
                Some(ord) => match kind {
                    ConstraintKind::GreaterThan => ord == Ordering::Greater,
                    ConstraintKind::GreaterOrEqual => ord != Ordering::Less,
                    ConstraintKind::LessThan => ord == Ordering::Less,
                    ConstraintKind::LessOrEqual => ord != Ordering::Greater,
                    _ => false,
                },
                None => false,
            },
            (Bound::Range { min, max }, _) => match ordinal() {
                Some(v) => {
                    let above_min = matches!(
                        v.partial_cmp(min),
                        Some(Ordering::Greater | Ordering::Equal)
                    );
                    let below_max = match max {
                        Some(max) => matches!(
                            v.partial_cmp(max),
                            Some(Ordering::Less | Ordering::Equal)
                        ),
                        None => true,
                    };
                    above_min && below_max
                }
                None => false,
            },
            (Bound::Set(allowed), _) => {
                let member = |v: &Value| {
                    let v = normalize(&self.property_type, v);
                    allowed.iter().any(|a| values_equal(a, &v))
                };
                match value {
                    Value::Sequence(items) => items.iter().all(member),
                    other => member(other),
                }
            }
            (Bound::Length(n), kind) => match length_of(value) {
                Some(len) => match kind {
                    ConstraintKind::Length => len == *n,
                    ConstraintKind::MinLength => len >= *n,
                    ConstraintKind::MaxLength => len <= *n,
                    _ => false,
                },
                None => false,
            },
            (Bound::Pattern(regex), _) => value.as_str().map(|s| regex.is_match(s)).unwrap_or(false),
        }
    }

    fn message(&self, value: &Value) -> String {
        let pvalue = display(value);
        let pname = &self.property_name;
        let cvalue = display(&self.raw);
        match self.kind {
            ConstraintKind::Equal => format!(
                "The value \"{}\" of property \"{}\" is not equal to \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::GreaterThan => format!(
                "The value \"{}\" of property \"{}\" must be greater than \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::GreaterOrEqual => format!(
                "The value \"{}\" of property \"{}\" must be greater than or equal to \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::LessThan => format!(
                "The value \"{}\" of property \"{}\" must be less than \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::LessOrEqual => format!(
                "The value \"{}\" of property \"{}\" must be less than or equal to \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::InRange => {
                let (min, max) = match &self.bound {
                    Bound::Range { min, max } => (
                        min.to_string(),
                        max.map(|m| m.to_string()).unwrap_or_else(|| UNBOUNDED.to_string()),
                    ),
                    _ => (String::new(), String::new()),
                };
                format!(
                    "The value \"{}\" of property \"{}\" is out of range \"(min:{}, max:{})\".",
                    pvalue, pname, min, max
                )
            }
            ConstraintKind::ValidValues => format!(
                "The value \"{}\" of property \"{}\" is not valid. Expected a value from \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::Length => format!(
                "Length of value \"{}\" of property \"{}\" must be equal to \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::MinLength => format!(
                "Length of value \"{}\" of property \"{}\" must be at least \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::MaxLength => format!(
                "Length of value \"{}\" of property \"{}\" must be no greater than \"{}\".",
                pvalue, pname, cvalue
            ),
            ConstraintKind::Pattern => format!(
                "The value \"{}\" of property \"{}\" does not match pattern \"{}\".",
                pvalue, pname, cvalue
            ),
        }
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Sequence(s) => Some(s.len()),
        Value::Mapping(m) => Some(m.len()),
        _ => None,
    }
}
