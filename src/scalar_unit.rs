//! Scalar-unit types (`scalar-unit.size`, `scalar-unit.time`, `scalar-unit.frequency`)

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::Value;

use crate::error::{Result, ToscaError};
use crate::value::{display, fmt_num};

pub const SCALAR_UNIT_SIZE: &str = "scalar-unit.size";
pub const SCALAR_UNIT_TIME: &str = "scalar-unit.time";
pub const SCALAR_UNIT_FREQUENCY: &str = "scalar-unit.frequency";

const SIZE_UNITS: &[(&str, f64)] = &[
    ("B", 1.0),
    ("kB", 1_000.0),
    ("KiB", 1_024.0),
    ("MB", 1_000_000.0),
    ("MiB", 1_048_576.0),
    ("GB", 1_000_000_000.0),
    ("GiB", 1_073_741_824.0),
    ("TB", 1_000_000_000_000.0),
    ("TiB", 1_099_511_627_776.0),
];

const TIME_UNITS: &[(&str, f64)] = &[
    ("d", 86_400.0),
    ("h", 3_600.0),
    ("m", 60.0),
    ("s", 1.0),
    ("ms", 0.001),
    ("us", 0.000_001),
    ("ns", 0.000_000_001),
];

const FREQUENCY_UNITS: &[(&str, f64)] = &[
    ("Hz", 1.0),
    ("kHz", 1_000.0),
    ("MHz", 1_000_000.0),
    ("GHz", 1_000_000_000.0),
];

/// Which scalar-unit family a type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarUnitKind {
    Size,
    Time,
    Frequency,
}

impl ScalarUnitKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            SCALAR_UNIT_SIZE => Some(Self::Size),
            SCALAR_UNIT_TIME => Some(Self::Time),
            SCALAR_UNIT_FREQUENCY => Some(Self::Frequency),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Size => SCALAR_UNIT_SIZE,
            Self::Time => SCALAR_UNIT_TIME,
            Self::Frequency => SCALAR_UNIT_FREQUENCY,
        }
    }

    pub fn units(&self) -> &'static [(&'static str, f64)] {
        match self {
            Self::Size => SIZE_UNITS,
            Self::Time => TIME_UNITS,
            Self::Frequency => FREQUENCY_UNITS,
        }
    }

    /// Unit every value is normalized to before comparison
    pub fn default_unit(&self) -> &'static str {
        match self {
            Self::Size => "B",
            Self::Time => "ms",
            Self::Frequency => "GHz",
        }
    }

    /// Match a unit exactly, then case-insensitively
    fn canonical_unit(&self, unit: &str) -> Option<(&'static str, f64)> {
        let units = self.units();
        units
            .iter()
            .find(|(u, _)| *u == unit)
            .or_else(|| units.iter().find(|(u, _)| u.eq_ignore_ascii_case(unit)))
            .copied()
    }
}

fn scalar_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*([a-zA-Z]+)\s*$")
            .expect("scalar-unit pattern is valid")
    })
}

/// A parsed scalar-unit value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarUnit {
    pub kind: ScalarUnitKind,
    pub value: f64,
    pub unit: &'static str,
    factor: f64,
}

impl ScalarUnit {
    /// Parse `"<number> <unit>"`
    pub fn parse(kind: ScalarUnitKind, raw: &Value) -> Result<Self> {
        let text = raw.as_str().ok_or_else(|| {
            ToscaError::Validation(format!(
                "\"{}\" is not a valid scalar-unit.",
                display(raw)
            ))
        })?;
        let caps = scalar_regex().captures(text).ok_or_else(|| {
            ToscaError::Validation(format!("\"{}\" is not a valid scalar-unit.", text))
        })?;
        let value: f64 = caps[1].parse().map_err(|_| {
            ToscaError::Validation(format!("\"{}\" is not a valid scalar-unit.", text))
        })?;
        let (unit, factor) = kind.canonical_unit(&caps[2]).ok_or_else(|| {
            let valid: Vec<&str> = kind.units().iter().map(|(u, _)| *u).collect();
            ToscaError::Validation(format!(
                "The unit \"{}\" is not valid. Valid units are \"{}\".",
                &caps[2],
                valid.join(", ")
            ))
        })?;

        Ok(Self { kind, value, unit, factor })
    }

    /// Parse using a type name such as `scalar-unit.size`
    pub fn parse_typed(type_name: &str, raw: &Value) -> Result<Self> {
        let kind = ScalarUnitKind::from_type_name(type_name)
            .ok_or_else(|| ToscaError::invalid_type(type_name))?;
        Self::parse(kind, raw)
    }

    /// Numeric value expressed in `unit` (defaults to the family's base unit)
    pub fn num_in(&self, unit: Option<&str>) -> Result<f64> {
        let target = unit.unwrap_or_else(|| self.kind.default_unit());
        let (_, target_factor) = self.kind.canonical_unit(target).ok_or_else(|| {
            ToscaError::Validation(format!("The unit \"{}\" is not valid.", target))
        })?;
        Ok(self.value * self.factor / target_factor)
    }

    /// Value in the family's default unit
    pub fn normalized_num(&self) -> f64 {
        let (_, base) = self
            .kind
            .canonical_unit(self.kind.default_unit())
            .unwrap_or(("", 1.0));
        self.value * self.factor / base
    }

    /// Canonical `"<number> <unit>"` form with the unit's proper case
    pub fn normalized(&self) -> String {
        format!("{} {}", fmt_num(self.value), self.unit)
    }
}

impl fmt::Display for ScalarUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized())
    }
}
