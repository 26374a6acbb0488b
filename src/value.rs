//! Helpers over parsed YAML values

use serde_yaml::{Mapping, Value};

/// Convert a bare numeral string to an integer if it parses as one, else a float
pub fn str_to_num(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::from)
}

/// Numeric view of a value (numbers and numeral strings)
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => str_to_num(s).and_then(|v| v.as_f64()),
        _ => None,
    }
}

/// Integer view of a value; booleans are not integers
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Equality that treats `4` and `4.0` as equal
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Sequence(x), Value::Sequence(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        _ => a == b,
    }
}

/// Format a float without a trailing `.0` when it is integral
pub fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Human readable rendering of a value for error messages
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(t) => display(&t.value),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Short name of a value's YAML kind
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged",
    }
}

/// Look up a string key in a mapping
pub fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key)
}

/// Look up a string-valued key in a mapping
pub fn get_str<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Look up a mapping-valued key in a mapping
pub fn get_map<'a>(map: &'a Mapping, key: &str) -> Option<&'a Mapping> {
    map.get(key).and_then(Value::as_mapping)
}

/// Iterate over entries with string keys, in document order
pub fn entries(map: &Mapping) -> impl Iterator<Item = (&str, &Value)> {
    map.iter().filter_map(|(k, v)| k.as_str().map(|k| (k, v)))
}

/// Keys of a mapping that are not in `allowed`
pub fn unknown_keys<'a>(map: &'a Mapping, allowed: &[&str]) -> Vec<&'a str> {
    entries(map)
        .map(|(k, _)| k)
        .filter(|k| !allowed.contains(k))
        .collect()
}

/// Split a single-key mapping (`- name: {...}`) into its key and value
pub fn single_entry(value: &Value) -> Option<(&str, &Value)> {
    let map = value.as_mapping()?;
    if map.len() != 1 {
        return None;
    }
    entries(map).next()
}

/// Whether a string looks like an absolute URL
pub fn is_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https" | "ftp" | "file"))
        .unwrap_or(false)
}
