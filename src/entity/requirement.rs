//! Requirement entries of node templates

use serde_yaml::{Mapping, Value};

use super::{check_fields, INTERFACES, NODE_FILTER, PROPERTIES, REQUIREMENTS, TYPE};
use crate::datatype::UNBOUNDED;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::value::{display, get_str, single_entry};

const NODE: &str = "node";
const CAPABILITY: &str = "capability";
const RELATIONSHIP: &str = "relationship";
const OCCURRENCES: &str = "occurrences";

const REQUIREMENT_KEYS: &[&str] = &[NODE, CAPABILITY, RELATIONSHIP, NODE_FILTER, OCCURRENCES];
const RELATIONSHIP_KEYS: &[&str] = &[TYPE, PROPERTIES, INTERFACES];

/// How a requirement names its relationship
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipSpec {
    /// A relationship template or relationship type name
    Named(String),
    /// `{type, properties, interfaces}` declared in place
    Inline(Mapping),
}

impl RelationshipSpec {
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Named(n) => Some(n),
            Self::Inline(m) => get_str(m, TYPE),
        }
    }
}

/// One entry of a node template's `requirements` list
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub name: String,
    /// Target node template (or node type) name
    pub node: Option<String>,
    pub capability: Option<String>,
    pub relationship: Option<RelationshipSpec>,
    pub node_filter: Option<Value>,
    /// Lower and upper bound; `None` upper bound is unbounded
    pub occurrences: Option<(u64, Option<u64>)>,
}

impl Requirement {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            node: None,
            capability: None,
            relationship: None,
            node_filter: None,
            occurrences: None,
        }
    }
}

/// Parse the `requirements` section of a node template
pub(crate) fn parse_requirements(template: &str, tpl: &Mapping, diag: &mut Diagnostics) -> Result<Vec<Requirement>> {
    let what = format!("\"requirements\" of template \"{}\"", template);
    let items = match tpl.get(REQUIREMENTS) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(items)) => items,
        Some(_) => {
            diag.report(ToscaError::mismatch(&what, "list"))?;
            return Ok(Vec::new());
        }
    };

    let mut requirements = Vec::with_capacity(items.len());
    for item in items {
        let Some((name, body)) = single_entry(item) else {
            diag.report(ToscaError::mismatch(&what, "list of single-entry maps"))?;
            continue;
        };
        let mut req = Requirement::named(name);
        match body {
            Value::String(node) => req.node = Some(node.clone()),
            Value::Mapping(m) => {
                check_fields(m, REQUIREMENT_KEYS, &what, diag)?;
                req.node = get_str(m, NODE).map(String::from);
                req.capability = get_str(m, CAPABILITY).map(String::from);
                req.node_filter = m.get(NODE_FILTER).cloned();
                req.relationship = match m.get(RELATIONSHIP) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(RelationshipSpec::Named(s.clone())),
                    Some(Value::Mapping(rel)) => {
                        check_fields(rel, RELATIONSHIP_KEYS, &what, diag)?;
                        if get_str(rel, TYPE).is_none() {
                            diag.report(ToscaError::missing(
                                format!("\"relationship\" used in template \"{}\"", template),
                                TYPE,
                            ))?;
                        }
                        Some(RelationshipSpec::Inline(rel.clone()))
                    }
                    Some(other) => {
                        diag.report(ToscaError::mismatch(
                            format!("\"relationship\" of requirement \"{}\" ({})", name, display(other)),
                            "string or map",
                        ))?;
                        None
                    }
                };
                if let Some(occurrences) = m.get(OCCURRENCES) {
                    match parse_occurrences(occurrences) {
                        Ok(o) => req.occurrences = Some(o),
                        Err(e) => diag.report(e)?,
                    }
                }
            }
            Value::Null => {}
            other => {
                diag.report(ToscaError::mismatch(
                    format!("Requirement \"{}\" ({}) of template \"{}\"", name, display(other), template),
                    "string or map",
                ))?;
                continue;
            }
        }
        requirements.push(req);
    }
    Ok(requirements)
}

/// `[min, max]`: non-negative integers, `min <= max`, `max != 0`
pub fn parse_occurrences(value: &Value) -> Result<(u64, Option<u64>)> {
    let invalid = || ToscaError::InvalidPropertyValue { what: display(value) };
    let Some([min, max]) = value.as_sequence().map(Vec::as_slice).and_then(|s| <&[Value; 2]>::try_from(s).ok()) else {
        return Err(invalid());
    };
    let min = min.as_u64().ok_or_else(invalid)?;
    let max = match max {
        Value::String(s) if s == UNBOUNDED => None,
        other => Some(other.as_u64().ok_or_else(invalid)?),
    };
    match max {
        Some(0) => Err(invalid()),
        Some(max) if min > max => Err(invalid()),
        _ => Ok((min, max)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Vec<Requirement>, Diagnostics) {
        let tpl: Value = serde_yaml::from_str(src).unwrap();
        let mut diag = Diagnostics::collecting();
        let reqs = parse_requirements("app", tpl.as_mapping().unwrap(), &mut diag).unwrap();
        (reqs, diag)
    }

    #[test]
    fn test_shorthand_and_full_forms() {
        let (reqs, diag) = parse(
            r#"
requirements:
  - host: server
  - database:
      node: db
      capability: tosca.capabilities.Endpoint.Database
      relationship: my_connection
  - storage:
      node: volume
      relationship:
        type: tosca.relationships.AttachesTo
        properties:
          location: /data
"#,
        );
        assert!(diag.is_empty(), "{}", diag);
        assert_eq!(reqs[0].node.as_deref(), Some("server"));
        assert_eq!(reqs[1].relationship, Some(RelationshipSpec::Named("my_connection".into())));
        assert_eq!(reqs[2].relationship.as_ref().and_then(|r| r.type_name()), Some("tosca.relationships.AttachesTo"));
    }

    #[test]
    fn test_requirements_must_be_list() {
        let (_, diag) = parse("requirements:\n  host: server\n");
        assert_eq!(diag.of_kind("TypeMismatch").count(), 1);
    }

    #[test]
    fn test_unknown_requirement_key() {
        let (_, diag) = parse("requirements:\n  - host:\n      node: server\n      nodes: other\n");
        assert_eq!(diag.of_kind("UnknownField").count(), 1);
    }

    #[test]
    fn test_occurrences() {
        let yaml = |s: &str| serde_yaml::from_str::<Value>(s).unwrap();
        assert_eq!(parse_occurrences(&yaml("[1, 2]")).unwrap(), (1, Some(2)));
        assert_eq!(parse_occurrences(&yaml("[0, UNBOUNDED]")).unwrap(), (0, None));
        assert!(parse_occurrences(&yaml("[2, 1]")).is_err());
        assert!(parse_occurrences(&yaml("[0, 0]")).is_err());
        assert!(parse_occurrences(&yaml("[-1, 1]")).is_err());
        assert!(parse_occurrences(&yaml("[1]")).is_err());

        let (_, diag) = parse("requirements:\n  - host:\n      node: server\n      occurrences: [3, 1]\n");
        assert_eq!(diag.of_kind("InvalidPropertyValueError").count(), 1);
    }
}
