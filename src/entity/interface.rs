//! Interface operations declared on templates

use serde_yaml::{Mapping, Value};

use super::property::PropertyValue;
use super::{section, INTERFACES};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::value::{entries, get_map, get_str};

const IMPLEMENTATION: &str = "implementation";
const INPUTS: &str = "inputs";
const PRIMARY: &str = "primary";
const DEPENDENCIES: &str = "dependencies";

/// Keys inside an interface body that are not operations
const INTERFACE_KEYS: &[&str] = &["type", INPUTS, "description", "notifications"];
const OPERATION_KEYS: &[&str] = &[IMPLEMENTATION, INPUTS, "description", "outputs"];

/// One operation of an interface, as configured by a template
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceOperation {
    /// Interface name as declared on the type (e.g. `Standard`)
    pub interface: String,
    pub interface_type: Option<String>,
    pub name: String,
    pub implementation: Option<Value>,
    pub inputs: Vec<(String, PropertyValue)>,
    pub description: Option<String>,
}

impl InterfaceOperation {
    /// Primary artifact of the implementation (`create.sh` or `{primary: create.sh}`)
    pub fn primary_implementation(&self) -> Option<&str> {
        match self.implementation.as_ref()? {
            Value::String(s) => Some(s),
            Value::Mapping(m) => get_str(m, PRIMARY),
            _ => None,
        }
    }

    /// Primary plus dependency artifacts
    pub fn artifacts(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.primary_implementation().into_iter().collect();
        if let Some(Value::Mapping(m)) = &self.implementation {
            if let Some(Value::Sequence(deps)) = m.get(DEPENDENCIES) {
                out.extend(deps.iter().filter_map(Value::as_str));
            }
        }
        out
    }

    pub fn input(&self, name: &str) -> Option<&PropertyValue> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Build the interface operations configured by a template of `entity_type`
pub(crate) fn build_interfaces(
    template: &str,
    entity_type: &FlatType,
    tpl: &Mapping,
    context: TemplateContext,
    registry: &TypeRegistry,
    diag: &mut Diagnostics,
) -> Result<Vec<InterfaceOperation>> {
    let what = format!("\"interfaces\" of template \"{}\"", template);
    let Some(given) = section(tpl, INTERFACES, &format!("template \"{}\"", template), diag)? else {
        return Ok(Vec::new());
    };

    let mut operations = Vec::new();
    for (name, body) in entries(given) {
        let Some((declared, type_def)) = find_interface(entity_type, name, registry) else {
            diag.report(ToscaError::unknown(&what, name))?;
            continue;
        };
        let interface_type = type_def
            .as_ref()
            .map(|t| t.name.clone())
            .or_else(|| get_str(declared.1, "type").map(String::from));

        // Operations from the interface type plus any declared inline on the node type
        let mut known: Vec<&str> = type_def
            .as_ref()
            .map(|t| t.operations.iter().map(String::as_str).collect())
            .unwrap_or_default();
        known.extend(
            entries(declared.1)
                .map(|(k, _)| k)
                .filter(|k| !INTERFACE_KEYS.contains(k)),
        );

        let Some(body) = body.as_mapping() else {
            if !body.is_null() {
                diag.report(ToscaError::mismatch(format!("Interface \"{}\" of template \"{}\"", name, template), "map"))?;
            }
            continue;
        };
        let shared_inputs = get_map(body, INPUTS);

        for (op_name, op) in entries(body) {
            if INTERFACE_KEYS.contains(&op_name) {
                continue;
            }
            if type_def.is_some() && !known.contains(&op_name) {
                diag.report(ToscaError::unknown(&what, op_name))?;
                continue;
            }

            let mut operation = InterfaceOperation {
                interface: declared.0.to_string(),
                interface_type: interface_type.clone(),
                name: op_name.to_string(),
                implementation: None,
                inputs: Vec::new(),
                description: None,
            };
            let mut inputs: Vec<(&str, &Value)> = shared_inputs.map(|m| entries(m).collect()).unwrap_or_default();

            match op {
                Value::String(_) => operation.implementation = Some(op.clone()),
                Value::Mapping(m) => {
                    for (key, _) in entries(m) {
                        if !OPERATION_KEYS.contains(&key) {
                            diag.report(ToscaError::unknown(&what, key))?;
                        }
                    }
                    operation.implementation = m.get(IMPLEMENTATION).cloned();
                    operation.description = get_str(m, "description").map(String::from);
                    if let Some(own) = get_map(m, INPUTS) {
                        for (k, v) in entries(own) {
                            match inputs.iter_mut().find(|(n, _)| *n == k) {
                                Some(slot) => slot.1 = v,
                                None => inputs.push((k, v)),
                            }
                        }
                    }
                }
                Value::Null => {}
                _ => {
                    diag.report(ToscaError::mismatch(
                        format!("Operation \"{}\" of template \"{}\"", op_name, template),
                        "map",
                    ))?;
                    continue;
                }
            }

            operation.inputs = inputs
                .into_iter()
                .map(|(k, v)| (k.to_string(), PropertyValue::parse(v, context)))
                .collect();
            operations.push(operation);
        }
    }
    Ok(operations)
}

/// Interface declaration on the type, by name or by interface type
fn find_interface<'t>(
    entity_type: &'t FlatType,
    name: &str,
    registry: &TypeRegistry,
) -> Option<((&'t str, &'t Mapping), Option<std::sync::Arc<FlatType>>)> {
    let declared = entries(&entity_type.interfaces)
        .filter_map(|(k, v)| v.as_mapping().map(|m| (k, m)))
        .find(|(k, m)| {
            *k == name
                || get_str(m, "type")
                    .and_then(|t| registry.lookup(TypeKind::Interface, t))
                    .map(|t| t.name == name)
                    .unwrap_or(false)
        })?;
    let type_def = get_str(declared.1, "type").and_then(|t| registry.lookup(TypeKind::Interface, t));
    Some((declared, type_def))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(tpl: &str) -> (Vec<InterfaceOperation>, Diagnostics) {
        let reg = TypeRegistry::normative().unwrap();
        let server = reg.resolve(TypeKind::Node, "tosca.nodes.WebServer").unwrap();
        let tpl: Value = serde_yaml::from_str(tpl).unwrap();
        let mut diag = Diagnostics::collecting();
        let ops = build_interfaces("web", &server, tpl.as_mapping().unwrap(), TemplateContext::Node(1), &reg, &mut diag)
            .unwrap();
        (ops, diag)
    }

    #[test]
    fn test_operations_and_inputs() {
        let (ops, diag) = build(
            r#"
interfaces:
  Standard:
    inputs:
      port: 80
    create: scripts/install.sh
    configure:
      implementation:
        primary: scripts/configure.sh
        dependencies: [scripts/common.sh]
      inputs:
        port: {get_input: web_port}
        root: /var/www
"#,
        );
        assert!(diag.is_empty(), "{}", diag);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].primary_implementation(), Some("scripts/install.sh"));
        assert_eq!(ops[0].input("port").and_then(|v| v.as_value()), Some(&Value::from(80)));
        assert_eq!(ops[1].artifacts(), vec!["scripts/configure.sh", "scripts/common.sh"]);
        assert!(ops[1].input("port").unwrap().is_function());
        assert_eq!(ops[1].interface_type.as_deref(), Some("tosca.interfaces.node.lifecycle.Standard"));
    }

    #[test]
    fn test_full_interface_name_accepted() {
        let (ops, diag) = build("interfaces:\n  tosca.interfaces.node.lifecycle.Standard:\n    start: start.sh\n");
        assert!(diag.is_empty(), "{}", diag);
        assert_eq!(ops[0].interface, "Standard");
    }

    #[test]
    fn test_unknown_interface_and_operation() {
        let (_, diag) = build("interfaces:\n  Frobnicate:\n    go: x.sh\n  Standard:\n    explode: x.sh\n");
        assert_eq!(diag.of_kind("UnknownField").count(), 2);
    }
}
