//! Substitution mappings: exposing a topology as a node type

use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use super::{check_fields, Input, NodeTemplate, Output, CAPABILITIES, PROPERTIES, REQUIREMENTS};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::value::{display, entries, get_str};

const NODE_TYPE: &str = "node_type";
const SECTIONS: &[&str] = &[NODE_TYPE, REQUIREMENTS, CAPABILITIES, PROPERTIES, "attributes", "interfaces"];

#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionMappings {
    pub node_type: String,
    pub type_def: Arc<FlatType>,
    /// Exposed capability name to `[template, capability]`
    pub capabilities: Vec<(String, Value)>,
    /// Exposed requirement name to `[template, requirement]`
    pub requirements: Vec<(String, Value)>,
    pub raw: Mapping,
}

impl SubstitutionMappings {
    pub fn build(raw: &Value, registry: &TypeRegistry, diag: &mut Diagnostics) -> Result<Option<Self>> {
        let Some(tpl) = raw.as_mapping() else {
            diag.report(ToscaError::mismatch("SubstitutionMappings", "map"))?;
            return Ok(None);
        };
        check_fields(tpl, SECTIONS, "SubstitutionMappings", diag)?;

        let Some(node_type) = get_str(tpl, NODE_TYPE) else {
            diag.report(ToscaError::missing("SubstitutionMappings used in topology template", NODE_TYPE))?;
            return Ok(None);
        };
        let Some(type_def) = registry.lookup(TypeKind::Node, node_type) else {
            diag.report(ToscaError::InvalidNodeType { what: node_type.to_string() })?;
            return Ok(None);
        };

        let pairs = |key: &str| -> Vec<(String, Value)> {
            tpl.get(key)
                .and_then(Value::as_mapping)
                .map(|m| entries(m).map(|(k, v)| (k.to_string(), v.clone())).collect())
                .unwrap_or_default()
        };

        Ok(Some(Self {
            node_type: type_def.name.clone(),
            capabilities: pairs(CAPABILITIES),
            requirements: pairs(REQUIREMENTS),
            type_def,
            raw: tpl.clone(),
        }))
    }

    /// Check the mappings against the topology they expose
    pub fn validate(
        &self,
        inputs: &[Input],
        nodes: &[NodeTemplate],
        outputs: &[Output],
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let what = format!("SubstitutionMappings with node_type \"{}\"", self.node_type);

        // Required node type properties must be settable through inputs
        for (name, def) in entries(&self.type_def.properties) {
            let required = def.get("required").and_then(Value::as_bool).unwrap_or(true);
            if required && def.get("default").is_none() && !inputs.iter().any(|i| i.name == name) {
                diag.report(ToscaError::missing(&what, name))?;
            }
        }
        // Inputs with no matching property need a default
        for input in inputs {
            if !self.type_def.properties.contains_key(input.name.as_str()) && input.default().is_none() {
                diag.report(ToscaError::unknown(&what, &input.name))?;
            }
        }

        for (name, target) in &self.capabilities {
            if self.type_def.capability_def(name).is_none() {
                diag.report(ToscaError::unknown(&what, name))?;
                continue;
            }
            self.check_mapped(target, nodes, |node, cap| node.capability(cap).is_some(), &what, diag)?;
        }
        for (name, target) in &self.requirements {
            if self.type_def.requirement_def(name).is_none() {
                diag.report(ToscaError::unknown(&what, name))?;
                continue;
            }
            self.check_mapped(
                target,
                nodes,
                |node, req| node.requirements.iter().any(|r| r.name == req) || node.requirement_definition(req).is_some(),
                &what,
                diag,
            )?;
        }

        // Outputs become attributes of the substituted node
        for output in outputs {
            if self.type_def.attribute_def(&output.name).is_none() {
                diag.report(ToscaError::UnknownOutput { what: output.name.clone() })?;
            }
        }
        Ok(())
    }

    /// `[template, name]` must name a node template and one of its members
    fn check_mapped(
        &self,
        target: &Value,
        nodes: &[NodeTemplate],
        has_member: impl Fn(&NodeTemplate, &str) -> bool,
        what: &str,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let pair: Vec<&str> = target
            .as_sequence()
            .map(|s| s.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let [template, member] = pair.as_slice() else {
            return diag.report(ToscaError::mismatch(format!("Mapping \"{}\" of {}", display(target), what), "list of two names"));
        };
        match nodes.iter().find(|n| n.name == *template) {
            None => diag.report(ToscaError::NotFound(format!("Node template \"{}\" was not found.", template))),
            Some(node) if !has_member(node, member) => diag.report(ToscaError::unknown(
                format!("Node template \"{}\"", template),
                *member,
            )),
            Some(_) => Ok(()),
        }
    }
}
