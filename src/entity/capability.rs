//! Capabilities of node templates

use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use super::property::{build_properties, Property};
use super::{check_fields, section, ATTRIBUTES, PROPERTIES};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::value::{as_i64, entries, get_map};

pub const SCALABLE: &str = "tosca.capabilities.Scalable";
const MIN_INSTANCES: &str = "min_instances";
const MAX_INSTANCES: &str = "max_instances";
const DEFAULT_INSTANCES: &str = "default_instances";

/// A capability exposed by a node template
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub name: String,
    pub type_name: String,
    pub type_def: Arc<FlatType>,
    pub properties: Vec<Property>,
    pub attributes: Mapping,
}

impl Capability {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Literal value of a property
    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.property(name).and_then(|p| p.value.as_value())
    }

    pub fn is_derived_from(&self, type_name: &str) -> bool {
        self.type_def.is_derived_from(type_name)
    }

    /// `min_instances <= default_instances <= max_instances`
    fn validate_scalable(&self, template: &str) -> Result<()> {
        let num = |n: &str| self.property_value(n).and_then(as_i64);
        let (Some(min), Some(max)) = (num(MIN_INSTANCES), num(MAX_INSTANCES)) else {
            return Ok(());
        };
        let in_bounds = match num(DEFAULT_INSTANCES) {
            Some(default) => min <= default && default <= max,
            None => min <= max,
        };
        if in_bounds {
            return Ok(());
        }
        Err(ToscaError::Validation(format!(
            "\"properties\" of template \"{}\": \"{}\" value is not between \"{}\" and \"{}\".",
            template, DEFAULT_INSTANCES, MIN_INSTANCES, MAX_INSTANCES
        )))
    }
}

/// Build every capability declared by the node type, applying template overrides
pub(crate) fn build_capabilities(
    template: &str,
    node_type: &FlatType,
    tpl: &Mapping,
    context: TemplateContext,
    registry: &TypeRegistry,
    diag: &mut Diagnostics,
) -> Result<Vec<Capability>> {
    let what = format!("\"capabilities\" of template \"{}\"", template);
    let given = section(tpl, super::CAPABILITIES, &format!("template \"{}\"", template), diag)?;

    if let Some(given) = given {
        for (name, body) in entries(given) {
            if !node_type.capabilities.contains_key(name) {
                diag.report(ToscaError::unknown(&what, name))?;
                continue;
            }
            if let Some(body) = body.as_mapping() {
                check_fields(body, &[PROPERTIES, ATTRIBUTES], &what, diag)?;
            }
        }
    }

    let mut capabilities = Vec::new();
    for (name, def) in entries(&node_type.capabilities) {
        let Some(type_name) = def.get("type").and_then(Value::as_str) else {
            diag.report(ToscaError::missing(format!("Capability \"{}\"", name), "type"))?;
            continue;
        };
        let cap_type = match registry.resolve(TypeKind::Capability, type_name) {
            Ok(t) => t,
            Err(e) => {
                diag.report(e)?;
                continue;
            }
        };

        // Capability type properties, refined by the node type's definition
        let mut defs = cap_type.properties.clone();
        if let Some(refined) = def.as_mapping().and_then(|d| get_map(d, PROPERTIES)) {
            for (k, v) in refined {
                match (defs.get_mut(k), v) {
                    (Some(Value::Mapping(base)), Value::Mapping(r)) => {
                        for (rk, rv) in r {
                            base.insert(rk.clone(), rv.clone());
                        }
                    }
                    _ => {
                        defs.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        let body = given.and_then(|g| g.get(name)).and_then(Value::as_mapping);
        let given_props = body.and_then(|b| get_map(b, PROPERTIES));
        let properties = match given_props {
            Some(props) => build_properties(
                &format!("\"properties\" of template \"{}\"", name),
                &defs,
                Some(props),
                context,
                registry,
                diag,
            )?,
            // Only defaults apply when the template leaves the capability alone
            None => {
                let mut quiet = Diagnostics::collecting();
                let defaults = build_properties(name, &defs, None, context, registry, &mut quiet)?;
                for item in quiet.into_iter().filter(|i| i.error.kind() != "MissingRequiredField") {
                    diag.push(item)?;
                }
                defaults
            }
        };

        let capability = Capability {
            name: name.to_string(),
            type_name: cap_type.name.clone(),
            type_def: cap_type,
            properties,
            attributes: body.and_then(|b| get_map(b, ATTRIBUTES)).cloned().unwrap_or_default(),
        };
        if capability.is_derived_from(SCALABLE) {
            if let Err(e) = capability.validate_scalable(template) {
                diag.report(e)?;
            }
        }
        capabilities.push(capability);
    }
    Ok(capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(tpl: &str) -> (Vec<Capability>, Diagnostics) {
        let reg = TypeRegistry::normative().unwrap();
        let compute = reg.resolve(TypeKind::Node, "tosca.nodes.Compute").unwrap();
        let tpl: Value = serde_yaml::from_str(tpl).unwrap();
        let mut diag = Diagnostics::collecting();
        let caps = build_capabilities("server", &compute, tpl.as_mapping().unwrap(), TemplateContext::Node(0), &reg, &mut diag)
            .unwrap();
        (caps, diag)
    }

    #[test]
    fn test_defaults_and_overrides() {
        let (caps, diag) = build("capabilities:\n  host:\n    properties:\n      num_cpus: 2\n      mem_size: 4096 mb\n");
        assert!(diag.is_empty(), "{}", diag);
        let host = caps.iter().find(|c| c.name == "host").unwrap();
        assert_eq!(host.property_value("num_cpus"), Some(&Value::from(2)));
        assert_eq!(host.property_value("mem_size"), Some(&Value::from("4096 MB")));

        let endpoint = caps.iter().find(|c| c.name == "endpoint").unwrap();
        assert_eq!(endpoint.property_value("secure"), Some(&Value::from(true)));
        assert_eq!(endpoint.type_name, "tosca.capabilities.Endpoint.Admin");
    }

    #[test]
    fn test_unknown_capability_and_field() {
        let (_, diag) = build("capabilities:\n  hovercraft: {}\n  host:\n    propertys: {}\n");
        assert_eq!(diag.of_kind("UnknownField").count(), 2);
    }

    #[test]
    fn test_scalable_bounds() {
        let (_, diag) = build(
            "capabilities:\n  scalable:\n    properties:\n      min_instances: 1\n      max_instances: 3\n      default_instances: 5\n",
        );
        assert_eq!(diag.of_kind("ValidationError").count(), 1);
        assert!(diag.format_all().contains("default_instances"));

        let (_, diag) = build(
            "capabilities:\n  scalable:\n    properties:\n      min_instances: 1\n      max_instances: 3\n      default_instances: 2\n",
        );
        assert!(diag.is_empty());
    }
}
