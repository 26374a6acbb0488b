//! Policies applied to node templates and groups

use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use super::property::{build_properties, Property};
use super::{
    check_fields, name_list, section, template_mapping, DESCRIPTION, METADATA, PROPERTIES, TARGETS,
    TRIGGERS, TYPE,
};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::value::get_str;

const SECTIONS: &[&str] = &[TYPE, DESCRIPTION, METADATA, PROPERTIES, TARGETS, TRIGGERS];

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub id: usize,
    pub name: String,
    pub type_name: String,
    pub type_def: Arc<FlatType>,
    pub description: Option<String>,
    pub metadata: Mapping,
    /// Target node template or group names, as written
    pub targets: Vec<String>,
    pub properties: Vec<Property>,
    pub triggers: Mapping,
}

impl Policy {
    pub fn build(
        id: usize,
        name: &str,
        raw: &Value,
        registry: &TypeRegistry,
        diag: &mut Diagnostics,
    ) -> Result<Option<Self>> {
        let tpl = match template_mapping(name, raw) {
            Ok(t) => t,
            Err(e) => {
                diag.report(e)?;
                return Ok(None);
            }
        };
        let what = format!("Policy \"{}\"", name);
        check_fields(&tpl, SECTIONS, &what, diag)?;

        let Some(type_name) = get_str(&tpl, TYPE) else {
            diag.report(ToscaError::missing(format!("Template \"{}\"", name), TYPE))?;
            return Ok(None);
        };
        let type_def = match registry.resolve(TypeKind::Policy, type_name) {
            Ok(t) => t,
            Err(_) if registry.is_reported_broken(TypeKind::Policy, type_name) => return Ok(None),
            Err(e) => {
                diag.report(e)?;
                return Ok(None);
            }
        };

        let properties = build_properties(
            &format!("\"properties\" of template \"{}\"", name),
            &type_def.properties,
            section(&tpl, PROPERTIES, &what, diag)?,
            TemplateContext::Policy(id),
            registry,
            diag,
        )?;

        Ok(Some(Self {
            id,
            name: name.to_string(),
            type_name: type_def.name.clone(),
            description: get_str(&tpl, DESCRIPTION).map(String::from),
            metadata: section(&tpl, METADATA, &what, diag)?.cloned().unwrap_or_default(),
            targets: name_list(&tpl, TARGETS, &what, diag)?,
            triggers: section(&tpl, TRIGGERS, &what, diag)?.cloned().unwrap_or_default(),
            type_def,
            properties,
        }))
    }

    /// Node or group types the policy type restricts its targets to
    pub fn allowed_target_types(&self) -> Vec<&str> {
        self.type_def
            .raw
            .get(TARGETS)
            .and_then(Value::as_sequence)
            .map(|t| t.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_build() {
        let reg = TypeRegistry::normative().unwrap();
        let mut diag = Diagnostics::collecting();
        let raw: Value =
            serde_yaml::from_str("type: tosca.policies.Placement\ntargets: [web, app_group]\nfrequency: 1\n").unwrap();
        let policy = Policy::build(0, "colocate", &raw, &reg, &mut diag).unwrap().unwrap();
        assert_eq!(policy.targets, vec!["web", "app_group"]);
        assert_eq!(diag.of_kind("UnknownField").count(), 1);
    }
}
