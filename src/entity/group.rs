//! Groups of node templates

use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use super::interface::{build_interfaces, InterfaceOperation};
use super::property::{build_properties, Property};
use super::{
    check_fields, name_list, section, template_mapping, DESCRIPTION, INTERFACES, MEMBERS, METADATA,
    PROPERTIES, TYPE,
};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::value::get_str;

const SECTIONS: &[&str] = &[TYPE, DESCRIPTION, METADATA, PROPERTIES, MEMBERS, INTERFACES];

/// A named group of node templates
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: usize,
    pub name: String,
    pub type_name: String,
    pub type_def: Arc<FlatType>,
    pub description: Option<String>,
    pub metadata: Mapping,
    /// Member template names, as written
    pub members: Vec<String>,
    pub properties: Vec<Property>,
    pub interfaces: Vec<InterfaceOperation>,
}

impl Group {
    /// Build a group; member names are checked later against the topology
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
        let what = format!("Group \"{}\"", name);
        check_fields(&tpl, SECTIONS, &what, diag)?;

        let Some(type_name) = get_str(&tpl, TYPE) else {
            diag.report(ToscaError::missing(format!("Template \"{}\"", name), TYPE))?;
            return Ok(None);
        };
        let type_def = match registry.resolve(TypeKind::Group, type_name) {
            Ok(t) => t,
            Err(_) if registry.is_reported_broken(TypeKind::Group, type_name) => return Ok(None),
            Err(e) => {
                diag.report(e)?;
                return Ok(None);
            }
        };

        let members = name_list(&tpl, MEMBERS, &what, diag)?;
        let mut seen = std::collections::HashSet::new();
        for member in &members {
            if !seen.insert(member.as_str()) {
                diag.report(ToscaError::InvalidGroupTarget {
                    what: member.clone(),
                    reason: format!("member is listed more than once in group \"{}\".", name),
                })?;
            }
        }

        let context = TemplateContext::Group(id);
        let properties = build_properties(
            &format!("\"properties\" of template \"{}\"", name),
            &type_def.properties,
            section(&tpl, PROPERTIES, &what, diag)?,
            context,
            registry,
            diag,
        )?;
        let interfaces = build_interfaces(name, &type_def, &tpl, context, registry, diag)?;

        Ok(Some(Self {
            id,
            name: name.to_string(),
            type_name: type_def.name.clone(),
            description: get_str(&tpl, DESCRIPTION).map(String::from),
            metadata: section(&tpl, METADATA, &what, diag)?.cloned().unwrap_or_default(),
            type_def,
            members,
            properties,
            interfaces,
        }))
    }

    /// Node types the group type restricts its members to
    pub fn allowed_member_types(&self) -> &[String] {
        &self.type_def.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_build() {
        let reg = TypeRegistry::normative().unwrap();
        let mut diag = Diagnostics::collecting();
        let raw: Value = serde_yaml::from_str("type: tosca.groups.Root\nmembers: [web, db, web]\n").unwrap();
        let group = Group::build(0, "app", &raw, &reg, &mut diag).unwrap().unwrap();
        assert_eq!(group.members, vec!["web", "db", "web"]);
        assert_eq!(diag.of_kind("InvalidGroupTarget").count(), 1);
    }

    #[test]
    fn test_group_unknown_type() {
        let reg = TypeRegistry::normative().unwrap();
        let mut diag = Diagnostics::collecting();
        let raw: Value = serde_yaml::from_str("type: tosca.groups.Nope\n").unwrap();
        assert!(Group::build(0, "app", &raw, &reg, &mut diag).unwrap().is_none());
        assert_eq!(diag.of_kind("InvalidType").count(), 1);
    }
}
