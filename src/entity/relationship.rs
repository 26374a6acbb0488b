//! Relationship templates and resolved relationships

use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use super::interface::{build_interfaces, InterfaceOperation};
use super::property::{build_properties, Property};
use super::{
    check_fields, section, template_mapping, ATTRIBUTES, DESCRIPTION, INTERFACES, METADATA, PROPERTIES,
    TYPE,
};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::value::{get_map, get_str};

const SECTIONS: &[&str] = &[TYPE, DESCRIPTION, METADATA, PROPERTIES, ATTRIBUTES, INTERFACES, "copy"];

/// A reusable, named relationship declared under `relationship_templates`
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipTemplate {
    pub id: usize,
    pub name: String,
    pub type_name: String,
    pub type_def: Arc<FlatType>,
    pub description: Option<String>,
    pub properties: Vec<Property>,
    pub interfaces: Vec<InterfaceOperation>,
    pub raw: Mapping,
}

impl RelationshipTemplate {
    /// Build a relationship template; `None` when its type cannot be resolved
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
        check_fields(&tpl, SECTIONS, &format!("Relationship template \"{}\"", name), diag)?;

        let Some(type_name) = get_str(&tpl, TYPE) else {
            diag.report(ToscaError::missing(format!("Template \"{}\"", name), TYPE))?;
            return Ok(None);
        };
        let type_def = match registry.resolve(TypeKind::Relationship, type_name) {
            Ok(t) => t,
            Err(_) if registry.is_reported_broken(TypeKind::Relationship, type_name) => {
                return Ok(None)
            }
            Err(e) => {
                diag.report(e)?;
                return Ok(None);
            }
        };

        let context = TemplateContext::RelationshipTemplate(id);
        let given = section(&tpl, PROPERTIES, &format!("template \"{}\"", name), diag)?;
        let properties = build_properties(
            &format!("\"properties\" of template \"{}\"", name),
            &type_def.properties,
            given,
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
            type_def,
            properties,
            interfaces,
            raw: tpl,
        }))
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A relationship between two node templates, created from a requirement
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: usize,
    /// Requirement of the source node that produced this relationship
    pub requirement: String,
    pub type_name: String,
    pub type_def: Arc<FlatType>,
    pub source: usize,
    pub target: usize,
    /// Named relationship template this relationship instantiates
    pub template: Option<usize>,
    /// Capability of the target the requirement was matched against
    pub capability: Option<String>,
    /// Properties declared in place on the requirement
    pub properties: Vec<Property>,
    pub interfaces: Vec<InterfaceOperation>,
}

impl Relationship {
    /// Relationship for a requirement, with in-place properties and interfaces
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn inline(
        id: usize,
        requirement: &str,
        type_def: Arc<FlatType>,
        source: usize,
        target: usize,
        inline: Option<&Mapping>,
        registry: &TypeRegistry,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let context = TemplateContext::Relationship(id);
        let what = format!("relationship of requirement \"{}\"", requirement);
        let (properties, interfaces) = match inline {
            Some(body) => (
                build_properties(
                    &format!("\"properties\" of {}", what),
                    &type_def.properties,
                    get_map(body, PROPERTIES),
                    context,
                    registry,
                    diag,
                )?,
                build_interfaces(requirement, &type_def, body, context, registry, diag)?,
            ),
            None => (Vec::new(), Vec::new()),
        };
        Ok(Self {
            id,
            requirement: requirement.to_string(),
            type_name: type_def.name.clone(),
            type_def,
            source,
            target,
            template: None,
            capability: None,
            properties,
            interfaces,
        })
    }

    pub fn is_derived_from(&self, type_name: &str) -> bool {
        self.type_def.is_derived_from(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(src: &str) -> (Option<RelationshipTemplate>, Diagnostics) {
        let reg = TypeRegistry::normative().unwrap();
        let raw: Value = serde_yaml::from_str(src).unwrap();
        let mut diag = Diagnostics::collecting();
        let tpl = RelationshipTemplate::build(0, "storage_attachment", &raw, &reg, &mut diag).unwrap();
        (tpl, diag)
    }

    #[test]
    fn test_build_attaches_to() {
        let (tpl, diag) = build("type: tosca.relationships.AttachesTo\nproperties:\n  location: /mnt/data\n");
        assert!(diag.is_empty(), "{}", diag);
        let tpl = tpl.unwrap();
        assert!(tpl.type_def.is_derived_from("tosca.relationships.Root"));
        assert_eq!(
            tpl.property("location").and_then(|p| p.value.as_value()),
            Some(&Value::from("/mnt/data"))
        );
    }

    #[test]
    fn test_missing_required_property() {
        let (tpl, diag) = build("type: AttachesTo\n");
        assert!(tpl.is_some());
        assert_eq!(diag.of_kind("MissingRequiredField").count(), 1);
    }

    #[test]
    fn test_missing_type() {
        let (tpl, diag) = build("properties: {}\n");
        assert!(tpl.is_none());
        assert_eq!(diag.of_kind("MissingRequiredField").count(), 1);
    }

    #[test]
    fn test_configure_interface() {
        let (tpl, diag) = build(
            "type: tosca.relationships.ConnectsTo\ninterfaces:\n  Configure:\n    pre_configure_source: scripts/wire.sh\n",
        );
        assert!(diag.is_empty(), "{}", diag);
        assert_eq!(tpl.unwrap().interfaces[0].name, "pre_configure_source");
    }
}
