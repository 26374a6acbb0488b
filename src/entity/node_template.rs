//! Node templates

use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::capability::{build_capabilities, Capability};
use super::interface::{build_interfaces, InterfaceOperation};
use super::property::{build_properties, Property, PropertyValue};
use super::requirement::{parse_requirements, Requirement};
use super::{
    check_fields, section, template_mapping, ARTIFACTS, ATTRIBUTES, CAPABILITIES, DESCRIPTION, DIRECTIVES,
    INTERFACES, METADATA, NODE_FILTER, PROPERTIES, REQUIREMENTS, TYPE,
};
use crate::catalog::{FlatType, TypeKind, TypeRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::functions::TemplateContext;
use crate::value::get_str;

pub const SECTIONS: &[&str] = &[
    TYPE,
    DESCRIPTION,
    METADATA,
    DIRECTIVES,
    PROPERTIES,
    ATTRIBUTES,
    REQUIREMENTS,
    INTERFACES,
    CAPABILITIES,
    ARTIFACTS,
    NODE_FILTER,
    "copy",
];

/// A typed node in the topology
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTemplate {
    /// Position in the topology's node arena
    pub id: usize,
    pub name: String,
    pub type_name: String,
    pub type_def: Arc<FlatType>,
    pub description: Option<String>,
    pub metadata: Mapping,
    pub directives: Vec<String>,
    pub properties: Vec<Property>,
    pub attributes: Mapping,
    pub capabilities: Vec<Capability>,
    pub requirements: Vec<Requirement>,
    pub interfaces: Vec<InterfaceOperation>,
    pub artifacts: Mapping,
    /// Ids of relationships this node is the source of
    pub relationships: Vec<usize>,
    pub raw: Mapping,
}

impl NodeTemplate {
    /// Build a node template.
    ///
    /// Returns `None` when the template has no usable type; nothing else can
    /// be checked without one.
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

        let Some(type_name) = get_str(&tpl, TYPE) else {
            diag.report(ToscaError::missing(format!("Template \"{}\"", name), TYPE))?;
            return Ok(None);
        };
        let type_def = match registry.resolve(TypeKind::Node, type_name) {
            Ok(t) => t,
            Err(_) if registry.is_reported_broken(TypeKind::Node, type_name) => {
                debug!(template = name, type_name, "Skipping template of a broken type");
                return Ok(None);
            }
            Err(e) => {
                let mut item = crate::diagnostics::DiagnosticItem::new(e);
                if let Some(hit) = registry.catalog().search(type_name, 1).into_iter().next() {
                    item = item.with_context(format!("did you mean \"{}\"?", hit.name));
                }
                diag.push(item)?;
                return Ok(None);
            }
        };
        debug!(template = name, type_name = %type_def.name, "Building node template");

        check_fields(&tpl, SECTIONS, &format!("Node template \"{}\"", name), diag)?;

        let context = TemplateContext::Node(id);
        let given = section(&tpl, PROPERTIES, &format!("template \"{}\"", name), diag)?;
        let properties = build_properties(
            &format!("\"properties\" of template \"{}\"", name),
            &type_def.properties,
            given,
            context,
            registry,
            diag,
        )?;
        let capabilities = build_capabilities(name, &type_def, &tpl, context, registry, diag)?;
        let parsed = parse_requirements(name, &tpl, diag)?;
        let mut requirements = Vec::with_capacity(parsed.len());
        for req in parsed {
            if type_def.requirement_def(&req.name).is_some() {
                requirements.push(req);
            } else {
                let what = format!("\"requirements\" of template \"{}\"", name);
                diag.report(ToscaError::unknown(what, &req.name))?;
            }
        }
        let interfaces = build_interfaces(name, &type_def, &tpl, context, registry, diag)?;

        let attributes = section(&tpl, ATTRIBUTES, &format!("template \"{}\"", name), diag)?
            .cloned()
            .unwrap_or_default();
        let artifacts = section(&tpl, ARTIFACTS, &format!("template \"{}\"", name), diag)?
            .cloned()
            .unwrap_or_default();
        let metadata = section(&tpl, METADATA, &format!("template \"{}\"", name), diag)?
            .cloned()
            .unwrap_or_default();
        let directives = tpl
            .get(DIRECTIVES)
            .and_then(Value::as_sequence)
            .map(|d| d.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        Ok(Some(Self {
            id,
            name: name.to_string(),
            type_name: type_def.name.clone(),
            description: get_str(&tpl, DESCRIPTION).map(String::from),
            type_def,
            metadata,
            directives,
            properties,
            attributes,
            capabilities,
            requirements,
            interfaces,
            artifacts,
            relationships: Vec::new(),
            raw: tpl,
        }))
    }

    pub fn get_properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn get_property_value(&self, name: &str) -> Option<&PropertyValue> {
        self.property(name).map(|p| &p.value)
    }

    pub fn get_capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Capabilities whose type is `type_name` or derives from it
    pub fn capabilities_of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a Capability> + 'a {
        self.capabilities.iter().filter(move |c| c.is_derived_from(type_name))
    }

    pub fn is_derived_from(&self, type_name: &str) -> bool {
        self.type_def.is_derived_from(type_name)
    }

    /// Requirement definition from the node type, used for implicit relationships
    pub fn requirement_definition(&self, name: &str) -> Option<&Mapping> {
        self.type_def.requirement_def(name)
    }

    pub fn operations<'a>(&'a self, interface: &'a str) -> impl Iterator<Item = &'a InterfaceOperation> + 'a {
        self.interfaces.iter().filter(move |o| o.interface == interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(name: &str, src: &str) -> (Option<NodeTemplate>, Diagnostics) {
        let reg = TypeRegistry::normative().unwrap();
        let raw: Value = serde_yaml::from_str(src).unwrap();
        let mut diag = Diagnostics::collecting();
        let node = NodeTemplate::build(0, name, &raw, &reg, &mut diag).unwrap();
        (node, diag)
    }

    #[test]
    fn test_compute_without_properties() {
        let (node, diag) = build("server", "type: tosca.nodes.Compute\n");
        assert!(diag.is_empty(), "{}", diag);
        let node = node.unwrap();
        assert!(node.capability("host").is_some());
        assert!(node.is_derived_from("tosca.nodes.Root"));
    }

    #[test]
    fn test_missing_type_aborts_template() {
        let (node, diag) = build("server", "properties: {}\n");
        assert!(node.is_none());
        assert_eq!(diag.len(), 1);
        let err = &diag.all()[0].error;
        assert_eq!(err.kind(), "MissingRequiredField");
        assert!(err.to_string().contains("\"server\""));
        assert!(err.to_string().contains("\"type\""));
    }

    #[test]
    fn test_undeclared_type() {
        let (node, diag) = build("server", "type: tosca.nodes.Computer\n");
        assert!(node.is_none());
        let item = diag.of_kind("InvalidType").next().unwrap();
        assert!(item.context.iter().any(|c| c.contains("tosca.nodes.Compute")));
    }

    #[test]
    fn test_unknown_section_and_property() {
        let (_, diag) = build(
            "db",
            "type: tosca.nodes.Database\nproperties:\n  name: inventory\n  colour: blue\nrequirement: []\n",
        );
        assert_eq!(diag.of_kind("UnknownField").count(), 2);
    }

    #[test]
    fn test_undeclared_requirement() {
        let (node, diag) = build(
            "server",
            "type: tosca.nodes.Compute\nrequirements:\n  - hots: other\n  - local_storage: disk\n",
        );
        let errors: Vec<_> = diag.of_kind("UnknownField").collect();
        assert_eq!(errors.len(), 1, "{}", diag);
        assert!(errors[0].error.to_string().contains("hots"));
        let node = node.unwrap();
        let names: Vec<&str> = node.requirements.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["local_storage"]);
    }

    #[test]
    fn test_inherited_requirement_is_declared() {
        let (_, diag) = build(
            "db",
            "type: tosca.nodes.Database\nproperties:\n  name: inventory\nrequirements:\n  - dependency: other\n",
        );
        assert!(diag.is_empty(), "{}", diag);
    }

    #[test]
    fn test_required_property_missing() {
        let (_, diag) = build("db", "type: tosca.nodes.Database\n");
        let err = &diag.of_kind("MissingRequiredField").next().unwrap().error;
        assert!(err.to_string().contains("name"));
    }
}
