//! Intrinsic functions
//!
//! `get_input`, `get_property`, `get_attribute`, `get_operation_output`,
//! `concat` and `token` are recognised when a template is built and checked
//! in a dedicated pass once the whole relationship graph exists, since
//! `HOST`, `SOURCE` and `TARGET` can only be resolved over that graph.
//! Resolution is static: runtime-only values come back as `None`.

use std::collections::HashSet;
use std::fmt;

use serde_yaml::Value;
use tracing::debug;

use crate::catalog::{
    TypeKind, CONFIGURE, CONFIGURE_SHORTNAME, HOSTED_ON, LIFECYCLE, LIFECYCLE_SHORTNAME,
};
use crate::diagnostics::Diagnostics;
use crate::entity::{Property, PropertyValue};
use crate::error::{Result, ToscaError};
use crate::topology::{EntityRef, TopologyTemplate};
use crate::value::display;

pub const SELF: &str = "SELF";
pub const HOST: &str = "HOST";
pub const SOURCE: &str = "SOURCE";
pub const TARGET: &str = "TARGET";

/// Nested `get_property` chains deeper than this are treated as circular
const MAX_DEPTH: usize = 32;

/// The closed set of intrinsic functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    GetInput,
    GetProperty,
    GetAttribute,
    GetOperationOutput,
    Concat,
    Token,
}

impl FunctionKind {
    pub const ALL: [FunctionKind; 6] = [
        Self::GetInput,
        Self::GetProperty,
        Self::GetAttribute,
        Self::GetOperationOutput,
        Self::Concat,
        Self::Token,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetInput => "get_input",
            Self::GetProperty => "get_property",
            Self::GetAttribute => "get_attribute",
            Self::GetOperationOutput => "get_operation_output",
            Self::Concat => "concat",
            Self::Token => "token",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a function value appears
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateContext {
    Node(usize),
    RelationshipTemplate(usize),
    /// A relationship created from a requirement
    Relationship(usize),
    Group(usize),
    Policy(usize),
    Outputs,
    Topology,
}

impl TemplateContext {
    /// Entity that `SELF` refers to
    pub fn entity(&self) -> Option<EntityRef> {
        match *self {
            Self::Node(id) => Some(EntityRef::Node(id)),
            Self::RelationshipTemplate(id) => Some(EntityRef::RelationshipTemplate(id)),
            Self::Relationship(id) => Some(EntityRef::Relationship(id)),
            Self::Group(id) => Some(EntityRef::Group(id)),
            Self::Policy(id) => Some(EntityRef::Policy(id)),
            Self::Outputs | Self::Topology => None,
        }
    }

    fn is_relationship(&self) -> bool {
        matches!(self, Self::RelationshipTemplate(_) | Self::Relationship(_))
    }
}

/// Whether a raw value is a single-key mapping naming an intrinsic function
pub fn is_function(value: &Value) -> bool {
    match value {
        Value::Mapping(m) if m.len() == 1 => m
            .keys()
            .next()
            .and_then(Value::as_str)
            .and_then(FunctionKind::from_name)
            .is_some(),
        _ => false,
    }
}

/// Recognise a function and validate its arguments against the topology
pub fn get_function(
    topology: &TopologyTemplate,
    context: TemplateContext,
    raw: &Value,
    diag: &mut Diagnostics,
) -> Result<PropertyValue> {
    match Function::parse(raw, context) {
        Some(function) => {
            function.validate(topology, diag)?;
            Ok(PropertyValue::Function(function))
        }
        None => Ok(PropertyValue::Value(raw.clone())),
    }
}

/// A recognised intrinsic function call
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub kind: FunctionKind,
    pub args: Vec<Value>,
    pub context: TemplateContext,
    raw: Value,
}

impl Function {
    /// Recognise a function value; arguments are always a list
    pub fn parse(raw: &Value, context: TemplateContext) -> Option<Self> {
        if !is_function(raw) {
            return None;
        }
        let (name, args) = raw.as_mapping()?.iter().next()?;
        let kind = FunctionKind::from_name(name.as_str()?)?;
        let args = match args {
            Value::Sequence(items) => items.clone(),
            other => vec![other.clone()],
        };
        Some(Self { kind, args, context, raw: raw.clone() })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Check the arguments, reporting structural problems
    pub fn validate(&self, topology: &TopologyTemplate, diag: &mut Diagnostics) -> Result<()> {
        let outcome = match self.kind {
            FunctionKind::GetInput => self.validate_get_input(topology),
            FunctionKind::GetProperty => self.resolve_property(topology, 0).map(|_| ()),
            FunctionKind::GetAttribute => self.validate_get_attribute(topology),
            FunctionKind::GetOperationOutput => self.validate_operation_output(topology),
            FunctionKind::Concat => self.validate_concat(),
            FunctionKind::Token => self.validate_token(),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => diag.report(e),
        }
    }

    /// Static value of the function; `None` when only known at runtime
    pub fn result(&self, topology: &TopologyTemplate) -> Result<Option<Value>> {
        self.result_at(topology, 0)
    }

    fn result_at(&self, topology: &TopologyTemplate, depth: usize) -> Result<Option<Value>> {
        match self.kind {
            FunctionKind::GetInput => self.input_value(topology),
            FunctionKind::GetProperty => self.resolve_property(topology, depth),
            FunctionKind::GetAttribute
            | FunctionKind::GetOperationOutput
            | FunctionKind::Concat
            | FunctionKind::Token => Ok(None),
        }
    }

    // =========================================================================
    // get_input
    // =========================================================================

    fn validate_get_input(&self, topology: &TopologyTemplate) -> Result<()> {
        let Some(first) = self.args.first() else {
            return Err(ToscaError::Validation(format!(
                "Expected one argument for function \"{}\" but received \"{}\".",
                self.kind,
                display(&Value::Sequence(self.args.clone()))
            )));
        };
        let name = display(first);
        if topology.input(&name).is_none() {
            return Err(ToscaError::UnknownInput { what: name });
        }
        Ok(())
    }

    fn input_value(&self, topology: &TopologyTemplate) -> Result<Option<Value>> {
        self.validate_get_input(topology)?;
        let name = display(&self.args[0]);
        let value = topology
            .param(&name)
            .cloned()
            .or_else(|| topology.input(&name).and_then(|i| i.default().cloned()));
        match value {
            Some(v) => index_into(self.kind, v, &self.args[1..]).map(Some),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Entity lookup (SELF, HOST, SOURCE, TARGET, template names)
    // =========================================================================

    fn context_name(&self, topology: &TopologyTemplate) -> String {
        match self.context.entity() {
            Some(e) => topology.entity_name(e).to_string(),
            None => "outputs".to_string(),
        }
    }

    /// Resolve the first argument; `Ok(None)` when it names a template that
    /// could not be built or a relationship template no requirement uses
    fn find_entity(&self, topology: &TopologyTemplate, name: &str) -> Result<Option<EntityRef>> {
        match name {
            SELF => match self.context.entity() {
                Some(e) => Ok(Some(e)),
                None => Err(ToscaError::NotFound(format!("Node template \"{}\" was not found.", SELF))),
            },
            SOURCE | TARGET => {
                if !self.context.is_relationship() {
                    return Err(ToscaError::Validation(format!(
                        "\"{}\" keyword can only be used in context to \"Relationships\" {} node.",
                        name,
                        name.to_lowercase()
                    )));
                }
                let endpoints = match self.context {
                    TemplateContext::Relationship(id) => topology.relationships.get(id).map(|r| (r.source, r.target)),
                    TemplateContext::RelationshipTemplate(id) => topology.relationship_template_endpoints(id),
                    _ => None,
                };
                Ok(endpoints.map(|(s, t)| EntityRef::Node(if name == SOURCE { s } else { t })))
            }
            _ => {
                if let Some(node) = topology.node_by_name(name) {
                    return Ok(Some(EntityRef::Node(node.id)));
                }
                if topology.is_skipped(name) {
                    debug!(template = name, function = %self.kind, "Skipping reference to unbuilt template");
                    return Ok(None);
                }
                Err(ToscaError::NotFound(format!("Node template \"{}\" was not found.", name)))
            }
        }
    }

    /// Walk `HostedOn` relationships from the context node until `found` holds
    fn find_host(&self, topology: &TopologyTemplate, found: impl Fn(usize) -> bool) -> Result<usize> {
        let TemplateContext::Node(start) = self.context else {
            return Err(ToscaError::Validation(format!(
                "\"{}: [ {}, ... ]\" can only be used within a node template context.",
                self.kind, HOST
            )));
        };
        let mut visited = HashSet::new();
        let mut pending: Vec<usize> = topology.hosts_of(start).collect();
        while let Some(host) = pending.pop() {
            if !visited.insert(host) {
                continue;
            }
            if found(host) {
                return Ok(host);
            }
            pending.extend(topology.hosts_of(host));
        }
        Err(ToscaError::NotFound(format!(
            "\"{}: [ {}, ... ]\" was used in node template \"{}\" but \"{}\" was not found in relationship chain.",
            self.kind,
            HOST,
            self.context_name(topology),
            HOSTED_ON
        )))
    }

    fn illegal_arguments(&self) -> ToscaError {
        let item = if self.kind == FunctionKind::GetAttribute { "attribute" } else { "property" };
        ToscaError::Validation(format!(
            "Illegal arguments for function \"{}\". Expected arguments: \"node-template-name\", \"req-or-cap\"(optional), \"{} name\".",
            self.kind, item
        ))
    }

    // =========================================================================
    // get_property
    // =========================================================================

    fn resolve_property(&self, topology: &TopologyTemplate, depth: usize) -> Result<Option<Value>> {
        if depth > MAX_DEPTH {
            return Err(ToscaError::Validation(format!(
                "Function \"{}\" in \"{}\" is nested too deeply; the references are likely circular.",
                self.kind,
                display(&self.raw)
            )));
        }
        if self.args.len() < 2 {
            return Err(self.illegal_arguments());
        }
        let target = display(&self.args[0]);
        let prop_name = display(&self.args[1]);

        let entity = if target == HOST {
            let host = self.find_host(topology, |id| {
                topology.node_templates[id].type_def.property_def(&prop_name).is_some()
            })?;
            Some(EntityRef::Node(host))
        } else {
            self.find_entity(topology, &target)?
        };
        let Some(entity) = entity else {
            return Ok(None);
        };

        let props = topology.entity_properties(entity);
        let (property, rest) = match find_property(props, &prop_name) {
            Some(p) => (p, &self.args[2..]),
            None if self.args.len() >= 3 => {
                let cap_prop = display(&self.args[2]);
                match self.capability_property(topology, entity, &prop_name, &cap_prop)? {
                    Some(p) => (p, &self.args[3..]),
                    None => return Ok(None),
                }
            }
            None => {
                return Err(ToscaError::NotFound(format!(
                    "Property \"{}\" was not found in node template \"{}\".",
                    prop_name,
                    topology.entity_name(entity)
                )))
            }
        };

        let value = match &property.value {
            PropertyValue::Value(v) => v.clone(),
            PropertyValue::Function(f) => match f.result_at(topology, depth + 1)? {
                Some(v) => v,
                None => return Ok(None),
            },
        };
        index_into(self.kind, value, rest).map(Some)
    }

    /// Property of a capability named directly, or reached through a requirement
    fn capability_property<'t>(
        &self,
        topology: &'t TopologyTemplate,
        entity: EntityRef,
        req_or_cap: &str,
        prop_name: &str,
    ) -> Result<Option<&'t Property>> {
        let EntityRef::Node(node_id) = entity else {
            return Err(ToscaError::NotFound(format!(
                "Property \"{}\" was not found in template \"{}\".",
                req_or_cap,
                topology.entity_name(entity)
            )));
        };
        let node = &topology.node_templates[node_id];

        let via_requirement = node
            .relationships
            .iter()
            .filter_map(|rid| topology.relationships.get(*rid))
            .find(|r| r.requirement == req_or_cap);

        let (owner, capability) = match via_requirement {
            Some(rel) => {
                let target = &topology.node_templates[rel.target];
                let cap = target
                    .capability(req_or_cap)
                    .or_else(|| rel.capability.as_deref().and_then(|c| target.capability(c)));
                (target, cap)
            }
            None => {
                if node.requirements.iter().any(|r| r.name == req_or_cap) {
                    // Requirement whose target could not be resolved
                    return Ok(None);
                }
                (node, node.capability(req_or_cap))
            }
        };

        let Some(capability) = capability else {
            return Err(ToscaError::NotFound(format!(
                "Requirement/Capability \"{}\" referenced from node template \"{}\" was not found in node template \"{}\".",
                req_or_cap,
                self.context_name(topology),
                owner.name
            )));
        };
        match find_property(&capability.properties, prop_name) {
            Some(p) => Ok(Some(p)),
            None => Err(ToscaError::NotFound(format!(
                "Property \"{}\" was not found in capability \"{}\" of node template \"{}\" referenced from node template \"{}\".",
                prop_name,
                capability.name,
                owner.name,
                self.context_name(topology)
            ))),
        }
    }

    // =========================================================================
    // get_attribute
    // =========================================================================

    fn validate_get_attribute(&self, topology: &TopologyTemplate) -> Result<()> {
        if self.args.len() < 2 {
            return Err(self.illegal_arguments());
        }
        let target = display(&self.args[0]);
        let attr_name = display(&self.args[1]);

        let entity = if target == HOST {
            let host = self.find_host(topology, |id| {
                topology.node_templates[id].type_def.attribute_def(&attr_name).is_some()
            })?;
            EntityRef::Node(host)
        } else {
            match self.find_entity(topology, &target)? {
                Some(e) => e,
                None => return Ok(()),
            }
        };

        let type_def = topology.entity_type(entity);
        if let Some(def) = type_def.attribute_def(&attr_name) {
            return self.check_attribute_path(topology, def, &self.args[2..]);
        }
        if self.args.len() == 2 {
            if find_property(topology.entity_properties(entity), &attr_name).is_some() {
                return Ok(());
            }
            return Err(ToscaError::NotFound(format!(
                "Attribute \"{}\" was not found in node template \"{}\".",
                attr_name,
                topology.entity_name(entity)
            )));
        }

        // [ template, req-or-cap, attribute, index... ]
        let EntityRef::Node(node_id) = entity else {
            return Err(ToscaError::NotFound(format!(
                "Attribute \"{}\" was not found in template \"{}\".",
                attr_name,
                topology.entity_name(entity)
            )));
        };
        let node = &topology.node_templates[node_id];
        let cap_attr = display(&self.args[2]);
        let capability = node
            .relationships
            .iter()
            .filter_map(|rid| topology.relationships.get(*rid))
            .find(|r| r.requirement == attr_name)
            .map(|r| {
                let t = &topology.node_templates[r.target];
                t.capability(&attr_name)
                    .or_else(|| r.capability.as_deref().and_then(|c| t.capability(c)))
            })
            .unwrap_or_else(|| node.capability(&attr_name));
        let Some(capability) = capability else {
            return Err(ToscaError::NotFound(format!(
                "Requirement/Capability \"{}\" referenced from node template \"{}\" was not found in node template \"{}\".",
                attr_name,
                self.context_name(topology),
                node.name
            )));
        };
        match capability.type_def.attribute_def(&cap_attr) {
            Some(def) => self.check_attribute_path(topology, def, &self.args[3..]),
            None => Err(ToscaError::NotFound(format!(
                "Attribute \"{}\" was not found in capability \"{}\" of node template \"{}\" referenced from node template \"{}\".",
                cap_attr,
                capability.name,
                node.name,
                self.context_name(topology)
            ))),
        }
    }

    /// Trailing arguments must index lists, key maps, or name data type fields
    fn check_attribute_path(&self, topology: &TopologyTemplate, def: &Value, path: &[Value]) -> Result<()> {
        let mut value_type = def.get("type").and_then(Value::as_str).map(String::from);
        let mut entry = def.get("entry_schema").cloned();
        for elem in path {
            let unexpected = || {
                ToscaError::Validation(format!(
                    "Illegal arguments for function \"{}\". Unexpected attribute/index value \"{}\".",
                    self.kind,
                    display(elem)
                ))
            };
            let entry_type = |e: &Option<Value>| match e {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Mapping(m)) => m.get("type").and_then(Value::as_str).map(String::from),
                _ => None,
            };
            match value_type.as_deref() {
                Some("list") => {
                    if !matches!(elem, Value::Number(n) if n.as_u64().is_some()) {
                        return Err(ToscaError::Validation(format!(
                            "Illegal arguments for function \"{}\". \"{}\" Expected positive integer argument.",
                            self.kind,
                            display(elem)
                        )));
                    }
                    value_type = entry_type(&entry);
                    entry = None;
                }
                Some("map") => {
                    value_type = entry_type(&entry);
                    entry = None;
                }
                Some(other) => {
                    let datatype = topology
                        .registry()
                        .lookup(TypeKind::Data, other)
                        .ok_or_else(unexpected)?;
                    let field = datatype.property_def(&display(elem)).ok_or_else(unexpected)?;
                    value_type = field.get("type").and_then(Value::as_str).map(String::from);
                    entry = field.get("entry_schema").cloned();
                }
                None => return Err(unexpected()),
            }
        }
        Ok(())
    }

    // =========================================================================
    // get_operation_output, concat, token
    // =========================================================================

    fn validate_operation_output(&self, topology: &TopologyTemplate) -> Result<()> {
        if self.args.len() != 4 {
            return Err(ToscaError::Validation(format!(
                "Illegal arguments for function \"{}\". Expected arguments: \"template_name\",\"interface_name\",\"operation_name\",\"output_variable_name\".",
                self.kind
            )));
        }
        self.find_entity(topology, &display(&self.args[0]))?;

        let interface = self.arg_str(1).unwrap_or_default();
        let operation = self.arg_str(2).unwrap_or_default();
        let (full, short) = match interface {
            LIFECYCLE | LIFECYCLE_SHORTNAME => (LIFECYCLE, LIFECYCLE_SHORTNAME),
            CONFIGURE | CONFIGURE_SHORTNAME => (CONFIGURE, CONFIGURE_SHORTNAME),
            _ => return Err(ToscaError::Validation("Enter a valid interface name.".to_string())),
        };
        let known = topology
            .registry()
            .lookup(TypeKind::Interface, full)
            .map(|t| t.operations.iter().any(|o| o == operation))
            .unwrap_or(false);
        if !known {
            return Err(ToscaError::Validation(format!(
                "Enter an operation of {} interface.",
                short
            )));
        }
        Ok(())
    }

    fn validate_concat(&self) -> Result<()> {
        if self.args.is_empty() {
            return Err(ToscaError::Validation(format!(
                "Invalid arguments for function \"{}\". Expected at least one arguments.",
                self.kind
            )));
        }
        Ok(())
    }

    fn validate_token(&self) -> Result<()> {
        if self.args.len() != 3 {
            return Err(ToscaError::Validation(format!(
                "Invalid arguments for function \"{}\". Expected at least three arguments.",
                self.kind
            )));
        }
        if !matches!(&self.args[1], Value::String(s) if s.chars().count() == 1) {
            return Err(ToscaError::Validation(format!(
                "Invalid arguments for function \"{}\". Expected single char value as second argument.",
                self.kind
            )));
        }
        if !matches!(&self.args[2], Value::Number(n) if n.is_i64() || n.is_u64()) {
            return Err(ToscaError::Validation(format!(
                "Invalid arguments for function \"{}\". Expected integer value as third argument.",
                self.kind
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display(&self.raw))
    }
}

fn find_property<'p>(props: &'p [Property], name: &str) -> Option<&'p Property> {
    props.iter().find(|p| p.name == name)
}

/// Apply trailing index/key arguments to a resolved value
fn index_into(kind: FunctionKind, mut value: Value, path: &[Value]) -> Result<Value> {
    for elem in path {
        value = match (&value, elem) {
            (Value::Sequence(items), Value::Number(n)) => n
                .as_u64()
                .and_then(|i| items.get(i as usize))
                .cloned(),
            (Value::Mapping(map), key) => map.get(key).cloned(),
            _ => None,
        }
        .ok_or_else(|| {
            ToscaError::Validation(format!(
                "Illegal arguments for function \"{}\". Unexpected attribute/index value \"{}\".",
                kind,
                display(elem)
            ))
        })?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_is_function() {
        assert!(is_function(&yaml("{get_input: cpus}")));
        assert!(is_function(&yaml("{get_attribute: [HOST, ip]}")));
        assert!(!is_function(&yaml("{get_input: cpus, extra: 1}")));
        assert!(!is_function(&yaml("{get_everything: x}")));
        assert!(!is_function(&yaml("cpus")));
    }

    #[test]
    fn test_parse_coerces_args_to_list() {
        let f = Function::parse(&yaml("{get_input: cpus}"), TemplateContext::Topology).unwrap();
        assert_eq!(f.kind, FunctionKind::GetInput);
        assert_eq!(f.args, vec![Value::from("cpus")]);

        let f = Function::parse(&yaml("{concat: [a, b]}"), TemplateContext::Outputs).unwrap();
        assert_eq!(f.args.len(), 2);
        assert!(Function::parse(&yaml("{a: b}"), TemplateContext::Outputs).is_none());
    }

    #[test]
    fn test_argument_shape() {
        let concat = Function::parse(&yaml("{concat: []}"), TemplateContext::Outputs).unwrap();
        assert!(concat.validate_concat().is_err());

        let token = Function::parse(&yaml("{token: [abc, '.', 1]}"), TemplateContext::Outputs).unwrap();
        assert!(token.validate_token().is_ok());
        let token = Function::parse(&yaml("{token: [abc, '..', 1]}"), TemplateContext::Outputs).unwrap();
        assert!(token.validate_token().unwrap_err().to_string().contains("single char"));
        let token = Function::parse(&yaml("{token: [abc, '.', x]}"), TemplateContext::Outputs).unwrap();
        assert!(token.validate_token().unwrap_err().to_string().contains("integer"));
    }

    #[test]
    fn test_index_into() {
        let v = yaml("{a: [1, 2, 3]}");
        let out = index_into(FunctionKind::GetProperty, v.clone(), &[Value::from("a"), Value::from(2)]).unwrap();
        assert_eq!(out, Value::from(3));
        assert!(index_into(FunctionKind::GetProperty, v, &[Value::from("b")]).is_err());
    }
}
