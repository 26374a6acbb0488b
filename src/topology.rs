//! Topology Template
//!
//! Owns every entity of a topology in arenas indexed by id and builds them in
//! phases: inputs, relationship templates, node templates, relationships,
//! the relationship graph, outputs, groups and policies, substitution
//! mappings, and finally the intrinsic function pass. Relationships are only
//! resolved once every node template exists, so templates may reference each
//! other in any order.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::catalog::{
    CustomDefinitions, FlatType, TypeKind, TypeRegistry, HOSTED_ON, RELATIONSHIP_ROOT,
};
use crate::diagnostics::Diagnostics;
use crate::entity::{
    Group, Input, NodeTemplate, Output, Policy, Property, PropertyValue, Relationship, RelationshipSpec,
    RelationshipTemplate, Requirement, SubstitutionMappings,
};
use crate::error::{Result, ToscaError};
use crate::functions::Function;
use crate::value::{entries, get_str, single_entry};

pub const INPUTS: &str = "inputs";
pub const NODE_TEMPLATES: &str = "node_templates";
pub const RELATIONSHIP_TEMPLATES: &str = "relationship_templates";
pub const OUTPUTS: &str = "outputs";
pub const GROUPS: &str = "groups";
pub const POLICIES: &str = "policies";
pub const SUBSTITUTION_MAPPINGS: &str = "substitution_mappings";

const SECTIONS: &[&str] = &[
    "description",
    INPUTS,
    NODE_TEMPLATES,
    RELATIONSHIP_TEMPLATES,
    OUTPUTS,
    GROUPS,
    SUBSTITUTION_MAPPINGS,
    POLICIES,
    "metadata",
    "workflows",
];

/// Reference to any entity that can own properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Node(usize),
    RelationshipTemplate(usize),
    Relationship(usize),
    Group(usize),
    Policy(usize),
}

/// A fully built and validated topology
#[derive(Debug)]
pub struct TopologyTemplate {
    pub description: Option<String>,
    pub inputs: Vec<Input>,
    pub node_templates: Vec<NodeTemplate>,
    pub relationship_templates: Vec<RelationshipTemplate>,
    pub relationships: Vec<Relationship>,
    pub outputs: Vec<Output>,
    pub groups: Vec<Group>,
    pub policies: Vec<Policy>,
    pub substitution_mappings: Option<SubstitutionMappings>,
    registry: TypeRegistry,
    /// Validated input values supplied by the caller
    params: Mapping,
    /// Templates present in the document that could not be built
    skipped: HashSet<String>,
    node_index: HashMap<String, usize>,
    /// Node ids as weights, relationship ids on edges
    graph: DiGraph<usize, usize>,
}

impl TopologyTemplate {
    /// Build the topology from its `topology_template` section.
    ///
    /// `shared_relationship_templates` are relationship templates declared at
    /// the top level of the document.
    pub fn build(
        tpl: &Mapping,
        shared_relationship_templates: Option<&Mapping>,
        registry: TypeRegistry,
        params: &Mapping,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let mut topology = Self {
            description: get_str(tpl, "description").map(String::from),
            inputs: Vec::new(),
            node_templates: Vec::new(),
            relationship_templates: Vec::new(),
            relationships: Vec::new(),
            outputs: Vec::new(),
            groups: Vec::new(),
            policies: Vec::new(),
            substitution_mappings: None,
            registry,
            params: Mapping::new(),
            skipped: HashSet::new(),
            node_index: HashMap::new(),
            graph: DiGraph::new(),
        };

        crate::entity::check_fields(tpl, SECTIONS, "Topology template", diag)?;

        topology.build_inputs(section(tpl, INPUTS, diag)?, params, diag)?;

        let mut rel_tpls = shared_relationship_templates.cloned().unwrap_or_default();
        if let Some(own) = section(tpl, RELATIONSHIP_TEMPLATES, diag)? {
            rel_tpls.extend(own.clone());
        }
        for (name, raw) in entries(&rel_tpls) {
            let id = topology.relationship_templates.len();
            match RelationshipTemplate::build(id, name, raw, &topology.registry, diag)? {
                Some(t) => topology.relationship_templates.push(t),
                None => {
                    topology.skipped.insert(name.to_string());
                }
            }
        }

        if let Some(nodes) = section(tpl, NODE_TEMPLATES, diag)? {
            for (name, raw) in entries(nodes) {
                let id = topology.node_templates.len();
                match NodeTemplate::build(id, name, raw, &topology.registry, diag)? {
                    Some(node) => {
                        topology.node_index.insert(name.to_string(), id);
                        topology.node_templates.push(node);
                    }
                    None => {
                        topology.skipped.insert(name.to_string());
                    }
                }
            }
        }
        info!(
            nodes = topology.node_templates.len(),
            skipped = topology.skipped.len(),
            "Built node templates"
        );

        topology.resolve_relationships(diag)?;
        topology.build_graph();

        if let Some(outputs) = section(tpl, OUTPUTS, diag)? {
            for (name, raw) in entries(outputs) {
                if let Some(output) = Output::build(name, raw, diag)? {
                    topology.outputs.push(output);
                }
            }
        }

        topology.build_groups(section(tpl, GROUPS, diag)?, diag)?;
        topology.build_policies(tpl.get(POLICIES), diag)?;

        if let Some(raw) = tpl.get(SUBSTITUTION_MAPPINGS) {
            if let Some(mappings) = SubstitutionMappings::build(raw, &topology.registry, diag)? {
                mappings.validate(&topology.inputs, &topology.node_templates, &topology.outputs, diag)?;
                topology.substitution_mappings = Some(mappings);
            }
        }

        topology.validate_functions(diag)?;
        Ok(topology)
    }

    // =========================================================================
    // Build phases
    // =========================================================================

    fn build_inputs(&mut self, defs: Option<&Mapping>, params: &Mapping, diag: &mut Diagnostics) -> Result<()> {
        let Some(defs) = defs else {
            return Ok(());
        };
        for (name, raw) in entries(defs) {
            let Some(input) = Input::build(name, raw, &self.registry, diag)? else {
                continue;
            };
            match params.get(name) {
                Some(value) => match input.validate(value, &self.registry) {
                    Ok(normalized) => {
                        self.params.insert(Value::from(name), normalized);
                    }
                    Err(e) => diag.report(e)?,
                },
                None => {
                    if let Some(default) = input.default() {
                        if let Err(e) = input.validate(default, &self.registry) {
                            diag.report(e)?;
                        }
                    } else if input.required() {
                        warn!(input = name, "The required input parameter is not provided");
                    }
                }
            }
            self.inputs.push(input);
        }
        for (name, _) in entries(params) {
            if !defs.contains_key(name) {
                debug!(param = name, "Ignoring parameter with no matching input");
            }
        }
        Ok(())
    }

    fn resolve_relationships(&mut self, diag: &mut Diagnostics) -> Result<()> {
        for node_id in 0..self.node_templates.len() {
            let requirements = self.node_templates[node_id].requirements.clone();
            for req in &requirements {
                self.resolve_requirement(node_id, req, diag)?;
            }
        }
        debug!(relationships = self.relationships.len(), "Resolved relationships");
        Ok(())
    }

    fn resolve_requirement(&mut self, source: usize, req: &Requirement, diag: &mut Diagnostics) -> Result<()> {
        let source_name = self.node_templates[source].name.clone();
        let Some(target_name) = req.node.as_deref() else {
            debug!(template = %source_name, requirement = %req.name, "Requirement names no target node");
            return Ok(());
        };

        let target = match self.node_index.get(target_name) {
            Some(&t) => t,
            None if self.skipped.contains(target_name) => {
                debug!(template = %source_name, target = target_name, "Requirement target was not built");
                return Ok(());
            }
            None if self.registry.lookup(TypeKind::Node, target_name).is_some() => {
                return diag.report(ToscaError::NotImplemented(format!(
                    "Lookup by TOSCA types is not supported. Requirement for \"{}\" can not be full-filled.",
                    req.name
                )));
            }
            None => {
                return diag.report(ToscaError::NotFound(format!(
                    "Node template \"{}\" was not found.",
                    target_name
                )));
            }
        };

        let type_req = self.node_templates[source].requirement_definition(&req.name).cloned();

        let mut template = None;
        let mut inline = None;
        let rel_type = match &req.relationship {
            Some(RelationshipSpec::Named(name)) => {
                if let Some(t) = self.relationship_templates.iter().find(|t| &t.name == name) {
                    template = Some(t.id);
                    t.type_def.clone()
                } else if self.skipped.contains(name) {
                    return Ok(());
                } else {
                    match self.registry.resolve(TypeKind::Relationship, name) {
                        Ok(t) => t,
                        Err(e) => return diag.report(e),
                    }
                }
            }
            Some(RelationshipSpec::Inline(body)) => {
                // Missing type was reported while parsing
                let Some(type_name) = get_str(body, "type") else {
                    return Ok(());
                };
                inline = Some(body.clone());
                match self.registry.resolve(TypeKind::Relationship, type_name) {
                    Ok(t) => t,
                    Err(e) => return diag.report(e),
                }
            }
            None => {
                let declared = type_req.as_ref().and_then(|d| match d.get("relationship") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Mapping(m)) => get_str(m, "type").map(String::from),
                    _ => None,
                });
                let name = declared.as_deref().unwrap_or(RELATIONSHIP_ROOT);
                match self.registry.resolve(TypeKind::Relationship, name) {
                    Ok(t) => t,
                    Err(e) => return diag.report(e),
                }
            }
        };

        let wanted = req
            .capability
            .clone()
            .or_else(|| type_req.as_ref().and_then(|d| get_str(d, "capability")).map(String::from));
        let capability = match wanted {
            Some(cap) => {
                let matched = self.match_capability(target, &cap);
                if matched.is_none() {
                    diag.report(ToscaError::Validation(format!(
                        "Requirement \"{}\" of node template \"{}\" needs capability \"{}\", which node template \"{}\" does not provide.",
                        req.name, source_name, cap, target_name
                    )))?;
                }
                matched
            }
            None => None,
        };

        let id = self.relationships.len();
        let mut relationship = Relationship::inline(
            id,
            &req.name,
            rel_type,
            source,
            target,
            inline.as_ref(),
            &self.registry,
            diag,
        )?;
        relationship.template = template;
        relationship.capability = capability;
        debug!(
            source = %source_name,
            target = target_name,
            relationship = %relationship.type_name,
            "Resolved requirement"
        );
        self.relationships.push(relationship);
        self.node_templates[source].relationships.push(id);
        Ok(())
    }

    /// Capability of `target` named `cap`, or whose type derives from `cap`
    fn match_capability(&self, target: usize, cap: &str) -> Option<String> {
        let node = &self.node_templates[target];
        if node.capability(cap).is_some() {
            return Some(cap.to_string());
        }
        let cap_type = self.registry.lookup(TypeKind::Capability, cap)?;
        let matched = node.capabilities_of_type(&cap_type.name).next().map(|c| c.name.clone());
        matched
    }

    fn build_graph(&mut self) {
        let mut graph = DiGraph::with_capacity(self.node_templates.len(), self.relationships.len());
        for node in &self.node_templates {
            graph.add_node(node.id);
        }
        for rel in &self.relationships {
            graph.add_edge(NodeIndex::new(rel.source), NodeIndex::new(rel.target), rel.id);
        }
        self.graph = graph;
    }

    fn build_groups(&mut self, defs: Option<&Mapping>, diag: &mut Diagnostics) -> Result<()> {
        let Some(defs) = defs else {
            return Ok(());
        };
        let group_names: HashSet<&str> = entries(defs).map(|(k, _)| k).collect();
        for (name, raw) in entries(defs) {
            let id = self.groups.len();
            let Some(group) = Group::build(id, name, raw, &self.registry, diag)? else {
                continue;
            };
            for member in &group.members {
                if group_names.contains(member.as_str()) || self.skipped.contains(member) {
                    continue;
                }
                let Some(&node_id) = self.node_index.get(member) else {
                    diag.report(ToscaError::InvalidGroupTarget {
                        what: member.clone(),
                        reason: format!("target member is not found in node_templates of group \"{}\".", name),
                    })?;
                    continue;
                };
                let allowed = group.allowed_member_types();
                if !allowed.is_empty() && !self.derives_from_any(&self.node_templates[node_id].type_def, allowed) {
                    diag.report(ToscaError::InvalidGroupTarget {
                        what: member.clone(),
                        reason: format!(
                            "type \"{}\" is not a valid member type of group type \"{}\".",
                            self.node_templates[node_id].type_name, group.type_name
                        ),
                    })?;
                }
            }
            self.groups.push(group);
        }
        Ok(())
    }

    /// Policies are written as a list of single-entry maps; a plain map is accepted too
    fn build_policies(&mut self, defs: Option<&Value>, diag: &mut Diagnostics) -> Result<()> {
        let defs: Vec<(&str, &Value)> = match defs {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Mapping(m)) => entries(m).collect(),
            Some(Value::Sequence(items)) => {
                let mut defs = Vec::with_capacity(items.len());
                for item in items {
                    match single_entry(item) {
                        Some(def) => defs.push(def),
                        None => diag.report(ToscaError::mismatch(
                            "Policy definition in topology template",
                            "single-entry map",
                        ))?,
                    }
                }
                defs
            }
            Some(_) => {
                return diag.report(ToscaError::mismatch("\"policies\" of topology template", "list"))
            }
        };
        for (name, raw) in defs {
            let id = self.policies.len();
            let Some(policy) = Policy::build(id, name, raw, &self.registry, diag)? else {
                continue;
            };
            let allowed: Vec<String> = policy.allowed_target_types().into_iter().map(String::from).collect();
            for target in &policy.targets {
                if self.skipped.contains(target) {
                    continue;
                }
                let target_type = match (self.node_index.get(target), self.group(target)) {
                    (Some(&node_id), _) => &self.node_templates[node_id].type_def,
                    (None, Some(group)) => &group.type_def,
                    (None, None) => {
                        diag.report(ToscaError::InvalidGroupTarget {
                            what: target.clone(),
                            reason: format!("target of policy \"{}\" is neither a node template nor a group.", name),
                        })?;
                        continue;
                    }
                };
                if !allowed.is_empty() && !self.derives_from_any(target_type, &allowed) {
                    diag.report(ToscaError::InvalidGroupTarget {
                        what: target.clone(),
                        reason: format!(
                            "type \"{}\" is not a valid target type of policy type \"{}\".",
                            target_type.name, policy.type_name
                        ),
                    })?;
                }
            }
            self.policies.push(policy);
        }
        Ok(())
    }

    /// Whether a type derives from any of `allowed` (node or group type names)
    fn derives_from_any(&self, flat: &FlatType, allowed: &[String]) -> bool {
        allowed.iter().any(|a| {
            let full = self
                .registry
                .lookup(flat.kind, a)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| a.clone());
            flat.is_derived_from(&full)
        })
    }

    /// Validate every intrinsic function now that all references can be resolved
    fn validate_functions(&self, diag: &mut Diagnostics) -> Result<()> {
        let mut count = 0;
        for function in self.functions() {
            function.validate(self, diag)?;
            count += 1;
        }
        debug!(functions = count, "Validated intrinsic functions");
        Ok(())
    }

    /// Every function value held anywhere in the topology
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        fn of_props(props: &[Property]) -> impl Iterator<Item = &PropertyValue> {
            props.iter().map(|p| &p.value)
        }
        fn of_ops(ops: &[crate::entity::InterfaceOperation]) -> impl Iterator<Item = &PropertyValue> {
            ops.iter().flat_map(|o| o.inputs.iter().map(|(_, v)| v))
        }

        let nodes = self.node_templates.iter().flat_map(|n| {
            of_props(&n.properties)
                .chain(n.capabilities.iter().flat_map(|c| of_props(&c.properties)))
                .chain(of_ops(&n.interfaces))
        });
        let rel_tpls = self
            .relationship_templates
            .iter()
            .flat_map(|t| of_props(&t.properties).chain(of_ops(&t.interfaces)));
        let rels = self
            .relationships
            .iter()
            .flat_map(|r| of_props(&r.properties).chain(of_ops(&r.interfaces)));
        let groups = self
            .groups
            .iter()
            .flat_map(|g| of_props(&g.properties).chain(of_ops(&g.interfaces)));
        let policies = self.policies.iter().flat_map(|p| of_props(&p.properties));
        let outputs = self.outputs.iter().map(|o| &o.value);

        nodes
            .chain(rel_tpls)
            .chain(rels)
            .chain(groups)
            .chain(policies)
            .chain(outputs)
            .filter_map(PropertyValue::as_function)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn custom_defs(&self) -> &CustomDefinitions {
        self.registry.custom()
    }

    pub fn nodetemplates(&self) -> &[NodeTemplate] {
        &self.node_templates
    }

    pub fn node_by_name(&self, name: &str) -> Option<&NodeTemplate> {
        self.node_index.get(name).map(|&id| &self.node_templates[id])
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Validated caller-supplied value of an input
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }

    /// Whether `name` is a template that appeared in the document but failed to build
    pub fn is_skipped(&self, name: &str) -> bool {
        self.skipped.contains(name)
    }

    /// Source and target of the first relationship using a relationship template
    pub fn relationship_template_endpoints(&self, id: usize) -> Option<(usize, usize)> {
        self.relationships
            .iter()
            .find(|r| r.template == Some(id))
            .map(|r| (r.source, r.target))
    }

    pub fn entity_name(&self, entity: EntityRef) -> &str {
        match entity {
            EntityRef::Node(id) => &self.node_templates[id].name,
            EntityRef::RelationshipTemplate(id) => &self.relationship_templates[id].name,
            EntityRef::Relationship(id) => {
                let rel = &self.relationships[id];
                match rel.template {
                    Some(t) => &self.relationship_templates[t].name,
                    None => &rel.requirement,
                }
            }
            EntityRef::Group(id) => &self.groups[id].name,
            EntityRef::Policy(id) => &self.policies[id].name,
        }
    }

    pub fn entity_type(&self, entity: EntityRef) -> &FlatType {
        match entity {
            EntityRef::Node(id) => &self.node_templates[id].type_def,
            EntityRef::RelationshipTemplate(id) => &self.relationship_templates[id].type_def,
            EntityRef::Relationship(id) => &self.relationships[id].type_def,
            EntityRef::Group(id) => &self.groups[id].type_def,
            EntityRef::Policy(id) => &self.policies[id].type_def,
        }
    }

    pub fn entity_properties(&self, entity: EntityRef) -> &[Property] {
        match entity {
            EntityRef::Node(id) => &self.node_templates[id].properties,
            EntityRef::RelationshipTemplate(id) => &self.relationship_templates[id].properties,
            EntityRef::Relationship(id) => {
                let rel = &self.relationships[id];
                match rel.template {
                    Some(t) => &self.relationship_templates[t].properties,
                    None => &rel.properties,
                }
            }
            EntityRef::Group(id) => &self.groups[id].properties,
            EntityRef::Policy(id) => &self.policies[id].properties,
        }
    }

    // =========================================================================
    // Relationship graph
    // =========================================================================

    /// Relationships whose source is `node`, in requirement order
    pub fn relationships_of(&self, node: usize) -> impl Iterator<Item = &Relationship> {
        self.node_templates[node].relationships.iter().map(|&rid| &self.relationships[rid])
    }

    /// Relationship type to target node, for each relationship of `node`
    pub fn node_relationships(&self, node: usize) -> Vec<(&str, &NodeTemplate)> {
        self.relationships_of(node)
            .map(|r| (r.type_name.as_str(), &self.node_templates[r.target]))
            .collect()
    }

    /// Nodes `node` has a relationship to
    pub fn related_nodes(&self, node: usize) -> Vec<&NodeTemplate> {
        let mut seen = HashSet::new();
        self.relationships_of(node)
            .filter(|r| seen.insert(r.target))
            .map(|r| &self.node_templates[r.target])
            .collect()
    }

    /// Nodes with a relationship to `node`
    pub fn dependents(&self, node: usize) -> Vec<&NodeTemplate> {
        let mut sources: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(node), Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources.into_iter().map(|id| &self.node_templates[id]).collect()
    }

    /// Targets of `HostedOn` (or derived) relationships of `node`
    pub fn hosts_of(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.relationships_of(node)
            .filter(|r| r.is_derived_from(HOSTED_ON))
            .map(|r| r.target)
    }

    /// Nodes ordered so every node comes after the nodes it relates to;
    /// `None` when the graph has a cycle
    pub fn topological_order(&self) -> Option<Vec<&NodeTemplate>> {
        let order = toposort(&self.graph, None).ok()?;
        Some(
            order
                .into_iter()
                .rev()
                .map(|idx| &self.node_templates[self.graph[idx]])
                .collect(),
        )
    }

    /// Groups of node names that depend on each other in a cycle
    pub fn dependency_cycles(&self) -> Vec<Vec<&str>> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                scc.into_iter()
                    .map(|idx| self.node_templates[self.graph[idx]].name.as_str())
                    .collect()
            })
            .collect()
    }

    /// Graphviz rendering of the relationship graph
    pub fn to_dot(&self) -> String {
        let labelled = self.graph.map(
            |_, &node| self.node_templates[node].name.as_str(),
            |_, &rel| self.relationships[rel].type_name.as_str(),
        );
        format!(
            "digraph topology {{\n{}}}\n",
            Dot::with_config(&labelled, &[Config::GraphContentOnly])
        )
    }
}

fn section<'a>(tpl: &'a Mapping, key: &str, diag: &mut Diagnostics) -> Result<Option<&'a Mapping>> {
    crate::entity::section(tpl, key, "topology template", diag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(src: &str, params: &str) -> (TopologyTemplate, Diagnostics) {
        let tpl: Value = serde_yaml::from_str(src).unwrap();
        let params: Value = serde_yaml::from_str(params).unwrap();
        let mut diag = Diagnostics::collecting();
        let topology = TopologyTemplate::build(
            tpl.as_mapping().unwrap(),
            None,
            TypeRegistry::normative().unwrap(),
            params.as_mapping().unwrap(),
            &mut diag,
        )
        .unwrap();
        (topology, diag)
    }

    const STACK: &str = r#"
node_templates:
  app:
    type: tosca.nodes.WebApplication
    requirements:
      - host: web
  web:
    type: tosca.nodes.WebServer
    requirements:
      - host: server
  server:
    type: tosca.nodes.Compute
"#;

    #[test]
    fn test_forward_references_resolve() {
        let (topology, diag) = build(STACK, "{}");
        assert!(diag.is_empty(), "{}", diag);
        let app = topology.node_by_name("app").unwrap();
        let rels = topology.node_relationships(app.id);
        assert_eq!(rels, vec![("tosca.relationships.HostedOn", topology.node_by_name("web").unwrap())]);
        assert_eq!(topology.hosts_of(app.id).collect::<Vec<_>>(), vec![topology.node_by_name("web").unwrap().id]);
    }

    #[test]
    fn test_topological_order_puts_hosts_first() {
        let (topology, _) = build(STACK, "{}");
        let order: Vec<&str> = topology
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, vec!["server", "web", "app"]);
        assert!(topology.dependency_cycles().is_empty());
        assert!(topology.to_dot().contains("HostedOn"));
    }

    #[test]
    fn test_dependency_cycle() {
        let (topology, _) = build(
            r#"
node_templates:
  a:
    type: tosca.nodes.Root
    requirements:
      - dependency: b
  b:
    type: tosca.nodes.Root
    requirements:
      - dependency: a
"#,
            "{}",
        );
        assert!(topology.topological_order().is_none());
        assert_eq!(topology.dependency_cycles().len(), 1);
    }

    #[test]
    fn test_unknown_target_and_type_lookup() {
        let (_, diag) = build(
            r#"
node_templates:
  app:
    type: tosca.nodes.SoftwareComponent
    requirements:
      - host: nowhere
  other:
    type: tosca.nodes.SoftwareComponent
    requirements:
      - host: tosca.nodes.Compute
"#,
            "{}",
        );
        assert_eq!(diag.of_kind("NotFound").count(), 1);
        assert_eq!(diag.of_kind("NotImplemented").count(), 1);
    }

    #[test]
    fn test_capability_mismatch() {
        let (_, diag) = build(
            r#"
node_templates:
  app:
    type: tosca.nodes.SoftwareComponent
    requirements:
      - host: volume
  volume:
    type: tosca.nodes.BlockStorage
    properties:
      size: 10 GB
"#,
            "{}",
        );
        assert_eq!(diag.of_kind("ValidationError").count(), 1);
    }

    #[test]
    fn test_named_relationship_template() {
        let (topology, diag) = build(
            r#"
node_templates:
  server:
    type: tosca.nodes.Compute
    requirements:
      - local_storage:
          node: volume
          relationship: attachment
  volume:
    type: tosca.nodes.BlockStorage
    properties:
      size: 10 GB
relationship_templates:
  attachment:
    type: tosca.relationships.AttachesTo
    properties:
      location: /mnt
"#,
            "{}",
        );
        assert!(diag.is_empty(), "{}", diag);
        let rel = &topology.relationships[0];
        assert_eq!(rel.template, Some(0));
        assert_eq!(rel.capability.as_deref(), Some("attachment"));
        assert_eq!(topology.relationship_template_endpoints(0), Some((0, 1)));
    }

    #[test]
    fn test_input_params_are_validated() {
        let src = "inputs:\n  cpus:\n    type: integer\n    constraints:\n      - in_range: [1, 8]\n";
        let (topology, diag) = build(src, "{cpus: '4'}");
        assert!(diag.is_empty());
        assert_eq!(topology.param("cpus"), Some(&Value::from(4)));

        let (_, diag) = build(src, "{cpus: 16}");
        assert_eq!(diag.of_kind("ValidationError").count(), 1);
    }

    #[test]
    fn test_group_and_policy_targets() {
        let (_, diag) = build(
            r#"
node_templates:
  server:
    type: tosca.nodes.Compute
groups:
  servers:
    type: tosca.groups.Root
    members: [server, ghost]
policies:
  - placement:
      type: tosca.policies.Placement
      targets: [servers]
"#,
            "{}",
        );
        assert_eq!(diag.of_kind("InvalidGroupTarget").count(), 1);
    }
}
