//! Type Catalog
//!
//! Immutable lookup structure over normative type definitions, indexed by
//! fully-qualified type name. Every type is flattened once: the merged
//! property/attribute/capability/requirement/interface sets of its whole
//! `derived_from` chain are computed up front and shared behind an `Arc`.
//!
//! User-defined types live in a per-document [`TypeRegistry`], which layers
//! [`CustomDefinitions`] on top of the catalog and flattens them lazily.

pub mod registry;

pub use registry::{CustomDefinitions, TypeRegistry};

use include_dir::{include_dir, Dir};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Result, ToscaError};
use crate::value::{entries, get_map, get_str, single_entry};

/// Normative definitions compiled into the binary
static NORMATIVE_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/definitions");

// Common definition keys
pub const DERIVED_FROM: &str = "derived_from";
pub const PROPERTIES: &str = "properties";
pub const ATTRIBUTES: &str = "attributes";
pub const CAPABILITIES: &str = "capabilities";
pub const REQUIREMENTS: &str = "requirements";
pub const INTERFACES: &str = "interfaces";
pub const ARTIFACTS: &str = "artifacts";
pub const DESCRIPTION: &str = "description";
pub const METADATA: &str = "metadata";
pub const VERSION: &str = "version";
pub const VALID_TARGET_TYPES: &str = "valid_target_types";
pub const VALID_SOURCE_TYPES: &str = "valid_source_types";
pub const MEMBERS: &str = "members";
pub const TARGETS: &str = "targets";
pub const TRIGGERS: &str = "triggers";
pub const CONSTRAINTS: &str = "constraints";

// Well known types
pub const NODE_ROOT: &str = "tosca.nodes.Root";
pub const HOSTED_ON: &str = "tosca.relationships.HostedOn";
pub const DEPENDS_ON: &str = "tosca.relationships.DependsOn";
pub const RELATIONSHIP_ROOT: &str = "tosca.relationships.Root";
pub const LIFECYCLE: &str = "tosca.interfaces.node.lifecycle.Standard";
pub const CONFIGURE: &str = "tosca.interfaces.relationship.Configure";
pub const LIFECYCLE_SHORTNAME: &str = "Standard";
pub const CONFIGURE_SHORTNAME: &str = "Configure";

/// Keys of an interface type definition that are not operations
const INTERFACE_NON_OPERATION_KEYS: &[&str] =
    &[DERIVED_FROM, DESCRIPTION, VERSION, METADATA, "inputs", "type", "notifications"];

// =============================================================================
// Type Kind
// =============================================================================

/// The family a type definition belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Node,
    Relationship,
    Capability,
    Interface,
    Artifact,
    Data,
    Group,
    Policy,
}

impl TypeKind {
    pub const ALL: [TypeKind; 8] = [
        Self::Node,
        Self::Relationship,
        Self::Capability,
        Self::Interface,
        Self::Artifact,
        Self::Data,
        Self::Group,
        Self::Policy,
    ];

    /// Document section holding definitions of this kind
    pub fn section(&self) -> &'static str {
        match self {
            Self::Node => "node_types",
            Self::Relationship => "relationship_types",
            Self::Capability => "capability_types",
            Self::Interface => "interface_types",
            Self::Artifact => "artifact_types",
            Self::Data => "data_types",
            Self::Group => "group_types",
            Self::Policy => "policy_types",
        }
    }

    pub fn from_section(section: &str) -> Option<Self> {
        match section {
            "datatype_definitions" => Some(Self::Data),
            other => Self::ALL.iter().copied().find(|k| k.section() == other),
        }
    }

    /// Namespace prefix of normative types of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Node => "tosca.nodes.",
            Self::Relationship => "tosca.relationships.",
            Self::Capability => "tosca.capabilities.",
            Self::Interface => "tosca.interfaces.",
            Self::Artifact => "tosca.artifacts.",
            Self::Data => "tosca.datatypes.",
            Self::Group => "tosca.groups.",
            Self::Policy => "tosca.policies.",
        }
    }

    /// Keys allowed in a type definition of this kind; `None` allows anything
    pub fn allowed_keys(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Node => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, ATTRIBUTES,
                REQUIREMENTS, CAPABILITIES, INTERFACES, ARTIFACTS,
            ]),
            Self::Relationship => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, ATTRIBUTES,
                INTERFACES, VALID_TARGET_TYPES,
            ]),
            Self::Capability => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, ATTRIBUTES,
                VALID_SOURCE_TYPES,
            ]),
            Self::Interface => None,
            Self::Artifact => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, "mime_type", "file_ext",
            ]),
            Self::Data => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, CONSTRAINTS, "type",
                "entry_schema",
            ]),
            Self::Group => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, MEMBERS, TARGETS,
                INTERFACES,
            ]),
            Self::Policy => Some(&[
                DERIVED_FROM, VERSION, METADATA, DESCRIPTION, PROPERTIES, TARGETS, TRIGGERS,
            ]),
        }
    }

    /// Candidate fully-qualified names for a possibly abbreviated type name
    pub fn candidate_names(&self, name: &str) -> Vec<String> {
        let mut names = vec![name.to_string()];
        if let Some(short) = name.strip_prefix("tosca:") {
            names.push(format!("{}{}", self.prefix(), short));
        } else if !name.starts_with("tosca.") {
            names.push(format!("{}{}", self.prefix(), name));
            if *self == Self::Data {
                names.push(format!("{}network.{}", self.prefix(), name));
            }
        }
        names
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Node => "node",
            Self::Relationship => "relationship",
            Self::Capability => "capability",
            Self::Interface => "interface",
            Self::Artifact => "artifact",
            Self::Data => "data",
            Self::Group => "group",
            Self::Policy => "policy",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Type Definition
// =============================================================================

/// A raw type definition as declared in a document
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub raw: Mapping,
    /// Where the definition came from (file path or URL)
    pub source: Option<String>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>, kind: TypeKind, raw: Mapping) -> Self {
        Self { name: name.into(), kind, raw, source: None }
    }

    /// Parent type name, if any
    pub fn derived_from(&self) -> Option<&str> {
        get_str(&self.raw, DERIVED_FROM)
    }
}

/// Collect every typed section of a parsed document
pub fn definitions_from_document(doc: &Mapping, source: Option<&str>) -> Vec<TypeDefinition> {
    let mut defs = Vec::new();
    for (section, body) in entries(doc) {
        let Some(kind) = TypeKind::from_section(section) else {
            continue;
        };
        let Some(body) = body.as_mapping() else {
            continue;
        };
        for (name, raw) in entries(body) {
            let raw = raw.as_mapping().cloned().unwrap_or_default();
            defs.push(TypeDefinition {
                name: name.to_string(),
                kind,
                raw,
                source: source.map(String::from),
            });
        }
    }
    defs
}

// =============================================================================
// Flattened type
// =============================================================================

/// A type with its whole inheritance chain merged in
#[derive(Debug, Clone, PartialEq)]
pub struct FlatType {
    pub name: String,
    pub kind: TypeKind,
    /// This type first, then each parent up to the root
    pub ancestors: Vec<String>,
    pub description: Option<String>,
    /// Underlying type of a constrained data type alias
    pub value_type: Option<String>,
    pub constraints: Vec<Value>,
    pub properties: Mapping,
    pub attributes: Mapping,
    /// Capability name to definition (always a mapping with `type`)
    pub capabilities: Mapping,
    /// Requirement name to definition, in declaration order
    pub requirements: Vec<(String, Mapping)>,
    pub interfaces: Mapping,
    pub artifacts: Mapping,
    pub valid_target_types: Vec<String>,
    pub valid_source_types: Vec<String>,
    pub members: Vec<String>,
    /// Operation names (interface types)
    pub operations: Vec<String>,
    /// The type's own definition
    pub raw: Mapping,
}

impl FlatType {
    /// Merge a definition over its already flattened parent
    pub fn from_definition(def: &TypeDefinition, parent: Option<&FlatType>) -> Self {
        let mut flat = match parent {
            Some(p) => p.clone(),
            None => FlatType {
                name: String::new(),
                kind: def.kind,
                ancestors: Vec::new(),
                description: None,
                value_type: None,
                constraints: Vec::new(),
                properties: Mapping::new(),
                attributes: Mapping::new(),
                capabilities: Mapping::new(),
                requirements: Vec::new(),
                interfaces: Mapping::new(),
                artifacts: Mapping::new(),
                valid_target_types: Vec::new(),
                valid_source_types: Vec::new(),
                members: Vec::new(),
                operations: Vec::new(),
                raw: Mapping::new(),
            },
        };

        let raw = &def.raw;
        flat.name = def.name.clone();
        flat.kind = def.kind;
        flat.ancestors.insert(0, def.name.clone());
        flat.description = get_str(raw, DESCRIPTION).map(String::from);
        flat.raw = raw.clone();

        override_section(&mut flat.properties, get_map(raw, PROPERTIES));
        override_section(&mut flat.attributes, get_map(raw, ATTRIBUTES));
        merge_section(&mut flat.capabilities, get_map(raw, CAPABILITIES), true);
        merge_section(&mut flat.interfaces, get_map(raw, INTERFACES), false);
        merge_section(&mut flat.artifacts, get_map(raw, ARTIFACTS), false);

        if let Some(Value::Sequence(reqs)) = raw.get(REQUIREMENTS) {
            for entry in reqs {
                let Some((name, value)) = single_entry(entry) else {
                    continue;
                };
                let def = normalize_requirement(value);
                match flat.requirements.iter_mut().find(|(n, _)| n == name) {
                    Some((_, existing)) => shallow_merge(existing, &def),
                    None => flat.requirements.push((name.to_string(), def)),
                }
            }
        }

        if def.kind == TypeKind::Data {
            if let Some(t) = get_str(raw, "type") {
                flat.value_type = Some(t.to_string());
            }
            if let Some(Value::Sequence(c)) = raw.get(CONSTRAINTS) {
                flat.constraints = c.clone();
            }
        }
        if let Some(v) = string_list(raw, VALID_TARGET_TYPES) {
            flat.valid_target_types = v;
        }
        if let Some(v) = string_list(raw, VALID_SOURCE_TYPES) {
            flat.valid_source_types = v;
        }
        if let Some(v) = string_list(raw, MEMBERS) {
            flat.members = v;
        }
        if def.kind == TypeKind::Interface {
            for (op, _) in entries(raw) {
                if !INTERFACE_NON_OPERATION_KEYS.contains(&op) && !flat.operations.iter().any(|o| o == op) {
                    flat.operations.push(op.to_string());
                }
            }
        }

        flat
    }

    /// Immediate parent type name
    pub fn parent(&self) -> Option<&str> {
        self.ancestors.get(1).map(String::as_str)
    }

    /// Whether this type is `ancestor` or derives from it
    pub fn is_derived_from(&self, ancestor: &str) -> bool {
        self.ancestors.iter().any(|a| a == ancestor)
    }

    pub fn property_def(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn attribute_def(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn capability_def(&self, name: &str) -> Option<&Mapping> {
        self.capabilities.get(name).and_then(Value::as_mapping)
    }

    pub fn requirement_def(&self, name: &str) -> Option<&Mapping> {
        self.requirements.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        entries(&self.properties).map(|(k, _)| k)
    }
}

/// A redefined property or attribute replaces the inherited definition whole
fn override_section(target: &mut Mapping, own: Option<&Mapping>) {
    for (key, value) in own.into_iter().flatten() {
        target.insert(key.clone(), value.clone());
    }
}

fn merge_section(target: &mut Mapping, own: Option<&Mapping>, capability_shorthand: bool) {
    let Some(own) = own else {
        return;
    };
    for (key, value) in own {
        let value = match value {
            Value::String(s) if capability_shorthand => {
                let mut m = Mapping::new();
                m.insert(Value::from("type"), Value::from(s.clone()));
                Value::Mapping(m)
            }
            other => other.clone(),
        };
        match (target.get_mut(key), &value) {
            (Some(Value::Mapping(existing)), Value::Mapping(refined)) => shallow_merge(existing, refined),
            _ => {
                target.insert(key.clone(), value);
            }
        }
    }
}

fn shallow_merge(target: &mut Mapping, refined: &Mapping) {
    for (k, v) in refined {
        target.insert(k.clone(), v.clone());
    }
}

/// `host: tosca.capabilities.Container` is shorthand for `{capability: ...}`
fn normalize_requirement(value: &Value) -> Mapping {
    match value {
        Value::Mapping(m) => m.clone(),
        Value::String(s) => {
            let mut m = Mapping::new();
            m.insert(Value::from("capability"), Value::from(s.clone()));
            m
        }
        _ => Mapping::new(),
    }
}

fn string_list(raw: &Mapping, key: &str) -> Option<Vec<String>> {
    raw.get(key)?
        .as_sequence()
        .map(|s| s.iter().filter_map(|v| v.as_str().map(String::from)).collect())
}

// =============================================================================
// Type Catalog
// =============================================================================

/// A fuzzy search hit
#[derive(Debug, Clone, Serialize)]
pub struct TypeMatch {
    pub name: String,
    pub kind: TypeKind,
    pub score: i64,
}

/// Immutable, fully flattened set of normative types
#[derive(Debug)]
pub struct TypeCatalog {
    types: HashMap<String, Arc<FlatType>>,
    /// Hash over all loaded definition sources
    pub bundle_hash: String,
}

static NORMATIVE: OnceLock<Result<Arc<TypeCatalog>>> = OnceLock::new();

impl TypeCatalog {
    /// The process-wide normative catalog, loaded on first use
    pub fn normative() -> Result<Arc<TypeCatalog>> {
        NORMATIVE
            .get_or_init(|| Self::load_embedded(&[]).map(Arc::new))
            .clone()
    }

    /// Load the embedded definitions plus `*.yaml` files from extra directories
    pub fn load_embedded(extra_dirs: &[PathBuf]) -> Result<Self> {
        let mut sources: Vec<(String, String)> = NORMATIVE_DIR
            .files()
            .filter(|f| is_yaml(f.path()))
            .filter_map(|f| {
                f.contents_utf8()
                    .map(|c| (f.path().display().to_string(), c.to_string()))
            })
            .collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        for dir in extra_dirs {
            for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_file() || !is_yaml(path) {
                    continue;
                }
                let content = std::fs::read_to_string(path)?;
                sources.push((path.display().to_string(), content));
            }
        }

        Self::from_sources(&sources)
    }

    /// Build a catalog from named YAML sources
    pub fn from_sources(sources: &[(String, String)]) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut definitions: HashMap<String, TypeDefinition> = HashMap::new();

        for (name, content) in sources {
            hasher.update(content.as_bytes());
            let doc: Value = serde_yaml::from_str(content)
                .map_err(|e| ToscaError::Yaml(format!("{}: {}", name, e)))?;
            let Some(doc) = doc.as_mapping() else {
                return Err(ToscaError::Yaml(format!("{}: expected a mapping", name)));
            };
            for def in definitions_from_document(doc, Some(name)) {
                if definitions.contains_key(&def.name) {
                    debug!(type_name = %def.name, source = %name, "Overriding catalog type");
                }
                definitions.insert(def.name.clone(), def);
            }
        }

        let mut types = HashMap::with_capacity(definitions.len());
        let names: Vec<String> = definitions.keys().cloned().collect();
        for name in names {
            let mut stack = Vec::new();
            flatten_catalog_type(&name, &definitions, &mut types, &mut stack)?;
        }

        let bundle_hash = format!("{:x}", hasher.finalize());
        info!(types = types.len(), hash = %&bundle_hash[..12], "Loaded type catalog");

        Ok(Self { types, bundle_hash })
    }

    /// Look up a fully-qualified type name
    pub fn get(&self, name: &str) -> Option<&Arc<FlatType>> {
        self.types.get(name)
    }

    /// Look up a possibly abbreviated type name of the given kind
    pub fn lookup(&self, kind: TypeKind, name: &str) -> Option<&Arc<FlatType>> {
        kind.candidate_names(name)
            .iter()
            .find_map(|n| self.types.get(n).filter(|t| t.kind == kind))
    }

    /// Parent type name of a definition
    pub fn derived_from<'a>(&self, def: &'a TypeDefinition) -> Option<&'a str> {
        def.derived_from()
    }

    /// Whether `type_name` is `ancestor` or derives from it
    pub fn is_derived_from(&self, type_name: &str, ancestor: &str) -> bool {
        self.types
            .get(type_name)
            .map(|t| t.is_derived_from(ancestor))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All type names of one kind, sorted
    pub fn names(&self, kind: TypeKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .types
            .values()
            .filter(|t| t.kind == kind)
            .map(|t| t.name.as_str())
            .collect();
        names.sort();
        names
    }

    /// Search type names (fuzzy)
    pub fn search(&self, query: &str, limit: usize) -> Vec<TypeMatch> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        let mut results: Vec<TypeMatch> = self
            .types
            .values()
            .filter_map(|t| {
                matcher.fuzzy_match(&t.name, query).map(|score| TypeMatch {
                    name: t.name.clone(),
                    kind: t.kind,
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        results.truncate(limit);
        results
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

fn flatten_catalog_type(
    name: &str,
    definitions: &HashMap<String, TypeDefinition>,
    done: &mut HashMap<String, Arc<FlatType>>,
    stack: &mut Vec<String>,
) -> Result<Arc<FlatType>> {
    if let Some(flat) = done.get(name) {
        return Ok(flat.clone());
    }
    if stack.iter().any(|s| s == name) {
        stack.push(name.to_string());
        return Err(ToscaError::CyclicType {
            name: name.to_string(),
            chain: stack.join(" -> "),
        });
    }
    let def = definitions
        .get(name)
        .ok_or_else(|| ToscaError::invalid_type(name))?;

    stack.push(name.to_string());
    let parent = match def.derived_from() {
        Some(parent) => {
            let parent_name = def
                .kind
                .candidate_names(parent)
                .into_iter()
                .find(|n| definitions.contains_key(n))
                .ok_or_else(|| ToscaError::invalid_type(parent))?;
            Some(flatten_catalog_type(&parent_name, definitions, done, stack)?)
        }
        None => None,
    };
    stack.pop();

    let flat = Arc::new(FlatType::from_definition(def, parent.as_deref()));
    done.insert(name.to_string(), flat.clone());
    Ok(flat)
}
