//! Per-document type registry
//!
//! Catalog types are looked up first, then types declared by the document
//! and its imports. Custom types are flattened on first use and cached.

use serde_yaml::{Mapping, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::{definitions_from_document, FlatType, TypeCatalog, TypeDefinition, TypeKind};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::schema::{Schema, PRIMITIVE_TYPES};
use crate::value::{entries, unknown_keys};

/// Type definitions declared by a template and its imports, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomDefinitions {
    order: Vec<String>,
    types: HashMap<String, TypeDefinition>,
}

impl CustomDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the type sections of a parsed document
    pub fn from_document(doc: &Mapping, source: Option<&str>) -> Self {
        let mut defs = Self::new();
        for def in definitions_from_document(doc, source) {
            defs.insert(def);
        }
        defs
    }

    /// Insert a definition, returning the one it replaced
    pub fn insert(&mut self, def: TypeDefinition) -> Option<TypeDefinition> {
        if !self.types.contains_key(&def.name) {
            self.order.push(def.name.clone());
        }
        self.types.insert(def.name.clone(), def)
    }

    /// Add every definition of `other`; later definitions win
    pub fn merge(&mut self, other: CustomDefinitions) {
        for name in other.order {
            if let Some(def) = other.types.get(&name) {
                self.insert(def.clone());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.order.iter().filter_map(|n| self.types.get(n))
    }

    pub fn of_kind(&self, kind: TypeKind) -> impl Iterator<Item = &TypeDefinition> {
        self.iter().filter(move |d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Catalog plus custom definitions, with lazily flattened custom types
#[derive(Debug)]
pub struct TypeRegistry {
    catalog: Arc<TypeCatalog>,
    custom: CustomDefinitions,
    flattened: RefCell<HashMap<String, Arc<FlatType>>>,
    /// Custom types whose broken parent chain was already reported
    broken: RefCell<HashSet<String>>,
}

impl TypeRegistry {
    pub fn new(catalog: Arc<TypeCatalog>, custom: CustomDefinitions) -> Self {
        Self {
            catalog,
            custom,
            flattened: RefCell::new(HashMap::new()),
            broken: RefCell::new(HashSet::new()),
        }
    }

    /// Registry over the normative catalog only
    pub fn normative() -> Result<Self> {
        Ok(Self::new(TypeCatalog::normative()?, CustomDefinitions::new()))
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn custom(&self) -> &CustomDefinitions {
        &self.custom
    }

    /// Resolve a type of the given kind, or fail with `InvalidType`
    pub fn resolve(&self, kind: TypeKind, name: &str) -> Result<Arc<FlatType>> {
        let mut stack = Vec::new();
        self.resolve_with(kind, name, &mut stack)
    }

    /// Resolve a type, `None` when unknown or broken
    pub fn lookup(&self, kind: TypeKind, name: &str) -> Option<Arc<FlatType>> {
        self.resolve(kind, name).ok()
    }

    /// Whether resolving this custom type already failed in `validate_custom`
    pub fn is_reported_broken(&self, kind: TypeKind, name: &str) -> bool {
        let broken = self.broken.borrow();
        kind.candidate_names(name)
            .iter()
            .filter_map(|n| self.custom.get(n).filter(|d| d.kind == kind))
            .any(|d| broken.contains(&d.name))
    }

    /// Resolve a type of any kind by its exact name
    pub fn lookup_any(&self, name: &str) -> Option<Arc<FlatType>> {
        if let Some(flat) = self.catalog.get(name) {
            return Some(flat.clone());
        }
        let def = self.custom.get(name)?;
        self.lookup(def.kind, name)
    }

    /// Whether `type_name` of `kind` is `ancestor` or derives from it
    pub fn is_derived_from(&self, kind: TypeKind, type_name: &str, ancestor: &str) -> bool {
        let Some(flat) = self.lookup(kind, type_name) else {
            return false;
        };
        let ancestor = self
            .lookup(kind, ancestor)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| ancestor.to_string());
        flat.is_derived_from(&ancestor)
    }

    fn resolve_with(&self, kind: TypeKind, name: &str, stack: &mut Vec<String>) -> Result<Arc<FlatType>> {
        if let Some(flat) = self.catalog.lookup(kind, name) {
            return Ok(flat.clone());
        }

        let def = kind
            .candidate_names(name)
            .iter()
            .find_map(|n| self.custom.get(n).filter(|d| d.kind == kind))
            .ok_or_else(|| ToscaError::invalid_type(name))?;

        if let Some(flat) = self.flattened.borrow().get(&def.name) {
            return Ok(flat.clone());
        }
        if stack.iter().any(|s| s == &def.name) {
            stack.push(def.name.clone());
            return Err(ToscaError::CyclicType {
                name: def.name.clone(),
                chain: stack.join(" -> "),
            });
        }

        stack.push(def.name.clone());
        let parent = match def.derived_from() {
            Some(parent) => Some(self.resolve_with(kind, parent, stack)?),
            None => None,
        };
        stack.pop();

        let flat = Arc::new(FlatType::from_definition(def, parent.as_deref()));
        debug!(type_name = %flat.name, depth = flat.ancestors.len(), "Flattened custom type");
        self.flattened
            .borrow_mut()
            .insert(def.name.clone(), flat.clone());
        Ok(flat)
    }

    /// Validate every custom type definition
    pub fn validate_custom(&self, diag: &mut Diagnostics) -> Result<()> {
        for def in self.custom.iter() {
            self.validate_definition(def, diag)?;
        }
        Ok(())
    }

    fn validate_definition(&self, def: &TypeDefinition, diag: &mut Diagnostics) -> Result<()> {
        let what = format!("Type \"{}\"", def.name);

        if let Some(allowed) = def.kind.allowed_keys() {
            for key in unknown_keys(&def.raw, allowed) {
                diag.report(ToscaError::unknown(&what, key))?;
            }
        }

        // Parent chain must exist and be acyclic
        if let Err(e) = self.resolve(def.kind, &def.name) {
            self.broken.borrow_mut().insert(def.name.clone());
            diag.report(e)?;
            return Ok(());
        }

        if let Some(Value::Mapping(props)) = def.raw.get(super::PROPERTIES) {
            for (name, raw) in entries(props) {
                match Schema::new(name, raw) {
                    Ok(schema) => {
                        for key in schema.unknown_keys() {
                            diag.report(ToscaError::unknown(format!("Schema definition of \"{}\"", name), key))?;
                        }
                        self.check_property_type(schema.type_name(), diag)?;
                        if let Err(e) = schema.constraints() {
                            diag.report(e)?;
                        }
                    }
                    Err(e) => diag.report(e)?,
                }
            }
        }

        match def.kind {
            TypeKind::Node => {
                if let Some(Value::Mapping(caps)) = def.raw.get(super::CAPABILITIES) {
                    for (cap_name, cap) in entries(caps) {
                        let cap_type = match cap {
                            Value::String(s) => Some(s.as_str()),
                            Value::Mapping(m) => m.get("type").and_then(Value::as_str),
                            _ => None,
                        };
                        match cap_type {
                            Some(t) => {
                                if self.lookup(TypeKind::Capability, t).is_none() {
                                    diag.report(ToscaError::invalid_type(t))?;
                                }
                            }
                            None => diag.report(ToscaError::missing(
                                format!("Capability \"{}\" of type \"{}\"", cap_name, def.name),
                                "type",
                            ))?,
                        }
                    }
                }
                if let Some(reqs) = def.raw.get(super::REQUIREMENTS) {
                    if !reqs.is_sequence() {
                        diag.report(ToscaError::mismatch(
                            format!("\"requirements\" of type \"{}\"", def.name),
                            "list",
                        ))?;
                    }
                }
            }
            TypeKind::Relationship => {
                if let Some(targets) = def.raw.get(super::VALID_TARGET_TYPES) {
                    for t in targets.as_sequence().into_iter().flatten() {
                        let Some(t) = t.as_str() else { continue };
                        if self.lookup(TypeKind::Capability, t).is_none() {
                            diag.report(ToscaError::invalid_type(t))?;
                        }
                    }
                }
            }
            TypeKind::Group => {
                for member in def.raw.get(super::MEMBERS).and_then(Value::as_sequence).into_iter().flatten() {
                    let Some(m) = member.as_str() else { continue };
                    if self.lookup(TypeKind::Node, m).is_none() && self.lookup(TypeKind::Group, m).is_none() {
                        diag.report(ToscaError::invalid_type(m))?;
                    }
                }
            }
            TypeKind::Policy => {
                for target in def.raw.get(super::TARGETS).and_then(Value::as_sequence).into_iter().flatten() {
                    let Some(t) = target.as_str() else { continue };
                    if self.lookup(TypeKind::Node, t).is_none() && self.lookup(TypeKind::Group, t).is_none() {
                        diag.report(ToscaError::invalid_type(t))?;
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn check_property_type(&self, type_name: &str, diag: &mut Diagnostics) -> Result<()> {
        if PRIMITIVE_TYPES.contains(&type_name) || self.lookup(TypeKind::Data, type_name).is_some() {
            return Ok(());
        }
        diag.report(ToscaError::invalid_type(type_name))
    }
}
