//! Service templates
//!
//! [`ToscaTemplate`] is the entry point of the crate: it reads a document
//! (plain YAML or a CSAR archive), checks its version and top-level keys,
//! resolves its imports, validates custom type definitions, and builds the
//! topology. Problems are gathered in the template's [`Diagnostics`] unless
//! [`Mode::Immediate`] is requested, in which case the first one is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::catalog::{CustomDefinitions, TypeCatalog, TypeRegistry};
use crate::csar::{is_csar_path, Csar};
use crate::diagnostics::{Diagnostics, Mode};
use crate::entity::{check_fields, Group, Input, NodeTemplate, Output, Policy};
use crate::error::{Result, ToscaError};
use crate::imports::{DefaultFetcher, Fetcher, ImportResolver, Location, IMPORTS, REPOSITORIES};
use crate::topology::{TopologyTemplate, RELATIONSHIP_TEMPLATES};
use crate::value::{display, get_map, get_str};

pub const DEFINITIONS_VERSION: &str = "tosca_definitions_version";
pub const TOPOLOGY_TEMPLATE: &str = "topology_template";

/// Accepted values of `tosca_definitions_version`
pub const VALID_VERSIONS: &[&str] = &[
    "tosca_simple_yaml_1_0",
    "tosca_simple_yaml_1_1",
    "tosca_simple_yaml_1_2",
    "tosca_simple_yaml_1_3",
];

const SECTIONS: &[&str] = &[
    DEFINITIONS_VERSION,
    "template_name",
    "template_author",
    "template_version",
    "description",
    IMPORTS,
    REPOSITORIES,
    "dsl_definitions",
    "node_types",
    "relationship_types",
    RELATIONSHIP_TEMPLATES,
    "capability_types",
    "artifact_types",
    "data_types",
    "datatype_definitions",
    "interface_types",
    "group_types",
    "policy_types",
    TOPOLOGY_TEMPLATE,
    "metadata",
];

// =============================================================================
// Load options
// =============================================================================

/// How a template is loaded
#[derive(Clone)]
pub struct LoadOptions {
    pub mode: Mode,
    /// Values for topology inputs
    pub params: Mapping,
    /// Type catalog to resolve against; the normative catalog when unset
    pub catalog: Option<Arc<TypeCatalog>>,
    pub allow_remote: bool,
    /// Overrides how imported documents are read
    pub fetcher: Option<Arc<dyn Fetcher>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Collect,
            params: Mapping::new(),
            catalog: None,
            allow_remote: true,
            fetcher: None,
        }
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("allow_remote", &self.allow_remote)
            .finish_non_exhaustive()
    }
}

impl LoadOptions {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_params(mut self, params: Mapping) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(Value::from(name), value.into());
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<TypeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

// =============================================================================
// Template
// =============================================================================

/// A loaded and validated service template
#[derive(Debug)]
pub struct ToscaTemplate {
    pub path: Option<PathBuf>,
    version: Option<String>,
    description: Option<String>,
    metadata: Mapping,
    topology: TopologyTemplate,
    csar: Option<Csar>,
    diagnostics: Diagnostics,
}

impl ToscaTemplate {
    /// Load a YAML document or a `.zip`/`.csar` archive
    pub fn from_path(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        if is_csar_path(path) {
            return Self::from_csar(path, options);
        }
        if !path.is_file() {
            return Err(ToscaError::Validation(format!("\"{}\" is not a valid file.", path.display())));
        }
        info!(path = %path.display(), "Loading template");
        let text = std::fs::read_to_string(path)?;
        let doc = parse_document(&text)?;
        let mut template = Self::from_document(doc, Some(Location::Path(path.to_path_buf())), options)?;
        template.path = Some(path.to_path_buf());
        Ok(template)
    }

    /// Load a document held in memory; relative imports resolve against the working directory
    pub fn from_yaml_str(text: &str, options: &LoadOptions) -> Result<Self> {
        Self::from_document(parse_document(text)?, None, options)
    }

    fn from_csar(path: &Path, options: &LoadOptions) -> Result<Self> {
        let csar = Csar::open(path)?;
        let dir = csar.extract()?;
        let entry = dir.path().join(csar.entry_definitions());
        let doc = parse_document(&std::fs::read_to_string(&entry)?)?;

        let mut template = Self::from_document(doc.clone(), Some(Location::Path(entry)), options)?;
        csar.validate_artifacts(&doc, &mut template.diagnostics)?;
        template.path = Some(path.to_path_buf());
        template.csar = Some(csar);
        Ok(template)
    }

    /// Validate a parsed document located at `base`
    pub fn from_document(doc: Mapping, base: Option<Location>, options: &LoadOptions) -> Result<Self> {
        let mut diag = Diagnostics::new(options.mode);

        let version = check_version(&doc, &mut diag)?;
        check_fields(&doc, SECTIONS, "Template", &mut diag)?;

        let fetcher: Arc<dyn Fetcher> = match &options.fetcher {
            Some(f) => Arc::clone(f),
            None => Arc::new(DefaultFetcher::new(options.allow_remote)),
        };
        let mut custom = ImportResolver::new(fetcher.as_ref()).resolve(&doc, base.as_ref(), &mut diag)?;
        custom.merge(CustomDefinitions::from_document(&doc, base.as_ref().map(|b| b.to_string()).as_deref()));
        debug!(custom_types = custom.len(), "Collected custom type definitions");

        let catalog = match &options.catalog {
            Some(c) => Arc::clone(c),
            None => TypeCatalog::normative()?,
        };
        let registry = TypeRegistry::new(catalog, custom);
        registry.validate_custom(&mut diag)?;

        let empty = Mapping::new();
        let tpl = match doc.get(TOPOLOGY_TEMPLATE) {
            None | Some(Value::Null) => &empty,
            Some(Value::Mapping(m)) => m,
            Some(_) => {
                diag.report(ToscaError::mismatch("\"topology_template\" of template", "map"))?;
                &empty
            }
        };
        let topology = TopologyTemplate::build(
            tpl,
            get_map(&doc, RELATIONSHIP_TEMPLATES),
            registry,
            &options.params,
            &mut diag,
        )?;

        if diag.has_errors() {
            info!(errors = diag.error_count(), "Template validation found errors");
        } else {
            info!("Template validated");
        }

        Ok(Self {
            path: None,
            version,
            description: get_str(&doc, "description").map(String::from),
            metadata: get_map(&doc, "metadata").cloned().unwrap_or_default(),
            topology,
            csar: None,
            diagnostics: diag,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn metadata(&self) -> &Mapping {
        &self.metadata
    }

    pub fn inputs(&self) -> &[Input] {
        &self.topology.inputs
    }

    pub fn nodetemplates(&self) -> &[NodeTemplate] {
        self.topology.nodetemplates()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.topology.outputs
    }

    pub fn groups(&self) -> &[Group] {
        &self.topology.groups
    }

    pub fn policies(&self) -> &[Policy] {
        &self.topology.policies
    }

    pub fn topology_template(&self) -> &TopologyTemplate {
        &self.topology
    }

    pub fn custom_defs(&self) -> &CustomDefinitions {
        self.topology.custom_defs()
    }

    pub fn csar(&self) -> Option<&Csar> {
        self.csar.as_ref()
    }

    /// Every problem collected while loading
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// The template, or one error summarising everything collected
    pub fn into_result(self) -> Result<Self> {
        if self.diagnostics.has_errors() {
            self.diagnostics.clone().into_result()?;
        }
        Ok(self)
    }
}

fn parse_document(text: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(m) => Ok(m),
        other => Err(ToscaError::mismatch(
            format!("Template document \"{}\"", display(&other)),
            "map",
        )),
    }
}

fn check_version(doc: &Mapping, diag: &mut Diagnostics) -> Result<Option<String>> {
    let Some(raw) = doc.get(DEFINITIONS_VERSION) else {
        diag.report(ToscaError::missing("Template", DEFINITIONS_VERSION))?;
        return Ok(None);
    };
    let version = display(raw);
    if !VALID_VERSIONS.contains(&version.as_str()) {
        diag.report(ToscaError::InvalidTemplateVersion {
            what: version.clone(),
            valid_versions: VALID_VERSIONS.join("\", \""),
        })?;
    }
    Ok(Some(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_compute_is_valid() {
        let tpl = ToscaTemplate::from_yaml_str(
            "tosca_definitions_version: tosca_simple_yaml_1_0\ntopology_template:\n  node_templates:\n    server:\n      type: tosca.nodes.Compute\n",
            &LoadOptions::default(),
        )
        .unwrap();
        assert!(!tpl.has_errors(), "{}", tpl.diagnostics());
        assert_eq!(tpl.version(), Some("tosca_simple_yaml_1_0"));
        assert_eq!(tpl.nodetemplates().len(), 1);
    }

    #[test]
    fn test_version_checks() {
        let tpl = ToscaTemplate::from_yaml_str("description: none\n", &LoadOptions::default()).unwrap();
        assert_eq!(tpl.diagnostics().of_kind("MissingRequiredField").count(), 1);

        let tpl =
            ToscaTemplate::from_yaml_str("tosca_definitions_version: tosca_simple_yaml_9\n", &LoadOptions::default())
                .unwrap();
        assert_eq!(tpl.diagnostics().of_kind("InvalidTemplateVersion").count(), 1);
    }

    #[test]
    fn test_unknown_top_level_key_but_metadata_exempt() {
        let tpl = ToscaTemplate::from_yaml_str(
            "tosca_definitions_version: tosca_simple_yaml_1_0\nmetadata:\n  owner: ops\nnode_typo: {}\n",
            &LoadOptions::default(),
        )
        .unwrap();
        assert_eq!(tpl.diagnostics().len(), 1);
        assert_eq!(tpl.diagnostics().of_kind("UnknownField").count(), 1);
        assert_eq!(tpl.metadata().len(), 1);
    }

    #[test]
    fn test_immediate_mode_returns_first_error() {
        let err = ToscaTemplate::from_yaml_str(
            "tosca_definitions_version: tosca_simple_yaml_1_0\ntopology_template:\n  node_templates:\n    server: {}\n",
            &LoadOptions::default().with_mode(Mode::Immediate),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "MissingRequiredField");
    }

    #[test]
    fn test_document_must_be_a_map() {
        assert!(ToscaTemplate::from_yaml_str("- a\n- b\n", &LoadOptions::default()).is_err());
    }
}
