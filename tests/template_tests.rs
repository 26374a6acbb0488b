//! End-to-end tests over whole service templates
//!
//! Fixtures live in `tests/fixtures`; imports and CSAR archives are built in
//! temporary directories.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tosca_parser::{LoadOptions, Mode, PropertyValue, ToscaTemplate};
use zip::write::FileOptions;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn load(name: &str) -> ToscaTemplate {
    ToscaTemplate::from_path(fixture(name), &LoadOptions::default()).unwrap()
}

fn load_str(src: &str) -> ToscaTemplate {
    ToscaTemplate::from_yaml_str(src, &LoadOptions::default()).unwrap()
}

fn output_value(template: &ToscaTemplate, name: &str) -> Option<Value> {
    let output = template.topology_template().output(name).unwrap();
    match &output.value {
        PropertyValue::Value(v) => Some(v.clone()),
        PropertyValue::Function(f) => f.result(template.topology_template()).unwrap(),
    }
}

// =============================================================================
// Document structure
// =============================================================================

#[test]
fn test_minimal_compute_has_no_errors() {
    let template = load("minimal_compute.yaml");
    assert!(!template.has_errors(), "{}", template.diagnostics());
    assert_eq!(template.version(), Some("tosca_simple_yaml_1_0"));
    assert_eq!(template.description(), Some("A single server with no properties"));
    assert_eq!(template.nodetemplates()[0].type_name, "tosca.nodes.Compute");
}

#[test]
fn test_missing_type_is_one_error() {
    let template = load("missing_type.yaml");
    let diagnostics = template.diagnostics();
    assert_eq!(diagnostics.len(), 1, "{}", diagnostics);
    let message = diagnostics.all()[0].error.to_string();
    assert_eq!(diagnostics.all()[0].error.kind(), "MissingRequiredField");
    assert!(message.contains("broken") && message.contains("\"type\""));
    assert_eq!(template.nodetemplates().len(), 1);
}

#[test]
fn test_unknown_node_type_suggests_a_name() {
    let template = load_str(
        "tosca_definitions_version: tosca_simple_yaml_1_0\ntopology_template:\n  node_templates:\n    server:\n      type: tosca.nodes.Compte\n",
    );
    let item = template.diagnostics().of_kind("InvalidType").next().unwrap();
    assert!(item.context[0].contains("tosca.nodes.Compute"));
}

#[test]
fn test_fail_fast_stops_at_first_error() {
    let options = LoadOptions::default().with_mode(Mode::Immediate);
    let err = ToscaTemplate::from_path(fixture("missing_type.yaml"), &options).unwrap_err();
    assert_eq!(err.kind(), "MissingRequiredField");
}

// =============================================================================
// Inputs and functions
// =============================================================================

#[test]
fn test_get_input_uses_default() {
    let template = load("get_input.yaml");
    assert!(!template.has_errors(), "{}", template.diagnostics());
    assert_eq!(output_value(&template, "cpus"), Some(Value::from(4)));
    // Attributes are only known at runtime
    assert_eq!(output_value(&template, "server_ip"), None);

    let input = &template.inputs()[0];
    assert_eq!(input.name, "cpus");
    assert_eq!(input.type_name(), "integer");
    assert_eq!(input.description(), Some("Number of CPUs for the server"));
    assert_eq!(input.constraints().unwrap().len(), 1);
}

#[test]
fn test_get_input_parameter_overrides_default() {
    let options = LoadOptions::default().with_param("cpus", "8");
    let template = ToscaTemplate::from_path(fixture("get_input.yaml"), &options).unwrap();
    assert!(!template.has_errors(), "{}", template.diagnostics());
    assert_eq!(output_value(&template, "cpus"), Some(Value::from(8)));
}

#[test]
fn test_invalid_parameter_is_reported() {
    let options = LoadOptions::default().with_param("cpus", 3);
    let template = ToscaTemplate::from_path(fixture("get_input.yaml"), &options).unwrap();
    assert_eq!(template.diagnostics().of_kind("ValidationError").count(), 1);
}

#[test]
fn test_unknown_input_reference() {
    let template = load_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
      capabilities:
        host:
          properties:
            num_cpus: { get_input: cores }
"#,
    );
    assert_eq!(template.diagnostics().of_kind("UnknownInput").count(), 1);
}

#[test]
fn test_host_resolves_through_chain() {
    let template = load("host_chain.yaml");
    assert!(!template.has_errors(), "{}", template.diagnostics());

    let app = template.topology_template().node_by_name("app").unwrap();
    let op = app.operations("Standard").find(|o| o.name == "configure").unwrap();
    assert!(op.input("address").unwrap().is_function());
    assert_eq!(op.primary_implementation(), Some("scripts/configure.sh"));
}

#[test]
fn test_host_without_attribute_names_relationship() {
    let src = std::fs::read_to_string(fixture("host_chain.yaml")).unwrap();
    let src = src.replace("    attributes:\n      ip:\n        type: string\n", "");
    let template = load_str(&src);
    let errors: Vec<_> = template.diagnostics().of_kind("NotFound").collect();
    assert_eq!(errors.len(), 1, "{}", template.diagnostics());
    assert!(errors[0].error.to_string().contains("tosca.relationships.HostedOn"));
}

// =============================================================================
// Constraints through templates
// =============================================================================

fn storage_template(size: &str, label: &str) -> String {
    format!(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.nodes.Volume:
    derived_from: tosca.nodes.Root
    properties:
      size:
        type: scalar-unit.size
        constraints:
          - in_range: [1 MiB, 1 GiB]
      label:
        type: string
        constraints:
          - length: 4
topology_template:
  node_templates:
    volume:
      type: example.nodes.Volume
      properties:
        size: {}
        label: {}
"#,
        size, label
    )
}

#[test]
fn test_scalar_range_reports_normalized_bounds() {
    let template = load_str(&storage_template("1 MB", "abcd"));
    let errors: Vec<_> = template.diagnostics().of_kind("ValidationError").collect();
    assert_eq!(errors.len(), 1, "{}", template.diagnostics());
    let message = errors[0].error.to_string();
    assert!(message.contains("1048576") && message.contains("1073741824"), "{}", message);

    let template = load_str(&storage_template("2 MiB", "abcd"));
    assert!(!template.has_errors(), "{}", template.diagnostics());
}

#[test]
fn test_length_constraint() {
    let template = load_str(&storage_template("2 MiB", "abc"));
    let errors: Vec<_> = template.diagnostics().of_kind("ValidationError").collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.to_string().contains("\"4\""));
}

// =============================================================================
// Full stack: imports, relationships, groups, policies
// =============================================================================

#[test]
fn test_web_stack() {
    let template = load("web_stack.yaml");
    assert!(!template.has_errors(), "{}", template.diagnostics());
    assert!(template.custom_defs().contains("example.nodes.Database"));
    assert!(template.custom_defs().contains("example.datatypes.Backup"));

    let topology = template.topology_template();
    let app = topology.node_by_name("app").unwrap();
    let related: Vec<&str> = topology.related_nodes(app.id).iter().map(|n| n.name.as_str()).collect();
    assert_eq!(related, vec!["web", "db"]);

    let db = topology.node_by_name("db").unwrap();
    let backup = db.property("backup").and_then(|p| p.value.as_value()).unwrap();
    assert_eq!(backup.get("retention"), Some(&Value::from(7)));

    let order: Vec<&str> = topology
        .topological_order()
        .unwrap()
        .iter()
        .map(|n| n.name.as_str())
        .collect();
    let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(pos("server") < pos("web") && pos("web") < pos("app"));
    assert!(pos("db") < pos("app"));

    assert_eq!(template.groups()[0].members, vec!["app", "web"]);
    assert_eq!(template.policies()[0].targets, vec!["frontend", "db"]);

    let connect = &topology.relationship_templates[0];
    let port = connect.interfaces[0].input("target_port").and_then(PropertyValue::as_function).unwrap();
    assert_eq!(port.result(topology).unwrap(), Some(Value::from(3306)));
}

#[test]
fn test_invalid_group_and_policy_targets() {
    let template = load_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
  groups:
    servers:
      type: tosca.groups.Root
      members: [server, missing]
  policies:
    - scale:
        type: tosca.policies.Scaling
        targets: [servers, nowhere]
"#,
    );
    assert_eq!(template.diagnostics().of_kind("InvalidGroupTarget").count(), 2);
}

#[test]
fn test_undeclared_requirement_is_unknown() {
    let template = load_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
      requirements:
        - hots: other
    other:
      type: tosca.nodes.Compute
"#,
    );
    let errors: Vec<_> = template.diagnostics().of_kind("UnknownField").collect();
    assert_eq!(template.diagnostics().len(), 1, "{}", template.diagnostics());
    assert!(errors[0].error.to_string().contains("hots"));
    let server = template.topology_template().node_by_name("server").unwrap();
    assert!(template.topology_template().related_nodes(server.id).is_empty());
}

#[test]
fn test_redefined_property_drops_parent_constraints() {
    let template = load_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  my.Parent:
    derived_from: tosca.nodes.Root
    properties:
      port:
        type: string
        constraints:
          - pattern: '[a-z]+'
  my.Child:
    derived_from: my.Parent
    properties:
      port:
        type: integer
topology_template:
  node_templates:
    service:
      type: my.Child
      properties:
        port: 8080
"#,
    );
    assert!(!template.has_errors(), "{}", template.diagnostics());
}

#[test]
fn test_cyclic_type_is_reported_once() {
    let template = load_str(
        r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  my.A:
    derived_from: my.B
  my.B:
    derived_from: my.A
topology_template:
  node_templates:
    first:
      type: my.A
    second:
      type: my.A
"#,
    );
    let diagnostics = template.diagnostics();
    assert_eq!(diagnostics.of_kind("CyclicType").count(), 2, "{}", diagnostics);
    assert_eq!(diagnostics.len(), 2);
}

#[test]
fn test_substitution_mappings() {
    let template = load("substitution.yaml");
    let diagnostics = template.diagnostics();
    assert_eq!(diagnostics.of_kind("UnknownField").count(), 3, "{}", diagnostics);
    assert_eq!(diagnostics.of_kind("UnknownOutput").count(), 1);
    assert_eq!(diagnostics.len(), 4);

    let mappings = template.topology_template().substitution_mappings.as_ref().unwrap();
    assert_eq!(mappings.node_type, "example.nodes.DatabaseService");
}

// =============================================================================
// Imports
// =============================================================================

const MAIN_WITH_IMPORT: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - custom: types/custom.yaml
topology_template:
  node_templates:
    agent:
      type: example.nodes.Agent
      properties:
        interval: 30 s
"#;

const CUSTOM_TYPES: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
imports:
  - base.yaml
node_types:
  example.nodes.Agent:
    derived_from: example.nodes.Base
    properties:
      interval:
        type: scalar-unit.time
"#;

const BASE_TYPES: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
node_types:
  example.nodes.Base:
    derived_from: tosca.nodes.Root
"#;

#[test]
fn test_relative_and_nested_imports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("types")).unwrap();
    std::fs::write(dir.path().join("main.yaml"), MAIN_WITH_IMPORT).unwrap();
    std::fs::write(dir.path().join("types/custom.yaml"), CUSTOM_TYPES).unwrap();
    std::fs::write(dir.path().join("types/base.yaml"), BASE_TYPES).unwrap();

    let template = ToscaTemplate::from_path(dir.path().join("main.yaml"), &LoadOptions::default()).unwrap();
    assert!(!template.has_errors(), "{}", template.diagnostics());
    let agent = &template.nodetemplates()[0];
    assert!(agent.is_derived_from("example.nodes.Base"));
    assert!(agent.is_derived_from("tosca.nodes.Root"));
}

#[test]
fn test_unreachable_import() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.yaml"), MAIN_WITH_IMPORT).unwrap();

    let template = ToscaTemplate::from_path(dir.path().join("main.yaml"), &LoadOptions::default()).unwrap();
    let diagnostics = template.diagnostics();
    assert_eq!(diagnostics.of_kind("ImportError").count(), 1, "{}", diagnostics);
    // The node type could not be imported either
    assert_eq!(diagnostics.of_kind("InvalidType").count(), 1);
}

#[test]
fn test_duplicate_import_names() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("base.yaml"), BASE_TYPES).unwrap();
    std::fs::write(
        dir.path().join("main.yaml"),
        "tosca_definitions_version: tosca_simple_yaml_1_0\nimports:\n  - base: base.yaml\n  - base: base.yaml\n",
    )
    .unwrap();
    let template = ToscaTemplate::from_path(dir.path().join("main.yaml"), &LoadOptions::default()).unwrap();
    assert_eq!(template.diagnostics().of_kind("ValidationError").count(), 1);
}

#[test]
fn test_remote_imports_can_be_disabled() {
    let options = LoadOptions { allow_remote: false, ..LoadOptions::default() };
    let template = ToscaTemplate::from_yaml_str(
        "tosca_definitions_version: tosca_simple_yaml_1_0\nimports:\n  - https://example.com/types.yaml\n",
        &options,
    )
    .unwrap();
    assert_eq!(template.diagnostics().of_kind("URLException").count(), 1);
}

// =============================================================================
// CSAR
// =============================================================================

fn build_csar(path: &Path, scripts: &[&str]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let mut add = |name: &str, body: &str| {
        zip.start_file(name, FileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    };
    add(
        "TOSCA-Metadata/TOSCA.meta",
        "TOSCA-Meta-File-Version: 1.0\nCSAR-Version: 1.1\nCreated-By: ops team\nEntry-Definitions: web_stack.yaml\n",
    );
    add("web_stack.yaml", &std::fs::read_to_string(fixture("web_stack.yaml")).unwrap());
    add(
        "definitions/stack_types.yaml",
        &std::fs::read_to_string(fixture("definitions/stack_types.yaml")).unwrap(),
    );
    for script in scripts {
        add(script, "#!/bin/sh\n");
    }
    zip.finish().unwrap();
}

#[test]
fn test_csar_with_all_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web.csar");
    build_csar(&path, &["scripts/app/configure.sh", "scripts/connect.sh"]);

    let template = ToscaTemplate::from_path(&path, &LoadOptions::default()).unwrap();
    assert!(!template.has_errors(), "{}", template.diagnostics());
    let csar = template.csar().unwrap();
    assert_eq!(csar.author(), Some("ops team"));
    assert_eq!(csar.entry_definitions(), "web_stack.yaml");
    assert_eq!(template.nodetemplates().len(), 4);
}

#[test]
fn test_csar_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web.zip");
    build_csar(&path, &["scripts/connect.sh"]);

    let template = ToscaTemplate::from_path(&path, &LoadOptions::default()).unwrap();
    let errors: Vec<_> = template.diagnostics().of_kind("ImportError").collect();
    assert_eq!(errors.len(), 1, "{}", template.diagnostics());
    assert!(errors[0].error.to_string().contains("scripts/app/configure.sh"));
}
