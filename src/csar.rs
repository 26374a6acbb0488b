//! CSAR archives
//!
//! A CSAR is a zip archive holding a service template and the files it
//! refers to. `TOSCA-Metadata/TOSCA.meta` names the entry template; without
//! it the archive must hold exactly one YAML file at its root.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::value::{entries, get_map, get_str, is_url};

pub const META_FILE: &str = "TOSCA-Metadata/TOSCA.meta";
pub const ENTRY_DEFINITIONS: &str = "Entry-Definitions";
pub const CREATED_BY: &str = "Created-By";
pub const CSAR_VERSION: &str = "CSAR-Version";
pub const META_FILE_VERSION: &str = "TOSCA-Meta-File-Version";

/// Whether a path names a CSAR rather than a plain template
pub fn is_csar_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("zip" | "csar")
    )
}

/// A validated CSAR archive
#[derive(Debug, Clone)]
pub struct Csar {
    path: PathBuf,
    metadata: Mapping,
    entry: String,
    files: Vec<String>,
}

impl Csar {
    /// Open and validate an archive: it must be a zip whose metadata names an
    /// entry template that exists in the archive
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();
        if !path.is_file() {
            return Err(ToscaError::Validation(format!("\"{}\" does not exist.", shown)));
        }
        let mut archive = open_archive(&path)?;
        let files: Vec<String> = archive.file_names().map(String::from).collect();

        if !files.iter().any(|f| f == META_FILE) {
            return Err(ToscaError::Validation(format!(
                "\"{}\" is not a valid CSAR as it does not contain the required file \"TOSCA.meta\" in the folder \"TOSCA-Metadata\".",
                shown
            )));
        }
        let text = read_entry(&mut archive, META_FILE, &shown)?;
        let metadata = match serde_yaml::from_str::<Value>(&text) {
            Ok(Value::Mapping(m)) => m,
            _ => {
                return Err(ToscaError::Validation(format!(
                    "The file \"{}\" in the CSAR \"{}\" does not contain valid YAML content.",
                    META_FILE, shown
                )))
            }
        };
        let Some(entry) = get_str(&metadata, ENTRY_DEFINITIONS).map(String::from) else {
            return Err(ToscaError::Validation(format!(
                "The CSAR \"{}\" is missing the required metadata \"{}\" in \"{}\".",
                shown, ENTRY_DEFINITIONS, META_FILE
            )));
        };
        if !files.contains(&entry) {
            return Err(ToscaError::Validation(format!(
                "The \"{}\" file \"{}\" defined in the CSAR \"{}\" does not exist.",
                ENTRY_DEFINITIONS, entry, shown
            )));
        }

        info!(csar = %shown, entry = %entry, files = files.len(), "Opened CSAR");
        Ok(Self { path, metadata, entry, files })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Mapping {
        &self.metadata
    }

    pub fn author(&self) -> Option<&str> {
        get_str(&self.metadata, CREATED_BY)
    }

    pub fn version(&self) -> Option<String> {
        self.metadata.get(CSAR_VERSION).map(crate::value::display)
    }

    pub fn meta_file_version(&self) -> Option<String> {
        self.metadata.get(META_FILE_VERSION).map(crate::value::display)
    }

    /// Archive path of the entry template
    pub fn entry_definitions(&self) -> &str {
        &self.entry
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim_start_matches("./");
        self.files.iter().any(|f| f == name)
    }

    /// Text of the entry template
    pub fn read_entry_definitions(&self) -> Result<String> {
        let mut archive = open_archive(&self.path)?;
        read_entry(&mut archive, &self.entry, &self.path.display().to_string())
    }

    /// Description of the entry template, if it has one
    pub fn description(&self) -> Option<String> {
        let doc: Value = serde_yaml::from_str(&self.read_entry_definitions().ok()?).ok()?;
        doc.get("description").and_then(Value::as_str).map(String::from)
    }

    /// Unpack the archive into a temporary directory that is removed on drop
    pub fn extract(&self) -> Result<TempDir> {
        let dir = tempfile::Builder::new().prefix("csar").tempdir()?;
        let mut archive = open_archive(&self.path)?;
        archive.extract(dir.path()).map_err(|e| {
            ToscaError::Validation(format!("Failed to extract \"{}\": {}.", self.path.display(), e))
        })?;
        debug!(csar = %self.path.display(), dir = %dir.path().display(), "Extracted CSAR");
        Ok(dir)
    }

    /// Check that every relative artifact referenced by node templates exists in the archive
    pub fn validate_artifacts(&self, doc: &Mapping, diag: &mut Diagnostics) -> Result<()> {
        let Some(nodes) = get_map(doc, "topology_template").and_then(|t| get_map(t, "node_templates")) else {
            return Ok(());
        };
        let base = Path::new(&self.entry).parent().unwrap_or_else(|| Path::new(""));
        for (_, node) in entries(nodes) {
            let Some(node) = node.as_mapping() else {
                continue;
            };
            for file in artifact_files(node) {
                if is_url(&file) {
                    continue;
                }
                let relative = base.join(&file).to_string_lossy().replace('\\', "/");
                if !self.contains(&file) && !self.contains(&relative) {
                    diag.report(ToscaError::Import(format!(
                        "The resource \"{}\" does not exist in the CSAR \"{}\".",
                        file,
                        self.path.display()
                    )))?;
                }
            }
        }
        Ok(())
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file)
        .map_err(|_| ToscaError::Validation(format!("\"{}\" is not a valid zip file.", path.display())))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str, shown: &str) -> Result<String> {
    let mut entry = archive.by_name(name).map_err(|e| {
        ToscaError::Validation(format!("Failed to read \"{}\" in the CSAR \"{}\": {}.", name, shown, e))
    })?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// Files named by operation implementations and artifact definitions of a node template
fn artifact_files(node: &Mapping) -> Vec<String> {
    let mut files = Vec::new();
    if let Some(interfaces) = get_map(node, "interfaces") {
        for (_, interface) in entries(interfaces) {
            let Some(interface) = interface.as_mapping() else {
                continue;
            };
            for (name, op) in entries(interface) {
                if name == "inputs" || name == "type" {
                    continue;
                }
                match op {
                    Value::String(file) => files.push(file.clone()),
                    Value::Mapping(op) => match op.get("implementation") {
                        Some(Value::String(file)) => files.push(file.clone()),
                        Some(Value::Mapping(imp)) => {
                            files.extend(get_str(imp, "primary").map(String::from));
                            if let Some(deps) = imp.get("dependencies").and_then(Value::as_sequence) {
                                files.extend(deps.iter().filter_map(Value::as_str).map(String::from));
                            }
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }
    if let Some(artifacts) = get_map(node, "artifacts") {
        for (_, artifact) in entries(artifacts) {
            match artifact {
                Value::String(file) => files.push(file.clone()),
                Value::Mapping(a) => files.extend(get_str(a, "file").map(String::from)),
                _ => {}
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        for (name, body) in files {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    const META: &str =
        "TOSCA-Meta-File-Version: 1.0\nCSAR-Version: 1.1\nCreated-By: ops\nEntry-Definitions: Definitions/main.yaml\n";
    const MAIN: &str = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
description: A web stack
topology_template:
  node_templates:
    server:
      type: tosca.nodes.Compute
      interfaces:
        Standard:
          create: scripts/create.sh
          configure:
            implementation:
              primary: scripts/configure.sh
              dependencies: [scripts/missing.sh]
"#;

    #[test]
    fn test_open_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_zip(
            dir.path(),
            "stack.csar",
            &[(META_FILE, META), ("Definitions/main.yaml", MAIN)],
        );
        let csar = Csar::open(&path).unwrap();
        assert_eq!(csar.author(), Some("ops"));
        assert_eq!(csar.version().as_deref(), Some("1.1"));
        assert_eq!(csar.meta_file_version().as_deref(), Some("1.0"));
        assert_eq!(csar.entry_definitions(), "Definitions/main.yaml");
        assert_eq!(csar.description().as_deref(), Some("A web stack"));

        let extracted = csar.extract().unwrap();
        assert!(extracted.path().join("Definitions/main.yaml").is_file());
    }

    #[test]
    fn test_missing_artifacts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_zip(
            dir.path(),
            "stack.zip",
            &[
                (META_FILE, META),
                ("Definitions/main.yaml", MAIN),
                ("scripts/create.sh", "#!/bin/sh"),
                ("Definitions/scripts/configure.sh", "#!/bin/sh"),
            ],
        );
        let csar = Csar::open(&path).unwrap();
        let doc: Mapping = serde_yaml::from_str(MAIN).unwrap();
        let mut diag = Diagnostics::collecting();
        csar.validate_artifacts(&doc, &mut diag).unwrap();
        assert_eq!(diag.of_kind("ImportError").count(), 1);
        assert!(diag.all()[0].error.to_string().contains("scripts/missing.sh"));
    }

    #[test]
    fn test_template_without_metadata_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = [("service.yaml", MAIN), ("scripts/a.sh", "")];
        let path = build_zip(dir.path(), "plain.zip", &files);
        let err = Csar::open(&path).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains("TOSCA.meta"));
    }

    #[test]
    fn test_invalid_archives() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Csar::open(dir.path().join("absent.zip")).is_err());

        let not_zip = dir.path().join("text.zip");
        std::fs::write(&not_zip, "hello").unwrap();
        let err = Csar::open(&not_zip).unwrap_err();
        assert!(err.to_string().contains("is not a valid zip file"));

        let no_entry = build_zip(dir.path(), "noentry.zip", &[(META_FILE, "Created-By: ops\n")]);
        let err = Csar::open(&no_entry).unwrap_err();
        assert!(err.to_string().contains(ENTRY_DEFINITIONS));

        let dangling = build_zip(dir.path(), "dangling.zip", &[(META_FILE, META)]);
        assert!(Csar::open(&dangling).unwrap_err().to_string().contains("does not exist"));

        let ambiguous = build_zip(dir.path(), "two.zip", &[("a.yaml", MAIN), ("b.yaml", MAIN)]);
        assert!(Csar::open(&ambiguous).unwrap_err().to_string().contains("TOSCA.meta"));
    }

    #[test]
    fn test_is_csar_path() {
        assert!(is_csar_path(Path::new("a/b.CSAR")));
        assert!(is_csar_path(Path::new("b.zip")));
        assert!(!is_csar_path(Path::new("b.yaml")));
    }
}
