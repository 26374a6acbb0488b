//! Import resolution
//!
//! Fetches the documents named in an `imports` section and merges their type
//! definitions into one [`CustomDefinitions`]. Imported documents may import
//! further documents; each location is loaded at most once.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use url::Url;

use crate::catalog::{definitions_from_document, CustomDefinitions, TypeDefinition, DERIVED_FROM};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::value::{get_str, is_url, single_entry};

pub const IMPORTS: &str = "imports";
pub const REPOSITORIES: &str = "repositories";

const FILE: &str = "file";
const REPOSITORY: &str = "repository";
const NAMESPACE_URI: &str = "namespace_uri";
const NAMESPACE_PREFIX: &str = "namespace_prefix";
const IMPORT_KEYS: &[&str] = &[FILE, REPOSITORY, NAMESPACE_URI, NAMESPACE_PREFIX];

// =============================================================================
// Location
// =============================================================================

/// Where a document lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Path(PathBuf),
    Url(Url),
}

impl Location {
    /// Parse a reference as a URL when it is one, otherwise as a path
    pub fn parse(reference: &str) -> Self {
        if is_url(reference) {
            if let Ok(url) = Url::parse(reference) {
                return Self::Url(url);
            }
        }
        Self::Path(PathBuf::from(reference))
    }

    /// Resolve `file` relative to this document
    pub fn join(&self, file: &str) -> Result<Self> {
        if is_url(file) {
            return Ok(Self::parse(file));
        }
        match self {
            Self::Path(path) => {
                let dir = path.parent().unwrap_or_else(|| Path::new(""));
                Ok(Self::Path(dir.join(file)))
            }
            Self::Url(url) => {
                if Path::new(file).is_absolute() {
                    return Err(ToscaError::AbsolutePathInUrlImport {
                        path: file.to_string(),
                        url: url.to_string(),
                    });
                }
                url.join(file).map(Self::Url).map_err(|e| ToscaError::Url {
                    what: format!("Failed to join \"{}\" to \"{}\": {}.", file, url, e),
                })
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Url(u) => write!(f, "{}", u),
        }
    }
}

// =============================================================================
// Fetching
// =============================================================================

/// Reads the text of a document
pub trait Fetcher: Send + Sync {
    fn fetch(&self, location: &Location) -> Result<String>;
}

/// Reads local files and fetches URLs with a blocking HTTP GET
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    allow_remote: bool,
}

impl DefaultFetcher {
    pub fn new(allow_remote: bool) -> Self {
        Self { allow_remote }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch(&self, location: &Location) -> Result<String> {
        match location {
            Location::Path(path) => std::fs::read_to_string(path).map_err(|e| {
                ToscaError::Import(format!("Import \"{}\" is not valid: {}.", path.display(), e))
            }),
            Location::Url(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| ToscaError::Url {
                    what: format!("\"{}\" is not a valid file URL.", url),
                })?;
                self.fetch(&Location::Path(path))
            }
            Location::Url(url) => {
                if !self.allow_remote {
                    return Err(ToscaError::Url {
                        what: format!("Remote import \"{}\" is not allowed.", url),
                    });
                }
                info!(url = %url, "Fetching remote import");
                let url_error = |e: reqwest::Error| ToscaError::Url {
                    what: format!("Failed to reach server \"{}\". Reason is: {}.", url, e),
                };
                let client = reqwest::blocking::Client::builder().build().map_err(url_error)?;
                let response = client.get(url.clone()).send().map_err(url_error)?;
                if !response.status().is_success() {
                    return Err(ToscaError::Url {
                        what: format!("Request for \"{}\" failed with status {}.", url, response.status()),
                    });
                }
                response.text().map_err(url_error)
            }
        }
    }
}

// =============================================================================
// Import definitions
// =============================================================================

/// One entry of an `imports` list
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDef {
    pub name: Option<String>,
    pub file: String,
    pub repository: Option<String>,
    pub namespace_uri: Option<String>,
    pub namespace_prefix: Option<String>,
}

impl ImportDef {
    /// Parse one entry: a bare reference, `{file: ...}`, or `name: reference | {file: ...}`
    pub fn parse(item: &Value, diag: &mut Diagnostics) -> Result<Option<Self>> {
        let (name, body) = match item {
            Value::String(file) => return Ok(Some(Self::bare(None, file))),
            Value::Mapping(m) if m.contains_key(FILE) => (None, item),
            _ => match single_entry(item) {
                Some((name, body)) => (Some(name.to_string()), body),
                None => {
                    diag.report(ToscaError::mismatch("Import definition", "string or single-entry map"))?;
                    return Ok(None);
                }
            },
        };

        let what = format!("Import \"{}\"", name.as_deref().unwrap_or(""));
        match body {
            Value::String(file) => Ok(Some(Self::bare(name, file))),
            Value::Mapping(m) => {
                crate::entity::check_fields(m, IMPORT_KEYS, &what, diag)?;
                let Some(file) = get_str(m, FILE) else {
                    diag.report(ToscaError::missing(&what, FILE))?;
                    return Ok(None);
                };
                Ok(Some(Self {
                    name,
                    file: file.to_string(),
                    repository: get_str(m, REPOSITORY).map(String::from),
                    namespace_uri: get_str(m, NAMESPACE_URI).map(String::from),
                    namespace_prefix: get_str(m, NAMESPACE_PREFIX).map(String::from),
                }))
            }
            _ => {
                diag.report(ToscaError::mismatch(&what, "string or map"))?;
                Ok(None)
            }
        }
    }

    fn bare(name: Option<String>, file: &str) -> Self {
        Self {
            name,
            file: file.to_string(),
            repository: None,
            namespace_uri: None,
            namespace_prefix: None,
        }
    }

    /// Final location of the imported document
    pub fn locate(&self, base: Option<&Location>, repositories: &Mapping) -> Result<Location> {
        if is_url(&self.file) {
            return Ok(Location::parse(&self.file));
        }

        if let Some(repo_url) = self.repository.as_deref().and_then(|r| repository_url(repositories, r)) {
            let base = Url::parse(&with_trailing_slash(repo_url)).map_err(|e| ToscaError::Url {
                what: format!("Repository URL \"{}\" is not valid: {}.", repo_url, e),
            })?;
            return Location::Url(base).join(&self.file);
        }

        if let Some(ns) = &self.namespace_uri {
            if !is_url(ns) {
                return Err(ToscaError::Import(format!(
                    "Namespace URI \"{}\" of import \"{}\" is not a valid URL.",
                    ns, self.file
                )));
            }
            let mut full = ns.trim_end_matches('/').to_string();
            if let Some(repo) = &self.repository {
                full.push('/');
                full.push_str(repo.trim_matches('/'));
            }
            full.push('/');
            full.push_str(self.file.trim_start_matches('/'));
            return Ok(Location::parse(&full));
        }

        match base {
            Some(base) => base.join(&self.file),
            None => Ok(Location::Path(PathBuf::from(&self.file))),
        }
    }
}

fn repository_url<'a>(repositories: &'a Mapping, name: &str) -> Option<&'a str> {
    match repositories.get(name)? {
        Value::String(url) => Some(url),
        Value::Mapping(m) => get_str(m, "url"),
        _ => None,
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves an `imports` section into custom type definitions
pub struct ImportResolver<'f> {
    fetcher: &'f dyn Fetcher,
    visited: HashSet<Location>,
}

impl<'f> ImportResolver<'f> {
    pub fn new(fetcher: &'f dyn Fetcher) -> Self {
        Self { fetcher, visited: HashSet::new() }
    }

    /// Resolve the imports of `doc`, located at `base`
    pub fn resolve(
        &mut self,
        doc: &Mapping,
        base: Option<&Location>,
        diag: &mut Diagnostics,
    ) -> Result<CustomDefinitions> {
        if let Some(base) = base {
            self.visited.insert(base.clone());
        }
        let mut defs = CustomDefinitions::new();
        let Some(imports) = doc.get(IMPORTS) else {
            return Ok(defs);
        };
        let items = match imports {
            Value::Null => return Ok(defs),
            Value::Sequence(items) => items,
            _ => {
                diag.report(ToscaError::mismatch("\"imports\" of template", "list"))?;
                return Ok(defs);
            }
        };
        let repositories = doc.get(REPOSITORIES).and_then(Value::as_mapping).cloned().unwrap_or_default();

        let mut names = HashSet::new();
        for item in items {
            let Some(import) = ImportDef::parse(item, diag)? else {
                continue;
            };
            if let Some(name) = &import.name {
                if !names.insert(name.clone()) {
                    diag.report(ToscaError::Validation(format!("Duplicate import name \"{}\" was found.", name)))?;
                    continue;
                }
            }
            let location = match import.locate(base, &repositories) {
                Ok(l) => l,
                Err(e) => {
                    diag.report(e)?;
                    continue;
                }
            };
            if let Some(imported) = self.load(&import, location, diag)? {
                defs.merge(imported);
            }
        }
        Ok(defs)
    }

    fn load(&mut self, import: &ImportDef, location: Location, diag: &mut Diagnostics) -> Result<Option<CustomDefinitions>> {
        if self.visited.contains(&location) {
            debug!(location = %location, "Import already loaded");
            return Ok(None);
        }
        self.visited.insert(location.clone());

        let text = match self.fetcher.fetch(&location) {
            Ok(t) => t,
            Err(e) => {
                diag.report(e)?;
                return Ok(None);
            }
        };
        let doc = match serde_yaml::from_str::<Value>(&text) {
            Ok(Value::Mapping(m)) => m,
            Ok(Value::Null) => Mapping::new(),
            Ok(_) => {
                diag.report(ToscaError::Import(format!("Import \"{}\" is not a YAML mapping.", location)))?;
                return Ok(None);
            }
            Err(e) => {
                diag.report(ToscaError::Import(format!("Import \"{}\" is not valid YAML: {}.", location, e)))?;
                return Ok(None);
            }
        };
        debug!(location = %location, "Loaded import");
        if doc.contains_key("topology_template") {
            debug!(location = %location, "Ignoring topology_template of imported document");
        }

        let mut defs = self.resolve(&doc, Some(&location), diag)?;
        let source = location.to_string();
        let own = definitions_from_document(&doc, Some(&source));
        match &import.namespace_prefix {
            Some(prefix) => {
                let local: HashSet<String> = own.iter().map(|d| d.name.clone()).collect();
                for def in own {
                    defs.insert(prefixed(def, prefix, &local));
                }
            }
            None => {
                for def in own {
                    defs.insert(def);
                }
            }
        }
        Ok(Some(defs))
    }
}

/// Rename a definition to `prefix.name`, following parents declared in the same document
fn prefixed(mut def: TypeDefinition, prefix: &str, local: &HashSet<String>) -> TypeDefinition {
    def.name = format!("{}.{}", prefix, def.name);
    let parent = def.derived_from().filter(|p| local.contains(*p)).map(String::from);
    if let Some(parent) = parent {
        def.raw.insert(Value::from(DERIVED_FROM), Value::from(format!("{}.{}", prefix, parent)));
    }
    def
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves documents from memory and records what was fetched
    #[derive(Default)]
    struct MemoryFetcher {
        docs: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MemoryFetcher {
        fn with(mut self, location: &str, text: &str) -> Self {
            self.docs.insert(location.to_string(), text.to_string());
            self
        }
    }

    impl Fetcher for MemoryFetcher {
        fn fetch(&self, location: &Location) -> Result<String> {
            let key = location.to_string();
            self.fetched.lock().unwrap().push(key.clone());
            self.docs
                .get(&key)
                .cloned()
                .ok_or_else(|| ToscaError::Import(format!("Import \"{}\" is not valid.", key)))
        }
    }

    fn doc(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    const TYPES: &str = "node_types:\n  my.nodes.App:\n    derived_from: tosca.nodes.Root\n";

    #[test]
    fn test_relative_import_from_url() {
        let fetcher = MemoryFetcher::default().with("http://host/tosca/defs/types.yaml", TYPES);
        let base = Location::parse("http://host/tosca/main.yaml");
        let mut diag = Diagnostics::collecting();
        let defs = ImportResolver::new(&fetcher)
            .resolve(&doc("imports:\n  - defs/types.yaml\n"), Some(&base), &mut diag)
            .unwrap();
        assert!(diag.is_empty(), "{}", diag);
        assert!(defs.contains("my.nodes.App"));
    }

    #[test]
    fn test_absolute_path_in_url_import() {
        let fetcher = MemoryFetcher::default();
        let base = Location::parse("http://host/tosca/main.yaml");
        let mut diag = Diagnostics::collecting();
        ImportResolver::new(&fetcher)
            .resolve(&doc("imports:\n  - /etc/types.yaml\n"), Some(&base), &mut diag)
            .unwrap();
        assert_eq!(diag.of_kind("AbsolutePathInURLImport").count(), 1);
    }

    #[test]
    fn test_namespace_uri_location() {
        let import = ImportDef {
            name: Some("defs".into()),
            file: "types.yaml".into(),
            repository: Some("repo".into()),
            namespace_uri: Some("http://ns.example.com/base/".into()),
            namespace_prefix: None,
        };
        let location = import.locate(None, &Mapping::new()).unwrap();
        assert_eq!(location.to_string(), "http://ns.example.com/base/repo/types.yaml");

        let bad = ImportDef { namespace_uri: Some("not a url".into()), ..import };
        assert!(matches!(bad.locate(None, &Mapping::new()), Err(ToscaError::Import(_))));
    }

    #[test]
    fn test_repository_url_is_base() {
        let import = ImportDef {
            name: None,
            file: "types.yaml".into(),
            repository: Some("central".into()),
            namespace_uri: None,
            namespace_prefix: None,
        };
        let repos = doc("central:\n  url: http://repo.example.com/tosca\n");
        let location = import.locate(None, &repos).unwrap();
        assert_eq!(location.to_string(), "http://repo.example.com/tosca/types.yaml");
    }

    #[test]
    fn test_duplicate_import_names() {
        let fetcher = MemoryFetcher::default().with("a.yaml", TYPES);
        let mut diag = Diagnostics::collecting();
        ImportResolver::new(&fetcher)
            .resolve(&doc("imports:\n  - defs: a.yaml\n  - defs: a.yaml\n"), None, &mut diag)
            .unwrap();
        assert_eq!(diag.of_kind("ValidationError").count(), 1);
    }

    #[test]
    fn test_unknown_import_key_and_missing_file() {
        let fetcher = MemoryFetcher::default();
        let mut diag = Diagnostics::collecting();
        ImportResolver::new(&fetcher)
            .resolve(&doc("imports:\n  - defs:\n      repository: r\n      fil: x.yaml\n"), None, &mut diag)
            .unwrap();
        assert_eq!(diag.of_kind("UnknownField").count(), 1);
        assert_eq!(diag.of_kind("MissingRequiredField").count(), 1);
    }

    #[test]
    fn test_recursive_imports_load_once() {
        let fetcher = MemoryFetcher::default()
            .with("a.yaml", "imports:\n  - b.yaml\nnode_types:\n  a.App:\n    derived_from: b.Base\n")
            .with("b.yaml", "imports:\n  - a.yaml\nnode_types:\n  b.Base:\n    derived_from: tosca.nodes.Root\n");
        let mut diag = Diagnostics::collecting();
        let defs = ImportResolver::new(&fetcher)
            .resolve(&doc("imports:\n  - a.yaml\n"), None, &mut diag)
            .unwrap();
        assert!(diag.is_empty(), "{}", diag);
        assert!(defs.contains("a.App") && defs.contains("b.Base"));
        assert_eq!(fetcher.fetched.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_namespace_prefix() {
        let fetcher = MemoryFetcher::default().with(
            "types.yaml",
            "node_types:\n  Base:\n    derived_from: tosca.nodes.Root\n  App:\n    derived_from: Base\n",
        );
        let mut diag = Diagnostics::collecting();
        let defs = ImportResolver::new(&fetcher)
            .resolve(
                &doc("imports:\n  - mine:\n      file: types.yaml\n      namespace_prefix: acme\n"),
                None,
                &mut diag,
            )
            .unwrap();
        assert_eq!(defs.get("acme.App").and_then(|d| d.derived_from()), Some("acme.Base"));
        assert_eq!(defs.get("acme.Base").and_then(|d| d.derived_from()), Some("tosca.nodes.Root"));
    }

    #[test]
    fn test_unreachable_import_is_reported() {
        let fetcher = MemoryFetcher::default();
        let mut diag = Diagnostics::collecting();
        ImportResolver::new(&fetcher)
            .resolve(&doc("imports:\n  - missing.yaml\n"), None, &mut diag)
            .unwrap();
        assert_eq!(diag.of_kind("ImportError").count(), 1);
    }

    #[test]
    fn test_remote_disabled() {
        let fetcher = DefaultFetcher::new(false);
        let err = fetcher.fetch(&Location::parse("https://example.com/types.yaml")).unwrap_err();
        assert_eq!(err.kind(), "URLException");
    }
}
