//! Parser configuration
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (tosca.toml)
//! - Environment variables (TOSCA__*)
//!
//! ## Example config file (tosca.toml):
//! ```toml
//! [parser]
//! mode = "collect"
//!
//! [catalog]
//! extra_definitions = ["./definitions/vendor"]
//!
//! [imports]
//! allow_remote = false
//!
//! [output]
//! format = "json"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::TypeCatalog;
use crate::diagnostics::Mode;
use crate::error::Result;
use crate::template::LoadOptions;

/// Main configuration for the parser
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParserConfig {
    #[serde(default)]
    pub parser: ParserSection,

    /// Type catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Import settings
    #[serde(default)]
    pub imports: ImportsConfig,

    /// Report settings
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParserSection {
    /// Collect every error, or stop at the first
    #[serde(default)]
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    /// Directories whose YAML files extend the normative catalog
    #[serde(default)]
    pub extra_definitions: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportsConfig {
    /// Whether imports may be fetched over the network
    #[serde(default = "default_true")]
    pub allow_remote: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn default_true() -> bool {
    true
}

impl Default for ImportsConfig {
    fn default() -> Self {
        Self { allow_remote: true }
    }
}

impl ParserConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file after the default locations
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["tosca.toml", ".tosca.toml", "config/tosca.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("org", "oasis", "tosca-parser") {
            let xdg_config = config_dir.config_dir().join("tosca.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // TOSCA__PARSER__MODE=immediate
        builder = builder.add_source(
            Environment::with_prefix("TOSCA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Type catalog with the configured extra definitions merged in
    pub fn catalog(&self) -> Result<Arc<TypeCatalog>> {
        if self.catalog.extra_definitions.is_empty() {
            TypeCatalog::normative()
        } else {
            TypeCatalog::load_embedded(&self.catalog.extra_definitions).map(Arc::new)
        }
    }

    /// Load options reflecting this configuration
    pub fn load_options(&self) -> Result<LoadOptions> {
        Ok(LoadOptions {
            mode: self.parser.mode,
            allow_remote: self.imports.allow_remote,
            catalog: Some(self.catalog()?),
            ..LoadOptions::default()
        })
    }
}
