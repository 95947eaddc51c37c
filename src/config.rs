//! Configuration management for modelkit
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (modelkit.toml)
//! - Environment variables (MODELKIT__*)
//!
//! ## Example config file (modelkit.toml):
//! ```toml
//! [generator]
//! output_dir = "./generated"
//! package = "models"
//! preserve_custom_code = true
//!
//! [fetch]
//! cache_capacity = 32
//! cache_ttl_secs = 600
//!
//! [export]
//! output_format = "pretty"
//! default_format = "yaml"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::SpecCache;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelkitConfig {
    /// Code generation settings
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// External object fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Instance export settings
    #[serde(default)]
    pub export: ExportConfig,
}

/// Code generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Directory the package is written into
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Package name; defaults to the diagram file stem
    #[serde(default)]
    pub package: Option<String>,

    /// Keep hand-written regions of previously generated files
    #[serde(default = "default_true")]
    pub preserve_custom_code: bool,

    /// Copy the diagram and descriptions into `schemes/`
    #[serde(default = "default_true")]
    pub copy_schemes: bool,
}

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum number of cached external specifications
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Seconds a cached specification stays valid
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// JSON layout (pretty or compact)
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Format used when none is given
    #[serde(default)]
    pub default_format: DataFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

/// Serialization formats of instance data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Json,
    Yaml,
    Xml,
}

impl DataFormat {
    /// Guess a format from a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }
}

// Default value functions
fn default_output_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    32
}

fn default_cache_ttl() -> u64 {
    600
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            package: None,
            preserve_custom_code: true,
            copy_schemes: true,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Pretty,
            default_format: DataFormat::Json,
        }
    }
}

impl FetchConfig {
    /// Cache sized by this configuration
    pub fn cache(&self) -> SpecCache {
        SpecCache::new(self.cache_capacity, Duration::from_secs(self.cache_ttl_secs))
    }
}

impl ModelkitConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["modelkit.toml", ".modelkit.toml", "config/modelkit.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "modelkit", "modelkit") {
            let xdg_config = config_dir.config_dir().join("modelkit.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (MODELKIT__*)
        builder = builder.add_source(
            Environment::with_prefix("MODELKIT")
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

    /// Output directory (resolves relative paths)
    pub fn output_dir(&self) -> PathBuf {
        if self.generator.output_dir.is_absolute() {
            self.generator.output_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.generator.output_dir)
        }
    }
}
