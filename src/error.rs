//! Error types for modelkit

use thiserror::Error;

/// Result type for modelkit operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised by the parser, the generator and the runtime
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid specification: {0}")]
    Specification(String),

    #[error("Cannot locate object '{name}' in specifications")]
    UnknownClass { name: String },

    #[error("Invalid value for '{object}.{attribute}': expected {expected}, got {actual}")]
    Validation {
        object: String,
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error("Object '{object}' is not compliant to reference '{attribute}': {message}")]
    Reference {
        object: String,
        attribute: String,
        message: String,
    },

    #[error("Path '{path}' does not exist in the model")]
    NotFound { path: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Failed to fetch specification from '{url}': {source}")]
    Fetch {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to render {} class(es): {}", .failures.len(), .failures.join("; "))]
    Assembly { failures: Vec<String> },

    #[error("Optional dependency missing: {feature} support is not available in this build")]
    MissingDependency { feature: &'static str },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl ModelError {
    /// Shorthand for a specification error
    pub fn spec(message: impl Into<String>) -> Self {
        Self::Specification(message.into())
    }

    /// Shorthand for an XML error
    pub fn xml(message: impl std::fmt::Display) -> Self {
        Self::Xml(message.to_string())
    }

    /// Shorthand for a validation error
    pub fn validation(
        object: impl Into<String>,
        attribute: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            attribute: attribute.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
