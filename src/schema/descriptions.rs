//! Descriptions document
//!
//! Human readable metadata that accompanies a diagram, keyed by class and
//! attribute name:
//!
//! ```json
//! {
//!   "docstring": "Module documentation",
//!   "Root": {
//!     "docstring": "The root object",
//!     "attributes": {
//!       "str_value": "A plain description",
//!       "float_value": { "description": "With options", "minimum": 0 }
//!     }
//!   }
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Descriptions for a whole diagram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(flatten)]
    pub classes: IndexMap<String, ClassDescription>,
}

/// Descriptions for one class or enum
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, AttributeDescription>,
}

/// Either a bare description or a description with extra options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeDescription {
    Text(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(flatten)]
        options: IndexMap<String, serde_json::Value>,
    },
}

impl AttributeDescription {
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Detailed { description, .. } => description.as_deref(),
        }
    }

    /// Extra options rendered as strings
    pub fn options(&self) -> Vec<(String, String)> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Detailed { options, .. } => options
                .iter()
                .map(|(key, value)| {
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect(),
        }
    }
}

impl Descriptions {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn class(&self, name: &str) -> Option<&ClassDescription> {
        self.classes.get(name)
    }

    pub fn attribute(&self, class: &str, attribute: &str) -> Option<&AttributeDescription> {
        self.class(class).and_then(|c| c.attributes.get(attribute))
    }
}
