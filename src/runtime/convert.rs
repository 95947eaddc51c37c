//! Conversion between models
//!
//! A [`LinkTemplate`] maps destination meta paths to source meta paths.
//! Conversion reads every source path, aligns the values by their innermost
//! list index and instantiates a guide tree of the destination root.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Arena, InstanceId, Library, Value};
use crate::error::{ModelError, Result};

/// Destination path → source path mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkTemplate {
    /// Destination root class
    #[serde(rename = "__model__", default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(flatten)]
    pub mappings: IndexMap<String, String>,
}

impl LinkTemplate {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a `.yaml`/`.yml` or `.toml` template
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match extension(path).as_deref() {
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(ModelError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Skeleton mapping every leaf meta path of a class onto itself
    pub fn generate(library: &Library, class: &str) -> Result<Self> {
        let mappings = library
            .meta_paths(class, true)?
            .into_iter()
            .map(|path| (path.clone(), path))
            .collect();
        Ok(Self {
            model: Some(class.to_string()),
            mappings,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ModelError::UnsupportedFormat(e.to_string()))
    }

    /// Write the template in the format given by the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match extension(path).as_deref() {
            Some("yaml" | "yml") => self.to_yaml()?,
            Some("toml") => self.to_toml()?,
            _ => return Err(ModelError::UnsupportedFormat(path.display().to_string())),
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

impl Arena {
    /// Convert an instance into a fresh arena of another library
    pub fn convert_to(
        &self,
        id: InstanceId,
        template: &LinkTemplate,
        target: Arc<Library>,
    ) -> Result<(Arena, InstanceId)> {
        let source_class = self.class_of(id)?;
        let root = match &template.model {
            Some(model) => model.clone(),
            None if target.roots().len() == 1 => target.roots()[0].clone(),
            None if target.is_class(source_class) => source_class.to_string(),
            None => {
                return Err(ModelError::Query(
                    "template names no __model__ and the target has no single root".into(),
                ))
            }
        };

        let mut tree = target.meta_tree(&root)?;
        for (destination, source) in &template.mappings {
            let mut column: BTreeMap<usize, Value> = BTreeMap::new();
            for (index, value) in self.get_meta(id, source)? {
                if value.elements().any(|e| e.as_object().is_some()) {
                    return Err(ModelError::Query(format!(
                        "source path '{}' does not address a leaf attribute",
                        source
                    )));
                }
                match column.get_mut(&index) {
                    Some(existing) => {
                        let mut items: Vec<Value> = std::mem::take(existing).elements().cloned().collect();
                        items.extend(value.elements().cloned());
                        *existing = Value::List(items);
                    }
                    None => {
                        column.insert(index, value);
                    }
                }
            }
            debug!(destination = %destination, source = %source, values = column.len(), "linked path");
            tree.set_leaf_values(destination, column)?;
        }

        let mut arena = Arena::new(target);
        let converted = tree.instantiate(&mut arena)?;
        info!(from = source_class, to = %root, "converted instance");
        Ok((arena, converted))
    }
}
