//! Structural export and import
//!
//! Instances export to nested plain data (`serde_json::Value` with preserved
//! key order) and from there to JSON, YAML and XML. Import is schema-guided:
//! the class definitions decide how each plain value turns back into a
//! [`Value`].

use serde_json::{Map, Number};
use tracing::debug;

use super::validate::{validate, FieldContext};
use super::{xml, Arena, InstanceId, Value};
use crate::checksum::Checksum;
use crate::error::{ModelError, Result};
use crate::schema::AttributeDefinition;

/// Key of the provenance block attached to exported roots
pub const SOURCE_KEY: &str = "__source__";

/// Reference attribute whose targets could only be looked up after import
struct Deferred {
    owner: InstanceId,
    attribute: String,
    values: Vec<Value>,
}

impl Arena {
    // =========================================================================
    // Export
    // =========================================================================

    /// Nested plain data without nulls, empty collections and id-only objects
    pub fn to_dict(&self, id: InstanceId) -> Result<serde_json::Value> {
        let mut map = self.object_to_map(id)?;

        let mut source = Map::new();
        source.insert("root".into(), self.class_of(id)?.into());
        if let Some(repository) = self.library.repository() {
            source.insert("repo".into(), repository.into());
        }
        if let Some(commit) = self.library.commit() {
            source.insert("commit".into(), commit.into());
        }
        if let Some(url) = self.library.source_url() {
            source.insert("url".into(), url.into());
        }
        map.insert(SOURCE_KEY.into(), serde_json::Value::Object(source));

        Ok(serde_json::Value::Object(map))
    }

    pub fn to_json(&self, id: InstanceId, pretty: bool) -> Result<String> {
        let dict = self.to_dict(id)?;
        Ok(if pretty {
            serde_json::to_string_pretty(&dict)?
        } else {
            serde_json::to_string(&dict)?
        })
    }

    pub fn to_yaml(&self, id: InstanceId) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_dict(id)?)?)
    }

    pub fn to_xml(&self, id: InstanceId) -> Result<String> {
        xml::write(self, id)
    }

    pub fn to_hdf5(&self, _id: InstanceId, _path: &std::path::Path) -> Result<()> {
        Err(ModelError::MissingDependency { feature: "hdf5" })
    }

    fn object_to_map(&self, id: InstanceId) -> Result<Map<String, serde_json::Value>> {
        let instance = self.instance(id)?;
        let mut map = Map::new();
        for attribute in self.library.fields(&instance.class)? {
            let Some(value) = instance.values.get(&attribute.name) else {
                continue;
            };
            if let Some(exported) = self.export_value(value, attribute)? {
                map.insert(attribute.name.clone(), exported);
            }
        }
        Ok(map)
    }

    /// Plain rendering of one stored value, `None` when it should be dropped
    fn export_value(&self, value: &Value, attribute: &AttributeDefinition) -> Result<Option<serde_json::Value>> {
        Ok(match value {
            Value::Null => None,
            Value::Bool(b) => Some((*b).into()),
            Value::Int(i) => Some((*i).into()),
            Value::Float(f) => Number::from_f64(*f).map(serde_json::Value::Number),
            Value::String(s) => Some(s.as_str().into()),
            Value::Bytes(b) => Some(b.to_text().into()),
            Value::Date(_) | Value::DateTime(_) => Some(value.to_string().into()),
            Value::Object(child) => match &attribute.reference {
                Some(target) => {
                    let referenced = self.value(*child, &target.attribute)?;
                    self.export_value(referenced, attribute)?
                }
                None => {
                    let map = self.object_to_map(*child)?;
                    let id_only = map.len() == 1 && map.contains_key("id");
                    (!map.is_empty() && !id_only).then_some(serde_json::Value::Object(map))
                }
            },
            Value::List(items) => {
                let mut exported = Vec::new();
                for item in items {
                    if let Some(item) = self.export_value(item, attribute)? {
                        exported.push(item);
                    }
                }
                (!exported.is_empty()).then_some(serde_json::Value::Array(exported))
            }
        })
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Rebuild an instance tree of `class` from plain data. On error the
    /// arena keeps none of the instances built so far.
    pub fn from_dict(&mut self, class: &str, data: &serde_json::Value) -> Result<InstanceId> {
        self.atomic(|arena| arena.import_dict(class, data))
    }

    fn import_dict(&mut self, class: &str, data: &serde_json::Value) -> Result<InstanceId> {
        let mut deferred = Vec::new();
        let mut scalar_references = Vec::new();
        let id = self.build_from_dict(class, data, &mut deferred, &mut scalar_references)?;

        // Targets may appear anywhere in the document, so lookups run last
        for entry in deferred {
            let owner_class = self.class_of(entry.owner)?.to_string();
            let attribute = self
                .library
                .field(&owner_class, &entry.attribute)
                .cloned()
                .ok_or_else(|| ModelError::spec(format!("unknown attribute '{}'", entry.attribute)))?;
            let Some(target) = &attribute.reference else {
                continue;
            };

            let mut objects = Vec::new();
            for value in entry.values {
                let coerced = self.coerce_to_target(&owner_class, &attribute, value)?;
                let found = self
                    .find_by_attribute(&target.class, &target.attribute, &coerced)
                    .ok_or_else(|| ModelError::Reference {
                        object: owner_class.clone(),
                        attribute: attribute.name.clone(),
                        message: format!("no '{}' with value '{}'", target, coerced),
                    })?;
                objects.push(Value::Object(found));
            }
            let value = if attribute.multiple {
                Value::List(objects)
            } else {
                objects.into_iter().next().unwrap_or_default()
            };
            self.set(entry.owner, &attribute.name, value)?;
        }

        for (owner, attribute) in scalar_references {
            let value = self.value(owner, &attribute)?.clone();
            self.set(owner, &attribute, value)?;
        }

        debug!(class, id = id.index(), "imported instance");
        Ok(id)
    }

    pub fn from_json(&mut self, class: &str, text: &str) -> Result<InstanceId> {
        let data: serde_json::Value = serde_json::from_str(text)?;
        self.from_dict(class, &data)
    }

    pub fn from_yaml(&mut self, class: &str, text: &str) -> Result<InstanceId> {
        let data: serde_json::Value = serde_yaml::from_str(text)?;
        self.from_dict(class, &data)
    }

    pub fn from_xml(&mut self, class: &str, text: &str) -> Result<InstanceId> {
        let data = xml::read(&self.library, class, text)?;
        self.from_dict(class, &data)
    }

    pub fn from_hdf5(&mut self, _class: &str, _path: &std::path::Path) -> Result<InstanceId> {
        Err(ModelError::MissingDependency { feature: "hdf5" })
    }

    fn build_from_dict(
        &mut self,
        class: &str,
        data: &serde_json::Value,
        deferred: &mut Vec<Deferred>,
        scalar_references: &mut Vec<(InstanceId, String)>,
    ) -> Result<InstanceId> {
        let serde_json::Value::Object(map) = data else {
            return Err(ModelError::validation(class, "", "an object", json_kind(data)));
        };

        let library = self.shared_library();
        let mut values = Vec::new();
        let mut pending = Vec::new();
        let mut references = Vec::new();

        for (key, raw) in map {
            if key == SOURCE_KEY {
                continue;
            }
            let attribute = library.field(class, key).ok_or_else(|| {
                ModelError::validation(class, key, format!("an attribute of '{}'", class), "unknown attribute")
            })?;

            let elements: Vec<&serde_json::Value> = match raw {
                serde_json::Value::Array(items) if attribute.multiple => items.iter().collect(),
                serde_json::Value::Null => continue,
                other => vec![other],
            };

            let class_reference = attribute.reference.is_some() && library.class_candidate(attribute).is_some();
            let mut converted = Vec::new();
            let mut unresolved = Vec::new();
            for element in elements {
                if element.is_object() {
                    let candidate = self.object_candidate(attribute, element).ok_or_else(|| {
                        ModelError::validation(class, key, attribute_types(attribute), "object")
                    })?;
                    let child = self.build_from_dict(&candidate, element, deferred, scalar_references)?;
                    converted.push(Value::Object(child));
                } else if class_reference {
                    unresolved.push(scalar_from_json(element));
                } else {
                    converted.push(scalar_from_json(element));
                }
            }

            if !unresolved.is_empty() {
                pending.push((key.clone(), unresolved));
                continue;
            }
            if attribute.reference.is_some() {
                references.push(key.clone());
            }
            let value = if attribute.multiple {
                Value::List(converted)
            } else {
                converted.into_iter().next().unwrap_or_default()
            };
            values.push((key.clone(), value));
        }

        let id = self.create(class, values)?;
        scalar_references.extend(references.into_iter().map(|attribute| (id, attribute)));
        deferred.extend(pending.into_iter().map(|(attribute, values)| Deferred {
            owner: id,
            attribute,
            values,
        }));
        Ok(id)
    }

    /// First class candidate of an attribute that knows every key of the data
    fn object_candidate(&self, attribute: &AttributeDefinition, data: &serde_json::Value) -> Option<String> {
        let keys: Vec<&String> = data.as_object()?.keys().filter(|k| *k != SOURCE_KEY).collect();
        attribute
            .named_types()
            .filter(|name| self.library.is_class(name))
            .find(|name| {
                self.library
                    .fields(name)
                    .map(|fields| keys.iter().all(|k| fields.iter().any(|f| &&f.name == k)))
                    .unwrap_or(false)
            })
            .map(str::to_string)
    }

    /// Coerce an imported scalar to the type of the attribute a reference points at
    fn coerce_to_target(&self, class: &str, attribute: &AttributeDefinition, value: Value) -> Result<Value> {
        let Some(target) = &attribute.reference else {
            return Ok(value);
        };
        let Some(field) = self.library.field(&target.class, &target.attribute) else {
            return Ok(value);
        };
        let single = AttributeDefinition {
            multiple: false,
            options: Default::default(),
            ..field.clone()
        };
        let context = FieldContext {
            object: &target.class,
            attribute: &single,
            library: &self.library,
            arena: Some(self),
        };
        validate(value.clone(), &context).map_err(|_| ModelError::Reference {
            object: class.to_string(),
            attribute: attribute.name.clone(),
            message: format!("value '{}' does not conform to '{}'", value, target),
        })
    }

    // =========================================================================
    // Structural equality
    // =========================================================================

    /// SHA-256 over the sorted, flattened export of an instance
    pub fn fingerprint(&self, id: InstanceId) -> Result<Checksum> {
        let map = self.object_to_map(id)?;
        let mut pairs = Vec::new();
        flatten("", &serde_json::Value::Object(map), &mut pairs)?;
        Ok(Checksum::from_pairs(pairs))
    }

    /// Compare two instances by content, possibly across arenas
    pub fn structurally_eq(&self, id: InstanceId, other: &Arena, other_id: InstanceId) -> Result<bool> {
        Ok(self.fingerprint(id)? == other.fingerprint(other_id)?)
    }
}

/// Flatten nested maps into `a_b_c` keys; lists stay JSON text
fn flatten(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}_{}", prefix, key)
                };
                flatten(&key, nested, out)?;
            }
        }
        serde_json::Value::Array(_) => out.push((prefix.to_string(), serde_json::to_string(value)?)),
        serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
    Ok(())
}

/// Plain scalar to value; the validation rules coerce it further
fn scalar_from_json(data: &serde_json::Value) -> Value {
    match data {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or_default(),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(scalar_from_json).collect()),
        serde_json::Value::Object(_) => Value::Null,
    }
}

fn json_kind(data: &serde_json::Value) -> &'static str {
    match data {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "object",
    }
}

fn attribute_types(attribute: &AttributeDefinition) -> String {
    attribute
        .types
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(" | ")
}
