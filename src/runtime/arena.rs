//! Instance storage
//!
//! The arena owns every instance. Parents own their children through object
//! values; children only keep the parent's [`InstanceId`]. References are
//! registered on both ends and rebuilt on every assignment.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::validate::{validate, FieldContext};
use super::{FromValue, InstanceId, Library, Value};
use crate::error::{ModelError, Result};
use crate::schema::AttributeDefinition;

/// One object of the model
#[derive(Debug, Clone)]
pub struct RuntimeInstance {
    pub(crate) class: String,
    pub(crate) uid: Uuid,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) values: IndexMap<String, Value>,
    pub(crate) references: IndexMap<String, Vec<InstanceId>>,
}

impl RuntimeInstance {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    /// Stored values in field order
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// Instances registered as references of an attribute
    pub fn references(&self, attribute: &str) -> &[InstanceId] {
        self.references
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Owner of all instances built against one library
#[derive(Debug, Clone)]
pub struct Arena {
    pub(crate) library: Arc<Library>,
    pub(crate) instances: Vec<RuntimeInstance>,
}

impl Arena {
    pub fn new(library: Arc<Library>) -> Self {
        Self {
            library,
            instances: Vec::new(),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn shared_library(&self) -> Arc<Library> {
        Arc::clone(&self.library)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> {
        (0..self.instances.len()).map(InstanceId)
    }

    pub fn instance(&self, id: InstanceId) -> Result<&RuntimeInstance> {
        self.instances
            .get(id.0)
            .ok_or_else(|| ModelError::Query(format!("unknown instance {}", id)))
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut RuntimeInstance> {
        self.instances
            .get_mut(id.0)
            .ok_or_else(|| ModelError::Query(format!("unknown instance {}", id)))
    }

    pub fn class_of(&self, id: InstanceId) -> Result<&str> {
        Ok(self.instance(id)?.class.as_str())
    }

    pub fn parent(&self, id: InstanceId) -> Result<Option<InstanceId>> {
        Ok(self.instance(id)?.parent)
    }

    /// Follow parents up to the outermost instance
    pub fn root_of(&self, id: InstanceId) -> Result<InstanceId> {
        let mut current = id;
        let mut steps = 0;
        while let Some(parent) = self.instance(current)?.parent {
            current = parent;
            steps += 1;
            if steps > self.instances.len() {
                break;
            }
        }
        Ok(current)
    }

    /// Instances without a parent, in creation order
    pub fn roots(&self) -> Vec<InstanceId> {
        self.ids()
            .filter(|id| self.instances[id.0].parent.is_none())
            .collect()
    }

    pub fn references(&self, id: InstanceId, attribute: &str) -> Result<&[InstanceId]> {
        Ok(self.instance(id)?.references(attribute))
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Raw stored value of an attribute
    pub fn value(&self, id: InstanceId, attribute: &str) -> Result<&Value> {
        let instance = self.instance(id)?;
        instance
            .values
            .get(attribute)
            .ok_or_else(|| unknown_attribute(&instance.class, attribute))
    }

    /// Typed view of an attribute
    pub fn field<T: FromValue>(&self, id: InstanceId, attribute: &str) -> Result<T> {
        let value = self.value(id, attribute)?;
        T::from_value(value).ok_or_else(|| {
            ModelError::validation(
                self.class_of(id).unwrap_or_default(),
                attribute,
                std::any::type_name::<T>(),
                value.kind_name(),
            )
        })
    }

    // =========================================================================
    // Construction and assignment
    // =========================================================================

    /// Create an instance. `Null` values count as absent.
    pub fn create<K, I>(&mut self, class: &str, values: I) -> Result<InstanceId>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let library = Arc::clone(&self.library);
        let fields = library.fields(class)?;

        let mut provided: IndexMap<String, Value> =
            values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if let Some(name) = provided.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
            return Err(unknown_attribute(class, name));
        }

        let mut stored = IndexMap::new();
        let mut registrations = Vec::new();
        let mut factories = Vec::new();

        for attribute in fields {
            let value = provided.shift_remove(&attribute.name).unwrap_or_default();
            let value = self.prepare(class, attribute, value, None)?;

            if value.is_null() {
                if let Some(factory) = &attribute.default_factory {
                    factories.push((attribute.name.clone(), factory.clone()));
                }
            }
            if let Some(target) = &attribute.reference {
                let targets = self.reference_targets(class, attribute, &value)?;
                registrations.push((attribute.name.clone(), target.attribute.clone(), targets));
            }
            stored.insert(attribute.name.clone(), value);
        }

        let children = self.atomic(|arena| {
            factories
                .into_iter()
                .map(|(name, factory)| Ok((name, arena.create(&factory, Vec::<(String, Value)>::new())?)))
                .collect::<Result<Vec<_>>>()
        })?;
        for (name, child) in children {
            stored.insert(name, Value::Object(child));
        }

        let id = InstanceId(self.instances.len());
        self.instances.push(RuntimeInstance {
            class: class.to_string(),
            uid: Uuid::new_v4(),
            parent: None,
            values: IndexMap::new(),
            references: fields
                .iter()
                .filter(|f| f.reference.is_some())
                .map(|f| (f.name.clone(), Vec::new()))
                .collect(),
        });

        for (name, value) in &stored {
            if let Some(attribute) = fields.iter().find(|f| &f.name == name) {
                if attribute.reference.is_none() {
                    self.adopt(id, value);
                }
            }
        }
        self.instances[id.0].values = stored;

        for (attribute, target_attribute, targets) in registrations {
            self.register(id, &attribute, &target_attribute, targets);
        }

        debug!(class, id = id.0, "created instance");
        Ok(id)
    }

    /// Run a multi-instance build; on error every instance it created is
    /// dropped again
    pub(crate) fn atomic<T>(&mut self, build: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mark = self.instances.len();
        let result = build(self);
        if result.is_err() {
            self.rollback(mark);
        }
        result
    }

    /// Drop instances created after `mark` and the links survivors hold to them
    fn rollback(&mut self, mark: usize) {
        if self.instances.len() <= mark {
            return;
        }
        let dropped = self.instances.len() - mark;
        self.instances.truncate(mark);
        for instance in &mut self.instances {
            for targets in instance.references.values_mut() {
                targets.retain(|t| t.0 < mark);
            }
            if instance.parent.is_some_and(|p| p.0 >= mark) {
                instance.parent = None;
            }
        }
        debug!(dropped, "rolled back instances");
    }

    /// Assign an attribute. On error the instance is left untouched.
    pub fn set(&mut self, id: InstanceId, attribute: &str, value: impl Into<Value>) -> Result<()> {
        let library = Arc::clone(&self.library);
        let class = self.class_of(id)?.to_string();
        let definition = library
            .field(&class, attribute)
            .ok_or_else(|| unknown_attribute(&class, attribute))?;

        let value = self.prepare(&class, definition, value.into(), Some(id))?;
        let targets = match &definition.reference {
            Some(_) => Some(self.reference_targets(&class, definition, &value)?),
            None => None,
        };

        if let (Some(target), Some(targets)) = (&definition.reference, targets) {
            self.unregister(id, attribute, &target.attribute);
            self.register(id, attribute, &target.attribute, targets);
        } else {
            let previous = self.instance(id)?.values.get(attribute).cloned().unwrap_or_default();
            self.release(id, &previous, &value);
            self.adopt(id, &value);
        }

        self.instance_mut(id)?.values.insert(attribute.to_string(), value);
        Ok(())
    }

    /// Append to a collection attribute
    pub fn append(&mut self, id: InstanceId, attribute: &str, value: impl Into<Value>) -> Result<()> {
        let class = self.class_of(id)?.to_string();
        let multiple = self
            .library
            .field(&class, attribute)
            .ok_or_else(|| unknown_attribute(&class, attribute))?
            .multiple;
        if !multiple {
            return Err(ModelError::validation(&class, attribute, "list attribute", "single value"));
        }

        let mut items = match self.value(id, attribute)? {
            Value::List(items) => items.clone(),
            _ => Vec::new(),
        };
        items.push(value.into());
        self.set(id, attribute, Value::List(items))
    }

    /// Validate, apply defaults and check requiredness
    fn prepare(
        &self,
        class: &str,
        attribute: &AttributeDefinition,
        value: Value,
        owner: Option<InstanceId>,
    ) -> Result<Value> {
        let context = FieldContext {
            object: class,
            attribute,
            library: &self.library,
            arena: Some(self),
        };
        let mut value = validate(value, &context)?;

        if value.is_null() {
            value = self.library.default_value(attribute)?;
        }

        let missing = match &value {
            Value::Null => attribute.default_factory.is_none(),
            Value::List(items) => items.is_empty(),
            _ => false,
        };
        if attribute.required && missing {
            return Err(ModelError::validation(class, &attribute.name, "a value", "nothing"));
        }

        if attribute.reference.is_none() {
            for element in value.elements() {
                if let Value::Object(child) = element {
                    self.check_containment(class, &attribute.name, *child, owner)?;
                }
            }
        }

        Ok(value)
    }

    /// Reject values that would make an instance contain itself
    fn check_containment(
        &self,
        class: &str,
        attribute: &str,
        child: InstanceId,
        owner: Option<InstanceId>,
    ) -> Result<()> {
        let Some(owner) = owner else {
            return Ok(());
        };
        let mut current = Some(owner);
        while let Some(id) = current {
            if id == child {
                return Err(ModelError::validation(
                    class,
                    attribute,
                    "an object outside its own ancestry",
                    format!("ancestor {}", child),
                ));
            }
            current = self.instance(id)?.parent;
        }
        Ok(())
    }

    fn adopt(&mut self, parent: InstanceId, value: &Value) {
        for element in value.elements() {
            if let Value::Object(child) = element {
                if let Some(instance) = self.instances.get_mut(child.0) {
                    instance.parent = Some(parent);
                }
            }
        }
    }

    /// Clear the parent of children that `next` no longer holds
    fn release(&mut self, parent: InstanceId, previous: &Value, next: &Value) {
        for element in previous.elements() {
            let Value::Object(child) = element else {
                continue;
            };
            if next.elements().any(|e| e == element) {
                continue;
            }
            if let Some(instance) = self.instances.get_mut(child.0) {
                if instance.parent == Some(parent) {
                    instance.parent = None;
                }
            }
        }
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Instances a reference value points at. Fails when the value does not
    /// conform to the referenced attribute.
    pub(crate) fn reference_targets(
        &self,
        class: &str,
        attribute: &AttributeDefinition,
        value: &Value,
    ) -> Result<Vec<InstanceId>> {
        let Some(target) = &attribute.reference else {
            return Ok(Vec::new());
        };
        let target_field = self.library.field(&target.class, &target.attribute).ok_or_else(|| {
            ModelError::spec(format!("reference '{}' points to an unknown attribute", target))
        })?;

        let incompliant = |message: String| ModelError::Reference {
            object: class.to_string(),
            attribute: attribute.name.clone(),
            message,
        };

        let mut targets = Vec::new();
        for element in value.elements() {
            match element {
                Value::Object(id) => {
                    let target_class = self.class_of(*id)?;
                    if !self.library.is_subclass(target_class, &target.class) {
                        return Err(incompliant(format!(
                            "expected an instance of '{}', got '{}'",
                            target.class, target_class
                        )));
                    }
                    targets.push(*id);
                }
                scalar => {
                    let single = AttributeDefinition {
                        multiple: false,
                        options: IndexMap::new(),
                        ..target_field.clone()
                    };
                    let context = FieldContext {
                        object: &target.class,
                        attribute: &single,
                        library: &self.library,
                        arena: Some(self),
                    };
                    let coerced = validate(scalar.clone(), &context).map_err(|_| {
                        incompliant(format!("value '{}' does not conform to '{}'", scalar, target))
                    })?;
                    match self.find_by_attribute(&target.class, &target.attribute, &coerced) {
                        Some(id) => targets.push(id),
                        None => warn!(
                            object = class,
                            attribute = %attribute.name,
                            value = %coerced,
                            "no '{}' instance holds the referenced value",
                            target
                        ),
                    }
                }
            }
        }
        Ok(targets)
    }

    /// First instance of a class whose attribute holds the value
    pub fn find_by_attribute(&self, class: &str, attribute: &str, value: &Value) -> Option<InstanceId> {
        self.ids().find(|id| {
            let instance = &self.instances[id.0];
            self.library.is_subclass(&instance.class, class)
                && instance
                    .values
                    .get(attribute)
                    .is_some_and(|stored| stored == value || stored.elements().any(|e| e == value))
        })
    }

    fn register(&mut self, id: InstanceId, attribute: &str, target_attribute: &str, targets: Vec<InstanceId>) {
        for target in &targets {
            if let Some(instance) = self.instances.get_mut(target.0) {
                instance
                    .references
                    .entry(target_attribute.to_string())
                    .or_default()
                    .push(id);
            }
        }
        if let Some(instance) = self.instances.get_mut(id.0) {
            instance
                .references
                .entry(attribute.to_string())
                .or_default()
                .extend(targets);
        }
    }

    fn unregister(&mut self, id: InstanceId, attribute: &str, target_attribute: &str) {
        let previous = match self.instances.get_mut(id.0) {
            Some(instance) => instance
                .references
                .get_mut(attribute)
                .map(std::mem::take)
                .unwrap_or_default(),
            None => return,
        };
        for target in previous {
            if let Some(back) = self
                .instances
                .get_mut(target.0)
                .and_then(|t| t.references.get_mut(target_attribute))
            {
                if let Some(position) = back.iter().position(|b| *b == id) {
                    back.remove(position);
                }
            }
        }
    }

    /// Value of the referenced attribute on the referenced instance(s)
    pub fn resolve_reference(&self, id: InstanceId, attribute: &str) -> Result<Value> {
        let class = self.class_of(id)?;
        let definition = self
            .library
            .field(class, attribute)
            .ok_or_else(|| unknown_attribute(class, attribute))?;
        let Some(target) = &definition.reference else {
            return Err(ModelError::Query(format!(
                "'{}.{}' is not a reference",
                class, attribute
            )));
        };

        let mut values = Vec::new();
        for referenced in self.references(id, attribute)? {
            match self.value(*referenced, &target.attribute)? {
                Value::List(items) => values.extend(items.iter().cloned()),
                Value::Null => {}
                other => values.push(other.clone()),
            }
        }

        if values.is_empty() && definition.required {
            return Err(ModelError::Reference {
                object: class.to_string(),
                attribute: attribute.to_string(),
                message: format!("no instance of '{}' is referenced", target),
            });
        }

        Ok(if definition.multiple {
            Value::List(values)
        } else {
            values.into_iter().next().unwrap_or_default()
        })
    }

    /// Typed view of [`Arena::resolve_reference`]
    pub fn resolved<T: FromValue>(&self, id: InstanceId, attribute: &str) -> Result<T> {
        let value = self.resolve_reference(id, attribute)?;
        T::from_value(&value).ok_or_else(|| ModelError::Reference {
            object: self.class_of(id).unwrap_or_default().to_string(),
            attribute: attribute.to_string(),
            message: format!("referenced value {} has an unexpected type", value),
        })
    }

    /// Re-check every reference below an instance; maps path to message
    pub fn validate_references(&self, id: InstanceId) -> Result<IndexMap<String, String>> {
        let mut report = IndexMap::new();
        for (path, instance_id) in self.descendants(id)? {
            let instance = self.instance(instance_id)?;
            for attribute in self.library.fields(&instance.class)? {
                if attribute.reference.is_none() {
                    continue;
                }
                let Some(value) = instance.values.get(&attribute.name) else {
                    continue;
                };
                if let Err(e) = self.reference_targets(&instance.class, attribute, value) {
                    report.insert(format!("{}/{}", path, attribute.name), e.to_string());
                }
            }
        }
        Ok(report)
    }

    /// The instance and every contained instance with their absolute paths
    pub(crate) fn descendants(&self, id: InstanceId) -> Result<Vec<(String, InstanceId)>> {
        let mut out = Vec::new();
        self.collect_descendants(id, String::new(), &mut out)?;
        Ok(out)
    }

    fn collect_descendants(
        &self,
        id: InstanceId,
        path: String,
        out: &mut Vec<(String, InstanceId)>,
    ) -> Result<()> {
        let instance = self.instance(id)?;
        out.push((path.clone(), id));
        for attribute in self.library.fields(&instance.class)? {
            if attribute.reference.is_some() {
                continue;
            }
            match instance.values.get(&attribute.name) {
                Some(Value::Object(child)) => {
                    self.collect_descendants(*child, format!("{}/{}", path, attribute.name), out)?
                }
                Some(Value::List(items)) => {
                    for (index, item) in items.iter().enumerate() {
                        if let Value::Object(child) = item {
                            let child_path = format!("{}/{}/{}", path, attribute.name, index);
                            self.collect_descendants(*child, child_path, out)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn unknown_attribute(class: &str, attribute: &str) -> ModelError {
    ModelError::validation(class, attribute, format!("an attribute of '{}'", class), "unknown attribute")
}
