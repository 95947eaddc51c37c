//! Schema definitions
//!
//! The intermediate representation produced by the diagram parser and
//! consumed by the dependency resolver, the class emitter and the runtime
//! [`Library`](crate::runtime::Library).

pub mod descriptions;
pub mod external;
pub mod parser;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::datatypes::PrimitiveKind;
use crate::error::{ModelError, Result};

pub use descriptions::{AttributeDescription, ClassDescription, Descriptions};
pub use external::{ExternalResolver, GitSource, SpecCache, SpecificationSource};
pub use parser::parse_diagram;

// =============================================================================
// Type references
// =============================================================================

/// A candidate type of an attribute, resolved once at parse time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A primitive from the type dictionary
    Primitive(PrimitiveKind),
    /// A class or enum declared in the specification
    Named(String),
}

impl TypeRef {
    /// Resolve a type name from a diagram
    pub fn parse(name: &str) -> Self {
        match PrimitiveKind::parse(name) {
            Some(kind) => Self::Primitive(kind),
            None => Self::Named(name.to_string()),
        }
    }

    /// Shorthand for a named type
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// The schema name of this type
    pub fn name(&self) -> &str {
        match self {
            Self::Primitive(kind) => kind.schema_name(),
            Self::Named(name) => name,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    /// The named type, if this is not a primitive
    pub fn as_named(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Primitive(_) => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A `Class.attribute` reference descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceTarget {
    pub class: String,
    pub attribute: String,
}

impl ReferenceTarget {
    pub fn new(class: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `Identifier.identifier`; whitespace anywhere is rejected
    pub fn parse(descriptor: &str) -> Option<Self> {
        let (class, attribute) = descriptor.split_once('.')?;
        let is_ident = |s: &str| {
            let mut chars = s.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if is_ident(class) && is_ident(attribute) {
            Some(Self::new(class, attribute))
        } else {
            None
        }
    }
}

impl fmt::Display for ReferenceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.attribute)
    }
}

// =============================================================================
// Definitions
// =============================================================================

/// A single attribute of a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    /// Candidate types; more than one makes a union
    pub types: Vec<TypeRef>,
    /// Ordered collection instead of a single value
    pub multiple: bool,
    pub required: bool,
    /// Default literal, converted per type when the library is built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Class constructed when the attribute is left out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_factory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceTarget>,
    /// Free-form metadata such as `minimum` or `pattern`
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, types: impl IntoIterator<Item = TypeRef>) -> Self {
        Self {
            name: name.into(),
            types: types.into_iter().collect(),
            multiple: false,
            required: false,
            default: None,
            default_factory: None,
            reference: None,
            options: IndexMap::new(),
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_default_factory(mut self, class: impl Into<String>) -> Self {
        self.default_factory = Some(class.into());
        self
    }

    pub fn with_reference(mut self, class: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.reference = Some(ReferenceTarget::new(class, attribute));
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Non-primitive candidate type names
    pub fn named_types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().filter_map(TypeRef::as_named)
    }

    pub fn is_union(&self) -> bool {
        self.types.len() > 1
    }
}

/// A class block of the diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    pub attributes: Vec<AttributeDefinition>,
    /// Single inheritance, assigned by the dependency resolver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Repository the class was fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docstring: None,
            attributes: Vec::new(),
            parent: None,
            external: None,
        }
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_external(mut self, repository: impl Into<String>) -> Self {
        self.external = Some(repository.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// An enumeration block of the diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Symbolic name -> literal value
    pub members: IndexMap<String, String>,
}

impl EnumDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docstring: None,
            members: IndexMap::new(),
        }
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    pub fn member(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.members.insert(name.into(), value.into());
        self
    }

    /// Resolve either a symbolic name or a literal to the literal
    pub fn literal(&self, candidate: &str) -> Option<&str> {
        if let Some(value) = self.members.get(candidate) {
            return Some(value);
        }
        self.members
            .values()
            .find(|value| value.as_str() == candidate)
            .map(String::as_str)
    }
}

/// An `<<External Object>>` block before its definitions are fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Any top-level block of a diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Definition {
    Class(ClassDefinition),
    Enum(EnumDefinition),
    External(ExternalReference),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Self::Class(class) => &class.name,
            Self::Enum(enumeration) => &enumeration.name,
            Self::External(external) => &external.name,
        }
    }
}

/// A `Parent <-- Child` inheritance line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub parent: String,
    pub child: String,
}

impl Relation {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

// =============================================================================
// Specification set
// =============================================================================

/// Everything parsed from one diagram and its descriptions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecificationSet {
    /// Module level documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Definitions in declaration order
    pub definitions: IndexMap<String, Definition>,
    /// Inheritance relations in declaration order
    pub relations: Vec<Relation>,
}

impl SpecificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a definition, failing on duplicate names
    pub fn insert(&mut self, definition: Definition) -> Result<()> {
        let name = definition.name().to_string();
        if self.definitions.contains_key(&name) {
            return Err(ModelError::spec(format!("'{}' is defined more than once", name)));
        }
        self.definitions.insert(name, definition);
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&ClassDefinition> {
        match self.definitions.get(name) {
            Some(Definition::Class(class)) => Some(class),
            _ => None,
        }
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut ClassDefinition> {
        match self.definitions.get_mut(name) {
            Some(Definition::Class(class)) => Some(class),
            _ => None,
        }
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDefinition> {
        match self.definitions.get(name) {
            Some(Definition::Enum(enumeration)) => Some(enumeration),
            _ => None,
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.definitions.values().filter_map(|d| match d {
            Definition::Class(class) => Some(class),
            _ => None,
        })
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDefinition> {
        self.definitions.values().filter_map(|d| match d {
            Definition::Enum(enumeration) => Some(enumeration),
            _ => None,
        })
    }

    pub fn externals(&self) -> impl Iterator<Item = &ExternalReference> {
        self.definitions.values().filter_map(|d| match d {
            Definition::External(external) => Some(external),
            _ => None,
        })
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enumeration(name).is_some()
    }

    /// Attributes of a class including inherited ones, parents first
    pub fn effective_attributes(&self, name: &str) -> Vec<&AttributeDefinition> {
        let mut chain = Vec::new();
        let mut current = self.class(name);
        while let Some(class) = current {
            if chain.iter().any(|c: &&ClassDefinition| c.name == class.name) {
                break;
            }
            chain.push(class);
            current = class.parent.as_deref().and_then(|p| self.class(p));
        }

        let mut attributes: Vec<&AttributeDefinition> = Vec::new();
        for class in chain.into_iter().rev() {
            for attribute in &class.attributes {
                attributes.retain(|a| a.name != attribute.name);
                attributes.push(attribute);
            }
        }
        attributes
    }

    /// Check that every named type and reference target exists.
    ///
    /// External objects that were not spliced yet are rejected as well.
    pub fn validate(&self) -> Result<()> {
        if let Some(external) = self.externals().next() {
            return Err(ModelError::spec(format!(
                "external object '{}' from {} has not been resolved",
                external.name, external.url
            )));
        }

        for class in self.classes() {
            if let Some(parent) = &class.parent {
                if self.class(parent).is_none() {
                    return Err(ModelError::UnknownClass { name: parent.clone() });
                }
            }

            for attribute in &class.attributes {
                if attribute.types.is_empty() {
                    return Err(ModelError::spec(format!(
                        "attribute '{}.{}' declares no type",
                        class.name, attribute.name
                    )));
                }

                for name in attribute.named_types() {
                    if !self.definitions.contains_key(name) {
                        return Err(ModelError::UnknownClass { name: name.to_string() });
                    }
                }

                if let Some(target) = &attribute.reference {
                    let Some(target_class) = self.class(&target.class) else {
                        return Err(ModelError::spec(format!(
                            "reference '{}' of '{}.{}' points to an unknown class",
                            target, class.name, attribute.name
                        )));
                    };
                    let exists = self
                        .effective_attributes(&target_class.name)
                        .iter()
                        .any(|a| a.name == target.attribute);
                    if !exists {
                        return Err(ModelError::spec(format!(
                            "reference '{}' of '{}.{}' points to an unknown attribute",
                            target, class.name, attribute.name
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_target_parse() {
        assert_eq!(
            ReferenceTarget::parse("Nested.id"),
            Some(ReferenceTarget::new("Nested", "id"))
        );
        assert_eq!(ReferenceTarget::parse("Nested. id"), None);
        assert_eq!(ReferenceTarget::parse("1.5"), None);
        assert_eq!(ReferenceTarget::parse("Nested"), None);
    }

    #[test]
    fn test_enum_literal_lookup() {
        let enumeration = EnumDefinition::new("Color").member("RED", "red");
        assert_eq!(enumeration.literal("RED"), Some("red"));
        assert_eq!(enumeration.literal("red"), Some("red"));
        assert_eq!(enumeration.literal("blue"), None);
    }

    #[test]
    fn test_effective_attributes_parent_first() {
        let mut set = SpecificationSet::new();
        set.insert(Definition::Class(
            ClassDefinition::new("Base")
                .attribute(AttributeDefinition::new("id", [TypeRef::parse("string")])),
        ))
        .unwrap();
        set.insert(Definition::Class(
            ClassDefinition::new("Child")
                .with_parent("Base")
                .attribute(AttributeDefinition::new("value", [TypeRef::parse("float")])),
        ))
        .unwrap();

        let names: Vec<_> = set
            .effective_attributes("Child")
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "value"]);
    }

    #[test]
    fn test_validate_dangling_reference() {
        let mut set = SpecificationSet::new();
        set.insert(Definition::Class(ClassDefinition::new("Target").attribute(
            AttributeDefinition::new("id", [TypeRef::parse("string")]),
        )))
        .unwrap();
        set.insert(Definition::Class(ClassDefinition::new("Source").attribute(
            AttributeDefinition::new("target", [TypeRef::parse("string")])
                .with_reference("Target", "missing"),
        )))
        .unwrap();

        assert!(matches!(set.validate(), Err(ModelError::Specification(_))));
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let mut set = SpecificationSet::new();
        set.insert(Definition::Class(ClassDefinition::new("A"))).unwrap();
        assert!(set.insert(Definition::Class(ClassDefinition::new("A"))).is_err());
    }
}
