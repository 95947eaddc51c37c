//! Class registry
//!
//! A [`Library`] holds every class and enum definition of a model with
//! inherited fields flattened. Generated packages build one through
//! [`Library::builder`]; diagrams can be turned into one directly.

use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

use super::validate::parse_literal;
use super::Value;
use crate::error::{ModelError, Result};
use crate::graph::{self, ContainmentGraph};
use crate::schema::{
    parse_diagram, parser, AttributeDefinition, ClassDefinition, Definition, Descriptions,
    EnumDefinition, SpecificationSet,
};
use crate::tree::GuideTree;

/// Registry of class and enum definitions
#[derive(Debug, Clone)]
pub struct Library {
    classes: IndexMap<String, ClassDefinition>,
    fields: IndexMap<String, Vec<AttributeDefinition>>,
    enums: IndexMap<String, EnumDefinition>,
    roots: Vec<String>,
    repository: Option<String>,
    commit: Option<String>,
}

impl Library {
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::default()
    }

    /// Build from an already resolved specification
    pub fn from_specification(set: &SpecificationSet) -> Result<Self> {
        let mut builder = Self::builder();
        for definition in set.definitions.values() {
            builder = match definition {
                Definition::Class(class) => builder.class(class.clone()),
                Definition::Enum(enumeration) => builder.enumeration(enumeration.clone()),
                Definition::External(external) => {
                    return Err(ModelError::spec(format!(
                        "external object '{}' has not been resolved",
                        external.name
                    )))
                }
            };
        }
        builder.build()
    }

    /// Parse, resolve and register a diagram in one go
    pub fn from_diagram(text: &str, descriptions: &Descriptions) -> Result<Self> {
        let mut set = parse_diagram(text, descriptions)?;
        graph::resolve(&mut set)?;
        Self::from_specification(&set)
    }

    /// Load a diagram file or a directory of diagrams
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut set = if path.is_dir() {
            parser::parse_directory(path)?
        } else {
            parser::parse_file(path)?
        };
        graph::resolve(&mut set)?;
        Self::from_specification(&set)
    }

    /// Attach the repository and commit the definitions came from
    pub fn with_source(mut self, repository: impl Into<String>, commit: Option<&str>) -> Self {
        self.repository = Some(repository.into());
        self.commit = commit.map(str::to_string);
        self
    }

    pub fn class(&self, name: &str) -> Result<&ClassDefinition> {
        self.classes.get(name).ok_or_else(|| ModelError::UnknownClass {
            name: name.to_string(),
        })
    }

    /// Effective attributes of a class, parents first
    pub fn fields(&self, class: &str) -> Result<&[AttributeDefinition]> {
        self.fields
            .get(class)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::UnknownClass {
                name: class.to_string(),
            })
    }

    pub fn field(&self, class: &str, attribute: &str) -> Option<&AttributeDefinition> {
        self.fields.get(class)?.iter().find(|a| a.name == attribute)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDefinition> {
        self.enums.get(name)
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.classes.values()
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDefinition> {
        self.enums.values()
    }

    /// Whether `class` is `ancestor` or inherits from it
    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        let mut depth = 0;
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            depth += 1;
            if depth > self.classes.len() {
                return false;
            }
            current = self.classes.get(name).and_then(|c| c.parent.as_deref());
        }
        false
    }

    /// First class candidate of an attribute, if any
    pub fn class_candidate<'a>(&self, attribute: &'a AttributeDefinition) -> Option<&'a str> {
        attribute.named_types().find(|name| self.is_class(name))
    }

    /// Classes not contained by any other class
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    /// Browsable URL of the source repository at the pinned commit
    pub fn source_url(&self) -> Option<String> {
        let repository = self.repository.as_deref()?;
        let base = repository.trim_end_matches(".git");
        Some(match &self.commit {
            Some(commit) => format!("{}/tree/{}", base, commit),
            None => base.to_string(),
        })
    }

    /// Converted default of an attribute, `Null` when there is none
    pub fn default_value(&self, attribute: &AttributeDefinition) -> Result<Value> {
        match &attribute.default {
            Some(literal) => parse_literal(literal, attribute, self),
            None if attribute.multiple => Ok(Value::List(Vec::new())),
            None => Ok(Value::Null),
        }
    }

    /// Guide tree of a class
    pub fn meta_tree(&self, class: &str) -> Result<GuideTree> {
        GuideTree::for_class(self, class)
    }

    /// Every meta path of a class, starting with the class name
    pub fn meta_paths(&self, class: &str, leaves_only: bool) -> Result<Vec<String>> {
        Ok(self.meta_tree(class)?.paths(leaves_only))
    }
}

/// Collects definitions for a [`Library`]
#[derive(Debug, Default)]
pub struct LibraryBuilder {
    set: SpecificationSet,
    repository: Option<String>,
    commit: Option<String>,
    error: Option<ModelError>,
}

impl LibraryBuilder {
    pub fn class(mut self, class: ClassDefinition) -> Self {
        self.add(Definition::Class(class));
        self
    }

    pub fn enumeration(mut self, enumeration: EnumDefinition) -> Self {
        self.add(Definition::Enum(enumeration));
        self
    }

    pub fn repository(mut self, url: impl Into<String>) -> Self {
        self.repository = Some(url.into());
        self
    }

    pub fn commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    fn add(&mut self, definition: Definition) {
        if self.error.is_none() {
            if let Err(e) = self.set.insert(definition) {
                self.error = Some(e);
            }
        }
    }

    pub fn build(self) -> Result<Library> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let set = self.set;
        set.validate()?;
        let containment = ContainmentGraph::from_set(&set)?;

        let fields: IndexMap<String, Vec<AttributeDefinition>> = set
            .classes()
            .map(|c| {
                let attributes = set.effective_attributes(&c.name).into_iter().cloned().collect();
                (c.name.clone(), attributes)
            })
            .collect();

        let library = Library {
            classes: set.classes().map(|c| (c.name.clone(), c.clone())).collect(),
            fields,
            enums: set.enums().map(|e| (e.name.clone(), e.clone())).collect(),
            roots: containment.roots().into_iter().map(str::to_string).collect(),
            repository: self.repository,
            commit: self.commit,
        };

        for (class, attributes) in &library.fields {
            for attribute in attributes {
                library.default_value(attribute).map_err(|e| {
                    ModelError::spec(format!(
                        "invalid default for '{}.{}': {}",
                        class, attribute.name, e
                    ))
                })?;
                if let Some(factory) = &attribute.default_factory {
                    library.class(factory)?;
                }
            }
        }

        debug!(
            classes = library.classes.len(),
            enums = library.enums.len(),
            "built library"
        );

        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeRef;

    fn sample() -> Library {
        Library::from_diagram(
            r#"
Base <-- Root
class Base {
    +string id
}
class Root {
    +string name* default="root"
    +Nested[] children
}
class Nested {
    +float value
}
"#,
            &Descriptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_fields_are_flattened() {
        let library = sample();
        let names: Vec<_> = library
            .fields("Root")
            .unwrap()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "name", "children"]);
        assert!(library.is_subclass("Root", "Base"));
        assert!(!library.is_subclass("Base", "Root"));
    }

    #[test]
    fn test_roots_and_defaults() {
        let library = sample();
        assert_eq!(library.roots(), &["Base".to_string(), "Root".to_string()]);

        let name = library.field("Root", "name").unwrap();
        assert_eq!(library.default_value(name).unwrap(), Value::String("root".into()));
        let children = library.field("Root", "children").unwrap();
        assert_eq!(library.default_value(children).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_builder_rejects_bad_default() {
        let result = Library::builder()
            .class(ClassDefinition::new("A").attribute(
                AttributeDefinition::new("count", [TypeRef::parse("integer")]).with_default("many"),
            ))
            .build();
        assert!(matches!(result, Err(ModelError::Specification(_))));
    }

    #[test]
    fn test_source_url() {
        let library = Library::builder()
            .repository("https://github.com/org/models.git")
            .commit("abc")
            .build()
            .unwrap();
        assert_eq!(
            library.source_url().as_deref(),
            Some("https://github.com/org/models/tree/abc")
        );
    }

    #[test]
    fn test_unknown_class() {
        assert!(matches!(
            sample().fields("Missing"),
            Err(ModelError::UnknownClass { .. })
        ));
    }
}
