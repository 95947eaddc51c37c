//! Class diagram parser
//!
//! Turns Mermaid-like class diagram text plus a [`Descriptions`] document into
//! a [`SpecificationSet`].
//!
//! ```text
//! classDiagram
//!     Base <-- Root
//!     class Root {
//!         +string name*
//!         +float|integer value minimum=0
//!         +Nested[] children
//!         +string nested_ref Nested.id
//!     }
//!     class Kind {
//!         <<Enumeration>>
//!         +FIRST = "first"
//!         +SECOND
//!     }
//!     class Remote {
//!         <<External Object>>
//!         +Repository <https://github.com/org/models.git>
//!     }
//! ```

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

use super::{
    AttributeDefinition, ClassDefinition, Definition, Descriptions, EnumDefinition,
    ExternalReference, ReferenceTarget, Relation, SpecificationSet, TypeRef,
};
use crate::error::{ModelError, Result};

static CLASS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+([A-Za-z_]\w*)\s*\{([^}]*)\}").unwrap());
static RELATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*<--\s*([A-Za-z_]\w*)\b").unwrap());
static ENUM_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<\s*Enumeration\s*>>").unwrap());
static EXTERNAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<\s*External\s+Object\s*>>").unwrap());
static GITHUB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?github\.com/[A-Za-z0-9/_\-.]+").unwrap()
});
static TYPE_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*(?:\|[A-Za-z_]\w*)*)(\[(?:\d+\.\.(?:\*|\d+))?\])?$").unwrap()
});
static ATTRIBUTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)(\*)?$").unwrap());
static UNION_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\|\s*").unwrap());
static ENUM_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\s*([A-Za-z_]\w*)\s*(?:=\s*(.+))?$").unwrap());

/// Parse a diagram and merge its descriptions.
///
/// External objects are kept as [`Definition::External`]; splice them with an
/// [`ExternalResolver`](super::ExternalResolver) before resolving.
pub fn parse_diagram(text: &str, descriptions: &Descriptions) -> Result<SpecificationSet> {
    let mut set = SpecificationSet::new();
    set.docstring = descriptions.docstring.clone();

    for capture in CLASS_BLOCK.captures_iter(text) {
        let name = &capture[1];
        let body = &capture[2];

        let definition = if ENUM_MARKER.is_match(body) {
            Definition::Enum(parse_enum(name, body, descriptions)?)
        } else if EXTERNAL_MARKER.is_match(body) {
            Definition::External(parse_external(name, body)?)
        } else {
            Definition::Class(parse_class(name, body, descriptions)?)
        };

        set.insert(definition)?;
    }

    for capture in RELATION.captures_iter(text) {
        set.relations.push(Relation::new(&capture[1], &capture[2]));
    }

    debug!(
        definitions = set.definitions.len(),
        relations = set.relations.len(),
        "parsed class diagram"
    );

    Ok(set)
}

fn parse_class(name: &str, body: &str, descriptions: &Descriptions) -> Result<ClassDefinition> {
    let mut class = ClassDefinition::new(name);
    if let Some(docstring) = descriptions.class(name).and_then(|c| c.docstring.clone()) {
        class.docstring = Some(docstring);
    }

    for entry in entries(body) {
        if !entry.starts_with('+') {
            return Err(ModelError::spec(format!(
                "unexpected text in class '{}': '{}'",
                name, entry
            )));
        }
        let attribute = parse_attribute(name, &entry, descriptions)?;
        if class.get_attribute(&attribute.name).is_some() {
            return Err(ModelError::spec(format!(
                "attribute '{}.{}' is declared twice",
                name, attribute.name
            )));
        }
        class.attributes.push(attribute);
    }

    Ok(class)
}

fn parse_attribute(class: &str, line: &str, descriptions: &Descriptions) -> Result<AttributeDefinition> {
    let normalized = UNION_SEPARATOR.replace_all(line.trim_start_matches('+').trim(), "|");
    let tokens = tokenize(&normalized);

    let malformed = || ModelError::spec(format!("malformed attribute in class '{}': '{}'", class, line));

    if tokens.len() < 2 {
        return Err(malformed());
    }

    let type_spec = TYPE_SPEC.captures(&tokens[0]).ok_or_else(malformed)?;
    let name_spec = ATTRIBUTE_NAME.captures(&tokens[1]).ok_or_else(malformed)?;

    let mut attribute = AttributeDefinition::new(
        &name_spec[1],
        type_spec[1].split('|').map(TypeRef::parse),
    );
    attribute.multiple = type_spec.get(2).is_some();
    attribute.required = name_spec.get(2).is_some();

    for token in &tokens[2..] {
        if let Some((key, value)) = token.split_once('=') {
            let value = unquote(value);
            match key {
                "reference" => {
                    let target = ReferenceTarget::parse(&value).ok_or_else(|| {
                        ModelError::spec(format!(
                            "invalid reference '{}' on '{}.{}'",
                            value, class, attribute.name
                        ))
                    })?;
                    attribute.reference = Some(target);
                }
                "default" => attribute.default = Some(value),
                _ => {
                    attribute.options.insert(key.to_string(), value);
                }
            }
        } else if let Some(target) = ReferenceTarget::parse(token) {
            attribute.reference = Some(target);
        } else {
            return Err(ModelError::spec(format!(
                "unrecognized option '{}' on '{}.{}'",
                token, class, attribute.name
            )));
        }
    }

    if attribute.multiple && attribute.default.is_some() {
        return Err(ModelError::spec(format!(
            "attribute '{}.{}' holds multiple values and cannot have a scalar default",
            class, attribute.name
        )));
    }

    if let Some(description) = descriptions.attribute(class, &attribute.name) {
        attribute.description = description.description().map(str::to_string);
        for (key, value) in description.options() {
            attribute.options.entry(key).or_insert(value);
        }
    }

    Ok(attribute)
}

fn parse_enum(name: &str, body: &str, descriptions: &Descriptions) -> Result<EnumDefinition> {
    let mut enumeration = EnumDefinition::new(name);
    if let Some(docstring) = descriptions.class(name).and_then(|c| c.docstring.clone()) {
        enumeration.docstring = Some(docstring);
    }

    let body = ENUM_MARKER.replace_all(body, "");
    for line in body.lines().flat_map(entries) {
        let capture = ENUM_MEMBER.captures(&line).ok_or_else(|| {
            ModelError::spec(format!("malformed member in enumeration '{}': '{}'", name, line))
        })?;
        let member = capture[1].to_string();
        let literal = capture
            .get(2)
            .map(|m| unquote(m.as_str().trim()))
            .unwrap_or_else(|| member.clone());
        enumeration.members.insert(member, literal);
    }

    if enumeration.members.is_empty() {
        return Err(ModelError::spec(format!("enumeration '{}' has no members", name)));
    }

    Ok(enumeration)
}

fn parse_external(name: &str, body: &str) -> Result<ExternalReference> {
    let url = GITHUB_URL.find(body).map(|m| m.as_str()).ok_or_else(|| {
        ModelError::spec(format!("external object '{}' does not name a repository", name))
    })?;

    // `<repo>/tree/<ref>` pins a commit or tag
    let (url, commit) = match url.split_once("/tree/") {
        Some((repo, reference)) => (repo.to_string(), Some(reference.trim_end_matches('/').to_string())),
        None => (url.to_string(), None),
    };

    Ok(ExternalReference {
        name: name.to_string(),
        url,
        commit,
    })
}

// =============================================================================
// Files
// =============================================================================

/// Diagram file extensions
pub const DIAGRAM_EXTENSIONS: [&str; 2] = ["mmd", "mermaid"];

/// Parse a diagram file together with its sibling `<stem>.json` descriptions
pub fn parse_file(path: impl AsRef<Path>) -> Result<SpecificationSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let descriptions_path = descriptions_path(path);
    let descriptions = if descriptions_path.is_file() {
        Descriptions::from_path(&descriptions_path)?
    } else {
        Descriptions::default()
    };

    debug!(path = %path.display(), "parsing diagram file");
    parse_diagram(&text, &descriptions)
}

/// Sibling descriptions file of a diagram
pub fn descriptions_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Diagram files below a directory, sorted by path
pub fn diagram_files(dir: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| DIAGRAM_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    files
}

/// Parse every diagram below a directory into one set
pub fn parse_directory(dir: impl AsRef<Path>) -> Result<SpecificationSet> {
    let mut merged = SpecificationSet::new();
    for file in diagram_files(dir) {
        let set = parse_file(&file)?;
        if merged.docstring.is_none() {
            merged.docstring = set.docstring;
        }
        for (_, definition) in set.definitions {
            merged.insert(definition)?;
        }
        merged.relations.extend(set.relations);
    }
    Ok(merged)
}

/// Group the tokens of a block body into entries, each starting at a `+`
/// token. Text before the first `+` forms an entry of its own.
fn entries(body: &str) -> Vec<String> {
    let mut entries: Vec<Vec<String>> = Vec::new();
    for token in tokenize(body) {
        match entries.last_mut() {
            Some(entry) if !token.starts_with('+') => entry.push(token),
            _ => entries.push(vec![token]),
        }
    }
    entries.into_iter().map(|tokens| tokens.join(" ")).collect()
}

/// Split on whitespace, keeping double-quoted sections together
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::PrimitiveKind;

    const DIAGRAM: &str = r#"
classDiagram
    Base <-- Root
    class Base {
        +string id*
    }
    class Root {
        +string name* default="unnamed root"
        +float | integer value minimum=0
        +Nested[] children
        +Nested[0..*] more
        +string nested_ref Nested.id
        +Kind kind
    }
    class Nested {
        +string id
    }
    class Kind {
        <<Enumeration>>
        +FIRST = "first"
        +SECOND
    }
"#;

    #[test]
    fn test_parse_classes_and_relations() {
        let set = parse_diagram(DIAGRAM, &Descriptions::default()).unwrap();

        assert_eq!(set.definitions.len(), 4);
        assert_eq!(set.relations, vec![Relation::new("Base", "Root")]);

        let root = set.class("Root").unwrap();
        let name = root.get_attribute("name").unwrap();
        assert!(name.required);
        assert_eq!(name.default.as_deref(), Some("unnamed root"));

        let value = root.get_attribute("value").unwrap();
        assert_eq!(
            value.types,
            vec![
                TypeRef::Primitive(PrimitiveKind::Float),
                TypeRef::Primitive(PrimitiveKind::Integer)
            ]
        );
        assert_eq!(value.options.get("minimum").map(String::as_str), Some("0"));

        assert!(root.get_attribute("children").unwrap().multiple);
        assert!(root.get_attribute("more").unwrap().multiple);
        assert_eq!(
            root.get_attribute("nested_ref").unwrap().reference,
            Some(ReferenceTarget::new("Nested", "id"))
        );
    }

    #[test]
    fn test_parse_enum() {
        let set = parse_diagram(DIAGRAM, &Descriptions::default()).unwrap();
        let kind = set.enumeration("Kind").unwrap();
        assert_eq!(kind.members.get("FIRST").map(String::as_str), Some("first"));
        assert_eq!(kind.members.get("SECOND").map(String::as_str), Some("SECOND"));
    }

    #[test]
    fn test_parse_external() {
        let text = r#"
class Remote {
    <<External Object>>
    +Repository <https://github.com/org/models.git/tree/abc123>
}
"#;
        let set = parse_diagram(text, &Descriptions::default()).unwrap();
        match set.definitions.get("Remote").unwrap() {
            Definition::External(external) => {
                assert_eq!(external.url, "https://github.com/org/models.git");
                assert_eq!(external.commit.as_deref(), Some("abc123"));
            }
            other => panic!("Expected external object, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_with_default_is_rejected() {
        let text = "class A {\n +string[] values default=x\n}";
        assert!(matches!(
            parse_diagram(text, &Descriptions::default()),
            Err(ModelError::Specification(_))
        ));
    }

    #[test]
    fn test_malformed_attribute_is_rejected() {
        let text = "class A {\n +string\n}";
        assert!(parse_diagram(text, &Descriptions::default()).is_err());

        let text = "class A {\n +string value not-an-option\n}";
        assert!(parse_diagram(text, &Descriptions::default()).is_err());
    }

    #[test]
    fn test_descriptions_are_merged() {
        let descriptions = Descriptions::from_json(
            r#"{"Nested": {"docstring": "A nested object", "attributes": {"id": {"description": "Identifier", "pattern": "^n"}}}}"#,
        )
        .unwrap();
        let set = parse_diagram(DIAGRAM, &descriptions).unwrap();
        let nested = set.class("Nested").unwrap();
        assert_eq!(nested.docstring.as_deref(), Some("A nested object"));

        let id = nested.get_attribute("id").unwrap();
        assert_eq!(id.description.as_deref(), Some("Identifier"));
        assert_eq!(id.options.get("pattern").map(String::as_str), Some("^n"));
    }

    #[test]
    fn test_parse_directory_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mmd"), "class A {\n +string id\n}").unwrap();
        std::fs::write(dir.path().join("b.mermaid"), "class B {\n +A a\n}").unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"B": {"docstring": "Second"}}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "class C {}").unwrap();

        let set = parse_directory(dir.path()).unwrap();
        let names: Vec<_> = set.definitions.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(set.class("B").unwrap().docstring.as_deref(), Some("Second"));
    }

    #[test]
    fn test_blocks_on_one_line() {
        let text = "class Nested { +string str_value +float float_value } class Root { +Nested nested_single_obj +Nested[] nested_multiple_obj }";
        let set = parse_diagram(text, &Descriptions::default()).unwrap();
        assert_eq!(set.definitions.len(), 2);

        let nested = set.class("Nested").unwrap();
        let names: Vec<_> = nested.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["str_value", "float_value"]);
        assert_eq!(
            nested.get_attribute("float_value").unwrap().types,
            vec![TypeRef::Primitive(PrimitiveKind::Float)]
        );

        let root = set.class("Root").unwrap();
        assert!(!root.get_attribute("nested_single_obj").unwrap().multiple);
        assert!(root.get_attribute("nested_multiple_obj").unwrap().multiple);
    }

    #[test]
    fn test_enum_members_on_one_line() {
        let text = r#"class Kind { <<Enumeration>> +FIRST = "first" +SECOND } Base <-- Kind2 class Base { +string id } class Kind2 { +string x }"#;
        let set = parse_diagram(text, &Descriptions::default()).unwrap();
        let kind = set.enumeration("Kind").unwrap();
        assert_eq!(kind.members.get("FIRST").map(String::as_str), Some("first"));
        assert_eq!(kind.members.get("SECOND").map(String::as_str), Some("SECOND"));
        assert_eq!(set.relations, vec![Relation::new("Base", "Kind2")]);
    }

    #[test]
    fn test_text_before_first_attribute_is_rejected() {
        let text = "class A { string id }";
        assert!(matches!(
            parse_diagram(text, &Descriptions::default()),
            Err(ModelError::Specification(_))
        ));
    }

    #[test]
    fn test_tokenize_keeps_quotes() {
        assert_eq!(
            tokenize(r#"string name default="a b""#),
            vec!["string", "name", r#"default="a b""#]
        );
    }
}
