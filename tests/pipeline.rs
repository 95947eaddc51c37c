//! End-to-end tests of parsing, resolution and package generation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use modelkit::schema::{Definition, ExternalReference, ExternalResolver, GitSource, SpecificationSet};
use modelkit::{Arena, Assembler, GenerateOptions, Library, ModelError};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn generate(out: &Path) -> modelkit::GenerationReport {
    let options = GenerateOptions {
        output_dir: out.to_path_buf(),
        package: Some("models".into()),
        ..Default::default()
    };
    let source = GitSource::new();
    Assembler::new(options, &source)
        .generate(fixture("model_all.mmd"))
        .unwrap()
}

#[test]
fn test_generated_package_layout() {
    let dir = tempfile::tempdir().unwrap();
    let report = generate(dir.path());

    assert_eq!(report.package_dir, dir.path().join("models"));
    assert_eq!(report.classes, 3);
    assert_eq!(report.enums, 1);
    for file in [
        "mod.rs",
        "base.rs",
        "root.rs",
        "nested.rs",
        "kind.rs",
        "schemes/model_all.mmd",
        "schemes/model_all.json",
    ] {
        assert!(report.package_dir.join(file).is_file(), "{file} missing");
    }
}

#[test]
fn test_root_module_contents() {
    let dir = tempfile::tempdir().unwrap();
    let report = generate(dir.path());
    let root = std::fs::read_to_string(report.package_dir.join("root.rs")).unwrap();

    // One add operation for the single class candidate of the only list of objects
    assert_eq!(root.matches("pub fn add_").count(), 1);
    assert!(root.contains("pub fn add_to_nested_multiple_obj("));

    assert!(root.contains("//! Top level object"));
    assert!(root.contains("//! Depends on: Base, Kind, Nested"));
    assert!(root.contains("use chrono::NaiveDate;"));
    assert!(root.contains("use super::kind::Kind;"));
    assert!(root.contains("pub enum RootValue {\n    Float(f64),\n    Integer(i64),\n}"));
    assert!(root.contains("pub fn value(&self, arena: &Arena) -> Result<Option<RootValue>>"));
    assert!(root.contains("pub fn tags(&self, arena: &Arena) -> Result<Vec<String>>"));
    assert!(root.contains("pub fn resolve_nested_ref(&self, arena: &Arena) -> Result<Option<String>>"));
    assert!(root.contains(r#".with_option("maximum", "100")"#));
    assert!(root.contains("impl From<Root> for Base"));

    let package = std::fs::read_to_string(report.package_dir.join("mod.rs")).unwrap();
    assert!(package.contains("pub use root::{Root, RootValue};"));
    assert!(package.contains(".enumeration(kind::definition())"));
}

#[test]
fn test_generated_definitions_rebuild_the_library() {
    let source = GitSource::new();
    let assembler = Assembler::new(GenerateOptions::default(), &source);
    let set = assembler.load(&fixture("model_all.mmd")).unwrap();

    // `definition()` only carries own attributes; the library flattens them again
    let mut builder = Library::builder();
    for definition in set.definitions.values() {
        builder = match definition {
            Definition::Class(class) => builder.class(class.clone()),
            Definition::Enum(enumeration) => builder.enumeration(enumeration.clone()),
            Definition::External(_) => unreachable!(),
        };
    }
    let rebuilt = Arc::new(builder.build().unwrap());
    let direct = Arc::new(Library::from_path(fixture("model_all.mmd")).unwrap());

    let data = std::fs::read_to_string(fixture("root.json")).unwrap();
    let mut first = Arena::new(rebuilt);
    let a = first.from_json("Root", &data).unwrap();
    let mut second = Arena::new(direct);
    let b = second.from_json("Root", &data).unwrap();

    assert!(first.structurally_eq(a, &second, b).unwrap());
    assert_eq!(
        first.library().fields("Root").unwrap().len(),
        second.library().fields("Root").unwrap().len()
    );
}

#[test]
fn test_unreachable_external_repository() {
    let missing = tempfile::tempdir().unwrap().path().join("gone");
    let mut set = SpecificationSet::new();
    set.insert(Definition::External(ExternalReference {
        name: "Remote".into(),
        url: format!("file://{}", missing.display()),
        commit: None,
    }))
    .unwrap();

    let source = GitSource::new();
    let result = ExternalResolver::new(&source).resolve(&mut set);
    assert!(matches!(result, Err(ModelError::Fetch { .. })));
}

#[test]
fn test_unresolved_external_blocks_library() {
    let mut set = SpecificationSet::new();
    set.insert(Definition::External(ExternalReference {
        name: "Remote".into(),
        url: "https://github.com/org/models".into(),
        commit: None,
    }))
    .unwrap();
    assert!(matches!(
        Library::from_specification(&set),
        Err(ModelError::Specification(_))
    ));
}
