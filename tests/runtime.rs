//! Runtime behaviour against the shared fixture model

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rstest::rstest;

use modelkit::runtime::convert::LinkTemplate;
use modelkit::runtime::Filter;
use modelkit::schema::Descriptions;
use modelkit::{Arena, InstanceId, Library, ModelError, Value};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn library() -> Arc<Library> {
    Arc::new(
        Library::from_path(fixture("model_all.mmd"))
            .unwrap()
            .with_source("https://github.com/org/models", Some("v1.0")),
    )
}

fn loaded() -> (Arena, InstanceId) {
    let mut arena = Arena::new(library());
    let data = std::fs::read_to_string(fixture("root.json")).unwrap();
    let root = arena.from_json("Root", &data).unwrap();
    (arena, root)
}

fn nested(arena: &mut Arena, label: &str) -> InstanceId {
    arena.create("Nested", [("str_value", Value::from(label))]).unwrap()
}

fn root_with(arena: &mut Arena, id: &str, children: Vec<InstanceId>) -> InstanceId {
    arena
        .create(
            "Root",
            [
                ("id", Value::from(id)),
                ("name", Value::from(id)),
                ("nested_multiple_obj", Value::from(children)),
            ],
        )
        .unwrap()
}

#[test]
fn test_import_resolves_everything() {
    let (arena, root) = loaded();
    assert_eq!(arena.value(root, "kind").unwrap(), &Value::from("first"));
    assert_eq!(arena.value(root, "value").unwrap(), &Value::Float(2.5));
    assert_eq!(arena.resolve_reference(root, "nested_ref").unwrap(), Value::from("b"));
    assert!(arena.validate_references(root).unwrap().is_empty());
}

#[rstest]
#[case("json")]
#[case("yaml")]
#[case("xml")]
fn test_export_import_round_trip(#[case] format: &str) {
    let (arena, root) = loaded();
    let text = match format {
        "json" => arena.to_json(root, true).unwrap(),
        "yaml" => arena.to_yaml(root).unwrap(),
        _ => arena.to_xml(root).unwrap(),
    };

    let mut copy = Arena::new(library());
    let imported = match format {
        "json" => copy.from_json("Root", &text),
        "yaml" => copy.from_yaml("Root", &text),
        _ => copy.from_xml("Root", &text),
    }
    .unwrap();

    assert!(arena.structurally_eq(root, &copy, imported).unwrap());
}

#[test]
fn test_serialized_text_is_stable() {
    let (arena, root) = loaded();
    let json = arena.to_json(root, false).unwrap();
    let mut copy = Arena::new(library());
    let imported = copy.from_json("Root", &json).unwrap();
    assert_eq!(copy.to_json(imported, false).unwrap(), json);

    let yaml = arena.to_yaml(root).unwrap();
    let imported = copy.from_yaml("Root", &yaml).unwrap();
    assert_eq!(copy.to_yaml(imported).unwrap(), yaml);
}

#[test]
fn test_source_block() {
    let (arena, root) = loaded();
    let dict = arena.to_dict(root).unwrap();
    assert_eq!(dict["__source__"]["root"], "Root");
    assert_eq!(dict["__source__"]["commit"], "v1.0");
    assert_eq!(dict["__source__"]["url"], "https://github.com/org/models/tree/v1.0");
}

#[test]
fn test_optional_list_defaults_to_empty_and_is_not_exported() {
    let mut arena = Arena::new(library());
    let root = root_with(&mut arena, "r", Vec::new());
    assert_eq!(arena.value(root, "tags").unwrap(), &Value::List(Vec::new()));

    let dict = arena.to_dict(root).unwrap();
    assert!(dict.get("tags").is_none());
    assert!(dict.get("nested_multiple_obj").is_none());
    assert_eq!(dict["name"], "r");
}

#[test]
fn test_missing_required_attribute() {
    let mut arena = Arena::new(library());
    let result = arena.create("Root", [("id", Value::from("only-id"))]);
    assert!(matches!(result, Err(ModelError::Validation { .. })));
    assert!(arena.is_empty());
}

#[test]
fn test_failed_import_keeps_arena_unchanged() {
    let mut arena = Arena::new(library());
    let data = r#"{"name": "no id", "nested_multiple_obj": [{"str_value": "a"}, {"str_value": "b"}]}"#;
    assert!(matches!(
        arena.from_json("Root", data),
        Err(ModelError::Validation { .. })
    ));
    assert_eq!(arena.len(), 0);
}

#[test]
fn test_single_line_diagram() {
    let library = Library::from_diagram(
        "class Nested { +string str_value +float float_value } class Root { +Nested nested_single_obj +Nested[] nested_multiple_obj }",
        &Descriptions::default(),
    )
    .unwrap();
    let mut arena = Arena::new(Arc::new(library));
    let nested = arena
        .create("Nested", [("str_value", Value::from("a")), ("float_value", Value::Float(1.0))])
        .unwrap();
    let root = arena.create("Root", [("nested_single_obj", Value::Object(nested))]).unwrap();

    let dict = arena.to_dict(root).unwrap();
    assert_eq!(dict["nested_single_obj"]["str_value"], "a");
    assert_eq!(dict["nested_single_obj"]["float_value"], 1.0);
    assert!(dict.get("nested_multiple_obj").is_none());
}

#[test]
fn test_reference_registration() {
    let mut arena = Arena::new(library());
    let a = nested(&mut arena, "a");
    let b = nested(&mut arena, "b");
    let root = root_with(&mut arena, "r", vec![a, b]);

    arena.set(root, "nested_ref", "b").unwrap();
    assert_eq!(arena.references(root, "nested_ref").unwrap(), &[b]);
    assert_eq!(arena.references(b, "str_value").unwrap(), &[root]);
    assert!(arena.references(a, "str_value").unwrap().is_empty());

    // Re-pointing moves both sides
    arena.set(root, "nested_ref", "a").unwrap();
    assert_eq!(arena.references(root, "nested_ref").unwrap(), &[a]);
    assert!(arena.references(b, "str_value").unwrap().is_empty());
    assert_eq!(arena.references(a, "str_value").unwrap(), &[root]);
}

#[test]
fn test_invalid_assignment_leaves_state_unchanged() {
    let mut arena = Arena::new(library());
    let a = nested(&mut arena, "a");
    let root = root_with(&mut arena, "r", vec![a]);
    arena.set(root, "nested_ref", "a").unwrap();

    let result = arena.set(root, "nested_ref", 42i64);
    assert!(matches!(result, Err(ModelError::Validation { .. })));
    assert_eq!(arena.value(root, "nested_ref").unwrap(), &Value::from("a"));
    assert_eq!(arena.references(root, "nested_ref").unwrap(), &[a]);
    assert_eq!(arena.references(a, "str_value").unwrap(), &[root]);

    assert!(arena.set(root, "value", -1.0).is_err());
    assert!(arena.set(root, "kind", "THIRD").is_err());
}

#[test]
fn test_meta_path_over_two_roots() {
    let mut arena = Arena::new(library());
    let children: Vec<_> = ["a", "b", "c", "d"].iter().map(|l| nested(&mut arena, l)).collect();
    let first = root_with(&mut arena, "first", children[..2].to_vec());
    let second = root_with(&mut arena, "second", children[2..].to_vec());

    let values = arena
        .get_all(&[first, second], "nested_multiple_obj/str_value", None)
        .unwrap();
    assert_eq!(
        values,
        vec![Value::from("a"), Value::from("b"), Value::from("c"), Value::from("d")]
    );

    let filtered = arena
        .get(first, "nested_multiple_obj", Some(&Filter::equals("str_value", "b")))
        .unwrap();
    assert_eq!(filtered, vec![Value::Object(children[1])]);
}

#[test]
fn test_absolute_path_past_the_end() {
    let mut arena = Arena::new(library());
    let a = nested(&mut arena, "a");
    let root = root_with(&mut arena, "r", vec![a]);

    assert_eq!(
        arena.get(root, "/nested_multiple_obj/0/str_value", None).unwrap(),
        vec![Value::from("a")]
    );
    assert!(matches!(
        arena.get(root, "/nested_multiple_obj/5/str_value", None),
        Err(ModelError::NotFound { .. })
    ));
    // Meta paths that match nothing are empty instead
    assert!(arena.get(root, "nested_multiple_obj/float_value", None).unwrap().is_empty());
}

#[test]
fn test_fingerprint_tracks_content() {
    let (mut arena, root) = loaded();
    let before = arena.fingerprint(root).unwrap();
    arena.set(root, "name", "renamed").unwrap();
    assert_ne!(arena.fingerprint(root).unwrap(), before);
}

#[test]
fn test_convert_with_fixture_template() {
    let (arena, root) = loaded();
    let template = LinkTemplate::from_path(fixture("links.yaml")).unwrap();
    let target = Arc::new(Library::from_path(fixture("report.mmd")).unwrap());

    let (converted, report) = arena.convert_to(root, &template, target).unwrap();
    assert_eq!(converted.class_of(report).unwrap(), "Report");
    assert_eq!(converted.value(report, "title").unwrap(), &Value::from("sample"));
    assert_eq!(
        converted.get(report, "items/amount", None).unwrap(),
        vec![Value::Float(1.0), Value::Float(2.0)]
    );
}
