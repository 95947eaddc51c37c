//! Guide tree construction and bottom-up instantiation

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use modelkit::{Arena, GuideTree, Library, ModelError, Value};

fn library() -> Arc<Library> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/model_all.mmd");
    Arc::new(Library::from_path(path).unwrap())
}

fn column<V: Into<Value>>(values: impl IntoIterator<Item = (usize, V)>) -> BTreeMap<usize, Value> {
    values.into_iter().map(|(i, v)| (i, v.into())).collect()
}

fn root_tree(library: &Library) -> GuideTree {
    let mut tree = library.meta_tree("Root").unwrap();
    tree.set_leaf_values("Root/id", column([(0, "root")])).unwrap();
    tree.set_leaf_values("Root/name", column([(0, "from columns")])).unwrap();
    tree
}

#[test]
fn test_meta_paths_of_fixture() {
    let library = library();
    let paths = library.meta_paths("Root", true).unwrap();
    assert!(paths.contains(&"Root/nested_multiple_obj/str_value".to_string()));
    assert!(paths.contains(&"Root/nested_ref".to_string()));
    assert!(paths.contains(&"Root/tags".to_string()));
    assert!(!paths.contains(&"Root/nested_multiple_obj".to_string()));
}

#[test]
fn test_one_instance_per_index() {
    let library = library();
    let mut tree = root_tree(&library);
    tree.set_leaf_values(
        "Root/nested_multiple_obj/str_value",
        column([(0, "a"), (1, "b"), (2, "c")]),
    )
    .unwrap();
    tree.set_leaf_values("nested_multiple_obj/float_value", column([(1, 2.5)]))
        .unwrap();

    let mut arena = Arena::new(library);
    let root = tree.instantiate(&mut arena).unwrap();

    assert_eq!(arena.value(root, "name").unwrap(), &Value::from("from columns"));
    assert_eq!(
        arena.get(root, "nested_multiple_obj/str_value", None).unwrap(),
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    );
    assert_eq!(
        arena.get(root, "/nested_multiple_obj/1/float_value", None).unwrap(),
        vec![Value::Float(2.5)]
    );
}

#[test]
fn test_empty_indices_are_skipped() {
    let library = library();
    let mut tree = root_tree(&library);
    tree.set_leaf_values("Root/nested_multiple_obj/str_value", column([(0, "a"), (2, "c")]))
        .unwrap();

    let mut arena = Arena::new(library);
    let root = tree.instantiate(&mut arena).unwrap();

    let children = arena.value(root, "nested_multiple_obj").unwrap().as_list().unwrap().to_vec();
    assert_eq!(children.len(), 2);
    for child in children {
        let id = child.as_object().unwrap();
        assert!(!arena.value(id, "str_value").unwrap().is_null());
    }
}

#[test]
fn test_instance_tree_rebuilds_equal_instance() {
    let library = library();
    let data = std::fs::read_to_string(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/root.json"),
    )
    .unwrap();
    let mut arena = Arena::new(Arc::clone(&library));
    let root = arena.from_json("Root", &data).unwrap();

    let tree = arena.tree(root).unwrap();
    let mut copy = Arena::new(library);
    let rebuilt = tree.instantiate(&mut copy).unwrap();

    assert!(arena.structurally_eq(root, &copy, rebuilt).unwrap());
    let rendered = tree.render(true, None);
    assert!(rendered.starts_with("Root\n"));
    assert!(rendered.contains("nested_multiple_obj[]"));
}

#[test]
fn test_unknown_leaf_path() {
    let library = library();
    let mut tree = library.meta_tree("Root").unwrap();
    assert!(matches!(
        tree.set_leaf_values("Root/missing", column([(0, "x")])),
        Err(ModelError::NotFound { .. })
    ));
    assert!(matches!(
        tree.set_leaf_values("Root/nested_multiple_obj", column([(0, "x")])),
        Err(ModelError::Query(_))
    ));
}
