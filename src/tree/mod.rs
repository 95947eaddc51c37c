//! Guide trees
//!
//! A guide tree mirrors the nested field structure of a class. Class nodes
//! alternate with attribute nodes; attribute leaves carry values keyed by
//! list index. Filling the leaves and calling [`GuideTree::instantiate`]
//! rebuilds nested instances from the deepest level upwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use tracing::debug;

use crate::error::{ModelError, Result};
use crate::runtime::{Arena, InstanceId, Library, Value};
use crate::schema::AttributeDefinition;

pub type NodeId = usize;

const ROOT: NodeId = 0;

/// How a node's value sits in its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outer {
    Single,
    List,
    Optional,
}

impl Outer {
    pub fn of(attribute: &AttributeDefinition) -> Self {
        if attribute.multiple {
            Self::List
        } else if attribute.required {
            Self::Single
        } else {
            Self::Optional
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Class { class: String },
    Attribute { multiple: bool, values: BTreeMap<usize, Value> },
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    pub outer: Outer,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Attribute { .. }) && self.children.is_empty()
    }
}

/// Construction mode of a class node during instantiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Root,
    Single,
    PerIndex,
}

#[derive(Debug, Clone)]
pub struct GuideTree {
    nodes: Vec<TreeNode>,
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

impl GuideTree {
    fn with_root(class: &str) -> Self {
        Self {
            nodes: vec![TreeNode {
                name: class.to_string(),
                kind: NodeKind::Class {
                    class: class.to_string(),
                },
                outer: Outer::Single,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    fn push(&mut self, parent: NodeId, name: impl Into<String>, kind: NodeKind, outer: Outer) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(TreeNode {
            name: name.into(),
            kind,
            outer,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn attribute_node(&mut self, parent: NodeId, attribute: &AttributeDefinition) -> NodeId {
        self.push(
            parent,
            attribute.name.clone(),
            NodeKind::Attribute {
                multiple: attribute.multiple,
                values: BTreeMap::new(),
            },
            Outer::of(attribute),
        )
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Tree of every field reachable from a class. Unions descend into their
    /// first class candidate; references stay leaves.
    pub fn for_class(library: &Library, class: &str) -> Result<Self> {
        let mut tree = Self::with_root(class);
        let mut stack = vec![class.to_string()];
        tree.expand_class(library, ROOT, class, &mut stack)?;
        Ok(tree)
    }

    fn expand_class(&mut self, library: &Library, node: NodeId, class: &str, stack: &mut Vec<String>) -> Result<()> {
        for attribute in library.fields(class)? {
            let attribute_node = self.attribute_node(node, attribute);
            if attribute.reference.is_some() {
                continue;
            }
            let Some(candidate) = library.class_candidate(attribute) else {
                continue;
            };
            if stack.iter().any(|c| c == candidate) {
                continue;
            }

            let class_node = self.push(
                attribute_node,
                candidate,
                NodeKind::Class {
                    class: candidate.to_string(),
                },
                Outer::of(attribute),
            );
            stack.push(candidate.to_string());
            self.expand_class(library, class_node, candidate, stack)?;
            stack.pop();
        }
        Ok(())
    }

    /// Tree of a live instance with its values. List elements become
    /// index-named class nodes; attributes without values are left out.
    pub fn for_instance(arena: &Arena, id: InstanceId) -> Result<Self> {
        let mut tree = Self::with_root(arena.class_of(id)?);
        tree.expand_instance(arena, ROOT, id)?;
        Ok(tree)
    }

    fn expand_instance(&mut self, arena: &Arena, node: NodeId, id: InstanceId) -> Result<()> {
        let instance = arena.instance(id)?;
        for attribute in arena.library().fields(instance.class())? {
            let Some(value) = instance.values().get(&attribute.name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let contained = attribute.reference.is_none();

            match value {
                Value::Object(child) if contained => {
                    let attribute_node = self.attribute_node(node, attribute);
                    let class = arena.class_of(*child)?.to_string();
                    let class_node = self.push(
                        attribute_node,
                        class.clone(),
                        NodeKind::Class { class },
                        Outer::of(attribute),
                    );
                    self.expand_instance(arena, class_node, *child)?;
                }
                Value::List(items) if contained && items.iter().any(|i| i.as_object().is_some()) => {
                    let attribute_node = self.attribute_node(node, attribute);
                    for (index, item) in items.iter().enumerate() {
                        let Value::Object(child) = item else {
                            continue;
                        };
                        let class = arena.class_of(*child)?.to_string();
                        let class_node = self.push(
                            attribute_node,
                            index.to_string(),
                            NodeKind::Class { class },
                            Outer::List,
                        );
                        self.expand_instance(arena, class_node, *child)?;
                    }
                }
                _ => {
                    let leaf = self.attribute_node(node, attribute);
                    if let NodeKind::Attribute { values, .. } = &mut self.nodes[leaf].kind {
                        values.insert(0, value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    pub fn root(&self) -> &TreeNode {
        &self.nodes[ROOT]
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Slash-joined path of a node, starting with the root class name
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            let named = match node.kind {
                NodeKind::Attribute { .. } => true,
                NodeKind::Class { .. } => node.parent.is_none() || is_index(&node.name),
            };
            if named {
                segments.push(node.name.as_str());
            }
            current = node.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Paths of all attribute nodes (and index nodes), or only of the leaves
    pub fn paths(&self, leaves_only: bool) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(ROOT, leaves_only, &mut out);
        out
    }

    fn collect_paths(&self, id: NodeId, leaves_only: bool, out: &mut Vec<String>) {
        let node = &self.nodes[id];
        let listed = match node.kind {
            NodeKind::Attribute { .. } => !leaves_only || node.children.is_empty(),
            NodeKind::Class { .. } => !leaves_only && is_index(&node.name),
        };
        if listed {
            out.push(self.path_of(id));
        }
        for child in &node.children {
            self.collect_paths(*child, leaves_only, out);
        }
    }

    /// Find a node by path; a leading root class name is optional
    pub fn locate(&self, path: &str) -> Option<NodeId> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first() == Some(&self.root().name.as_str()) {
            segments.remove(0);
        }

        let mut class_node = ROOT;
        let mut found = ROOT;
        let mut iter = segments.into_iter().peekable();
        while let Some(segment) = iter.next() {
            let attribute = *self.nodes[class_node]
                .children
                .iter()
                .find(|c| self.nodes[**c].name == segment)?;
            found = attribute;

            if iter.peek().is_none() {
                break;
            }
            let children = &self.nodes[attribute].children;
            class_node = match iter.peek() {
                Some(next) if is_index(next) => {
                    let index = *children.iter().find(|c| self.nodes[**c].name == *next)?;
                    iter.next();
                    found = index;
                    index
                }
                _ => *children.first()?,
            };
        }
        Some(found)
    }

    /// Values of a leaf
    pub fn leaf_values(&self, path: &str) -> Option<&BTreeMap<usize, Value>> {
        match &self.nodes[self.locate(path)?].kind {
            NodeKind::Attribute { values, .. } => Some(values),
            NodeKind::Class { .. } => None,
        }
    }

    /// Replace the values of the leaf at a meta path
    pub fn set_leaf_values(&mut self, path: &str, values: BTreeMap<usize, Value>) -> Result<()> {
        let id = self.locate(path).ok_or_else(|| ModelError::NotFound {
            path: path.to_string(),
        })?;
        let node = &mut self.nodes[id];
        if !node.children.is_empty() {
            return Err(ModelError::Query(format!("'{}' is not a leaf attribute", path)));
        }
        match &mut node.kind {
            NodeKind::Attribute { values: slot, .. } => {
                *slot = values;
                Ok(())
            }
            NodeKind::Class { .. } => Err(ModelError::Query(format!("'{}' is not a leaf attribute", path))),
        }
    }

    // =========================================================================
    // Instantiation
    // =========================================================================

    /// Build instances bottom-up; yields exactly one root instance. A failed
    /// build leaves no partial instances behind.
    pub fn instantiate(&self, arena: &mut Arena) -> Result<InstanceId> {
        let root = arena.atomic(|arena| {
            self.build(ROOT, arena, Mode::Root)?
                .into_values()
                .next()
                .ok_or_else(|| ModelError::Query("guide tree produced no root instance".into()))
        })?;
        debug!(class = %self.root().name, instances = arena.len(), "instantiated guide tree");
        Ok(root)
    }

    fn build(&self, node: NodeId, arena: &mut Arena, mode: Mode) -> Result<BTreeMap<usize, InstanceId>> {
        let NodeKind::Class { class } = &self.nodes[node].kind else {
            return Err(ModelError::Query(format!(
                "'{}' is not a class node",
                self.path_of(node)
            )));
        };

        let mut columns = Vec::new();
        for child in &self.nodes[node].children {
            let attribute = &self.nodes[*child];
            let NodeKind::Attribute { multiple, values } = &attribute.kind else {
                continue;
            };
            let column = self.column(*child, values, arena, mode)?;
            columns.push((attribute.name.clone(), *multiple, column));
        }

        let mut built = BTreeMap::new();
        if mode == Mode::PerIndex {
            let indices: BTreeSet<usize> = columns.iter().flat_map(|(_, _, c)| c.keys().copied()).collect();
            for index in indices {
                let values: Vec<(String, Value)> = columns
                    .iter()
                    .filter_map(|(name, multiple, column)| {
                        let value = column.get(&index)?.clone();
                        let value = match value {
                            Value::List(_) | Value::Null => value,
                            other if *multiple => Value::List(vec![other]),
                            other => other,
                        };
                        Some((name.clone(), value))
                    })
                    .collect();
                if values.iter().all(|(_, v)| v.is_empty()) {
                    continue;
                }
                built.insert(index, arena.create(class, values)?);
            }
        } else {
            let mut values = Vec::new();
            for (name, multiple, column) in columns {
                let value = if multiple {
                    Value::List(
                        column
                            .into_values()
                            .flat_map(|v| match v {
                                Value::List(items) => items,
                                Value::Null => Vec::new(),
                                other => vec![other],
                            })
                            .collect(),
                    )
                } else {
                    column.into_values().find(|v| !v.is_null()).unwrap_or_default()
                };
                if !value.is_empty() {
                    values.push((name, value));
                }
            }
            if mode == Mode::Root || !values.is_empty() {
                built.insert(0, arena.create(class, values)?);
            }
        }
        Ok(built)
    }

    /// Indexed values feeding one attribute of a class node
    fn column(
        &self,
        attribute: NodeId,
        values: &BTreeMap<usize, Value>,
        arena: &mut Arena,
        mode: Mode,
    ) -> Result<BTreeMap<usize, Value>> {
        let children = &self.nodes[attribute].children;
        let Some(first) = children.first() else {
            return Ok(values.clone());
        };

        let mut column = BTreeMap::new();
        if is_index(&self.nodes[*first].name) {
            for child in children {
                let index = self.nodes[*child].name.parse().unwrap_or(column.len());
                if let Some(id) = self.build(*child, arena, Mode::Single)?.into_values().next() {
                    column.insert(index, Value::Object(id));
                }
            }
        } else {
            let child_mode = if mode == Mode::PerIndex || self.nodes[*first].outer == Outer::List {
                Mode::PerIndex
            } else {
                Mode::Single
            };
            for (index, id) in self.build(*first, arena, child_mode)? {
                column.insert(index, Value::Object(id));
            }
        }
        Ok(column)
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Box-drawing rendering, optionally with values and limited in depth
    pub fn render(&self, with_values: bool, max_depth: Option<usize>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.label(ROOT, with_values));
        let children = &self.nodes[ROOT].children;
        for (i, child) in children.iter().enumerate() {
            self.render_node(*child, "", i + 1 == children.len(), 1, with_values, max_depth, &mut out);
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn render_node(
        &self,
        id: NodeId,
        prefix: &str,
        last: bool,
        depth: usize,
        with_values: bool,
        max_depth: Option<usize>,
        out: &mut String,
    ) {
        if max_depth.is_some_and(|max| depth > max) {
            return;
        }
        let connector = if last { "└── " } else { "├── " };
        let _ = writeln!(out, "{}{}{}", prefix, connector, self.label(id, with_values));

        let prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
        let children = &self.nodes[id].children;
        for (i, child) in children.iter().enumerate() {
            self.render_node(*child, &prefix, i + 1 == children.len(), depth + 1, with_values, max_depth, out);
        }
    }

    fn label(&self, id: NodeId, with_values: bool) -> String {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Class { class } if is_index(&node.name) => format!("{} ({})", node.name, class),
            NodeKind::Class { .. } => node.name.clone(),
            NodeKind::Attribute { values, .. } => {
                let mut label = node.name.clone();
                if node.outer == Outer::List {
                    label.push_str("[]");
                }
                if with_values && !values.is_empty() {
                    let rendered: Vec<String> = values.values().map(Value::to_string).collect();
                    label.push_str(" = ");
                    label.push_str(&rendered.join(", "));
                }
                label
            }
        }
    }
}

impl Arena {
    /// Guide tree of an instance, populated with its values
    pub fn tree(&self, id: InstanceId) -> Result<GuideTree> {
        GuideTree::for_instance(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Descriptions;
    use std::sync::Arc;

    const DIAGRAM: &str = r#"
class Root {
    +string name
    +Nested[] nested_multiple_obj
    +string nested_ref Nested.str_value
}
class Nested {
    +string str_value
    +float float_value
    +Detail detail
}
class Detail {
    +string note
}
"#;

    fn library() -> Arc<Library> {
        Arc::new(Library::from_diagram(DIAGRAM, &Descriptions::default()).unwrap())
    }

    #[test]
    fn test_meta_paths() {
        let library = library();
        assert_eq!(
            library.meta_paths("Root", true).unwrap(),
            vec![
                "Root/name",
                "Root/nested_multiple_obj/str_value",
                "Root/nested_multiple_obj/float_value",
                "Root/nested_multiple_obj/detail/note",
                "Root/nested_ref",
            ]
        );
        let all = library.meta_paths("Root", false).unwrap();
        assert!(all.contains(&"Root/nested_multiple_obj".to_string()));
        assert!(all.contains(&"Root/nested_multiple_obj/detail".to_string()));
    }

    #[test]
    fn test_instantiate_one_instance_per_index() {
        let library = library();
        let mut tree = library.meta_tree("Root").unwrap();
        tree.set_leaf_values("Root/name", BTreeMap::from([(0, Value::from("root"))]))
            .unwrap();
        tree.set_leaf_values(
            "Root/nested_multiple_obj/str_value",
            BTreeMap::from([(0, Value::from("a")), (1, Value::from("b")), (3, Value::Null)]),
        )
        .unwrap();
        tree.set_leaf_values(
            "nested_multiple_obj/float_value",
            BTreeMap::from([(0, Value::Float(1.0)), (2, Value::Float(3.0))]),
        )
        .unwrap();
        tree.set_leaf_values(
            "nested_multiple_obj/detail/note",
            BTreeMap::from([(1, Value::from("second"))]),
        )
        .unwrap();

        let mut arena = Arena::new(library);
        let root = tree.instantiate(&mut arena).unwrap();

        let nested = arena.field::<Vec<InstanceId>>(root, "nested_multiple_obj").unwrap();
        assert_eq!(nested.len(), 3);
        assert_eq!(arena.value(nested[0], "float_value").unwrap(), &Value::Float(1.0));
        assert_eq!(arena.value(nested[1], "str_value").unwrap(), &Value::from("b"));
        assert_eq!(arena.value(nested[2], "str_value").unwrap(), &Value::Null);
        assert_eq!(
            arena.get(root, "nested_multiple_obj/detail/note", None).unwrap(),
            vec![Value::from("second")]
        );
        assert_eq!(arena.value(root, "name").unwrap(), &Value::from("root"));
    }

    #[test]
    fn test_failed_instantiation_leaves_no_instances() {
        let library = Arc::new(
            Library::from_diagram(
                "class Root {\n +string name*\n +Nested[] nested\n}\nclass Nested {\n +string label\n}",
                &Descriptions::default(),
            )
            .unwrap(),
        );
        let mut tree = library.meta_tree("Root").unwrap();
        tree.set_leaf_values(
            "Root/nested/label",
            BTreeMap::from([(0, Value::from("a")), (1, Value::from("b"))]),
        )
        .unwrap();

        let mut arena = Arena::new(library);
        assert!(matches!(
            tree.instantiate(&mut arena),
            Err(ModelError::Validation { .. })
        ));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_empty_tree_yields_bare_root() {
        let library = library();
        let tree = library.meta_tree("Root").unwrap();
        let mut arena = Arena::new(library);
        let root = tree.instantiate(&mut arena).unwrap();
        assert_eq!(arena.value(root, "nested_multiple_obj").unwrap(), &Value::List(vec![]));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_unknown_leaf_rejected() {
        let library = library();
        let mut tree = library.meta_tree("Root").unwrap();
        assert!(matches!(
            tree.set_leaf_values("Root/missing", BTreeMap::new()),
            Err(ModelError::NotFound { .. })
        ));
        assert!(matches!(
            tree.set_leaf_values("Root/nested_multiple_obj", BTreeMap::new()),
            Err(ModelError::Query(_))
        ));
    }

    #[test]
    fn test_instance_tree_copies_instance() {
        let library = library();
        let mut arena = Arena::new(Arc::clone(&library));
        let first = arena
            .create("Nested", [("str_value", Value::from("a")), ("float_value", Value::Float(1.0))])
            .unwrap();
        let second = arena.create("Nested", [("str_value", Value::from("b"))]).unwrap();
        let root = arena
            .create(
                "Root",
                [
                    ("name", Value::from("r")),
                    ("nested_multiple_obj", Value::from(vec![first, second])),
                    ("nested_ref", Value::from("b")),
                ],
            )
            .unwrap();

        let tree = arena.tree(root).unwrap();
        assert!(tree.paths(true).contains(&"Root/nested_multiple_obj/1/str_value".to_string()));
        assert!(tree.leaf_values("Root/nested_multiple_obj/0/detail/note").is_none());

        let mut copy = Arena::new(library);
        let copied = tree.instantiate(&mut copy).unwrap();
        assert!(arena.structurally_eq(root, &copy, copied).unwrap());
        assert_eq!(copy.references(copied, "nested_ref").unwrap().len(), 1);
    }

    #[test]
    fn test_render() {
        let library = library();
        let rendered = library.meta_tree("Root").unwrap().render(false, Some(2));
        let expected = "\
Root
├── name
├── nested_multiple_obj[]
│   └── Nested
└── nested_ref
";
        assert_eq!(rendered, expected);
    }
}
