//! Dependency resolution
//!
//! Turns the raw `Parent <-- Child` relations of a diagram into an inheritance
//! forest, assigns parents, infers default factories and computes the import
//! closure of every class. The containment graph (class-typed attributes that
//! are not references) is kept in petgraph and must be acyclic.

use indexmap::{IndexMap, IndexSet};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::schema::{AttributeDefinition, Relation, SpecificationSet};

// =============================================================================
// Inheritance forest
// =============================================================================

/// One class and the classes inheriting from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritanceTree {
    pub name: String,
    pub children: Vec<InheritanceTree>,
}

impl InheritanceTree {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Every class in this tree, preorder
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for child in &self.children {
            names.extend(child.names());
        }
        names
    }

    fn edges<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        for child in &self.children {
            out.push((&self.name, &child.name));
            child.edges(out);
        }
    }
}

/// Trees keyed by their root, in peeling order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritanceForest {
    pub trees: Vec<InheritanceTree>,
}

impl InheritanceForest {
    /// Peel inheritance trees off the relation list.
    ///
    /// Each round picks the first relation parent that is nobody's child,
    /// builds its full subtree and drops every relation whose child was
    /// placed. Leftover relations without a root form a cycle.
    pub fn build(relations: &[Relation]) -> Result<Self> {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        for relation in relations {
            if relation.parent == relation.child {
                return Err(ModelError::spec(format!(
                    "class '{}' inherits from itself",
                    relation.child
                )));
            }
            match parents.insert(&relation.child, &relation.parent) {
                Some(previous) if previous != relation.parent => {
                    return Err(ModelError::spec(format!(
                        "class '{}' inherits from both '{}' and '{}'",
                        relation.child, previous, relation.parent
                    )));
                }
                _ => {}
            }
        }

        let mut remaining: Vec<&Relation> = Vec::new();
        for relation in relations {
            if !remaining.contains(&relation) {
                remaining.push(relation);
            }
        }

        let mut forest = Self::default();
        let mut placed: HashSet<String> = HashSet::new();

        while !remaining.is_empty() {
            let children: HashSet<&str> = remaining.iter().map(|r| r.child.as_str()).collect();
            let Some(root) = remaining
                .iter()
                .map(|r| r.parent.as_str())
                .find(|p| !children.contains(p))
            else {
                let names: IndexSet<&str> = remaining.iter().map(|r| r.child.as_str()).collect();
                return Err(ModelError::spec(format!(
                    "inheritance cycle between {}",
                    names.into_iter().collect::<Vec<_>>().join(", ")
                )));
            };

            let tree = subtree(root, &remaining);
            for name in tree.names() {
                if !placed.insert(name.to_string()) {
                    return Err(ModelError::spec(format!(
                        "class '{}' appears in more than one inheritance tree",
                        name
                    )));
                }
            }
            remaining.retain(|r| !placed.contains(&r.child));
            forest.trees.push(tree);
        }

        Ok(forest)
    }

    pub fn get(&self, root: &str) -> Option<&InheritanceTree> {
        self.trees.iter().find(|t| t.name == root)
    }

    /// Nearest parent of every class that has one
    pub fn parents(&self) -> IndexMap<&str, &str> {
        let mut edges = Vec::new();
        for tree in &self.trees {
            tree.edges(&mut edges);
        }
        edges.into_iter().map(|(parent, child)| (child, parent)).collect()
    }
}

fn subtree(name: &str, relations: &[&Relation]) -> InheritanceTree {
    let mut tree = InheritanceTree::new(name);
    for relation in relations.iter().filter(|r| r.parent == name) {
        tree.children.push(subtree(&relation.child, relations));
    }
    tree
}

// =============================================================================
// Containment graph
// =============================================================================

/// `Owner -> Class` edges for every class-typed attribute that is not a reference
#[derive(Debug, Clone, Default)]
pub struct ContainmentGraph {
    graph: DiGraph<String, String>,
    indices: IndexMap<String, NodeIndex>,
}

impl ContainmentGraph {
    /// Build from class names paired with their effective attributes
    pub fn build<'a>(
        classes: impl IntoIterator<Item = (&'a str, Vec<&'a AttributeDefinition>)>,
    ) -> Result<Self> {
        let classes: Vec<_> = classes.into_iter().collect();
        let mut containment = Self::default();

        for (name, _) in &classes {
            let index = containment.graph.add_node(name.to_string());
            containment.indices.insert(name.to_string(), index);
        }

        for (name, attributes) in &classes {
            let owner = containment.indices[*name];
            for attribute in attributes.iter().filter(|a| a.reference.is_none()) {
                for target in attribute.named_types() {
                    if let Some(&target) = containment.indices.get(target) {
                        containment.graph.add_edge(owner, target, attribute.name.clone());
                    }
                }
            }
        }

        if let Err(cycle) = toposort(&containment.graph, None) {
            let name = &containment.graph[cycle.node_id()];
            return Err(ModelError::spec(format!(
                "class '{}' contains itself through its attributes",
                name
            )));
        }

        Ok(containment)
    }

    /// Containment graph of a resolved specification
    pub fn from_set(set: &SpecificationSet) -> Result<Self> {
        Self::build(
            set.classes()
                .map(|c| (c.name.as_str(), set.effective_attributes(&c.name))),
        )
    }

    /// Classes no other class contains, in declaration order
    pub fn roots(&self) -> Vec<&str> {
        self.indices
            .iter()
            .filter(|(_, &index)| {
                self.graph
                    .edges_directed(index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Classes directly contained by `name`
    pub fn contained(&self, name: &str) -> Vec<&str> {
        let Some(&index) = self.indices.get(name) else {
            return Vec::new();
        };
        let mut targets: Vec<&str> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| self.graph[e.target()].as_str())
            .collect();
        targets.reverse();
        targets.dedup();
        targets
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Everything the emitter needs beyond the definitions themselves
#[derive(Debug, Clone)]
pub struct DependencyResolution {
    pub forest: InheritanceForest,
    /// Class name -> every named type it needs, sorted
    pub imports: IndexMap<String, Vec<String>>,
    /// Classes not contained by any other class
    pub roots: Vec<String>,
}

/// Resolve inheritance, validate and prepare a specification for emitting
pub fn resolve(set: &mut SpecificationSet) -> Result<DependencyResolution> {
    for relation in &set.relations {
        for name in [&relation.parent, &relation.child] {
            if set.class(name).is_none() {
                return Err(ModelError::spec(format!(
                    "relation '{} <-- {}' names undefined class '{}'",
                    relation.parent, relation.child, name
                )));
            }
        }
    }

    let forest = InheritanceForest::build(&set.relations)?;
    assign_parents(set, &forest)?;
    set.validate()?;

    let containment = ContainmentGraph::from_set(set)?;
    infer_default_factories(set);

    let imports = set
        .classes()
        .map(|c| (c.name.clone(), import_closure(set, &c.name)))
        .collect();
    let roots = containment.roots().into_iter().map(str::to_string).collect();

    debug!(
        trees = forest.trees.len(),
        containment_edges = containment.edge_count(),
        "resolved dependencies"
    );

    Ok(DependencyResolution {
        forest,
        imports,
        roots,
    })
}

fn assign_parents(set: &mut SpecificationSet, forest: &InheritanceForest) -> Result<()> {
    for (child, parent) in forest.parents() {
        let Some(class) = set.class_mut(child) else {
            return Err(ModelError::UnknownClass {
                name: child.to_string(),
            });
        };
        match &class.parent {
            Some(existing) if existing != parent => {
                return Err(ModelError::spec(format!(
                    "class '{}' inherits from both '{}' and '{}'",
                    child, existing, parent
                )));
            }
            _ => class.parent = Some(parent.to_string()),
        }
    }
    Ok(())
}

/// Give single class-typed attributes a default factory when every field of
/// the target class is optional or a collection.
pub fn infer_default_factories(set: &mut SpecificationSet) {
    let optional_classes: HashSet<String> = set
        .classes()
        .filter(|c| {
            set.effective_attributes(&c.name)
                .iter()
                .all(|a| a.multiple || !a.required)
        })
        .map(|c| c.name.clone())
        .collect();

    let names: Vec<String> = set.classes().map(|c| c.name.clone()).collect();
    for name in names {
        let Some(class) = set.class_mut(&name) else {
            continue;
        };
        for attribute in &mut class.attributes {
            let [target] = attribute.types.as_slice() else {
                continue;
            };
            let Some(target) = target.as_named() else {
                continue;
            };
            if attribute.multiple
                || attribute.reference.is_some()
                || attribute.default.is_some()
                || !optional_classes.contains(target)
            {
                continue;
            }
            attribute.default_factory = Some(target.to_string());
            attribute.required = false;
        }
    }
}

/// Transitive set of named types a class depends on, including its parent chain
pub fn import_closure(set: &SpecificationSet, name: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = Vec::new();

    if let Some(class) = set.class(name) {
        stack.extend(class.parent.iter().cloned());
        for attribute in &class.attributes {
            stack.extend(attribute.named_types().map(str::to_string));
        }
    }

    while let Some(current) = stack.pop() {
        if current == name || !seen.insert(current.clone()) {
            continue;
        }
        if let Some(class) = set.class(&current) {
            stack.extend(class.parent.iter().cloned());
            for attribute in &class.attributes {
                stack.extend(attribute.named_types().map(str::to_string));
            }
        }
    }

    let mut imports: Vec<String> = seen.into_iter().collect();
    imports.sort();
    imports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_diagram, Descriptions};

    fn relations(pairs: &[(&str, &str)]) -> Vec<Relation> {
        pairs.iter().map(|(p, c)| Relation::new(*p, *c)).collect()
    }

    #[test]
    fn test_peeling_builds_forest() {
        let forest = InheritanceForest::build(&relations(&[
            ("A", "B"),
            ("B", "C"),
            ("A", "D"),
            ("X", "Y"),
        ]))
        .unwrap();

        assert_eq!(forest.trees.len(), 2);
        assert_eq!(forest.trees[0].names(), vec!["A", "B", "C", "D"]);
        assert_eq!(forest.trees[1].names(), vec!["X", "Y"]);

        let parents = forest.parents();
        assert_eq!(parents.get("C"), Some(&"B"));
        assert_eq!(parents.get("D"), Some(&"A"));
        assert_eq!(parents.get("A"), None);
    }

    #[test]
    fn test_multiple_parents_rejected() {
        let result = InheritanceForest::build(&relations(&[("A", "C"), ("B", "C")]));
        assert!(matches!(result, Err(ModelError::Specification(_))));
    }

    #[test]
    fn test_inheritance_cycle_rejected() {
        let result = InheritanceForest::build(&relations(&[("A", "B"), ("B", "A")]));
        assert!(matches!(result, Err(ModelError::Specification(_))));
    }

    #[test]
    fn test_resolve_assigns_nearest_parent() {
        let mut set = parse_diagram(
            "A <-- B\nB <-- C\nclass A {\n +string id\n}\nclass B {\n +string b\n}\nclass C {\n +string c\n}",
            &Descriptions::default(),
        )
        .unwrap();

        resolve(&mut set).unwrap();
        assert_eq!(set.class("A").unwrap().parent, None);
        assert_eq!(set.class("B").unwrap().parent.as_deref(), Some("A"));
        assert_eq!(set.class("C").unwrap().parent.as_deref(), Some("B"));
        assert_eq!(import_closure(&set, "C"), vec!["A", "B"]);
    }

    #[test]
    fn test_relation_to_undefined_class_rejected() {
        let mut set = parse_diagram("A <-- Missing\nclass A {\n +string id\n}", &Descriptions::default()).unwrap();
        assert!(matches!(resolve(&mut set), Err(ModelError::Specification(_))));
    }

    #[test]
    fn test_default_factory_inference() {
        let mut set = parse_diagram(
            r#"
class Root {
    +Optional optional_obj
    +Strict strict_obj
    +Optional[] many
}
class Optional {
    +string name
    +float[] values
}
class Strict {
    +string id*
}
"#,
            &Descriptions::default(),
        )
        .unwrap();

        let resolution = resolve(&mut set).unwrap();
        let root = set.class("Root").unwrap();
        assert_eq!(
            root.get_attribute("optional_obj").unwrap().default_factory.as_deref(),
            Some("Optional")
        );
        assert_eq!(root.get_attribute("strict_obj").unwrap().default_factory, None);
        assert_eq!(root.get_attribute("many").unwrap().default_factory, None);
        assert_eq!(resolution.roots, vec!["Root"]);
    }

    #[test]
    fn test_import_closure_is_transitive() {
        let mut set = parse_diagram(
            r#"
Base <-- Root
class Base {
    +string id
}
class Root {
    +Middle middle
    +Kind kind
}
class Middle {
    +Leaf[] leaves
}
class Leaf {
    +string root_id Root.id
}
class Kind {
    <<Enumeration>>
    +A
}
"#,
            &Descriptions::default(),
        )
        .unwrap();

        let resolution = resolve(&mut set).unwrap();
        assert_eq!(resolution.imports["Root"], vec!["Base", "Kind", "Leaf", "Middle"]);
        assert_eq!(resolution.imports["Middle"], vec!["Leaf"]);
        assert!(resolution.imports["Leaf"].is_empty());
    }

    #[test]
    fn test_containment_cycle_rejected() {
        let mut set = parse_diagram(
            "class A {\n +B b\n}\nclass B {\n +A a\n}",
            &Descriptions::default(),
        )
        .unwrap();
        assert!(matches!(resolve(&mut set), Err(ModelError::Specification(_))));
    }

    #[test]
    fn test_reference_attributes_are_not_containment() {
        let mut set = parse_diagram(
            "class A {\n +B[] items\n +string id\n}\nclass B {\n +A owner reference=A.id\n}",
            &Descriptions::default(),
        )
        .unwrap();
        let resolution = resolve(&mut set).unwrap();
        assert_eq!(resolution.roots, vec!["A"]);
    }
}
