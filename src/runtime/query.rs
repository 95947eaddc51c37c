//! Path queries
//!
//! Paths are slash-delimited attribute names. A path containing a numeric
//! segment is absolute and addresses one location (`/children/1/name`);
//! anything else is a meta path matched against every occurrence
//! (`Root/children/name`).

use std::fmt;

use super::{Arena, InstanceId, Value};
use crate::error::{ModelError, Result};

/// How a filter tests a value
pub enum Predicate {
    Equals(Value),
    Matches(Box<dyn Fn(&Value) -> bool>),
}

impl Predicate {
    pub fn test(&self, value: &Value) -> bool {
        match self {
            Self::Equals(expected) => value == expected || value.elements().any(|e| e == expected),
            Self::Matches(f) => f(value),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(value) => write!(f, "Equals({:?})", value),
            Self::Matches(_) => write!(f, "Matches(..)"),
        }
    }
}

/// Narrows query results. Objects are tested through `attribute`, scalars directly.
#[derive(Debug)]
pub struct Filter {
    pub attribute: Option<String>,
    pub predicate: Predicate,
}

impl Filter {
    /// Keep objects whose attribute equals the value
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            predicate: Predicate::Equals(value.into()),
        }
    }

    /// Keep objects whose attribute passes the test
    pub fn matches(attribute: impl Into<String>, test: impl Fn(&Value) -> bool + 'static) -> Self {
        Self {
            attribute: Some(attribute.into()),
            predicate: Predicate::Matches(Box::new(test)),
        }
    }

    /// Keep scalar results passing the test
    pub fn value(test: impl Fn(&Value) -> bool + 'static) -> Self {
        Self {
            attribute: None,
            predicate: Predicate::Matches(Box::new(test)),
        }
    }
}

/// Split a path into its non-empty segments
fn segments(path: &str) -> Vec<&str> {
    path.split('/').map(str::trim).filter(|s| !s.is_empty()).collect()
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// Whether a path addresses one concrete location
pub fn is_absolute(path: &str) -> bool {
    segments(path).into_iter().any(is_index)
}

impl Arena {
    /// Query below an instance.
    ///
    /// Absolute paths that run past the data or end on an unset attribute
    /// fail with [`ModelError::NotFound`]; meta paths return what they find.
    pub fn get(&self, id: InstanceId, path: &str, filter: Option<&Filter>) -> Result<Vec<Value>> {
        let matches = if is_absolute(path) {
            vec![self.get_absolute(id, path)?]
        } else {
            self.get_meta(id, path)?
                .into_iter()
                .map(|(_, value)| value)
                .collect()
        };

        let flattened: Vec<Value> = matches
            .into_iter()
            .flat_map(|value| match value {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            })
            .collect();

        match filter {
            Some(filter) => self.apply_filter(flattened, filter),
            None => Ok(flattened),
        }
    }

    /// Meta path query over several roots, concatenated in order
    pub fn get_all(&self, roots: &[InstanceId], path: &str, filter: Option<&Filter>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for root in roots {
            results.extend(self.get(*root, path, filter)?);
        }
        Ok(results)
    }

    /// Concrete paths below an instance, in document order
    pub fn paths(&self, id: InstanceId, leaves_only: bool) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.collect_paths(id, "", leaves_only, &mut out)?;
        Ok(out)
    }

    fn collect_paths(&self, id: InstanceId, prefix: &str, leaves_only: bool, out: &mut Vec<String>) -> Result<()> {
        let instance = self.instance(id)?;
        for attribute in self.library.fields(&instance.class)? {
            let Some(value) = instance.values.get(&attribute.name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let path = format!("{}/{}", prefix, attribute.name);
            let descend = attribute.reference.is_none();

            match value {
                Value::Object(child) if descend => {
                    if !leaves_only {
                        out.push(path.clone());
                    }
                    self.collect_paths(*child, &path, leaves_only, out)?;
                }
                Value::List(items) if descend && items.iter().any(|i| i.as_object().is_some()) => {
                    if !leaves_only {
                        out.push(path.clone());
                    }
                    for (index, item) in items.iter().enumerate() {
                        let item_path = format!("{}/{}", path, index);
                        match item {
                            Value::Object(child) => {
                                if !leaves_only {
                                    out.push(item_path.clone());
                                }
                                self.collect_paths(*child, &item_path, leaves_only, out)?;
                            }
                            _ => out.push(item_path),
                        }
                    }
                }
                _ => out.push(path),
            }
        }
        Ok(())
    }

    fn get_absolute(&self, id: InstanceId, path: &str) -> Result<Value> {
        let not_found = || ModelError::NotFound { path: path.to_string() };
        let mut segments = segments(path);
        if segments.first().is_some_and(|s| self.is_root_class_segment(id, s)) {
            segments.remove(0);
        }

        let mut current = Value::Object(id);
        for segment in segments {
            current = if is_index(segment) {
                let index: usize = segment.parse().map_err(|_| not_found())?;
                match &current {
                    Value::List(items) => items.get(index).cloned().ok_or_else(not_found)?,
                    _ => return Err(not_found()),
                }
            } else {
                match &current {
                    Value::Object(object) => {
                        let instance = self.instance(*object)?;
                        instance.values.get(segment).cloned().ok_or_else(not_found)?
                    }
                    _ => return Err(not_found()),
                }
            };
        }
        // An unset attribute is as absent as a missing one
        if current.is_null() {
            return Err(not_found());
        }
        Ok(current)
    }

    /// Meta path walk. Each match carries the index of the innermost list
    /// instance it was reached through. A list ending the path stays whole
    /// under that index; outside any list its elements are numbered instead.
    pub(crate) fn get_meta(&self, id: InstanceId, path: &str) -> Result<Vec<(usize, Value)>> {
        let mut segments: Vec<&str> = segments(path).into_iter().filter(|s| !is_index(s)).collect();
        if segments.first().is_some_and(|s| self.is_root_class_segment(id, s)) {
            segments.remove(0);
        }

        let mut frontier: Vec<(Option<usize>, Value)> = vec![(None, Value::Object(id))];
        for segment in segments {
            let mut next = Vec::new();
            for (index, value) in frontier {
                let expanded: Vec<(Option<usize>, Value)> = match value {
                    Value::List(items) => items.into_iter().enumerate().map(|(i, v)| (Some(i), v)).collect(),
                    other => vec![(index, other)],
                };
                for (index, value) in expanded {
                    let Value::Object(object) = value else {
                        continue;
                    };
                    let instance = self.instance(object)?;
                    match instance.values.get(segment) {
                        Some(Value::Null) | None => {}
                        Some(found) => next.push((index, found.clone())),
                    }
                }
            }
            frontier = next;
        }

        Ok(frontier
            .into_iter()
            .flat_map(|(index, value)| match (index, value) {
                (None, Value::List(items)) => items.into_iter().enumerate().collect::<Vec<_>>(),
                (index, value) => vec![(index.unwrap_or(0), value)],
            })
            .collect())
    }

    /// A leading segment naming the instance's class rather than an attribute
    fn is_root_class_segment(&self, id: InstanceId, segment: &str) -> bool {
        match self.instance(id) {
            Ok(instance) => {
                instance.class == segment && !instance.values.contains_key(segment)
            }
            Err(_) => false,
        }
    }

    fn apply_filter(&self, values: Vec<Value>, filter: &Filter) -> Result<Vec<Value>> {
        let mut kept = Vec::new();
        for value in values {
            let keep = match (&value, &filter.attribute) {
                (Value::Object(object), Some(attribute)) => {
                    let instance = self.instance(*object)?;
                    let Some(tested) = instance.values.get(attribute) else {
                        return Err(ModelError::Query(format!(
                            "'{}' has no attribute '{}' to filter on",
                            instance.class, attribute
                        )));
                    };
                    filter.predicate.test(tested)
                }
                _ => filter.predicate.test(&value),
            };
            if keep {
                kept.push(value);
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Library;
    use crate::schema::Descriptions;
    use std::sync::Arc;

    fn populated() -> (Arena, Vec<InstanceId>) {
        let library = Library::from_diagram(
            r#"
class Root {
    +Nested[] nested_multiple_obj
    +string[] tags
}
class Nested {
    +string str_value
    +float float_value
}
"#,
            &Descriptions::default(),
        )
        .unwrap();
        let mut arena = Arena::new(Arc::new(library));
        let mut roots = Vec::new();
        for r in 0..2 {
            let root = arena
                .create("Root", [("tags", Value::from(vec!["x", "y"]))])
                .unwrap();
            for n in 0..2 {
                let nested = arena
                    .create(
                        "Nested",
                        [
                            ("str_value", Value::from(format!("r{}n{}", r, n))),
                            ("float_value", Value::Float(n as f64)),
                        ],
                    )
                    .unwrap();
                arena.append(root, "nested_multiple_obj", nested).unwrap();
            }
            roots.push(root);
        }
        (arena, roots)
    }

    #[test]
    fn test_meta_path_over_two_roots() {
        let (arena, roots) = populated();
        let values = arena
            .get_all(&roots, "Root/nested_multiple_obj/str_value", None)
            .unwrap();
        assert_eq!(
            values,
            vec![
                Value::from("r0n0"),
                Value::from("r0n1"),
                Value::from("r1n0"),
                Value::from("r1n1")
            ]
        );
    }

    #[test]
    fn test_absolute_path() {
        let (arena, roots) = populated();
        assert_eq!(
            arena.get(roots[0], "/nested_multiple_obj/1/str_value", None).unwrap(),
            vec![Value::from("r0n1")]
        );
        assert!(matches!(
            arena.get(roots[0], "/nested_multiple_obj/2/str_value", None),
            Err(ModelError::NotFound { .. })
        ));
    }

    #[test]
    fn test_meta_path_miss_is_empty() {
        let (arena, roots) = populated();
        assert!(arena.get(roots[0], "nested_multiple_obj/missing", None).unwrap().is_empty());
    }

    #[test]
    fn test_filters() {
        let (arena, roots) = populated();
        let objects = arena
            .get(roots[0], "nested_multiple_obj", Some(&Filter::equals("float_value", 1.0)))
            .unwrap();
        assert_eq!(objects.len(), 1);

        let scalars = arena
            .get(roots[0], "nested_multiple_obj/str_value", Some(&Filter::value(|v| v.as_str() == Some("r0n0"))))
            .unwrap();
        assert_eq!(scalars, vec![Value::from("r0n0")]);

        assert!(matches!(
            arena.get(roots[0], "nested_multiple_obj", Some(&Filter::equals("missing", 1))),
            Err(ModelError::Query(_))
        ));
    }

    #[test]
    fn test_paths() {
        let (arena, roots) = populated();
        let leaves = arena.paths(roots[0], true).unwrap();
        assert_eq!(
            leaves,
            vec![
                "/nested_multiple_obj/0/str_value",
                "/nested_multiple_obj/0/float_value",
                "/nested_multiple_obj/1/str_value",
                "/nested_multiple_obj/1/float_value",
                "/tags",
            ]
        );
        let all = arena.paths(roots[0], false).unwrap();
        assert!(all.contains(&"/nested_multiple_obj/0".to_string()));
    }

    #[test]
    fn test_absolute_path_to_unset_attribute() {
        let library = Library::from_diagram(
            "class Root {\n +Nested[] nested\n}\nclass Nested {\n +string label\n +float amount\n}",
            &Descriptions::default(),
        )
        .unwrap();
        let mut arena = Arena::new(Arc::new(library));
        let nested = arena.create("Nested", [("label", Value::from("a"))]).unwrap();
        let root = arena.create("Root", [("nested", Value::from(vec![nested]))]).unwrap();

        assert_eq!(arena.get(root, "/nested/0/label", None).unwrap(), vec![Value::from("a")]);
        assert!(matches!(
            arena.get(root, "/nested/0/amount", None),
            Err(ModelError::NotFound { .. })
        ));
    }

    #[test]
    fn test_leaf_lists_keep_their_instance_index() {
        let library = Library::from_diagram(
            "class Root {\n +Nested[] nested\n +integer[] codes\n}\nclass Nested {\n +integer[] ints\n}",
            &Descriptions::default(),
        )
        .unwrap();
        let mut arena = Arena::new(Arc::new(library));
        let first = arena.create("Nested", [("ints", Value::from(vec![1i64, 2]))]).unwrap();
        let second = arena.create("Nested", [("ints", Value::from(vec![3i64]))]).unwrap();
        let root = arena
            .create(
                "Root",
                [
                    ("nested", Value::from(vec![first, second])),
                    ("codes", Value::from(vec![7i64, 8])),
                ],
            )
            .unwrap();

        assert_eq!(
            arena.get_meta(root, "nested/ints").unwrap(),
            vec![
                (0, Value::List(vec![Value::Int(1), Value::Int(2)])),
                (1, Value::List(vec![Value::Int(3)])),
            ]
        );
        assert_eq!(
            arena.get_meta(root, "codes").unwrap(),
            vec![(0, Value::Int(7)), (1, Value::Int(8))]
        );
        // Plain queries still flatten
        assert_eq!(arena.get(root, "nested/ints", None).unwrap().len(), 3);
    }

    #[test]
    fn test_indexed_meta_values() {
        let (arena, roots) = populated();
        let indexed = arena.get_meta(roots[1], "nested_multiple_obj/float_value").unwrap();
        assert_eq!(indexed, vec![(0, Value::Float(0.0)), (1, Value::Float(1.0))]);
    }
}
