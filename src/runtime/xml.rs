//! XML rendering of exported instances
//!
//! Attributes become child elements named after the attribute; collections
//! repeat the element. The root element is named after the class and carries
//! the library provenance as XML attributes.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Map;
use std::io::Cursor;

use super::export::SOURCE_KEY;
use super::validate::parse_literal;
use super::{Arena, InstanceId, Library, Value};
use crate::error::{ModelError, Result};
use crate::schema::AttributeDefinition;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

// =============================================================================
// Writing
// =============================================================================

pub(crate) fn write(arena: &Arena, id: InstanceId) -> Result<String> {
    let dict = arena.to_dict(id)?;
    let serde_json::Value::Object(mut map) = dict else {
        return Err(ModelError::xml("export did not produce an object"));
    };
    let source = map.shift_remove(SOURCE_KEY);

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| ModelError::xml(format!("Write error: {e}")))?;

    let class = arena.class_of(id)?;
    let mut root = BytesStart::new(class);
    if let Some(serde_json::Value::Object(source)) = &source {
        for key in ["repo", "commit", "url"] {
            if let Some(value) = source.get(key).and_then(|v| v.as_str()) {
                root.push_attribute((key, value));
            }
        }
    }
    writer
        .write_event(Event::Start(root))
        .map_err(|e| ModelError::xml(format!("Write error: {e}")))?;
    write_fields(&mut writer, &map)?;
    writer
        .write_event(Event::End(BytesEnd::new(class)))
        .map_err(|e| ModelError::xml(format!("Write error: {e}")))?;

    let mut output = writer.into_inner().into_inner();
    output.push(b'\n');
    String::from_utf8(output).map_err(|e| ModelError::xml(format!("Invalid UTF-8 output: {e}")))
}

fn write_fields(writer: &mut XmlWriter, map: &Map<String, serde_json::Value>) -> Result<()> {
    for (name, value) in map {
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    write_element(writer, name, item)?;
                }
            }
            other => write_element(writer, name, other)?,
        }
    }
    Ok(())
}

fn write_element(writer: &mut XmlWriter, name: &str, value: &serde_json::Value) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| ModelError::xml(format!("Write error: {e}")))?;
    match value {
        serde_json::Value::Object(nested) => write_fields(writer, nested)?,
        serde_json::Value::String(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| ModelError::xml(format!("Write error: {e}")))?,
        other => writer
            .write_event(Event::Text(BytesText::new(&other.to_string())))
            .map_err(|e| ModelError::xml(format!("Write error: {e}")))?,
    }
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| ModelError::xml(format!("Write error: {e}")))?;
    Ok(())
}

// =============================================================================
// Reading
// =============================================================================

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

/// Parse an exported document back into plain data, guided by the class
/// definitions so literals regain their types
pub(crate) fn read(library: &Library, class: &str, text: &str) -> Result<serde_json::Value> {
    let root = parse_elements(text)?;
    if root.name != class {
        return Err(ModelError::xml(format!(
            "Expected root element '{}', found '{}'",
            class, root.name
        )));
    }
    element_to_dict(library, class, &root)
}

fn parse_elements(text: &str) -> Result<Element> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(start_element(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = start_element(e)?;
                close_element(&mut stack, &mut root, element);
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| ModelError::xml(format!("Text error: {e}")))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    close_element(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ModelError::xml(format!(
                    "XML parse error at position {}: {e}",
                    reader.error_position()
                )))
            }
            _ => {}
        }
    }

    root.ok_or_else(|| ModelError::xml("Document has no root element"))
}

fn start_element(e: &BytesStart<'_>) -> Result<Element> {
    let name_bytes = e.name();
    let name = std::str::from_utf8(name_bytes.as_ref())
        .map_err(|e| ModelError::xml(format!("Invalid tag name: {e}")))?;
    Ok(Element {
        name: name.to_string(),
        ..Element::default()
    })
}

fn close_element(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn element_to_dict(library: &Library, class: &str, element: &Element) -> Result<serde_json::Value> {
    let mut map = Map::new();
    for child in &element.children {
        let attribute = library.field(class, &child.name).ok_or_else(|| {
            ModelError::validation(class, &child.name, format!("an attribute of '{}'", class), "unknown element")
        })?;
        let value = element_value(library, attribute, child)?;

        if attribute.multiple {
            let entry = map
                .entry(child.name.clone())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let serde_json::Value::Array(items) = entry {
                items.push(value);
            }
        } else {
            map.insert(child.name.clone(), value);
        }
    }
    Ok(serde_json::Value::Object(map))
}

fn element_value(library: &Library, attribute: &AttributeDefinition, element: &Element) -> Result<serde_json::Value> {
    if !element.children.is_empty() {
        let names: Vec<&str> = element.children.iter().map(|c| c.name.as_str()).collect();
        let candidate = attribute
            .named_types()
            .filter(|name| library.is_class(name))
            .find(|name| {
                library
                    .fields(name)
                    .map(|fields| names.iter().all(|n| fields.iter().any(|f| f.name == *n)))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                ModelError::xml(format!("No class of '{}' matches element content", attribute.name))
            })?;
        return element_to_dict(library, candidate, element);
    }

    let value = parse_literal(&element.text, attribute, library)
        .unwrap_or_else(|_| Value::String(element.text.clone()));
    Ok(match value {
        Value::Bool(b) => b.into(),
        Value::Int(i) => i.into(),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => other.to_string().into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Descriptions;
    use std::sync::Arc;

    fn library() -> Arc<Library> {
        Arc::new(
            Library::from_diagram(
                r#"
class Root {
    +string name
    +integer[] counts
    +Nested[] nested
}
class Nested {
    +float value
    +boolean flag
}
"#,
                &Descriptions::default(),
            )
            .unwrap()
            .with_source("https://github.com/org/models", Some("abc")),
        )
    }

    #[test]
    fn test_xml_round_trip() {
        let mut arena = Arena::new(library());
        let nested = arena
            .create("Nested", [("value", Value::Float(2.5)), ("flag", Value::Bool(true))])
            .unwrap();
        let root = arena
            .create(
                "Root",
                [
                    ("name", Value::from("a & b")),
                    ("counts", Value::from(vec![1i64, 2])),
                    ("nested", Value::from(vec![nested])),
                ],
            )
            .unwrap();

        let xml = arena.to_xml(root).unwrap();
        assert!(xml.contains(r#"<Root repo="https://github.com/org/models" commit="abc""#));
        assert!(xml.contains("<name>a &amp; b</name>"));

        let mut other = Arena::new(library());
        let imported = other.from_xml("Root", &xml).unwrap();
        assert!(arena.structurally_eq(root, &other, imported).unwrap());
        assert_eq!(other.get(imported, "counts", None).unwrap(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_wrong_root_rejected() {
        let library = library();
        assert!(matches!(
            read(&library, "Root", "<Other/>"),
            Err(ModelError::Xml(_))
        ));
    }
}
