//! Validation rules
//!
//! Every assignment runs the value through [`RULES`] in order. Each rule is a
//! pure function that either passes the (possibly coerced) value on or fails.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use super::{Arena, Bytes, Library, Value};
use crate::datatypes::PrimitiveKind;
use crate::error::{ModelError, Result};
use crate::schema::{AttributeDefinition, TypeRef};

/// Everything a rule may look at besides the value
pub struct FieldContext<'a> {
    /// Class owning the attribute
    pub object: &'a str,
    pub attribute: &'a AttributeDefinition,
    pub library: &'a Library,
    /// Needed to check the class of object values
    pub arena: Option<&'a Arena>,
}

impl FieldContext<'_> {
    fn error(&self, expected: impl Into<String>, actual: impl Into<String>) -> ModelError {
        ModelError::validation(self.object, &self.attribute.name, expected, actual)
    }

    fn expected_types(&self) -> String {
        let names: Vec<_> = self.attribute.types.iter().map(TypeRef::name).collect();
        names.join(" | ")
    }
}

pub type Rule = fn(Value, &FieldContext) -> Result<Value>;

/// Rules applied to every non-null value, in order
pub const RULES: &[Rule] = &[check_multiplicity, check_types, check_constraints];

/// Run all rules over a value
pub fn validate(value: Value, context: &FieldContext) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    RULES.iter().try_fold(value, |value, rule| rule(value, context))
}

fn check_multiplicity(value: Value, context: &FieldContext) -> Result<Value> {
    let is_any = context
        .attribute
        .types
        .iter()
        .all(|t| t == &TypeRef::Primitive(PrimitiveKind::Any));

    match (&value, context.attribute.multiple) {
        (Value::List(_), true) => Ok(value),
        (_, true) => Err(context.error("list", value.kind_name())),
        (Value::List(_), false) if !is_any => {
            Err(context.error(context.expected_types(), "list"))
        }
        _ => Ok(value),
    }
}

fn check_types(value: Value, context: &FieldContext) -> Result<Value> {
    match value {
        Value::List(items) if context.attribute.multiple => items
            .into_iter()
            .map(|item| coerce(item, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        other => coerce(other, context),
    }
}

/// Coerce a single element to the first candidate type that accepts it
fn coerce(value: Value, context: &FieldContext) -> Result<Value> {
    for candidate in &context.attribute.types {
        if let Some(coerced) = accept(candidate, &value, context) {
            return Ok(coerced);
        }
    }
    Err(context.error(context.expected_types(), describe(&value, context)))
}

fn describe(value: &Value, context: &FieldContext) -> String {
    match (value, context.arena) {
        (Value::Object(id), Some(arena)) => arena
            .class_of(*id)
            .map(str::to_string)
            .unwrap_or_else(|_| value.kind_name().to_string()),
        _ => value.kind_name().to_string(),
    }
}

fn accept(candidate: &TypeRef, value: &Value, context: &FieldContext) -> Option<Value> {
    match candidate {
        TypeRef::Primitive(kind) => accept_primitive(*kind, value),
        TypeRef::Named(name) => {
            if let Some(enumeration) = context.library.enumeration(name) {
                let literal = enumeration.literal(value.as_str()?)?;
                return Some(Value::String(literal.to_string()));
            }
            let id = value.as_object()?;
            match context.arena {
                Some(arena) => {
                    let class = arena.class_of(id).ok()?;
                    context
                        .library
                        .is_subclass(class, name)
                        .then(|| value.clone())
                }
                None => Some(value.clone()),
            }
        }
    }
}

fn accept_primitive(kind: PrimitiveKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (PrimitiveKind::Any, v) => Some(v.clone()),
        (PrimitiveKind::String | PrimitiveKind::Identifier, Value::String(_)) => Some(value.clone()),
        (PrimitiveKind::HttpUrl, Value::String(s)) => {
            (s.starts_with("http://") || s.starts_with("https://")).then(|| value.clone())
        }
        (PrimitiveKind::Email, Value::String(s)) => {
            let (local, domain) = s.split_once('@')?;
            (!local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
                .then(|| value.clone())
        }
        (PrimitiveKind::Float, v) => v.as_f64().map(Value::Float),
        (PrimitiveKind::PositiveFloat, v) => v.as_f64().filter(|f| *f > 0.0).map(Value::Float),
        (PrimitiveKind::Integer, Value::Int(_)) => Some(value.clone()),
        (PrimitiveKind::PositiveInt, Value::Int(i)) => (*i > 0).then(|| value.clone()),
        (PrimitiveKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (PrimitiveKind::Date, Value::Date(_)) => Some(value.clone()),
        (PrimitiveKind::Date, Value::String(s)) => parse_date(s).map(Value::Date),
        (PrimitiveKind::DateTime, Value::DateTime(_)) => Some(value.clone()),
        (PrimitiveKind::DateTime, Value::String(s)) => parse_datetime(s).map(Value::DateTime),
        (PrimitiveKind::Bytes, Value::Bytes(_)) => Some(value.clone()),
        (PrimitiveKind::Bytes, Value::String(s)) => Some(Value::Bytes(Bytes(s.as_bytes().to_vec()))),
        _ => None,
    }
}

fn check_constraints(value: Value, context: &FieldContext) -> Result<Value> {
    let options = &context.attribute.options;
    if options.is_empty() {
        return Ok(value);
    }

    let number = |key: &str| -> Result<Option<f64>> {
        options
            .get(key)
            .map(|raw| {
                raw.parse::<f64>().map_err(|_| {
                    ModelError::spec(format!(
                        "option '{}' of '{}.{}' is not a number",
                        key, context.object, context.attribute.name
                    ))
                })
            })
            .transpose()
    };

    let minimum = number("minimum")?;
    let maximum = number("maximum")?;
    let min_length = number("min_length")?;
    let max_length = number("max_length")?;
    let pattern = options
        .get("pattern")
        .map(|p| {
            Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                ModelError::spec(format!(
                    "invalid pattern on '{}.{}': {}",
                    context.object, context.attribute.name, e
                ))
            })
        })
        .transpose()?;

    for element in value.elements() {
        if let Some(number) = element.as_f64() {
            if let Some(min) = minimum.filter(|min| number < *min) {
                return Err(context.error(format!(">= {}", min), number.to_string()));
            }
            if let Some(max) = maximum.filter(|max| number > *max) {
                return Err(context.error(format!("<= {}", max), number.to_string()));
            }
        }
        if let Some(text) = element.as_str() {
            let length = text.chars().count() as f64;
            if let Some(min) = min_length.filter(|min| length < *min) {
                return Err(context.error(format!("at least {} characters", min), text));
            }
            if let Some(max) = max_length.filter(|max| length > *max) {
                return Err(context.error(format!("at most {} characters", max), text));
            }
            if let Some(pattern) = pattern.as_ref().filter(|p| !p.is_match(text)) {
                return Err(context.error(format!("match for {}", pattern.as_str()), text));
            }
        }
    }

    Ok(value)
}

// =============================================================================
// Literals
// =============================================================================

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// Convert a textual literal (a default, an XML text node) to a value of the
/// first candidate type that accepts it
pub fn parse_literal(literal: &str, attribute: &AttributeDefinition, library: &Library) -> Result<Value> {
    for candidate in &attribute.types {
        let parsed = match candidate {
            TypeRef::Primitive(kind) => parse_primitive(*kind, literal),
            TypeRef::Named(name) => library
                .enumeration(name)
                .and_then(|e| e.literal(literal))
                .map(|l| Value::String(l.to_string())),
        };
        if let Some(value) = parsed {
            return Ok(value);
        }
    }

    let names: Vec<_> = attribute.types.iter().map(TypeRef::name).collect();
    Err(ModelError::validation(
        "literal",
        &attribute.name,
        names.join(" | "),
        literal,
    ))
}

fn parse_primitive(kind: PrimitiveKind, literal: &str) -> Option<Value> {
    let parsed = match kind {
        PrimitiveKind::Integer | PrimitiveKind::PositiveInt => Value::Int(literal.parse().ok()?),
        PrimitiveKind::Float | PrimitiveKind::PositiveFloat => Value::Float(literal.parse().ok()?),
        PrimitiveKind::Boolean => match literal.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return None,
        },
        _ => Value::String(literal.to_string()),
    };
    accept_primitive(kind, &parsed)
}
