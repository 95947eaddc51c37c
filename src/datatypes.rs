//! Type dictionary
//!
//! Maps the primitive type names accepted in class diagrams to a closed set of
//! kinds. Each kind knows the Rust type it renders to and the `use`
//! declarations that type needs in generated code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive kinds recognized in attribute declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    String,
    Float,
    Integer,
    Boolean,
    Date,
    DateTime,
    Bytes,
    PositiveFloat,
    PositiveInt,
    HttpUrl,
    Email,
    Identifier,
    Any,
}

impl PrimitiveKind {
    /// Every kind, in declaration order
    pub const ALL: [PrimitiveKind; 13] = [
        PrimitiveKind::String,
        PrimitiveKind::Float,
        PrimitiveKind::Integer,
        PrimitiveKind::Boolean,
        PrimitiveKind::Date,
        PrimitiveKind::DateTime,
        PrimitiveKind::Bytes,
        PrimitiveKind::PositiveFloat,
        PrimitiveKind::PositiveInt,
        PrimitiveKind::HttpUrl,
        PrimitiveKind::Email,
        PrimitiveKind::Identifier,
        PrimitiveKind::Any,
    ];

    /// Resolve a schema type name. Returns `None` for class and enum names.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "string" | "str" => Self::String,
            "float" | "double" | "number" => Self::Float,
            "int" | "integer" => Self::Integer,
            "bool" | "boolean" => Self::Boolean,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "bytes" => Self::Bytes,
            "posfloat" | "positivefloat" => Self::PositiveFloat,
            "posint" | "positiveint" => Self::PositiveInt,
            "httpurl" | "url" => Self::HttpUrl,
            "email" | "emailstr" => Self::Email,
            "identifier" => Self::Identifier,
            "any" => Self::Any,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical schema name, used when rendering definitions back out
    pub fn schema_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Bytes => "bytes",
            Self::PositiveFloat => "posfloat",
            Self::PositiveInt => "posint",
            Self::HttpUrl => "httpurl",
            Self::Email => "email",
            Self::Identifier => "identifier",
            Self::Any => "any",
        }
    }

    /// Rust type used in generated accessors
    pub fn rust_type(&self) -> &'static str {
        match self {
            Self::String | Self::HttpUrl | Self::Email | Self::Identifier => "String",
            Self::Float | Self::PositiveFloat => "f64",
            Self::Integer | Self::PositiveInt => "i64",
            Self::Boolean => "bool",
            Self::Date => "NaiveDate",
            Self::DateTime => "NaiveDateTime",
            Self::Bytes => "Bytes",
            Self::Any => "Value",
        }
    }

    /// `use` declarations the Rust type needs
    pub fn imports(&self) -> &'static [&'static str] {
        match self {
            Self::Date => &["use chrono::NaiveDate;"],
            Self::DateTime => &["use chrono::NaiveDateTime;"],
            Self::Bytes => &["use modelkit::runtime::Bytes;"],
            _ => &[],
        }
    }

    /// Identifier used for the matching `PrimitiveKind` variant in generated code
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Float => "Float",
            Self::Integer => "Integer",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::Bytes => "Bytes",
            Self::PositiveFloat => "PositiveFloat",
            Self::PositiveInt => "PositiveInt",
            Self::HttpUrl => "HttpUrl",
            Self::Email => "Email",
            Self::Identifier => "Identifier",
            Self::Any => "Any",
        }
    }

    /// Whether values of this kind are numbers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Float | Self::Integer | Self::PositiveFloat | Self::PositiveInt
        )
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.schema_name())
    }
}
