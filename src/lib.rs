//! modelkit
//!
//! Schema-driven data modeling: class diagrams in, typed Rust packages and a
//! dynamic runtime out.
//!
//! ## Features
//!
//! - **Diagram parsing**: Mermaid-like class diagrams plus a descriptions JSON
//! - **External objects**: classes pulled in from other specification repositories
//! - **Code generation**: one module per class with typed handles and custom regions
//! - **Runtime arena**: validated storage, references, path queries, export/import
//! - **Guide trees**: rebuild nested instances from flat per-attribute columns
//!
//! ## Architecture
//!
//! ```text
//! diagram.mmd + diagram.json
//!   └── schema::parser ──► SpecificationSet
//!         ├── schema::external (splice <<External Object>>)
//!         └── graph::resolve (inheritance, containment, factories)
//!               ├── codegen ──► <out>/<package>/{mod.rs, <class>.rs, schemes/}
//!               └── runtime::Library ──► Arena ──► tree::GuideTree
//! ```

pub mod checksum;
pub mod codegen;
pub mod config;
pub mod datatypes;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod schema;
pub mod tree;

pub use checksum::Checksum;
pub use codegen::{Assembler, GenerateOptions, GenerationReport};
pub use config::ModelkitConfig;
pub use datatypes::PrimitiveKind;
pub use error::{ModelError, Result};
pub use runtime::{Arena, InstanceId, Library, Value};
pub use schema::{ClassDefinition, EnumDefinition, SpecificationSet};
pub use tree::GuideTree;
