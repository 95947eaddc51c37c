//! Runtime model base
//!
//! Instances of a model live in an [`Arena`] and are addressed by
//! [`InstanceId`]. The arena validates every assignment against the
//! [`Library`], keeps references registered on both sides and offers path
//! queries, export/import, fingerprints and conversion between models.
//! Generated class handles are thin typed views over these operations.

pub mod arena;
pub mod convert;
pub mod export;
pub mod library;
pub mod query;
pub mod validate;
pub mod value;
mod xml;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use arena::{Arena, RuntimeInstance};
pub use convert::LinkTemplate;
pub use library::{Library, LibraryBuilder};
pub use query::{Filter, Predicate};
pub use validate::{FieldContext, Rule, RULES};
pub use value::{Bytes, FromValue, Value};

/// Index of an instance inside its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub(crate) usize);

impl InstanceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
