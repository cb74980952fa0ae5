//! Secondary index values, entry layout and definitions.

mod entry;
mod value;

use serde::{Deserialize, Serialize};

pub use entry::{decode_entry, encode_entry_key, encode_upper, entry_prefix, IndexEntry};
pub use value::{IndexKind, IndexRange, IndexValue};
pub(crate) use value::prefix_successor;

/// A named secondary index over one value kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn store_name(&self) -> String {
        self.kind.store_name(&self.name)
    }
}
