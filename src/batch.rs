//! Changes applied atomically by one commit.

use std::collections::BTreeMap;

use crate::index::IndexValue;
use crate::key;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put {
        keyspace: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        keyspace: String,
        key: String,
    },
}

/// Secondary index maintenance for one `(value, primary key)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexChange {
    /// Make the pair visible from the commit timestamp on.
    Add {
        index: String,
        value: IndexValue,
        primary_key: String,
    },
    /// Terminate the pair's period at the commit timestamp.
    Remove {
        index: String,
        value: IndexValue,
        primary_key: String,
    },
}

impl IndexChange {
    fn target(&self) -> (&str, &IndexValue, &str) {
        match self {
            IndexChange::Add {
                index,
                value,
                primary_key,
            }
            | IndexChange::Remove {
                index,
                value,
                primary_key,
            } => (index, value, primary_key),
        }
    }

    pub fn index(&self) -> &str {
        self.target().0
    }
}

/// Key writes and index changes committed under one timestamp.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
    index_changes: Vec<IndexChange>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, keyspace: impl Into<String>, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.mutations.push(Mutation::Put {
            keyspace: keyspace.into(),
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, keyspace: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.mutations.push(Mutation::Delete {
            keyspace: keyspace.into(),
            key: key.into(),
        });
        self
    }

    pub fn index(&mut self, index: impl Into<String>, value: IndexValue, primary_key: impl Into<String>) -> &mut Self {
        self.index_changes.push(IndexChange::Add {
            index: index.into(),
            value,
            primary_key: primary_key.into(),
        });
        self
    }

    pub fn unindex(&mut self, index: impl Into<String>, value: IndexValue, primary_key: impl Into<String>) -> &mut Self {
        self.index_changes.push(IndexChange::Remove {
            index: index.into(),
            value,
            primary_key: primary_key.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.index_changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len() + self.index_changes.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn index_changes(&self) -> &[IndexChange] {
        &self.index_changes
    }

    pub fn has_index_changes(&self) -> bool {
        !self.index_changes.is_empty()
    }

    /// Check keys and values without touching the store.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::precondition("empty write batch"));
        }
        for mutation in &self.mutations {
            match mutation {
                Mutation::Put { keyspace, key, value } => {
                    key::validate(keyspace, key, 0)?;
                    if value.is_empty() {
                        return Err(Error::precondition(format!(
                            "{keyspace}/{key}: empty values are reserved for deletions"
                        )));
                    }
                }
                Mutation::Delete { keyspace, key } => key::validate(keyspace, key, 0)?,
            }
        }
        for change in &self.index_changes {
            let (index, _, primary_key) = change.target();
            if index.is_empty() || primary_key.is_empty() {
                return Err(Error::precondition("index name and primary key must be non-empty"));
            }
        }
        Ok(())
    }

    /// Last write per `(keyspace, key)`, in key order.
    pub(crate) fn final_mutations(&self) -> BTreeMap<(&str, &str), Option<&[u8]>> {
        let mut out = BTreeMap::new();
        for mutation in &self.mutations {
            match mutation {
                Mutation::Put { keyspace, key, value } => {
                    out.insert((keyspace.as_str(), key.as_str()), Some(value.as_slice()));
                }
                Mutation::Delete { keyspace, key } => {
                    out.insert((keyspace.as_str(), key.as_str()), None);
                }
            }
        }
        out
    }

    /// Last change per `(index, value, primary key)`, in batch order.
    pub(crate) fn final_index_changes(&self) -> Vec<&IndexChange> {
        let mut out: Vec<&IndexChange> = Vec::new();
        for change in &self.index_changes {
            out.retain(|earlier| earlier.target() != change.target());
            out.push(change);
        }
        out
    }
}
