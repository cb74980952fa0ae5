use std::ops::Bound;
use std::sync::Arc;

use crate::kv::env::{Snapshot, Table};

/// Positioned cursor over one store of a snapshot.
///
/// Unpositioned after construction: `next()` moves to the first entry and
/// `prev()` to the last one.
pub struct KvCursor {
    table: Option<Arc<Table>>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl KvCursor {
    pub(crate) fn new(
        snapshot: &Snapshot,
        store: &str,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> Self {
        Self {
            table: snapshot.table(store),
            lower,
            upper,
            current: None,
        }
    }

    fn bound_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
        match bound {
            Bound::Included(key) => Bound::Included(key.as_slice()),
            Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    fn land(&mut self, entry: Option<(&Vec<u8>, &Vec<u8>)>) -> bool {
        self.current = entry.map(|(k, v)| (k.clone(), v.clone()));
        self.current.is_some()
    }

    pub fn first(&mut self) -> bool {
        let Some(table) = self.table.clone() else {
            return false;
        };
        let lower = Self::bound_ref(&self.lower);
        let upper = Self::bound_ref(&self.upper);
        let entry = table.range::<[u8], _>((lower, upper)).next();
        self.land(entry)
    }

    pub fn last(&mut self) -> bool {
        let Some(table) = self.table.clone() else {
            return false;
        };
        let lower = Self::bound_ref(&self.lower);
        let upper = Self::bound_ref(&self.upper);
        let entry = table.range::<[u8], _>((lower, upper)).next_back();
        self.land(entry)
    }

    /// Position at the first entry `>= key` within the bounds.
    pub fn seek(&mut self, key: &[u8]) -> bool {
        let Some(table) = self.table.clone() else {
            return false;
        };
        let lower = match Self::bound_ref(&self.lower) {
            Bound::Included(start) if start > key => Bound::Included(start),
            Bound::Excluded(start) if start >= key => Bound::Excluded(start),
            _ => Bound::Included(key),
        };
        let upper = Self::bound_ref(&self.upper);
        let entry = table.range::<[u8], _>((lower, upper)).next();
        self.land(entry)
    }

    pub fn next(&mut self) -> bool {
        let Some((current, _)) = self.current.take() else {
            return self.first();
        };
        let Some(table) = self.table.clone() else {
            return false;
        };
        let upper = Self::bound_ref(&self.upper);
        let entry = table
            .range::<[u8], _>((Bound::Excluded(current.as_slice()), upper))
            .next();
        self.land(entry)
    }

    pub fn prev(&mut self) -> bool {
        let Some((current, _)) = self.current.take() else {
            return self.last();
        };
        let Some(table) = self.table.clone() else {
            return false;
        };
        let lower = Self::bound_ref(&self.lower);
        let entry = table
            .range::<[u8], _>((lower, Bound::Excluded(current.as_slice())))
            .next_back();
        self.land(entry)
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Environment;

    fn env_with(keys: &[&[u8]]) -> Environment {
        let env = std::sync::Arc::new(Environment::in_memory());
        let mut txn = env.begin_write().unwrap();
        for key in keys {
            txn.put("s", key.to_vec(), b"v".to_vec());
        }
        txn.commit().unwrap();
        std::sync::Arc::try_unwrap(env).ok().unwrap()
    }

    #[test]
    fn test_forward_and_backward() {
        let env = env_with(&[b"a", b"b", b"c"]);
        let txn = env.begin_read().unwrap();
        let mut cursor = txn.cursor("s", Bound::Unbounded, Bound::Unbounded);
        let mut seen = Vec::new();
        while cursor.next() {
            seen.push(cursor.key().unwrap().to_vec());
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let mut cursor = txn.cursor("s", Bound::Unbounded, Bound::Unbounded);
        assert!(cursor.prev());
        assert_eq!(cursor.key(), Some(&b"c"[..]));
        assert!(cursor.prev());
        assert_eq!(cursor.key(), Some(&b"b"[..]));
    }

    #[test]
    fn test_bounds_and_seek() {
        let env = env_with(&[b"a", b"b", b"c", b"d"]);
        let txn = env.begin_read().unwrap();
        let mut cursor = txn.cursor(
            "s",
            Bound::Included(b"b".to_vec()),
            Bound::Excluded(b"d".to_vec()),
        );
        assert!(cursor.seek(b"a"));
        assert_eq!(cursor.key(), Some(&b"b"[..]));
        assert!(cursor.next());
        assert_eq!(cursor.key(), Some(&b"c"[..]));
        assert!(!cursor.next());
        assert_eq!(cursor.key(), None);
    }

    #[test]
    fn test_missing_store_is_empty() {
        let env = Environment::in_memory();
        let txn = env.begin_read().unwrap();
        let mut cursor = txn.cursor("nope", Bound::Unbounded, Bound::Unbounded);
        assert!(!cursor.next());
        assert!(!cursor.prev());
    }
}
