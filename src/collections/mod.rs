//! Persistent collections shared by both engines (spec.md §3.2).
//!
//! Each collection type is a plain, `Clone`-cheap value backed by `Rc`-shared
//! trie/cons structure. Transients give a single-threaded mutable builder for
//! bulk construction; calling `persistent!` consumes the transient so that a
//! stale handle can no longer mutate (spec.md §3.2: "reuse of a transient
//! after `persistent!` fails with a `state_error`").

pub mod list;
pub mod map;
pub mod set;
pub mod vector;

pub use list::PList;
pub use map::PMap;
pub use set::PSet;
pub use vector::PVector;

use crate::error::{ClwError, ClwResult};
use crate::value::Value;

/// Mutable builder for a `PVector`. Holds a plain `Vec` while building, then
/// folds it back into the trie representation on `persistent!`.
pub struct TransientVector {
    items: Option<Vec<Value>>,
}

impl TransientVector {
    pub fn from_persistent(v: &PVector) -> Self {
        TransientVector {
            items: Some(v.iter().cloned().collect()),
        }
    }

    pub fn conj(&mut self, value: Value) -> ClwResult<()> {
        let items = self
            .items
            .as_mut()
            .ok_or_else(|| ClwError::State("transient used after persistent!".into()))?;
        items.push(value);
        Ok(())
    }

    pub fn assoc(&mut self, index: usize, value: Value) -> ClwResult<()> {
        let items = self
            .items
            .as_mut()
            .ok_or_else(|| ClwError::State("transient used after persistent!".into()))?;
        if index >= items.len() {
            return Err(ClwError::Index(format!("index {index} out of bounds for transient vector")));
        }
        items[index] = value;
        Ok(())
    }

    pub fn persistent(&mut self) -> ClwResult<PVector> {
        let items = self
            .items
            .take()
            .ok_or_else(|| ClwError::State("persistent! called twice on the same transient".into()))?;
        Ok(PVector::from_iter(items))
    }
}

/// Mutable builder for a `PMap`. Simply wraps a `PMap` and re-assocs in
/// place conceptually; the underlying structural sharing still applies per
/// step, but callers are guaranteed exclusive access while building.
pub struct TransientMap {
    map: Option<PMap>,
}

impl TransientMap {
    pub fn from_persistent(m: &PMap) -> Self {
        TransientMap { map: Some(m.clone()) }
    }

    pub fn assoc(&mut self, key: Value, value: Value) -> ClwResult<()> {
        let map = self
            .map
            .as_mut()
            .ok_or_else(|| ClwError::State("transient used after persistent!".into()))?;
        *map = map.assoc(key, value);
        Ok(())
    }

    pub fn dissoc(&mut self, key: &Value) -> ClwResult<()> {
        let map = self
            .map
            .as_mut()
            .ok_or_else(|| ClwError::State("transient used after persistent!".into()))?;
        *map = map.dissoc(key);
        Ok(())
    }

    pub fn persistent(&mut self) -> ClwResult<PMap> {
        self.map
            .take()
            .ok_or_else(|| ClwError::State("persistent! called twice on the same transient".into()))
    }
}

/// Mutable builder for a `PSet`.
pub struct TransientSet {
    set: Option<PSet>,
}

impl TransientSet {
    pub fn from_persistent(s: &PSet) -> Self {
        TransientSet { set: Some(s.clone()) }
    }

    pub fn conj(&mut self, value: Value) -> ClwResult<()> {
        let set = self
            .set
            .as_mut()
            .ok_or_else(|| ClwError::State("transient used after persistent!".into()))?;
        *set = set.conj(value);
        Ok(())
    }

    pub fn disj(&mut self, value: &Value) -> ClwResult<()> {
        let set = self
            .set
            .as_mut()
            .ok_or_else(|| ClwError::State("transient used after persistent!".into()))?;
        *set = set.disj(value);
        Ok(())
    }

    pub fn persistent(&mut self) -> ClwResult<PSet> {
        self.set
            .take()
            .ok_or_else(|| ClwError::State("persistent! called twice on the same transient".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_vector_builds_then_locks() {
        let mut t = TransientVector::from_persistent(&PVector::new());
        t.conj(Value::Int(1)).unwrap();
        t.conj(Value::Int(2)).unwrap();
        let v = t.persistent().unwrap();
        assert_eq!(v.len(), 2);
        assert!(t.conj(Value::Int(3)).is_err());
        assert!(t.persistent().is_err());
    }

    #[test]
    fn transient_map_assoc_and_lock() {
        let mut t = TransientMap::from_persistent(&PMap::new());
        t.assoc(Value::Int(1), Value::Int(10)).unwrap();
        let m = t.persistent().unwrap();
        assert_eq!(m.get(&Value::Int(1)), Some(&Value::Int(10)));
        assert!(t.assoc(Value::Int(2), Value::Int(20)).is_err());
    }
}
