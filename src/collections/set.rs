//! Persistent set: backed by `PMap` with unit values (spec.md §3.2 — "Set:
//! map-backed"). Inherits the array/HAMT promotion behavior of `PMap`
//! directly, so a set's iteration order follows the same rule as a map's.

use crate::collections::map::PMap;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct PSet(PMap);

impl PSet {
    pub fn new() -> Self {
        PSet(PMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.0.contains_key(value)
    }

    pub fn conj(&self, value: Value) -> PSet {
        PSet(self.0.assoc(value, Value::Bool(true)))
    }

    pub fn disj(&self, value: &Value) -> PSet {
        PSet(self.0.dissoc(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn from_iter(items: impl IntoIterator<Item = Value>) -> Self {
        let mut s = PSet::new();
        for item in items {
            s = s.conj(item);
        }
        s
    }
}

impl PartialEq for PSet {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|v| other.contains(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conj_and_contains() {
        let s = PSet::from_iter([Value::Int(1), Value::Int(2), Value::Int(2)]);
        assert_eq!(s.len(), 2);
        assert!(s.contains(&Value::Int(1)));
        assert!(!s.contains(&Value::Int(3)));
    }

    #[test]
    fn disj_removes_member_without_disturbing_others() {
        let s = PSet::from_iter((0..20).map(Value::Int));
        let s2 = s.disj(&Value::Int(10));
        assert_eq!(s2.len(), 19);
        assert!(!s2.contains(&Value::Int(10)));
        assert!(s.contains(&Value::Int(10)));
        assert!(s2.contains(&Value::Int(9)));
    }
}
