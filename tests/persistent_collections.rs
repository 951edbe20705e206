//! Structural sharing and value semantics of the persistent collection
//! types (spec.md §3.2): a mutation-shaped operation returns a new
//! collection and never disturbs the original.

use clojurewasm::collections::{PList, PMap, PSet, PVector};
use clojurewasm::symbol::intern_keyword;
use clojurewasm::value::Value;

fn v(i: i64) -> Value {
    Value::Int(i)
}

fn kw(name: &str) -> Value {
    Value::Keyword(intern_keyword(None, name))
}

#[test]
fn vector_push_leaves_original_untouched() {
    let base = PVector::from_iter((0..5).map(v));
    let extended = base.push(v(5));
    assert_eq!(base.len(), 5);
    assert_eq!(extended.len(), 6);
    assert_eq!(base.get(4), Some(&v(4)));
    assert_eq!(extended.get(5), Some(&v(5)));
}

#[test]
fn vector_assoc_is_structural_not_destructive() {
    let base = PVector::from_iter((0..10).map(v));
    let updated = base.assoc(3, v(999)).unwrap();
    assert_eq!(base.get(3), Some(&v(3)));
    assert_eq!(updated.get(3), Some(&v(999)));
    for i in [0, 1, 2, 4, 5, 9] {
        assert_eq!(base.get(i), updated.get(i));
    }
}

#[test]
fn vector_assoc_out_of_bounds_is_none_except_tail_append() {
    let base = PVector::from_iter((0..3).map(v));
    assert!(base.assoc(10, v(0)).is_none());
    // assoc at exactly len() is a valid append, matching Clojure's vector assoc.
    assert!(base.assoc(3, v(3)).is_some());
}

#[test]
fn vector_pop_removes_the_last_element() {
    let base = PVector::from_iter((0..4).map(v));
    let popped = base.pop().unwrap();
    assert_eq!(popped.len(), 3);
    assert_eq!(popped.get(2), Some(&v(2)));
    assert_eq!(base.len(), 4);
}

#[test]
fn vector_equality_is_by_value_not_identity() {
    let a = PVector::from_iter((0..100).map(v));
    let b = PVector::from_iter((0..100).map(v));
    assert_eq!(Value::Vector(a), Value::Vector(b));
}

#[test]
fn list_cons_and_rest_preserve_the_tail() {
    let base = PList::from_vec(vec![v(2), v(3), v(4)]);
    let consed = base.cons(v(1));
    assert_eq!(consed.first(), Some(&v(1)));
    assert_eq!(consed.rest().len(), 3);
    assert_eq!(base.len(), 3);
    assert_eq!(base.first(), Some(&v(2)));
}

#[test]
fn list_from_iter_rev_builds_in_declared_order() {
    let built = PList::from_iter_rev(vec![v(3), v(2), v(1)]);
    let collected: Vec<Value> = built.iter_values().cloned().collect();
    assert_eq!(collected, vec![v(1), v(2), v(3)]);
}

#[test]
fn map_assoc_does_not_mutate_the_original() {
    let base = PMap::new().assoc(kw("a"), v(1));
    let updated = base.assoc(kw("b"), v(2));
    assert!(base.get(&kw("b")).is_none());
    assert_eq!(updated.get(&kw("a")), Some(&v(1)));
    assert_eq!(updated.get(&kw("b")), Some(&v(2)));
}

#[test]
fn map_dissoc_removes_only_the_named_key() {
    let base = PMap::new()
        .assoc(kw("a"), v(1))
        .assoc(kw("b"), v(2));
    let removed = base.dissoc(&kw("a"));
    assert!(!removed.contains_key(&kw("a")));
    assert!(removed.contains_key(&kw("b")));
    assert!(base.contains_key(&kw("a")));
}

#[test]
fn map_reassoc_on_existing_key_replaces_the_value() {
    let base = PMap::new().assoc(kw("a"), v(1));
    let updated = base.assoc(kw("a"), v(2));
    assert_eq!(base.get(&kw("a")), Some(&v(1)));
    assert_eq!(updated.get(&kw("a")), Some(&v(2)));
}

#[test]
fn map_survives_many_insertions_with_correct_lookups() {
    let mut m = PMap::new();
    for i in 0..200 {
        m = m.assoc(v(i), v(i * 2));
    }
    for i in 0..200 {
        assert_eq!(m.get(&v(i)), Some(&v(i * 2)));
    }
    assert_eq!(m.len(), 200);
}

#[test]
fn set_conj_and_disj_round_trip() {
    let base = PSet::from_iter((0..5).map(v));
    let extended = base.conj(v(10));
    assert!(extended.contains(&v(10)));
    assert!(!base.contains(&v(10)));

    let shrunk = extended.disj(&v(10));
    assert!(!shrunk.contains(&v(10)));
    assert_eq!(shrunk.len(), base.len());
}

#[test]
fn set_conj_of_existing_member_does_not_grow() {
    let base = PSet::from_iter((0..5).map(v));
    let reconj = base.conj(v(2));
    assert_eq!(reconj.len(), base.len());
}

#[test]
fn collections_support_equal_but_independent_clones() {
    let a = PMap::new().assoc(kw("x"), v(1));
    let b = a.clone().assoc(kw("y"), v(2));
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 2);
    assert_eq!(Value::Map(a.clone()), Value::Map(a));
}
