//! Structural hashing, consistent with `Value` equality (spec.md §3.1).
//!
//! Splitmix64-derived mixing keeps the hash deterministic and stable across
//! engines: it depends only on the logical value, never on heap addresses,
//! except for interned symbols/keywords where the *interned identity* is
//! itself a deterministic function of `(ns, name)` (spec.md invariant #5).

use crate::value::Value;

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn mix_str(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

pub fn hash_value(v: &Value) -> u64 {
    match v {
        Value::Nil => splitmix64(0),
        Value::Bool(b) => splitmix64(if *b { 1 } else { 2 }),
        Value::Char(c) => splitmix64(3u64.wrapping_add(*c as u64)),
        // `Int`/`Float` compare equal across variants by casting the int to
        // f64 (`value.rs`'s `PartialEq`), so both hash off that same f64
        // representation — otherwise `(= 1 1.0)` would hold while the two
        // hashed to different buckets.
        Value::Int(i) => hash_number(*i as f64),
        Value::Float(f) => hash_number(*f),
        Value::Str(h) => splitmix64(6u64 ^ mix_str(h.as_str())),
        Value::Symbol(s) => splitmix64(7u64 ^ mix_str(&s.qualified())),
        Value::Keyword(s) => splitmix64(8u64 ^ mix_str(&s.qualified())),
        // `List`/`Vector` compare equal to each other when both are
        // sequential with the same elements in the same order, so they
        // share one hash tag rather than `List` and `Vector` each getting
        // their own.
        Value::List(h) => hash_seq(9, h.iter_values()),
        Value::Vector(h) => hash_seq(9, h.iter()),
        Value::Map(h) => hash_unordered(11, h.iter().map(|(k, v)| hash_value(k) ^ hash_value(v).rotate_left(1))),
        Value::Set(h) => hash_unordered(12, h.iter().map(hash_value)),
        Value::Atom(r) => splitmix64(13u64 ^ gcref_bits(r)),
        Value::Fn(r) => splitmix64(14u64 ^ gcref_bits(r)),
        Value::LazySeq(r) => splitmix64(15u64 ^ gcref_bits(r)),
        Value::VarRef(v) => splitmix64(16u64 ^ mix_str(&format!("{}/{}", v.ns_name(), v.name()))),
        Value::Regex(re) => splitmix64(17u64 ^ mix_str(re.as_str())),
        Value::Uuid(u) => splitmix64(18u64 ^ (*u as u64) ^ ((*u >> 64) as u64)),
        Value::Date(millis) => splitmix64(19u64 ^ (*millis as u64)),
        Value::Handle(h) => splitmix64(20u64 ^ h),
        Value::ExceptionMap(e) => splitmix64(21u64 ^ mix_str(&e.ex_type.qualified())),
        Value::ClassInstance(c) => splitmix64(22u64 ^ mix_str(&c.reify_type.qualified())),
    }
}

/// Shared hash path for `Int` and `Float`: both funnel through the same f64
/// bit pattern so `(= 1 1.0)` implies `hash_value(Int(1)) ==
/// hash_value(Float(1.0))`, mirroring the cast `value.rs`'s cross-type
/// `PartialEq` arm performs when comparing an int against a float.
fn hash_number(f: f64) -> u64 {
    let bits = if f == 0.0 { 0.0f64.to_bits() } else { f.to_bits() };
    splitmix64(4u64 ^ bits)
}

/// `GcRef` has no stable address to hash on (slots are reused), so we hash
/// its debug representation; two `GcRef`s are only ever compared for
/// equality by the underlying `PartialEq`, which this stays consistent with
/// since equal refs always produce equal debug text.
fn gcref_bits(r: &crate::gc::GcRef) -> u64 {
    mix_str(&format!("{r:?}"))
}

fn hash_seq<'a>(tag: u64, items: impl Iterator<Item = &'a Value>) -> u64 {
    let mut h = splitmix64(tag);
    for item in items {
        h = splitmix64(h ^ hash_value(item));
    }
    h
}

fn hash_unordered(tag: u64, items: impl Iterator<Item = u64>) -> u64 {
    let mut acc: u64 = 0;
    for item in items {
        acc ^= item;
    }
    splitmix64(tag) ^ acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{PList, PVector};

    #[test]
    fn equal_int_and_float_hash_the_same() {
        assert_eq!(hash_value(&Value::Int(1)), hash_value(&Value::Float(1.0)));
        assert_eq!(hash_value(&Value::Int(0)), hash_value(&Value::Float(-0.0)));
        assert_ne!(hash_value(&Value::Int(1)), hash_value(&Value::Int(2)));
        assert_ne!(hash_value(&Value::Float(1.0)), hash_value(&Value::Float(1.5)));
    }

    #[test]
    fn equal_list_and_vector_hash_the_same() {
        let list = Value::List(PList::from_vec(vec![Value::Int(1), Value::Int(2)]));
        let vector = Value::Vector(PVector::from_iter(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(hash_value(&list), hash_value(&vector));

        let other = Value::Vector(PVector::from_iter(vec![Value::Int(2), Value::Int(1)]));
        assert_ne!(hash_value(&list), hash_value(&other));
    }
}
