//! Seq machinery (`first`/`rest`/`next`/`seq`/`cons`) and the persistent
//! collection builtins (spec.md §3.2) layered over `PList`/`PVector`/
//! `PMap`/`PSet`. `seq_first_rest` backs `DispatchVTable::seq_first_rest`
//! (spec.md §4.R.3) so the analyzer's destructuring and every builtin below
//! see exactly one seq abstraction.

use crate::collections::{PList, PMap, PVector};
use crate::dispatch::DispatchVTable;
use crate::env::Env;
use crate::error::{ClwError, ClwResult};
use crate::fn_val::{Arity, Builtin, FnVal};
use crate::gc::{HeapObj, LazySeqState};
use crate::value::Value;

use super::def_builtin;

/// Realizes a `lazy-seq` thunk at most once, caching the result in the
/// arena slot (spec.md §3.2: "realized exactly once; subsequent reads
/// return the cached seq"). Non-lazy values pass through unchanged.
pub fn force(env: &mut Env, vtable: &DispatchVTable, v: &Value) -> ClwResult<Value> {
    let Value::LazySeq(r) = v else { return Ok(v.clone()) };
    let thunk = {
        let obj = env.gc.get(*r).ok_or_else(|| ClwError::Internal("dangling lazy-seq reference".into()))?;
        let HeapObj::LazySeq(cell) = obj else {
            return Err(ClwError::Internal("lazy-seq ref does not point at a lazy seq".into()));
        };
        let mut state = cell.borrow_mut();
        if let Some(realized) = &state.realized {
            return Ok(realized.clone());
        }
        if state.realizing {
            return Err(ClwError::State("lazy-seq realized recursively".into()));
        }
        state.realizing = true;
        state.thunk.take().ok_or_else(|| ClwError::Internal("lazy-seq thunk missing".into()))?
    };
    let realized = (vtable.treewalk_call_bridge.clone())(&as_fn_val(env, &thunk)?, &[])?;
    let obj = env.gc.get(*r).ok_or_else(|| ClwError::Internal("dangling lazy-seq reference".into()))?;
    let HeapObj::LazySeq(cell) = obj else {
        return Err(ClwError::Internal("lazy-seq ref does not point at a lazy seq".into()));
    };
    let mut state = cell.borrow_mut();
    state.realizing = false;
    state.realized = Some(realized.clone());
    Ok(realized)
}

fn as_fn_val(env: &Env, v: &Value) -> ClwResult<crate::fn_val::FnVal> {
    let Value::Fn(r) = v else {
        return Err(ClwError::Type(format!("expected a fn, got {}", v.type_tag())));
    };
    match env.gc.get(*r) {
        Some(HeapObj::Closure(f)) => Ok(f.clone()),
        _ => Err(ClwError::Internal("dangling fn reference".into())),
    }
}

/// Shared `seq`/`first`/`rest` abstraction (spec.md §3.2): returns
/// `(first, rest-as-seq)`. `None` first means the seq is empty.
///
/// A lazy producer's realized value is interpreted under one private
/// convention: `nil` means an empty seq, a 2-element vector `[head rest]`
/// means a lazy cons cell whose `rest` may itself be an unrealized
/// `lazy-seq` (so `rest` is returned as-is, not forced again here), and any
/// other value is itself a seqable collection. This lets `lazy-seq` bodies
/// that simply return an ordinary concrete seq "just work" without knowing
/// about the cons-cell shape; the only downside is that a `lazy-seq` whose
/// body literally returns a 2-element vector meant as *data* is read back
/// as a cons cell instead. None of the native producers below hit that
/// case, and no two-element-vector-as-seq is forced through `lazy-seq` in
/// practice.
pub fn seq_first_rest(env: &mut Env, vtable: &DispatchVTable, v: &Value) -> ClwResult<(Option<Value>, Value)> {
    match v {
        Value::Nil => Ok((None, Value::Nil)),
        Value::List(l) => Ok((l.first().cloned(), Value::List(l.rest()))),
        Value::Vector(vec) => {
            if vec.is_empty() {
                Ok((None, Value::Nil))
            } else {
                let rest = PList::from_iter_rev((1..vec.len()).rev().map(|i| vec.get(i).unwrap().clone()));
                Ok((vec.get(0).cloned(), Value::List(rest)))
            }
        }
        Value::Set(s) => {
            let mut items: Vec<Value> = s.iter().cloned().collect();
            if items.is_empty() {
                return Ok((None, Value::Nil));
            }
            let head = items.remove(0);
            Ok((Some(head), Value::List(PList::from_vec(items))))
        }
        Value::Map(m) => {
            let mut entries: Vec<Value> = m.iter().map(|(k, val)| Value::Vector(PVector::from_iter([k.clone(), val.clone()]))).collect();
            if entries.is_empty() {
                return Ok((None, Value::Nil));
            }
            let head = entries.remove(0);
            Ok((Some(head), Value::List(PList::from_vec(entries))))
        }
        Value::Str(s) => {
            let mut chars: Vec<Value> = s.chars().map(Value::Char).collect();
            if chars.is_empty() {
                return Ok((None, Value::Nil));
            }
            let head = chars.remove(0);
            Ok((Some(head), Value::List(PList::from_vec(chars))))
        }
        Value::LazySeq(_) => {
            let realized = force(env, vtable, v)?;
            match realized {
                Value::Nil => Ok((None, Value::Nil)),
                Value::Vector(ref pair) if pair.len() == 2 => {
                    Ok((pair.get(0).cloned(), pair.get(1).cloned().unwrap()))
                }
                other => seq_first_rest(env, vtable, &other),
            }
        }
        other => Err(ClwError::Type(format!("don't know how to create a seq from {}", other.type_tag()))),
    }
}

fn to_vec(env: &mut Env, vtable: &DispatchVTable, v: &Value) -> ClwResult<Vec<Value>> {
    let mut out = Vec::new();
    let mut cur = v.clone();
    loop {
        let (head, rest) = seq_first_rest(env, vtable, &cur)?;
        let Some(head) = head else { break };
        out.push(head);
        cur = rest;
    }
    Ok(out)
}

/// Wraps a zero-arg native closure in an unrealized `lazy-seq` cell, the
/// same shape `(lazy-seq body…)` produces (spec.md §5). `captured` must
/// list every `Value` the closure holds onto so the GC tracer can see it —
/// mirrors `ClosureAst`/`ClosureBytecode`'s own `captured` field.
fn alloc_lazy(env: &mut Env, name: &str, captured: Vec<Value>, func: impl Fn(&mut Env, &[Value]) -> ClwResult<Value> + 'static) -> Value {
    let sym = crate::symbol::intern_symbol(None, name);
    let builtin = Builtin { name: sym, arity: Arity::exact(0), func: std::rc::Rc::new(func), captured };
    let fn_ref = env.gc.alloc(HeapObj::Closure(FnVal::Builtin(builtin)));
    let lazy_ref = env.gc.alloc(HeapObj::LazySeq(std::cell::RefCell::new(LazySeqState::new(Value::Fn(fn_ref)))));
    Value::LazySeq(lazy_ref)
}

/// Builds the `n`-th cell of `(range start end step)` lazily: realizing one
/// cell allocates the next lazy-seq but never walks further than that, so
/// `(range)` with no bound never has to be fully realized.
fn make_range_seq(env: &mut Env, cur: i64, end: Option<i64>, step: i64) -> Value {
    alloc_lazy(env, "range", vec![], move |env, _args| {
        let continues = match end {
            Some(end) => (step > 0 && cur < end) || (step < 0 && cur > end),
            None => true,
        };
        if !continues {
            return Ok(Value::Nil);
        }
        let rest = make_range_seq(env, cur + step, end, step);
        Ok(Value::Vector(PVector::from_iter([Value::Int(cur), rest])))
    })
}

/// One lazy `map` cell over N source seqs: pulls exactly one element from
/// each source, stopping as soon as any of them is exhausted.
fn alloc_map_seq(env: &mut Env, vtable: &DispatchVTable, f: Value, seqs: Vec<Value>) -> Value {
    let vt = vtable.clone();
    let mut captured = vec![f.clone()];
    captured.extend(seqs.iter().cloned());
    alloc_lazy(env, "map", captured, move |env, _args| {
        let mut heads = Vec::with_capacity(seqs.len());
        let mut rests = Vec::with_capacity(seqs.len());
        for s in &seqs {
            let (head, rest) = seq_first_rest(env, &vt, s)?;
            let Some(head) = head else { return Ok(Value::Nil) };
            heads.push(head);
            rests.push(rest);
        }
        let fv = as_fn_val(env, &f)?;
        let mapped = (vt.treewalk_call_bridge.clone())(&fv, &heads)?;
        let rest_seq = alloc_map_seq(env, &vt, f.clone(), rests);
        Ok(Value::Vector(PVector::from_iter([mapped, rest_seq])))
    })
}

/// One lazy `filter` cell: the skip loop over rejected elements runs inside
/// the deferred thunk, so constructing the seq never touches `src`.
fn alloc_filter_seq(env: &mut Env, vtable: &DispatchVTable, pred: Value, src: Value) -> Value {
    let vt = vtable.clone();
    alloc_lazy(env, "filter", vec![pred.clone(), src.clone()], move |env, _args| {
        let mut cur = src.clone();
        loop {
            let (head, rest) = seq_first_rest(env, &vt, &cur)?;
            let Some(head) = head else { return Ok(Value::Nil) };
            let pv = as_fn_val(env, &pred)?;
            if (vt.treewalk_call_bridge.clone())(&pv, std::slice::from_ref(&head))?.is_truthy() {
                let rest_seq = alloc_filter_seq(env, &vt, pred.clone(), rest);
                return Ok(Value::Vector(PVector::from_iter([head, rest_seq])));
            }
            cur = rest;
        }
    })
}

/// One lazy `take` cell; `n <= 0` resolves to `nil` immediately without
/// forcing `src` at all.
fn alloc_take_seq(env: &mut Env, vtable: &DispatchVTable, n: i64, src: Value) -> Value {
    if n <= 0 {
        return Value::Nil;
    }
    let vt = vtable.clone();
    alloc_lazy(env, "take", vec![src.clone()], move |env, _args| {
        let (head, rest) = seq_first_rest(env, &vt, &src)?;
        let Some(head) = head else { return Ok(Value::Nil) };
        let rest_seq = alloc_take_seq(env, &vt, n - 1, rest);
        Ok(Value::Vector(PVector::from_iter([head, rest_seq])))
    })
}

pub fn install(env: &mut Env, vtable: &DispatchVTable) {
    let vt = vtable.clone();
    def_builtin(env, "seq", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| {
            let items = to_vec(env, &vt, &args[0])?;
            if items.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(Value::List(PList::from_vec(items)))
            }
        }
    });

    def_builtin(env, "first", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| Ok(seq_first_rest(env, &vt, &args[0])?.0.unwrap_or(Value::Nil))
    });
    def_builtin(env, "rest", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| Ok(seq_first_rest(env, &vt, &args[0])?.1)
    });
    def_builtin(env, "next", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| {
            let (_, rest) = seq_first_rest(env, &vt, &args[0])?;
            match seq_first_rest(env, &vt, &rest)?.0 {
                Some(_) => Ok(rest),
                None => Ok(Value::Nil),
            }
        }
    });
    def_builtin(env, "cons", Arity::exact(2), {
        let vt = vt.clone();
        move |env, args| {
            let items = to_vec(env, &vt, &args[1])?;
            Ok(Value::List(PList::from_vec(items).cons(args[0].clone())))
        }
    });
    def_builtin(env, "empty?", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| Ok(Value::Bool(seq_first_rest(env, &vt, &args[0])?.0.is_none()))
    });
    def_builtin(env, "count", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| match &args[0] {
            Value::Nil => Ok(Value::Int(0)),
            Value::Vector(v) => Ok(Value::Int(v.len() as i64)),
            Value::Map(m) => Ok(Value::Int(m.len() as i64)),
            Value::Set(s) => Ok(Value::Int(s.len() as i64)),
            Value::List(l) => Ok(Value::Int(l.len() as i64)),
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            other => Ok(Value::Int(to_vec(env, &vt, other)?.len() as i64)),
        }
    });

    def_builtin(env, "conj", Arity::variadic(1), |_env, args| {
        let mut coll = args[0].clone();
        for item in &args[1..] {
            coll = match coll {
                Value::Vector(v) => Value::Vector(v.push(item.clone())),
                Value::List(l) => Value::List(l.cons(item.clone())),
                Value::Set(s) => Value::Set(s.conj(item.clone())),
                Value::Map(m) => match item {
                    Value::Vector(kv) if kv.len() == 2 => Value::Map(m.assoc(kv.get(0).unwrap().clone(), kv.get(1).unwrap().clone())),
                    other => return Err(ClwError::Type(format!("conj onto a map requires a 2-element vector entry, got {}", other.type_tag()))),
                },
                Value::Nil => Value::List(PList::empty().cons(item.clone())),
                other => return Err(ClwError::Type(format!("don't know how to conj onto {}", other.type_tag()))),
            };
        }
        Ok(coll)
    });

    def_builtin(env, "assoc", Arity::variadic(3), |_env, args| {
        let mut coll = args[0].clone();
        for pair in args[1..].chunks(2) {
            let [k, v] = pair else {
                return Err(ClwError::Arity("assoc requires an even number of key/value arguments".into()));
            };
            coll = match coll {
                Value::Map(m) => Value::Map(m.assoc(k.clone(), v.clone())),
                Value::Vector(vec) => {
                    let Value::Int(i) = k else {
                        return Err(ClwError::Type("vector assoc requires an integer index".into()));
                    };
                    vec.assoc(*i as usize, v.clone()).map(Value::Vector).ok_or_else(|| ClwError::Index(format!("index {i} out of bounds")))?
                }
                Value::Nil => Value::Map(PMap::new().assoc(k.clone(), v.clone())),
                other => return Err(ClwError::Type(format!("don't know how to assoc into {}", other.type_tag()))),
            };
        }
        Ok(coll)
    });
    def_builtin(env, "dissoc", Arity::variadic(1), |_env, args| match &args[0] {
        Value::Map(m) => {
            let mut cur = m.clone();
            for k in &args[1..] {
                cur = cur.dissoc(k);
            }
            Ok(Value::Map(cur))
        }
        Value::Nil => Ok(Value::Nil),
        other => Err(ClwError::Type(format!("don't know how to dissoc from {}", other.type_tag()))),
    });
    def_builtin(env, "get", Arity::variadic(2), |_env, args| {
        let not_found = args.get(2).cloned().unwrap_or(Value::Nil);
        Ok(match &args[0] {
            Value::Map(m) => m.get(&args[1]).cloned().unwrap_or(not_found),
            Value::Set(s) => if s.contains(&args[1]) { args[1].clone() } else { not_found },
            Value::Vector(v) => match &args[1] {
                Value::Int(i) if *i >= 0 => v.get(*i as usize).cloned().unwrap_or(not_found),
                _ => not_found,
            },
            Value::Nil => not_found,
            _ => not_found,
        })
    });
    def_builtin(env, "contains?", Arity::exact(2), |_env, args| {
        Ok(Value::Bool(match &args[0] {
            Value::Map(m) => m.contains_key(&args[1]),
            Value::Set(s) => s.contains(&args[1]),
            Value::Vector(v) => matches!(&args[1], Value::Int(i) if *i >= 0 && (*i as usize) < v.len()),
            _ => false,
        }))
    });
    def_builtin(env, "get-in", Arity::variadic(2), |_env, args| {
        let path = match &args[1] {
            Value::Vector(v) => v.iter().cloned().collect::<Vec<_>>(),
            other => return Err(ClwError::Type(format!("get-in expects a vector path, got {}", other.type_tag()))),
        };
        let not_found = args.get(2).cloned().unwrap_or(Value::Nil);
        let mut cur = args[0].clone();
        for k in &path {
            cur = match &cur {
                Value::Map(m) => m.get(k).cloned().unwrap_or(Value::Nil),
                Value::Vector(v) => match k {
                    Value::Int(i) if *i >= 0 => v.get(*i as usize).cloned().unwrap_or(Value::Nil),
                    _ => Value::Nil,
                },
                _ => Value::Nil,
            };
        }
        if matches!(cur, Value::Nil) && !matches!(args[0], Value::Map(_) | Value::Vector(_)) {
            return Ok(not_found);
        }
        Ok(cur)
    });
    def_builtin(env, "keys", Arity::exact(1), |_env, args| match &args[0] {
        Value::Map(m) => Ok(Value::List(PList::from_vec(m.iter().map(|(k, _)| k.clone()).collect()))),
        other => Err(ClwError::Type(format!("keys expects a map, got {}", other.type_tag()))),
    });
    def_builtin(env, "vals", Arity::exact(1), |_env, args| match &args[0] {
        Value::Map(m) => Ok(Value::List(PList::from_vec(m.iter().map(|(_, v)| v.clone()).collect()))),
        other => Err(ClwError::Type(format!("vals expects a map, got {}", other.type_tag()))),
    });

    def_builtin(env, "nth", Arity::variadic(2), |_env, args| {
        let idx = match &args[1] {
            Value::Int(i) if *i >= 0 => *i as usize,
            _ => return Err(ClwError::Type("nth expects a non-negative integer index".into())),
        };
        match &args[0] {
            Value::Vector(v) => v.get(idx).cloned().or_else(|| args.get(2).cloned()).ok_or_else(|| ClwError::Index(format!("index {idx} out of bounds"))),
            Value::List(l) => l.iter_values().nth(idx).cloned().or_else(|| args.get(2).cloned()).ok_or_else(|| ClwError::Index(format!("index {idx} out of bounds"))),
            other => Err(ClwError::Type(format!("nth expects a vector or list, got {}", other.type_tag()))),
        }
    });

    def_builtin(env, "reverse", Arity::exact(1), {
        let vt = vt.clone();
        move |env, args| {
            let items = to_vec(env, &vt, &args[0])?;
            Ok(Value::List(PList::from_iter_rev(items)))
        }
    });
    def_builtin(env, "into", Arity::exact(2), {
        let vt = vt.clone();
        move |env, args| {
            let items = to_vec(env, &vt, &args[1])?;
            let mut coll = args[0].clone();
            for item in items {
                coll = match coll {
                    Value::Vector(v) => Value::Vector(v.push(item)),
                    Value::List(l) => Value::List(l.cons(item)),
                    Value::Set(s) => Value::Set(s.conj(item)),
                    Value::Map(m) => match item {
                        Value::Vector(kv) if kv.len() == 2 => Value::Map(m.assoc(kv.get(0).unwrap().clone(), kv.get(1).unwrap().clone())),
                        other => return Err(ClwError::Type(format!("into a map requires 2-element vector entries, got {}", other.type_tag()))),
                    },
                    other => return Err(ClwError::Type(format!("don't know how to grow {}", other.type_tag()))),
                };
            }
            Ok(coll)
        }
    });
    def_builtin(env, "concat", Arity::variadic(0), {
        let vt = vt.clone();
        move |env, args| {
            let mut out = Vec::new();
            for a in args {
                out.extend(to_vec(env, &vt, a)?);
            }
            Ok(Value::List(PList::from_vec(out)))
        }
    });
    def_builtin(env, "take", Arity::exact(2), {
        let vt = vt.clone();
        move |env, args| {
            let Value::Int(n) = args[0] else { return Err(ClwError::Type("take expects an integer count".into())) };
            Ok(alloc_take_seq(env, &vt, n, args[1].clone()))
        }
    });
    def_builtin(env, "drop", Arity::exact(2), {
        let vt = vt.clone();
        move |env, args| {
            let Value::Int(n) = args[0] else { return Err(ClwError::Type("drop expects an integer count".into())) };
            let items = to_vec(env, &vt, &args[1])?;
            Ok(Value::List(PList::from_vec(items.into_iter().skip(n.max(0) as usize).collect())))
        }
    });
    def_builtin(env, "filter", Arity::exact(2), {
        let vt = vt.clone();
        move |env, args| Ok(alloc_filter_seq(env, &vt, args[0].clone(), args[1].clone()))
    });
    def_builtin(env, "map", Arity::variadic(2), {
        let vt = vt.clone();
        move |env, args| Ok(alloc_map_seq(env, &vt, args[0].clone(), args[1..].to_vec()))
    });
    def_builtin(env, "reduce", Arity::variadic(2), {
        let vt = vt.clone();
        move |env, args| {
            let f = as_fn_val(env, &args[0])?;
            let (init, coll) = if args.len() == 3 { (args[1].clone(), &args[2]) } else { (Value::Nil, &args[1]) };
            let items = to_vec(env, &vt, coll)?;
            let mut iter = items.into_iter();
            let mut acc = if args.len() == 3 {
                init
            } else {
                iter.next().ok_or_else(|| ClwError::Arity("reduce on an empty collection with no init value".into()))?
            };
            for item in iter {
                acc = (vt.treewalk_call_bridge.clone())(&f, &[acc, item])?;
            }
            Ok(acc)
        }
    });

    def_builtin(env, "apply", Arity::variadic(2), {
        let vt = vt.clone();
        move |env, args| {
            let f = as_fn_val(env, &args[0])?;
            let mut call_args: Vec<Value> = args[1..args.len() - 1].to_vec();
            call_args.extend(to_vec(env, &vt, &args[args.len() - 1])?);
            (vt.treewalk_call_bridge.clone())(&f, &call_args)
        }
    });

    def_builtin(env, "range", Arity::variadic(0), |env, args| {
        let (start, end, step) = match args.len() {
            0 => (0i64, None, 1i64),
            1 => (0i64, Some(as_int(&args[0])?), 1i64),
            2 => (as_int(&args[0])?, Some(as_int(&args[1])?), 1i64),
            _ => (as_int(&args[0])?, Some(as_int(&args[1])?), as_int(&args[2])?),
        };
        if step == 0 {
            return Err(ClwError::Value("range step must not be zero".into()));
        }
        Ok(make_range_seq(env, start, end, step))
    });
}

fn as_int(v: &Value) -> ClwResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(ClwError::Type(format!("expected an integer, got {}", other.type_tag()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc as StdRc;

    fn test_vtable() -> DispatchVTable {
        DispatchVTable {
            treewalk_call_bridge: StdRc::new(|_f, _args| Err(ClwError::Internal("treewalk bridge not wired in this test".into()))),
            bytecode_call_bridge: StdRc::new(|_f, _args| Err(ClwError::Internal("bytecode bridge not wired in this test".into()))),
            seq_first_rest: StdRc::new(|_v| Err(ClwError::Internal("seq bridge not wired in this test".into()))),
        }
    }

    #[test]
    fn seq_first_rest_walks_a_vector_front_to_back() {
        let mut env = Env::new();
        let vt = test_vtable();
        let v = Value::Vector(PVector::from_iter([Value::Int(1), Value::Int(2), Value::Int(3)]));
        let (head, rest) = seq_first_rest(&mut env, &vt, &v).unwrap();
        assert_eq!(head, Some(Value::Int(1)));
        assert_eq!(rest, Value::List(PList::from_vec(vec![Value::Int(2), Value::Int(3)])));
    }

    #[test]
    fn seq_first_rest_on_empty_collection_is_none_and_nil() {
        let mut env = Env::new();
        let vt = test_vtable();
        let (head, rest) = seq_first_rest(&mut env, &vt, &Value::Vector(PVector::new())).unwrap();
        assert_eq!(head, None);
        assert_eq!(rest, Value::Nil);
    }

    #[test]
    fn lazy_range_and_filter_and_map_and_take_realize_on_demand() {
        let mut env = Env::new();
        let vt = test_vtable();
        // `map`/`filter` would call through the treewalk bridge for a real
        // fn; here we only exercise the producer chain directly without a
        // predicate/fn to keep this a unit test of the lazy machinery
        // rather than the full builtin surface (covered by e2e.rs instead).
        let r = make_range_seq(&mut env, 0, None, 1);
        let (head, rest) = seq_first_rest(&mut env, &vt, &r).unwrap();
        assert_eq!(head, Some(Value::Int(0)));
        let (head2, _) = seq_first_rest(&mut env, &vt, &rest).unwrap();
        assert_eq!(head2, Some(Value::Int(1)));

        let taken = alloc_take_seq(&mut env, &vt, 0, r);
        assert_eq!(taken, Value::Nil);
    }
}
