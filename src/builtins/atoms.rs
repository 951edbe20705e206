//! Mutable reference cells (spec.md §3.1 `atom` variant): the one place the
//! value model allows in-place mutation, guarded by the GC arena the same
//! way closures and lazy seqs are (`gc.rs` module docs).

use crate::dispatch::DispatchVTable;
use crate::env::Env;
use crate::error::ClwError;
use crate::fn_val::Arity;
use crate::gc::HeapObj;
use crate::value::Value;

use super::def_builtin;

pub fn install(env: &mut Env, vtable: &DispatchVTable) {
    def_builtin(env, "atom", Arity::exact(1), |env, args| {
        let r = env.gc.alloc(HeapObj::Atom(std::cell::RefCell::new(args[0].clone())));
        Ok(Value::Atom(r))
    });
    def_builtin(env, "deref", Arity::exact(1), |env, args| match &args[0] {
        Value::Atom(r) => match env.gc.get(*r) {
            Some(HeapObj::Atom(cell)) => Ok(cell.borrow().clone()),
            _ => Err(ClwError::Internal("dangling atom reference".into())),
        },
        Value::VarRef(v) => v.get(),
        other => Err(ClwError::Type(format!("deref expects an atom or var, got {}", other.type_tag()))),
    });
    def_builtin(env, "reset!", Arity::exact(2), |env, args| match &args[0] {
        Value::Atom(r) => match env.gc.get(*r) {
            Some(HeapObj::Atom(cell)) => {
                *cell.borrow_mut() = args[1].clone();
                Ok(args[1].clone())
            }
            _ => Err(ClwError::Internal("dangling atom reference".into())),
        },
        other => Err(ClwError::Type(format!("reset! expects an atom, got {}", other.type_tag()))),
    });

    let vt = vtable.clone();
    def_builtin(env, "swap!", Arity::variadic(2), move |env, args| {
        let Value::Atom(r) = &args[0] else {
            return Err(ClwError::Type(format!("swap! expects an atom, got {}", args[0].type_tag())));
        };
        let current = match env.gc.get(*r) {
            Some(HeapObj::Atom(cell)) => cell.borrow().clone(),
            _ => return Err(ClwError::Internal("dangling atom reference".into())),
        };
        let f = match &args[1] {
            Value::Fn(fr) => match env.gc.get(*fr) {
                Some(HeapObj::Closure(f)) => f.clone(),
                _ => return Err(ClwError::Internal("dangling fn reference".into())),
            },
            other => return Err(ClwError::Type(format!("swap! expects a fn, got {}", other.type_tag()))),
        };
        let mut call_args = vec![current];
        call_args.extend(args[2..].iter().cloned());
        let next = (vt.treewalk_call_bridge.clone())(&f, &call_args)?;
        match env.gc.get(*r) {
            Some(HeapObj::Atom(cell)) => *cell.borrow_mut() = next.clone(),
            _ => return Err(ClwError::Internal("dangling atom reference".into())),
        }
        Ok(next)
    });
}
