//! `clojure.core` builtins (spec.md §3.3, `builtin` fn_val variant): the
//! native surface both engines call through `FnVal::Builtin`. Everything
//! here is interned into the `clojure.core` namespace during
//! `bootstrap::init`; `user` then refers the whole namespace so ordinary
//! unqualified calls resolve.

mod arithmetic;
mod atoms;
mod collections;
mod exceptions;
mod io;
mod predicates;
mod protocols;

pub use collections::{force, seq_first_rest};
pub use exceptions::exception_isa;

use std::rc::Rc;

use crate::dispatch::DispatchVTable;
use crate::env::Env;
use crate::fn_val::{Arity, Builtin, FnVal};
use crate::gc::HeapObj;
use crate::symbol::Sym;
use crate::value::Value;

/// `core.rs`-wide shorthand: a builtin body closes over nothing but the
/// interpreter state it's handed each call.
pub(crate) type Native = Rc<dyn Fn(&mut Env, &[Value]) -> crate::error::ClwResult<Value>>;

/// Interns `clojure.core/{name}` bound to a native `Builtin` fn_val.
pub(crate) fn def_builtin(env: &mut Env, name: &str, arity: Arity, f: impl Fn(&mut Env, &[Value]) -> crate::error::ClwResult<Value> + 'static) {
    def_builtin_inner(env, name, arity, Rc::new(f), false);
}

/// Like `def_builtin`, but the resulting var is marked `is_macro` so the
/// analyzer expands it at analysis time instead of calling it at runtime
/// (spec.md §4.A: "expands macros by calling the macro's fn_val through the
/// dispatch vtable").
pub(crate) fn def_macro(env: &mut Env, name: &str, arity: Arity, f: impl Fn(&mut Env, &[Value]) -> crate::error::ClwResult<Value> + 'static) {
    def_builtin_inner(env, name, arity, Rc::new(f), true);
}

fn def_builtin_inner(env: &mut Env, name: &str, arity: Arity, func: Native, is_macro: bool) {
    let sym: Sym = crate::symbol::intern_symbol(None, name);
    let builtin = Builtin { name: sym, arity, func, captured: vec![] };
    let gcref = env.gc.alloc(HeapObj::Closure(FnVal::Builtin(builtin)));
    let core = env.find_or_create_ns("clojure.core");
    let handle = core.intern(core.name.clone(), name);
    handle.def_root(Value::Fn(gcref));
    if is_macro {
        handle.set_macro(true);
    }
}

/// Registers the whole builtin surface into `clojure.core`, then refers it
/// into `user` so unqualified symbols resolve without an explicit
/// `(require ...)` (spec.md §4.B: "user" is created with clojure.core
/// already referred).
pub fn install(env: &mut Env, vtable: &DispatchVTable) {
    arithmetic::install(env);
    predicates::install(env);
    collections::install(env, vtable);
    atoms::install(env, vtable);
    io::install(env);
    exceptions::install(env);
    protocols::install(env, vtable);

    let core = env.find_or_create_ns("clojure.core");
    let user = env.find_or_create_ns("user");
    for (name, var) in core.mappings() {
        user.refer(&name, var);
    }
}
