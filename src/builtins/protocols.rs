//! `defprotocol`/`extend-type`/`defmulti`/`defmethod` (spec.md §4.A:
//! "Protocols & multimethods"). `analyzer/mod.rs`'s `SPECIAL_FORMS` list
//! has no case for any of these four, so real Clojure treats them as
//! ordinary macros that expand to definitional side effects; the compiled
//! `DefProtocolMethod`/`DefMethod`/`InvokePoly` opcodes in
//! `compiler/opcodes.rs` are declared but never emitted
//! (`vm/mod.rs`: "protocol/multimethod opcodes are not yet compiled to").
//!
//! Rather than emit code that performs the definition, these four macros
//! perform it directly during expansion — they already run on the
//! tree-walk engine with a live `&mut Env` — and hand back `(quote name)`
//! as their expansion, which the analyzer re-analyzes as an inert
//! self-evaluating form. `FnVal::ProtocolFn`/`FnVal::MultiMethod` are
//! immutable once allocated (`gc.rs` exposes no `get_mut`), so every
//! `extend-type`/`defmethod` clones the current table, appends its entry,
//! and rebinds the var to a freshly allocated value — the same
//! copy-on-write discipline the persistent collections use.

use crate::collections::PList;
use crate::dispatch::DispatchVTable;
use crate::env::Env;
use crate::error::ClwError;
use crate::fn_val::{Arity, FnVal, MultiMethod, ProtocolFn};
use crate::gc::HeapObj;
use crate::symbol::{intern_symbol, Sym};
use crate::value::Value;

use super::def_macro;

fn as_symbol(v: &Value, what: &str) -> Result<Sym, ClwError> {
    match v {
        Value::Symbol(s) => Ok(s.clone()),
        other => Err(ClwError::Type(format!("{what} expects a symbol, got {}", other.type_tag()))),
    }
}

fn method_signature(form: &Value) -> Option<(Sym, PList)> {
    let Value::List(l) = form else { return None };
    let Value::Symbol(name) = l.first()? else { return None };
    Some((name.clone(), l.rest()))
}

/// `(name [args...] body...)` -> `(fn* [args...] body...)`, the shape
/// `bootstrap::eval_form` needs to produce a callable closure value.
fn as_fn_form(rest: PList) -> Value {
    Value::List(rest.cons(Value::Symbol(intern_symbol(None, "fn*"))))
}

/// `extend-type`'s class symbol (`String`, `Integer`, ...) maps to the
/// `Value::type_tag()` string `FnVal::ProtocolFn` dispatch keys impls by
/// (`vm/mod.rs`'s `call_fn_val`: `intern_symbol(None, recv.type_tag())`).
/// Class names with no builtin-type equivalent (deftype/reify tags) pass
/// through unchanged.
fn class_name_to_type_tag(name: &str) -> &str {
    match name {
        "String" => "string",
        "Integer" | "Long" | "BigInteger" => "integer",
        "Double" | "Float" | "BigDecimal" => "float",
        "Boolean" => "boolean",
        "Character" => "char",
        "Keyword" => "keyword",
        "Symbol" => "symbol",
        "Vector" | "PersistentVector" => "vector",
        "Map" | "PersistentMap" | "PersistentArrayMap" | "PersistentHashMap" => "map",
        "Set" | "PersistentSet" | "PersistentHashSet" => "set",
        "List" | "PersistentList" | "Seq" | "ISeq" => "list",
        "Object" => "object",
        other => other,
    }
}

fn quote(sym: Sym) -> Value {
    Value::List(PList::from_vec(vec![Value::Symbol(intern_symbol(None, "quote")), Value::Symbol(sym)]))
}

pub fn install(env: &mut Env, vtable: &DispatchVTable) {
    let vt = vtable.clone();
    def_macro(env, "defprotocol", Arity::variadic(1), move |env, args| {
        let proto = as_symbol(&args[0], "defprotocol")?;
        for form in &args[1..] {
            let Some((method_name, rest)) = method_signature(form) else { continue };
            let arity = match rest.first() {
                Some(Value::Vector(v)) => Arity::exact(v.len()),
                _ => Arity::variadic(0),
            };
            let pf = ProtocolFn { protocol: proto.clone(), method_name: method_name.clone(), arity, impls: Vec::new() };
            let r = env.gc.alloc(HeapObj::Closure(FnVal::ProtocolFn(pf)));
            let core = env.find_or_create_ns("clojure.core");
            core.intern(core.name.clone(), method_name.name()).def_root(Value::Fn(r));
        }
        Ok(quote(proto))
    });

    let vt2 = vt.clone();
    def_macro(env, "extend-type", Arity::variadic(2), move |env, args| {
        let class_sym = as_symbol(&args[0], "extend-type")?;
        let type_sym = intern_symbol(None, class_name_to_type_tag(class_sym.name()));
        let _proto = as_symbol(&args[1], "extend-type")?;
        for form in &args[2..] {
            let Some((method_name, rest)) = method_signature(form) else { continue };
            let closure = crate::bootstrap::eval_form(env, &vt2, &as_fn_form(rest))?;
            let core = env.find_or_create_ns("clojure.core");
            let handle = core
                .resolve(method_name.name())
                .ok_or_else(|| ClwError::Resolve(format!("protocol method {} is not defined", method_name.name()), None))?;
            let current = handle.get()?;
            let Value::Fn(r) = &current else {
                return Err(ClwError::Internal("protocol method var does not hold a fn_val".into()));
            };
            let Some(HeapObj::Closure(FnVal::ProtocolFn(pf))) = env.gc.get(*r) else {
                return Err(ClwError::Internal("protocol method var does not hold a protocol_fn".into()));
            };
            let mut next = pf.clone();
            next.impls.retain(|(t, _)| *t != type_sym);
            next.impls.push((type_sym.clone(), closure));
            let new_ref = env.gc.alloc(HeapObj::Closure(FnVal::ProtocolFn(next)));
            handle.def_root(Value::Fn(new_ref));
        }
        Ok(quote(class_sym))
    });

    def_macro(env, "defmulti", Arity::exact(2), move |env, args| {
        let name = as_symbol(&args[0], "defmulti")?;
        let dispatch_fn = crate::bootstrap::eval_form(env, &vt, &args[1])?;
        let mm = MultiMethod { name: name.clone(), dispatch_fn: Some(Box::new(dispatch_fn)), methods: Vec::new(), default: None };
        let r = env.gc.alloc(HeapObj::Closure(FnVal::MultiMethod(mm)));
        let core = env.find_or_create_ns("clojure.core");
        core.intern(core.name.clone(), name.name()).def_root(Value::Fn(r));
        Ok(quote(name))
    });

    let vt3 = vtable.clone();
    def_macro(env, "defmethod", Arity::variadic(3), move |env, args| {
        let name = as_symbol(&args[0], "defmethod")?;
        let dispatch_val = crate::bootstrap::eval_form(env, &vt3, &args[1])?;
        let rest = match &args[2] {
            Value::Vector(_) => PList::from_vec(args[2..].to_vec()),
            _ => return Err(ClwError::Type("defmethod expects a parameter vector".into())),
        };
        let closure = crate::bootstrap::eval_form(env, &vt3, &as_fn_form(rest))?;
        let core = env.find_or_create_ns("clojure.core");
        let handle = core.resolve(name.name()).ok_or_else(|| ClwError::Resolve(format!("multimethod {} is not defined", name.name()), None))?;
        let current = handle.get()?;
        let Value::Fn(r) = &current else {
            return Err(ClwError::Internal("multimethod var does not hold a fn_val".into()));
        };
        let Some(HeapObj::Closure(FnVal::MultiMethod(m))) = env.gc.get(*r) else {
            return Err(ClwError::Internal("multimethod var does not hold a multimethod".into()));
        };
        let is_default = matches!(&dispatch_val, Value::Keyword(k) if k.name() == "default");
        let mut next = m.clone();
        if is_default {
            next.default = Some(Box::new(closure));
        } else {
            next.methods.retain(|(k, _)| *k != dispatch_val);
            next.methods.push((dispatch_val, closure));
        }
        let new_ref = env.gc.alloc(HeapObj::Closure(FnVal::MultiMethod(next)));
        handle.def_root(Value::Fn(new_ref));
        Ok(quote(name))
    });
}

