//! Type and truthiness predicates over the closed `Value` tag set
//! (spec.md §3.1).

use crate::env::Env;
use crate::fn_val::Arity;
use crate::value::Value;

use super::def_builtin;

fn tag(env: &mut Env, name: &str, test: fn(&Value) -> bool) {
    def_builtin(env, name, Arity::exact(1), move |_env, args| Ok(Value::Bool(test(&args[0]))));
}

pub fn install(env: &mut Env) {
    tag(env, "nil?", |v| matches!(v, Value::Nil));
    tag(env, "true?", |v| matches!(v, Value::Bool(true)));
    tag(env, "false?", |v| matches!(v, Value::Bool(false)));
    tag(env, "boolean?", |v| matches!(v, Value::Bool(_)));
    tag(env, "some?", |v| !matches!(v, Value::Nil));
    tag(env, "symbol?", |v| matches!(v, Value::Symbol(_)));
    tag(env, "keyword?", |v| matches!(v, Value::Keyword(_)));
    tag(env, "string?", |v| matches!(v, Value::Str(_)));
    tag(env, "char?", |v| matches!(v, Value::Char(_)));
    tag(env, "number?", |v| matches!(v, Value::Int(_) | Value::Float(_)));
    tag(env, "integer?", |v| matches!(v, Value::Int(_)));
    tag(env, "float?", |v| matches!(v, Value::Float(_)));
    tag(env, "vector?", |v| matches!(v, Value::Vector(_)));
    tag(env, "map?", |v| matches!(v, Value::Map(_)));
    tag(env, "set?", |v| matches!(v, Value::Set(_)));
    tag(env, "list?", |v| matches!(v, Value::List(_)));
    tag(env, "seq?", |v| matches!(v, Value::List(_) | Value::LazySeq(_)));
    tag(env, "coll?", |v| matches!(v, Value::List(_) | Value::Vector(_) | Value::Map(_) | Value::Set(_)));
    tag(env, "fn?", |v| matches!(v, Value::Fn(_)));
    tag(env, "atom?", |v| matches!(v, Value::Atom(_)));
    tag(env, "var?", |v| matches!(v, Value::VarRef(_)));

    def_builtin(env, "zero?", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(i) => Ok(Value::Bool(*i == 0)),
        Value::Float(f) => Ok(Value::Bool(*f == 0.0)),
        other => Err(crate::error::ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    });
    def_builtin(env, "pos?", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(i) => Ok(Value::Bool(*i > 0)),
        Value::Float(f) => Ok(Value::Bool(*f > 0.0)),
        other => Err(crate::error::ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    });
    def_builtin(env, "neg?", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(i) => Ok(Value::Bool(*i < 0)),
        Value::Float(f) => Ok(Value::Bool(*f < 0.0)),
        other => Err(crate::error::ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    });
    def_builtin(env, "odd?", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(i) => Ok(Value::Bool(i % 2 != 0)),
        other => Err(crate::error::ClwError::Type(format!("expected an integer, got {}", other.type_tag()))),
    });
    def_builtin(env, "even?", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(i) => Ok(Value::Bool(i % 2 == 0)),
        other => Err(crate::error::ClwError::Type(format!("expected an integer, got {}", other.type_tag()))),
    });

    def_builtin(env, "not", Arity::exact(1), |_env, args| Ok(Value::Bool(!args[0].is_truthy())));
    def_builtin(env, "identical?", Arity::exact(2), |_env, args| Ok(Value::Bool(identical(&args[0], &args[1]))));

    def_builtin(env, "instance?", Arity::exact(2), |_env, args| {
        let Value::Symbol(class) = &args[0] else {
            return Err(crate::error::ClwError::Type("instance? expects a class symbol".into()));
        };
        Ok(Value::Bool(class.name() == args[1].type_tag() || super::exceptions::exception_isa(&args[1], class.name())))
    });
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Fn(x), Value::Fn(y)) | (Value::Atom(x), Value::Atom(y)) | (Value::LazySeq(x), Value::LazySeq(y)) => x == y,
        (Value::VarRef(x), Value::VarRef(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => std::rc::Rc::ptr_eq(x, y),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_compares_atoms_and_fns_by_handle_not_structure() {
        assert!(identical(&Value::Int(3), &Value::Int(3)));
        assert!(!identical(&Value::Str(std::rc::Rc::new("a".into())), &Value::Str(std::rc::Rc::new("a".into()))));
    }
}
