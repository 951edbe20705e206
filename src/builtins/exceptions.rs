//! Exception-value helpers (spec.md §4.E): `ex-info` builds the same
//! `ExceptionMap` shape both engines synthesize from host errors
//! (`error.rs::ClwError::to_value`), so a caught value looks identical
//! whether it was thrown by user code or raised by the runtime.

use std::rc::Rc;

use crate::env::Env;
use crate::error::ClwError;
use crate::fn_val::Arity;
use crate::value::{ExceptionMapData, Value};

use super::def_builtin;

/// Ancestor chain for the synthetic exception classes `error.rs`'s
/// `ClwError::class_name` and `ex-info` raise (spec.md §4.E), closest class
/// first. Every host error kind ultimately descends from `RuntimeException`
/// the way real `clojure.lang`/`java.lang` exceptions do, so `(catch
/// RuntimeException e ...)` catches an `ArithmeticException` or an
/// `ExceptionInfo` without the catch clause needing to spell out the exact
/// concrete class.
fn ancestors(class: &str) -> &'static [&'static str] {
    match class {
        "ArithmeticException" => &["ArithmeticException", "RuntimeException"],
        "ClassCastException" => &["ClassCastException", "RuntimeException"],
        "IllegalArgumentException" => &["IllegalArgumentException", "RuntimeException"],
        "IndexOutOfBoundsException" => &["IndexOutOfBoundsException", "RuntimeException"],
        "IllegalStateException" => &["IllegalStateException", "RuntimeException"],
        "ArityException" => &["ArityException", "IllegalArgumentException", "RuntimeException"],
        "ExceptionInfo" => &["ExceptionInfo", "RuntimeException"],
        "IOException" => &["IOException"],
        "ReaderException" | "CompilerException" => &["RuntimeException"],
        "RuntimeException" => &["RuntimeException"],
        _ => &[],
    }
}

/// `Throwable`/`Exception`/`Object` match anything (every thrown value
/// is-a `Throwable`); otherwise an `ExceptionMap`'s own type name must
/// equal `class`, or `class` must appear in its ancestor chain (spec.md
/// §4.E: `catch` matches on the exception's class *or any superclass*).
pub fn exception_isa(v: &Value, class: &str) -> bool {
    if class == "Throwable" || class == "Exception" || class == "Object" {
        return true;
    }
    match v {
        Value::ExceptionMap(e) => {
            let actual = e.ex_type.name();
            actual == class || ancestors(actual).contains(&class)
        }
        _ => false,
    }
}

pub fn install(env: &mut Env) {
    def_builtin(env, "ex-info", Arity::variadic(2), |_env, args| {
        let Value::Str(msg) = &args[0] else {
            return Err(ClwError::Type(format!("ex-info expects a string message, got {}", args[0].type_tag())));
        };
        let data = args.get(1).cloned();
        let cause = args.get(2).cloned();
        Ok(Value::ExceptionMap(Rc::new(ExceptionMapData {
            ex_type: crate::symbol::intern_symbol(None, "ExceptionInfo"),
            is_ex_info: true,
            message: Some(msg.clone()),
            data,
            cause,
        })))
    });
    def_builtin(env, "ex-message", Arity::exact(1), |_env, args| match &args[0] {
        Value::ExceptionMap(e) => Ok(e.message.as_ref().map(|m| Value::Str(m.clone())).unwrap_or(Value::Nil)),
        _ => Ok(Value::Nil),
    });
    def_builtin(env, "ex-data", Arity::exact(1), |_env, args| match &args[0] {
        Value::ExceptionMap(e) if e.is_ex_info => Ok(e.data.clone().unwrap_or(Value::Nil)),
        _ => Ok(Value::Nil),
    });
    def_builtin(env, "ex-cause", Arity::exact(1), |_env, args| match &args[0] {
        Value::ExceptionMap(e) => Ok(e.cause.clone().unwrap_or(Value::Nil)),
        _ => Ok(Value::Nil),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_isa_matches_the_three_universal_catch_classes() {
        assert!(exception_isa(&Value::Nil, "Object"));
        assert!(exception_isa(&Value::Nil, "Throwable"));
        assert!(exception_isa(&Value::Nil, "Exception"));
    }

    fn exc(class: &str) -> Value {
        Value::ExceptionMap(Rc::new(ExceptionMapData {
            ex_type: crate::symbol::intern_symbol(None, class),
            is_ex_info: false,
            message: None,
            data: None,
            cause: None,
        }))
    }

    #[test]
    fn exception_isa_matches_its_own_concrete_class() {
        assert!(exception_isa(&exc("ArithmeticException"), "ArithmeticException"));
    }

    #[test]
    fn exception_isa_matches_via_the_ancestor_table() {
        assert!(exception_isa(&exc("ArithmeticException"), "RuntimeException"));
        assert!(exception_isa(&exc("ArityException"), "IllegalArgumentException"));
        assert!(exception_isa(&exc("ArityException"), "RuntimeException"));
        assert!(exception_isa(&exc("ExceptionInfo"), "RuntimeException"));
    }

    #[test]
    fn exception_isa_rejects_an_unrelated_class() {
        assert!(!exception_isa(&exc("ArithmeticException"), "IndexOutOfBoundsException"));
        assert!(!exception_isa(&exc("IOException"), "RuntimeException"));
    }
}
