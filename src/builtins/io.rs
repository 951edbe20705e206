//! Printing and string-building builtins (spec.md §4.P): everything here
//! is a thin wrapper over `printer::pr_str`/`print_str` so `*print-length*`/
//! `*print-level*` stay governed by one `PrintOpts` path.

use crate::env::Env;
use crate::fn_val::Arity;
use crate::printer::{pr_str, print_str};
use crate::value::Value;

use super::def_builtin;

pub fn install(env: &mut Env) {
    def_builtin(env, "str", Arity::variadic(0), |_env, args| {
        let mut s = String::new();
        for a in args {
            s.push_str(&print_str(a));
        }
        Ok(Value::str(s))
    });
    def_builtin(env, "pr-str", Arity::variadic(0), |_env, args| {
        let s = args.iter().map(pr_str).collect::<Vec<_>>().join(" ");
        Ok(Value::str(s))
    });
    def_builtin(env, "print", Arity::variadic(0), |_env, args| {
        let s = args.iter().map(print_str).collect::<Vec<_>>().join(" ");
        print!("{s}");
        Ok(Value::Nil)
    });
    def_builtin(env, "println", Arity::variadic(0), |_env, args| {
        let s = args.iter().map(print_str).collect::<Vec<_>>().join(" ");
        println!("{s}");
        Ok(Value::Nil)
    });
    def_builtin(env, "pr", Arity::variadic(0), |_env, args| {
        let s = args.iter().map(pr_str).collect::<Vec<_>>().join(" ");
        print!("{s}");
        Ok(Value::Nil)
    });
    def_builtin(env, "prn", Arity::variadic(0), |_env, args| {
        let s = args.iter().map(pr_str).collect::<Vec<_>>().join(" ");
        println!("{s}");
        Ok(Value::Nil)
    });
}
