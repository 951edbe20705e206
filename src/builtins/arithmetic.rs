//! Numeric tower (spec.md §3.1: `integer`/`float`) reduced to two kinds,
//! `int`/`float`, with the same int-fast-path/float-fallback split the VM's
//! own `arith`/`compare` opcodes use (`vm/mod.rs`) so a builtin call and a
//! compiled `add` opcode agree on every mixed-type case.

use crate::env::Env;
use crate::error::{ClwError, ClwResult};
use crate::fn_val::Arity;
use crate::value::Value;

use super::def_builtin;

fn as_f64(v: &Value) -> ClwResult<f64> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    }
}

fn reduce_numeric(args: &[Value], identity: i64, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> ClwResult<Value> {
    if args.is_empty() {
        return Ok(Value::Int(identity));
    }
    let mut acc = args[0].clone();
    for rhs in &args[1..] {
        acc = match (&acc, rhs) {
            (Value::Int(x), Value::Int(y)) => Value::Int(int_op(*x, *y)),
            _ => Value::Float(float_op(as_f64(&acc)?, as_f64(rhs)?)),
        };
    }
    match &acc {
        Value::Int(_) | Value::Float(_) => Ok(acc),
        other => Err(ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    }
}

fn chain_compare(args: &[Value], pred: fn(f64, f64) -> bool) -> ClwResult<Value> {
    for pair in args.windows(2) {
        let (x, y) = (as_f64(&pair[0])?, as_f64(&pair[1])?);
        if !pred(x, y) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn install(env: &mut Env) {
    def_builtin(env, "+", Arity::variadic(0), |_env, args| {
        reduce_numeric(args, 0, |a, b| a.wrapping_add(b), |a, b| a + b)
    });
    def_builtin(env, "-", Arity::variadic(1), |_env, args| {
        if args.len() == 1 {
            return match &args[0] {
                Value::Int(x) => Ok(Value::Int(-x)),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
            };
        }
        reduce_numeric(args, 0, |a, b| a.wrapping_sub(b), |a, b| a - b)
    });
    def_builtin(env, "*", Arity::variadic(0), |_env, args| {
        reduce_numeric(args, 1, |a, b| a.wrapping_mul(b), |a, b| a * b)
    });
    def_builtin(env, "/", Arity::variadic(1), |_env, args| {
        if args.len() == 1 {
            return Ok(Value::Float(1.0 / as_f64(&args[0])?));
        }
        let mut acc = as_f64(&args[0])?;
        for rhs in &args[1..] {
            let y = as_f64(rhs)?;
            if y == 0.0 {
                return Err(ClwError::Arithmetic("divide by zero".into()));
            }
            acc /= y;
        }
        Ok(Value::Float(acc))
    });
    def_builtin(env, "mod", Arity::exact(2), |_env, args| match (&args[0], &args[1]) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(ClwError::Arithmetic("divide by zero".into()));
            }
            Ok(Value::Int(x.rem_euclid(*y)))
        }
        _ => Ok(Value::Float(as_f64(&args[0])?.rem_euclid(as_f64(&args[1])?))),
    });
    def_builtin(env, "quot", Arity::exact(2), |_env, args| match (&args[0], &args[1]) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(ClwError::Arithmetic("divide by zero".into()));
            }
            Ok(Value::Int(x / y))
        }
        _ => Ok(Value::Float((as_f64(&args[0])? / as_f64(&args[1])?).trunc())),
    });
    def_builtin(env, "rem", Arity::exact(2), |_env, args| match (&args[0], &args[1]) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(ClwError::Arithmetic("divide by zero".into()));
            }
            Ok(Value::Int(x % y))
        }
        _ => Ok(Value::Float(as_f64(&args[0])? % as_f64(&args[1])?)),
    });
    def_builtin(env, "inc", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(x) => Ok(Value::Int(x.wrapping_add(1))),
        Value::Float(x) => Ok(Value::Float(x + 1.0)),
        other => Err(ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    });
    def_builtin(env, "dec", Arity::exact(1), |_env, args| match &args[0] {
        Value::Int(x) => Ok(Value::Int(x.wrapping_sub(1))),
        Value::Float(x) => Ok(Value::Float(x - 1.0)),
        other => Err(ClwError::Type(format!("expected a number, got {}", other.type_tag()))),
    });

    def_builtin(env, "<", Arity::variadic(1), |_env, args| chain_compare(args, |a, b| a < b));
    def_builtin(env, ">", Arity::variadic(1), |_env, args| chain_compare(args, |a, b| a > b));
    def_builtin(env, "<=", Arity::variadic(1), |_env, args| chain_compare(args, |a, b| a <= b));
    def_builtin(env, ">=", Arity::variadic(1), |_env, args| chain_compare(args, |a, b| a >= b));
    def_builtin(env, "=", Arity::variadic(1), |_env, args| {
        Ok(Value::Bool(args.windows(2).all(|p| p[0] == p[1])))
    });

    def_builtin(env, "max", Arity::variadic(1), |_env, args| {
        reduce_numeric(args, i64::MIN, |a, b| a.max(b), |a, b| a.max(b))
    });
    def_builtin(env, "min", Arity::variadic(1), |_env, args| {
        reduce_numeric(args, i64::MAX, |a, b| a.min(b), |a, b| a.min(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_numeric_promotes_to_float_on_mixed_input() {
        let args = vec![Value::Int(1), Value::Float(2.5)];
        let v = reduce_numeric(&args, 0, |a, b| a + b, |a, b| a + b).unwrap();
        assert_eq!(v, Value::Float(3.5));
    }

    #[test]
    fn chain_compare_checks_every_adjacent_pair() {
        let args = vec![Value::Int(1), Value::Int(2), Value::Int(2)];
        assert_eq!(chain_compare(&args, |a, b| a < b).unwrap(), Value::Bool(false));
        assert_eq!(chain_compare(&args, |a, b| a <= b).unwrap(), Value::Bool(true));
    }
}
