//! `fn_val` variants (spec.md §3.3): builtin, AST closure (E1), bytecode
//! closure (E2), multimethod, protocol function. Every variant carries arity
//! info so a call site can raise `arity_error` before the body runs.

use std::fmt;
use std::rc::Rc;

use crate::analyzer::node::FnClause;
use crate::compiler::chunk::Proto;
use crate::env::Env;
use crate::error::ClwResult;
use crate::symbol::Sym;
use crate::value::Value;

/// Fixed arities plus an optional variadic tail, shared by every `FnVal`
/// variant (spec.md §3.3).
#[derive(Debug, Clone, Default)]
pub struct Arity {
    pub fixed: Vec<usize>,
    pub variadic_min: Option<usize>,
}

impl Arity {
    pub fn exact(n: usize) -> Self {
        Arity { fixed: vec![n], variadic_min: None }
    }

    pub fn variadic(min: usize) -> Self {
        Arity { fixed: vec![], variadic_min: Some(min) }
    }

    pub fn accepts(&self, argc: usize) -> bool {
        self.fixed.contains(&argc) || self.variadic_min.map(|min| argc >= min).unwrap_or(false)
    }
}

pub type BuiltinFn = Rc<dyn Fn(&mut Env, &[Value]) -> ClwResult<Value>>;

#[derive(Clone)]
pub struct Builtin {
    pub name: Sym,
    pub arity: Arity,
    pub func: BuiltinFn,
    /// Values the `func` closure holds onto across calls (e.g. a lazy-seq
    /// thunk's pending input), surfaced to the GC tracer the same way
    /// `ClosureAst`/`ClosureBytecode` surface theirs. Ordinary builtins
    /// leave this empty.
    pub captured: Vec<Value>,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

/// One closure value per `fn*` form, however many arity clauses it has; both
/// engines share the analyzer's `FnClause` shape (slot-indexed locals, same
/// as the bytecode side) so dispatch-by-arity logic lives in one place.
#[derive(Debug, Clone)]
pub struct ClosureAst {
    pub name: Option<Sym>,
    pub clauses: Vec<Rc<FnClause>>,
    pub captured: Vec<Value>,
    pub arity: Arity,
}

/// Parallel to `ClosureAst::clauses`: `protos[i]` is the compiled body of
/// the clause with arity `arity.fixed[i]` (or the variadic tail clause).
#[derive(Debug, Clone)]
pub struct ClosureBytecode {
    pub name: Option<Sym>,
    pub protos: Vec<Rc<Proto>>,
    pub captured: Vec<Value>,
    pub arity: Arity,
}

#[derive(Debug, Clone, Default)]
pub struct MultiMethod {
    pub name: Sym,
    pub dispatch_fn: Option<Box<Value>>,
    pub methods: Vec<(Value, Value)>,
    pub default: Option<Box<Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolFn {
    pub protocol: Sym,
    pub method_name: Sym,
    pub arity: Arity,
    /// Keyed by the implementing type's tag symbol.
    pub impls: Vec<(Sym, Value)>,
}

#[derive(Debug, Clone)]
pub enum FnVal {
    Builtin(Builtin),
    ClosureAst(ClosureAst),
    ClosureBytecode(ClosureBytecode),
    MultiMethod(MultiMethod),
    ProtocolFn(ProtocolFn),
}

impl FnVal {
    pub fn arity(&self) -> &Arity {
        match self {
            FnVal::Builtin(b) => &b.arity,
            FnVal::ClosureAst(c) => &c.arity,
            FnVal::ClosureBytecode(c) => &c.arity,
            FnVal::MultiMethod(_) => &NO_ARITY_LIMIT,
            FnVal::ProtocolFn(p) => &p.arity,
        }
    }

    pub fn name(&self) -> Option<&Sym> {
        match self {
            FnVal::Builtin(b) => Some(&b.name),
            FnVal::ClosureAst(c) => c.name.as_ref(),
            FnVal::ClosureBytecode(c) => c.name.as_ref(),
            FnVal::MultiMethod(m) => Some(&m.name),
            FnVal::ProtocolFn(p) => Some(&p.method_name),
        }
    }

    /// Values reachable directly from this function for GC tracing purposes
    /// (spec.md §4.R.2: "a function proto tracer is installed through the
    /// dispatch vtable").
    pub fn captured_values(&self) -> Vec<Value> {
        match self {
            FnVal::ClosureAst(c) => c.captured.clone(),
            FnVal::ClosureBytecode(c) => c.captured.clone(),
            FnVal::MultiMethod(m) => {
                let mut vs: Vec<Value> = m.methods.iter().flat_map(|(k, v)| [k.clone(), v.clone()]).collect();
                if let Some(d) = &m.dispatch_fn {
                    vs.push((**d).clone());
                }
                if let Some(d) = &m.default {
                    vs.push((**d).clone());
                }
                vs
            }
            FnVal::ProtocolFn(p) => p.impls.iter().map(|(_, v)| v.clone()).collect(),
            FnVal::Builtin(b) => b.captured.clone(),
        }
    }
}

static NO_ARITY_LIMIT: Arity = Arity { fixed: vec![], variadic_min: Some(0) };

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_accepts_fixed_and_variadic() {
        let a = Arity { fixed: vec![0, 1], variadic_min: Some(3) };
        assert!(a.accepts(0));
        assert!(a.accepts(1));
        assert!(!a.accepts(2));
        assert!(a.accepts(3));
        assert!(a.accepts(10));
    }
}
