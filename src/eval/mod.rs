//! Tree-walk evaluator (E1, spec.md §4.D). Mirrors `compiler::Compiler`'s
//! shape node-for-node (spec.md §8 invariant 1: the two engines must stay
//! observably equivalent) but interprets the `Node` tree directly instead of
//! emitting bytecode: Rust's own call stack stands in for a call stack, and
//! `recur` trampolines through `Flow` instead of growing it, so loops run in
//! constant Rust-stack space exactly as the compiler's backward jump does.

use std::rc::Rc;

use crate::analyzer::node::{Binding, CaptureDesc, CatchClause, FnClause, LetBinding, Node, NodeKind};
use crate::builtins::exception_isa;
use crate::dispatch::DispatchVTable;
use crate::env::Env;
use crate::error::ClwError;
use crate::error::ClwResult;
use crate::fn_val::{Arity, ClosureAst, FnVal};
use crate::gc::HeapObj;
use crate::value::Value;

/// Guards against unbounded non-tail recursion growing the Rust stack, the
/// same contract the bytecode VM enforces on its own frame stack.
const MAX_DEPTH: usize = 4096;

/// One call's local-slot scope: `locals` is sized to the running clause's
/// `local_count`, `upvalues` is the closure's captured-value vector.
struct Scope {
    locals: Vec<Value>,
    upvalues: Vec<Value>,
}

/// Signal threaded through tail positions. A `recur` doesn't produce a
/// value — it asks the nearest enclosing loop/fn clause to rebind its locals
/// and retry, which is exactly what `compile_recur` does with a local-set
/// plus a backward jump.
enum Flow {
    Value(Value),
    Recur(Vec<Value>),
}

pub struct Eval<'a> {
    env: &'a mut Env,
    vtable: DispatchVTable,
    depth: usize,
}

impl<'a> Eval<'a> {
    pub fn new(env: &'a mut Env, vtable: DispatchVTable) -> Self {
        Eval { env, vtable, depth: 0 }
    }

    /// Evaluate a top-level form's analyzed `Node` with no upvalues and
    /// `local_count` fresh local slots (from
    /// `Analyzer::top_level_local_count`, sized to whatever `let*`/`loop*`
    /// bindings the form itself declares).
    pub fn eval_top_level(&mut self, node: &Node, local_count: u16) -> ClwResult<Value> {
        let mut scope = Scope { locals: vec![Value::Nil; local_count as usize], upvalues: Vec::new() };
        self.eval_node(&mut scope, node)
    }

    /// Call any `FnVal` value from the tree-walk side. Builtins run
    /// directly; bytecode closures cross the dispatch vtable into E2;
    /// AST closures run natively through Rust recursion.
    pub fn call_value(&mut self, callee: &Value, args: &[Value]) -> ClwResult<Value> {
        let Value::Fn(gcref) = callee else {
            return Err(ClwError::Type(format!("{} is not a function", callee.type_tag())));
        };
        let fn_val = match self.env.gc.get(*gcref) {
            Some(HeapObj::Closure(f)) => f.clone(),
            _ => return Err(ClwError::Internal("dangling fn reference".into())),
        };
        self.call_fn_val(&fn_val, args)
    }

    pub fn call_fn_val(&mut self, fn_val: &FnVal, args: &[Value]) -> ClwResult<Value> {
        if !fn_val.arity().accepts(args.len()) {
            return Err(ClwError::Arity(format!(
                "{} does not accept {} argument(s)",
                fn_val.name().map(|s| s.qualified()).unwrap_or_else(|| "fn".into()),
                args.len()
            )));
        }
        match fn_val {
            FnVal::Builtin(b) => (b.func)(self.env, args),
            FnVal::ClosureAst(c) => self.invoke_ast(c, args),
            FnVal::ClosureBytecode(_) => (self.vtable.bytecode_call_bridge.clone())(fn_val, args),
            FnVal::MultiMethod(m) => {
                let dispatch_val = match &m.dispatch_fn {
                    Some(f) => self.call_value(f, args)?,
                    None => args.first().cloned().unwrap_or(Value::Nil),
                };
                let method = m.methods.iter().find(|(k, _)| *k == dispatch_val).map(|(_, v)| v.clone());
                match method.or_else(|| m.default.as_ref().map(|v| (**v).clone())) {
                    Some(f) => self.call_value(&f, args),
                    None => Err(ClwError::Value(format!("no method for dispatch value {dispatch_val}"))),
                }
            }
            FnVal::ProtocolFn(p) => {
                let recv = args.first().ok_or_else(|| ClwError::Arity("protocol method called with no receiver".into()))?;
                let tag = crate::symbol::intern_symbol(None, recv.type_tag());
                match p.impls.iter().find(|(t, _)| *t == tag).map(|(_, v)| v.clone()) {
                    Some(f) => self.call_value(&f, args),
                    None => Err(ClwError::Type(format!("no implementation of {} for {}", p.method_name, recv.type_tag()))),
                }
            }
        }
    }

    /// Picks the clause whose arity matches `args.len()` (fixed clauses
    /// first, the variadic one as a fallback), builds its local array, and
    /// evaluates its body under this scope's own tail-recur trampoline.
    fn invoke_ast(&mut self, c: &ClosureAst, args: &[Value]) -> ClwResult<Value> {
        let clause = select_clause(&c.arity, &c.clauses, args.len())
            .ok_or_else(|| ClwError::Arity(format!("no matching arity for {} args", args.len())))?;
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err(ClwError::StackOverflow("tree-walk call depth exceeded".into()));
        }
        let mut locals = vec![Value::Nil; clause.local_count as usize];
        let fixed = clause.param_slots.len();
        for (slot, v) in clause.param_slots.iter().zip(args.iter()) {
            locals[*slot as usize] = v.clone();
        }
        if let Some(variadic_slot) = clause.variadic_slot {
            let rest = crate::collections::PList::from_iter_rev(args[fixed..].iter().rev().cloned());
            locals[variadic_slot as usize] = Value::List(rest);
        }
        let mut scope = Scope { locals, upvalues: c.captured.clone() };
        let mut recur_slots = clause.param_slots.clone();
        if let Some(v) = clause.variadic_slot {
            recur_slots.push(v);
        }
        let result = self.eval_loop_body(&mut scope, &recur_slots, &clause.body);
        self.depth -= 1;
        result
    }

    /// Runs `body` to a value, rebinding `slots` and retrying whenever it
    /// tail-recurs, exactly mirroring `compile_recur`'s local-set-then-jump.
    fn eval_loop_body(&mut self, scope: &mut Scope, slots: &[u16], body: &Node) -> ClwResult<Value> {
        loop {
            match self.eval_tail(scope, body)? {
                Flow::Value(v) => return Ok(v),
                Flow::Recur(args) => {
                    if args.len() != slots.len() {
                        return Err(ClwError::Internal(format!(
                            "recur arity {} does not match loop target {}",
                            args.len(),
                            slots.len()
                        )));
                    }
                    for (slot, v) in slots.iter().zip(args.into_iter()) {
                        scope.locals[*slot as usize] = v;
                    }
                }
            }
        }
    }

    /// Evaluates `node` in tail position with respect to the nearest
    /// enclosing `eval_loop_body`: a `Recur` here produces `Flow::Recur`
    /// instead of executing, and `if`/`do`/`let*`/`letfn*`/`case*` forward
    /// tail position into their own tail sub-node, the same set of forms
    /// `recur` is allowed to appear nested inside (spec.md §4.A: `recur`
    /// must be in tail position).
    fn eval_tail(&mut self, scope: &mut Scope, node: &Node) -> ClwResult<Flow> {
        match &node.kind {
            NodeKind::Recur(args) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval_node(scope, a)?);
                }
                Ok(Flow::Recur(values))
            }
            NodeKind::If { test, then, else_ } => {
                let t = self.eval_node(scope, test)?;
                if t.is_truthy() {
                    self.eval_tail(scope, then)
                } else {
                    match else_ {
                        Some(e) => self.eval_tail(scope, e),
                        None => Ok(Flow::Value(Value::Nil)),
                    }
                }
            }
            NodeKind::Do(stmts) => {
                let Some((last, init)) = stmts.split_last() else {
                    return Ok(Flow::Value(Value::Nil));
                };
                for s in init {
                    self.eval_node(scope, s)?;
                }
                self.eval_tail(scope, last)
            }
            NodeKind::Let { bindings, body, .. } => {
                self.bind_sequential(scope, bindings)?;
                self.eval_tail(scope, body)
            }
            NodeKind::LetFn { clauses, body, .. } => {
                self.bind_letfn(scope, clauses)?;
                self.eval_tail(scope, body)
            }
            NodeKind::Case { disc, clauses, default } => {
                let d = self.eval_node(scope, disc)?;
                match clauses.iter().find(|(keys, _)| keys.iter().any(|k| *k == d)) {
                    Some((_, body)) => self.eval_tail(scope, body),
                    None => self.eval_tail(scope, default),
                }
            }
            // `loop*` establishes its own recur target, so it doesn't
            // forward tail position to whatever encloses it.
            _ => Ok(Flow::Value(self.eval_node(scope, node)?)),
        }
    }

    fn bind_sequential(&mut self, scope: &mut Scope, bindings: &[LetBinding]) -> ClwResult<()> {
        for b in bindings {
            let v = self.eval_node(scope, &b.init)?;
            scope.locals[b.slot as usize] = v;
        }
        Ok(())
    }

    fn bind_letfn(&mut self, scope: &mut Scope, clauses: &[(u16, Vec<FnClause>)]) -> ClwResult<()> {
        for (slot, clause_set) in clauses {
            let v = self.make_closure(scope, None, clause_set)?;
            scope.locals[*slot as usize] = v;
        }
        Ok(())
    }

    /// General (non-tail) evaluator: every `NodeKind` gets a handler here,
    /// recursing via plain Rust calls for nested non-tail subexpressions.
    fn eval_node(&mut self, scope: &mut Scope, node: &Node) -> ClwResult<Value> {
        match &node.kind {
            NodeKind::Const(v) | NodeKind::Quote(v) => Ok(v.clone()),
            NodeKind::Resolved(binding) => self.eval_binding(scope, binding),
            NodeKind::If { test, then, else_ } => {
                let t = self.eval_node(scope, test)?;
                if t.is_truthy() {
                    self.eval_node(scope, then)
                } else {
                    match else_ {
                        Some(e) => self.eval_node(scope, e),
                        None => Ok(Value::Nil),
                    }
                }
            }
            NodeKind::Do(stmts) => {
                let mut result = Value::Nil;
                for s in stmts {
                    result = self.eval_node(scope, s)?;
                }
                Ok(result)
            }
            NodeKind::Let { bindings, body, .. } => {
                self.bind_sequential(scope, bindings)?;
                self.eval_node(scope, body)
            }
            NodeKind::Loop { bindings, body, .. } => {
                self.bind_sequential(scope, bindings)?;
                let slots: Vec<u16> = bindings.iter().map(|b| b.slot).collect();
                self.eval_loop_body(scope, &slots, body)
            }
            NodeKind::Recur(_) => Err(ClwError::Internal("recur used outside tail position".into())),
            NodeKind::Fn { name, clauses } => self.make_closure(scope, name.clone(), clauses),
            NodeKind::LazySeq(clause) => self.make_lazy_seq(scope, clause),
            NodeKind::Def { var, init } => {
                let v = match init {
                    Some(i) => self.eval_node(scope, i)?,
                    None => Value::Nil,
                };
                var.def_root(v);
                Ok(Value::VarRef(var.clone()))
            }
            NodeKind::VarSpecial(var) => var.get(),
            NodeKind::Throw(v) => {
                let val = self.eval_node(scope, v)?;
                Err(ClwError::Thrown(val))
            }
            NodeKind::Try { body, catches, finally } => self.eval_try(scope, body, catches, finally.as_deref()),
            NodeKind::SetBang { target, value } => {
                let v = self.eval_node(scope, value)?;
                self.eval_set_bang(scope, target, v)
            }
            NodeKind::Call { callee, args } => {
                let f = self.eval_node(scope, callee)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for a in args {
                    arg_values.push(self.eval_node(scope, a)?);
                }
                self.call_value(&f, &arg_values)
            }
            NodeKind::VectorLit(items) => {
                let vals: ClwResult<Vec<_>> = items.iter().map(|i| self.eval_node(scope, i)).collect();
                Ok(Value::Vector(crate::collections::PVector::from_iter(vals?)))
            }
            NodeKind::SetLit(items) => {
                let vals: ClwResult<Vec<_>> = items.iter().map(|i| self.eval_node(scope, i)).collect();
                Ok(Value::Set(crate::collections::PSet::from_iter(vals?)))
            }
            NodeKind::MapLit(pairs) => {
                let mut m = crate::collections::PMap::default();
                for (k, v) in pairs {
                    let kv = self.eval_node(scope, k)?;
                    let vv = self.eval_node(scope, v)?;
                    m = m.assoc(kv, vv);
                }
                Ok(Value::Map(m))
            }
            NodeKind::MonitorEnter(v) | NodeKind::MonitorExit(v) => {
                self.eval_node(scope, v)?;
                Ok(Value::Nil)
            }
            // Host interop, type definitions, and `import` have no runtime
            // surface yet; both engines no-op to nil (compiler/mod.rs does
            // the same for `NodeKind::New`/`InteropCall`/`DefType`/`Reify`/
            // `Import`).
            NodeKind::New { .. } | NodeKind::InteropCall { .. } | NodeKind::DefType { .. } | NodeKind::Reify { .. } | NodeKind::Import(_) => {
                Ok(Value::Nil)
            }
            NodeKind::Case { disc, clauses, default } => {
                let d = self.eval_node(scope, disc)?;
                match clauses.iter().find(|(keys, _)| keys.iter().any(|k| *k == d)) {
                    Some((_, body)) => self.eval_node(scope, body),
                    None => self.eval_node(scope, default),
                }
            }
            NodeKind::LetFn { clauses, body, .. } => {
                self.bind_letfn(scope, clauses)?;
                self.eval_node(scope, body)
            }
        }
    }

    fn eval_binding(&mut self, scope: &Scope, binding: &Binding) -> ClwResult<Value> {
        match binding {
            Binding::Local { slot, .. } => Ok(scope.locals.get(*slot as usize).cloned().unwrap_or(Value::Nil)),
            Binding::Upvalue { index, .. } => Ok(scope.upvalues.get(*index as usize).cloned().unwrap_or(Value::Nil)),
            Binding::Var(var) => var.get(),
        }
    }

    fn eval_set_bang(&mut self, scope: &mut Scope, target: &Binding, value: Value) -> ClwResult<Value> {
        match target {
            Binding::Local { slot, .. } => {
                scope.locals[*slot as usize] = value.clone();
                Ok(value)
            }
            Binding::Upvalue { index, .. } => {
                scope.upvalues[*index as usize] = value.clone();
                Ok(value)
            }
            Binding::Var(var) => {
                var.alter_root(|_| value.clone())?;
                Ok(value)
            }
        }
    }

    /// `try`/`catch`/`finally`: runs `body`, and on a catchable error whose
    /// class matches a `catch` clause (first match wins, declaration order),
    /// binds it and runs that clause; `finally` always runs exactly once —
    /// on the normal path, after a matched catch, and (re-throwing
    /// afterward) on an unmatched or uncatchable error — mirroring
    /// `compile_try`'s catch-table-plus-finally-catch-all shape.
    fn eval_try(&mut self, scope: &mut Scope, body: &Node, catches: &[CatchClause], finally: Option<&Node>) -> ClwResult<Value> {
        let result = self.eval_node(scope, body);
        let outcome = match result {
            Ok(v) => Ok(v),
            Err(e) if e.is_catchable() => {
                let exc_value = e.to_value();
                match catches.iter().find(|c| exception_isa(&exc_value, c.class.name())) {
                    Some(c) => {
                        scope.locals[c.binding_slot as usize] = exc_value;
                        self.eval_node(scope, &c.body)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        if let Some(f) = finally {
            self.eval_node(scope, f)?;
        }
        outcome
    }

    /// Builds an `Rc`-shared `ClosureAst` from one `fn*`/`letfn*` binding's
    /// clauses; every clause carries the same `captures` list (spec.md
    /// §4.A: one closure value per binding closes over one lexical scope),
    /// so any clause's list can resolve the capture against the current
    /// scope.
    fn make_closure(&mut self, scope: &Scope, name: Option<crate::symbol::Sym>, clauses: &[FnClause]) -> ClwResult<Value> {
        let captures = clauses.first().map(|c| c.captures.as_slice()).unwrap_or(&[]);
        let captured = resolve_captures(scope, captures);
        let arity = arity_from_clauses(clauses);
        let closure = ClosureAst { name, clauses: clauses.iter().cloned().map(Rc::new).collect(), captured, arity };
        let gcref = self.env.gc.alloc(HeapObj::Closure(FnVal::ClosureAst(closure)));
        Ok(Value::Fn(gcref))
    }

    /// `(lazy-seq body…)`: a zero-arg closure over the current scope, held
    /// unevaluated in a `lazy-seq` cell (spec.md §5) until something forces
    /// it (`crate::builtins::force`).
    fn make_lazy_seq(&mut self, scope: &Scope, clause: &FnClause) -> ClwResult<Value> {
        let captured = resolve_captures(scope, &clause.captures);
        let closure = ClosureAst {
            name: None,
            clauses: vec![Rc::new(clause.clone())],
            captured,
            arity: Arity::exact(0),
        };
        let fn_ref = self.env.gc.alloc(HeapObj::Closure(FnVal::ClosureAst(closure)));
        let lazy_ref = self.env.gc.alloc(HeapObj::LazySeq(std::cell::RefCell::new(crate::gc::LazySeqState::new(Value::Fn(fn_ref)))));
        Ok(Value::LazySeq(lazy_ref))
    }
}

/// Reads each `CaptureDesc` out of the *current* scope to build a new
/// closure's captured-value vector — the tree-walk analogue of the bytecode
/// VM's `resolve_captures`, but against live `Value`s instead of a
/// `Proto`'s upvalue table.
fn resolve_captures(scope: &Scope, captures: &[CaptureDesc]) -> Vec<Value> {
    captures
        .iter()
        .map(|d| {
            if d.from_parent_local {
                scope.locals.get(d.index as usize).cloned().unwrap_or(Value::Nil)
            } else {
                scope.upvalues.get(d.index as usize).cloned().unwrap_or(Value::Nil)
            }
        })
        .collect()
}

/// Picks `clauses[i]` where `arity.fixed[i] == argc`, else the trailing
/// variadic clause if `argc >= arity.variadic_min` — identical selection
/// rule to the bytecode VM's `select_clause`.
fn select_clause<'c>(arity: &Arity, clauses: &'c [Rc<FnClause>], argc: usize) -> Option<&'c Rc<FnClause>> {
    if let Some(pos) = arity.fixed.iter().position(|&n| n == argc) {
        return clauses.get(pos);
    }
    if arity.variadic_min.map(|min| argc >= min).unwrap_or(false) {
        return clauses.last();
    }
    None
}

fn arity_from_clauses(clauses: &[FnClause]) -> Arity {
    let mut fixed = Vec::new();
    let mut variadic_min = None;
    for c in clauses {
        if c.variadic_slot.is_some() {
            variadic_min = Some(c.param_slots.len());
        } else {
            fixed.push(c.param_slots.len());
        }
    }
    Arity { fixed, variadic_min }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::error::ClwError as E;
    use crate::fn_val::Builtin;
    use crate::reader::Reader;
    use std::rc::Rc as StdRc;

    fn test_vtable() -> DispatchVTable {
        DispatchVTable {
            treewalk_call_bridge: StdRc::new(|_f, _args| Err(E::Internal("treewalk bridge not wired in this test".into()))),
            bytecode_call_bridge: StdRc::new(|_f, _args| Err(E::Internal("bytecode bridge not wired in this test".into()))),
            seq_first_rest: StdRc::new(|_v| Err(E::Internal("seq bridge not wired in this test".into()))),
        }
    }

    fn eval_top(env: &mut Env, src: &str) -> ClwResult<Value> {
        let mut r = Reader::new(src, "test").unwrap();
        let (form, loc) = r.read_top_level().unwrap().unwrap();
        let mut a = Analyzer::new(env, None);
        let node = a.analyze_top_level(&form, Some(loc))?;
        let local_count = a.top_level_local_count();
        let mut e = Eval::new(env, test_vtable());
        e.eval_top_level(&node, local_count)
    }

    #[test]
    fn evaluates_arithmetic_and_if() {
        let mut env = Env::new();
        env.set_current_ns("user");
        let v = eval_top(&mut env, "(if (< 1 2) (+ 1 2) 0)").unwrap();
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn loop_recur_computes_sum() {
        let mut env = Env::new();
        env.set_current_ns("user");
        let v = eval_top(&mut env, "(loop* [i 0 acc 0] (if (< i 5) (recur (+ i 1) (+ acc i)) acc))").unwrap();
        assert_eq!(v, Value::Int(10));
    }

    #[test]
    fn def_and_var_get_round_trip() {
        let mut env = Env::new();
        env.set_current_ns("user");
        eval_top(&mut env, "(def x 41)").unwrap();
        let v = eval_top(&mut env, "(+ x 1)");
        assert_eq!(v.unwrap(), Value::Int(42));
    }

    #[test]
    fn throw_and_catch_binds_the_value() {
        let mut env = Env::new();
        env.set_current_ns("user");
        let handle = env.def("boom", Value::Nil);
        handle.def_root(Value::Fn({
            let f = FnVal::Builtin(Builtin {
                name: crate::symbol::intern_symbol(None, "boom"),
                arity: Arity::exact(0),
                func: StdRc::new(|_env, _args| Err(E::Value("kaboom".into()))),
                captured: vec![],
            });
            env.gc.alloc(HeapObj::Closure(f))
        }));
        let v = eval_top(&mut env, "(try (boom) (catch Exception e 99))").unwrap();
        assert_eq!(v, Value::Int(99));
    }

    #[test]
    fn finally_runs_on_both_normal_and_exceptional_paths() {
        let mut env = Env::new();
        env.set_current_ns("user");
        env.def("log", Value::Int(0));
        let v = eval_top(
            &mut env,
            "(do (try 1 (finally (def log 1))) \
                 (try (throw :boom) (catch Object e (def log 2)) (finally (def log (+ log 10)))) \
                 log)",
        )
        .unwrap();
        assert_eq!(v, Value::Int(12));
    }

    #[test]
    fn closure_captures_enclosing_local() {
        let mut env = Env::new();
        env.set_current_ns("user");
        let v = eval_top(&mut env, "(let* [x 5] ((fn* [y] (+ x y)) 10))").unwrap();
        assert_eq!(v, Value::Int(15));
    }

    #[test]
    fn multi_arity_closure_dispatches_by_argument_count() {
        let mut env = Env::new();
        env.set_current_ns("user");
        let v = eval_top(&mut env, "((fn* ([] 0) ([a] a) ([a b] (+ a b))) 3 4)").unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn letfn_defines_locally_callable_functions() {
        let mut env = Env::new();
        env.set_current_ns("user");
        let v = eval_top(&mut env, "(letfn* [square (fn* [x] (* x x))] (square 5))").unwrap();
        assert_eq!(v, Value::Int(25));
    }
}
