//! Analyzer: forms → typed `Node` IR (spec.md §4.A).
//!
//! Resolves every symbol to a local slot, a captured upvalue, or a var;
//! unresolved symbols raise `resolve_error`. Macro calls are expanded by
//! invoking the macro's `fn_val` through the dispatch vtable's tree-walk
//! bridge (spec.md §9: macroexpansion always runs on the tree-walk engine,
//! even once the compiler is live) and then re-analyzed.

pub mod destructure;
pub mod node;

use std::rc::Rc;

use crate::dispatch::DispatchVTable;
use crate::env::{Env, VarHandle};
use crate::error::{ClwError, ClwResult, SourceLoc};
use crate::gc::HeapObj;
use crate::symbol::Sym;
use crate::value::Value;
use node::{Binding, CaptureDesc, CatchClause, FnClause, LetBinding, Node, NodeKind};

struct Frame {
    /// Local name -> slot, in declaration order; later entries shadow
    /// earlier ones with the same name.
    locals: Vec<(String, u16)>,
    /// Name -> capture descriptor, in the order each name was first
    /// referenced; the position in this list is the `Binding::Upvalue`
    /// index every reference to that name resolves to.
    upvalues: Vec<(String, CaptureDesc)>,
    next_slot: u16,
    /// Arity of the nearest enclosing `fn*`/`loop*` recur target, if any.
    recur_arity: Option<usize>,
}

impl Frame {
    fn new() -> Self {
        Frame { locals: Vec::new(), upvalues: Vec::new(), next_slot: 0, recur_arity: None }
    }

    fn declare(&mut self, name: &str) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.locals.push((name.to_string(), slot));
        slot
    }

    fn find_local(&self, name: &str) -> Option<u16> {
        self.locals.iter().rev().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    fn find_upvalue(&self, name: &str) -> Option<u16> {
        self.upvalues.iter().position(|(n, _)| n == name).map(|i| i as u16)
    }
}

pub struct Analyzer<'a> {
    env: &'a Env,
    vtable: Option<DispatchVTable>,
    frames: Vec<Frame>,
}

const SPECIAL_FORMS: &[&str] = &[
    "if", "do", "let*", "loop*", "recur", "fn*", "def", "quote", "var", "throw", "try", "new",
    "set!", ".", "monitor-enter", "monitor-exit", "deftype*", "reify*", "case*", "import*", "letfn*",
    "lazy-seq",
];

impl<'a> Analyzer<'a> {
    pub fn new(env: &'a Env, vtable: Option<DispatchVTable>) -> Self {
        Analyzer { env, vtable, frames: vec![Frame::new()] }
    }

    pub fn analyze_top_level(&mut self, form: &Value, loc: Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        self.frames = vec![Frame::new()];
        self.analyze(form, &loc)
    }

    /// Slot count a top-level form's own `let*`/`loop*` bindings used — the
    /// single top-level frame never pushes a child frame for those forms
    /// (same non-popping pattern as everywhere else), so this is exactly how
    /// many locals a caller must allocate to run the node this frame just
    /// produced.
    pub fn top_level_local_count(&self) -> u16 {
        self.frames[0].next_slot
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn analyze(&mut self, form: &Value, loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        match form {
            Value::Symbol(s) => self.analyze_symbol(s, loc),
            Value::List(l) if !l.is_empty() => self.analyze_list(l, loc),
            Value::Vector(v) => {
                let items: ClwResult<Vec<_>> = v.iter().map(|x| self.analyze(x, loc)).collect();
                Ok(Node::new(NodeKind::VectorLit(items?), loc.clone()))
            }
            Value::Map(m) => {
                let mut pairs = Vec::with_capacity(m.len());
                for (k, val) in m.iter() {
                    pairs.push((self.analyze(k, loc)?, self.analyze(val, loc)?));
                }
                Ok(Node::new(NodeKind::MapLit(pairs), loc.clone()))
            }
            Value::Set(s) => {
                let items: ClwResult<Vec<_>> = s.iter().map(|x| self.analyze(x, loc)).collect();
                Ok(Node::new(NodeKind::SetLit(items?), loc.clone()))
            }
            other => Ok(Node::new(NodeKind::Const(other.clone()), loc.clone())),
        }
    }

    fn analyze_symbol(&mut self, s: &Sym, loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let binding = self.resolve_symbol(s, loc)?;
        Ok(Node::new(NodeKind::Resolved(binding), loc.clone()))
    }

    /// Resolve a name to a local slot in the current frame, a captured
    /// upvalue chained through enclosing frames, or a var.
    fn resolve_symbol(&mut self, s: &Sym, loc: &Option<SourceLoc>) -> ClwResult<Binding> {
        let name = s.name();
        let top = self.frames.len() - 1;
        if let Some(slot) = self.frames[top].find_local(name) {
            return Ok(Binding::Local { slot, name: s.clone() });
        }
        // Search enclosing frames; if found, chain an upvalue capture down
        // to the current frame.
        for depth in (0..top).rev() {
            if self.frames[depth].find_local(name).is_some() || self.frames[depth].find_upvalue(name).is_some() {
                let index = self.register_upvalue_chain(depth, top, name);
                return Ok(Binding::Upvalue { index, name: s.clone() });
            }
        }
        self.resolve_var(s, loc)
    }

    /// Register `name` as a captured upvalue in every frame between
    /// `owner_depth` (exclusive, where it's a local or an existing upvalue)
    /// and `top` (inclusive, the frame currently being analyzed), chaining
    /// one frame's capture through the next: each link's `CaptureDesc`
    /// names a slot in the *previous* link's own namespace, so a closure
    /// nested several levels deep reaches the value through a relay of
    /// single-hop captures rather than a direct reference to a distant
    /// frame. Returns the upvalue index in the top frame.
    fn register_upvalue_chain(&mut self, owner_depth: usize, top: usize, name: &str) -> u16 {
        let mut from_parent_local = self.frames[owner_depth].find_local(name).is_some();
        let mut parent_index = if from_parent_local {
            self.frames[owner_depth].find_local(name).unwrap()
        } else {
            self.frames[owner_depth]
                .find_upvalue(name)
                .expect("name must be a local or upvalue of owner_depth by precondition")
        };
        let mut idx = parent_index;
        for depth in (owner_depth + 1)..=top {
            let frame = &mut self.frames[depth];
            idx = if let Some(pos) = frame.find_upvalue(name) {
                pos
            } else {
                let desc = CaptureDesc { index: parent_index, from_parent_local };
                frame.upvalues.push((name.to_string(), desc));
                (frame.upvalues.len() - 1) as u16
            };
            parent_index = idx;
            from_parent_local = false;
        }
        idx
    }

    fn resolve_var(&self, s: &Sym, loc: &Option<SourceLoc>) -> ClwResult<Binding> {
        if let Some(ns_name) = s.ns() {
            let ns = self
                .env
                .find_ns(ns_name)
                .ok_or_else(|| ClwError::Resolve(format!("no such namespace: {ns_name}"), loc.clone()))?;
            let var = ns
                .resolve(s.name())
                .ok_or_else(|| ClwError::Resolve(format!("unable to resolve var: {}", s.qualified()), loc.clone()))?;
            return Ok(Binding::Var(var));
        }
        let ns = self.env.current_ns();
        if let Some(var) = ns.resolve(s.name()) {
            return Ok(Binding::Var(var));
        }
        Err(ClwError::Resolve(format!("unable to resolve symbol: {}", s.name()), loc.clone()))
    }

    fn macro_var(&self, head: &Value) -> Option<VarHandle> {
        let Value::Symbol(s) = head else { return None };
        let ns = if let Some(ns_name) = s.ns() {
            self.env.find_ns(ns_name)?
        } else {
            self.env.current_ns()
        };
        let var = ns.resolve(s.name())?;
        if var.is_macro() {
            Some(var)
        } else {
            None
        }
    }

    fn analyze_list(&mut self, l: &crate::collections::PList, loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let head = l.first().unwrap();
        if let Value::Symbol(s) = head {
            if s.ns().is_none() && SPECIAL_FORMS.contains(&s.name()) {
                return self.analyze_special(s.name(), l, loc);
            }
        }
        if let Some(macro_var) = self.macro_var(head) {
            let args: Vec<Value> = l.rest().iter_values().cloned().collect();
            let expanded = self.expand_macro(&macro_var, &args, loc)?;
            return self.analyze(&expanded, loc);
        }
        let callee = self.analyze(head, loc)?;
        let args: ClwResult<Vec<_>> = l.rest().iter_values().map(|a| self.analyze(a, loc)).collect();
        Ok(Node::new(NodeKind::Call { callee, args: args? }, loc.clone()))
    }

    fn expand_macro(&self, var: &VarHandle, args: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Value> {
        let Some(vtable) = &self.vtable else {
            return Err(ClwError::Internal("macro expansion requested before bootstrap installed the dispatch vtable".into()));
        };
        let root = var
            .get()
            .map_err(|_| ClwError::Resolve(format!("macro var {}/{} is unbound", var.ns_name(), var.name()), loc.clone()))?;
        let Value::Fn(r) = root else {
            return Err(ClwError::Internal("macro var does not hold a fn_val".into()));
        };
        let obj = self
            .env
            .gc
            .get(r)
            .ok_or_else(|| ClwError::Internal("dangling macro fn reference".into()))?;
        let HeapObj::Closure(fn_val) = obj else {
            return Err(ClwError::Internal("macro fn handle does not point at a closure".into()));
        };
        (vtable.treewalk_call_bridge)(fn_val, args)
    }

    fn analyze_special(&mut self, name: &str, l: &crate::collections::PList, loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let rest: Vec<Value> = l.rest().iter_values().cloned().collect();
        match name {
            "quote" => {
                let v = rest.first().cloned().unwrap_or(Value::Nil);
                Ok(Node::new(NodeKind::Quote(v), loc.clone()))
            }
            "if" => {
                if rest.len() < 2 || rest.len() > 3 {
                    return Err(ClwError::Compile("if requires 2 or 3 forms".into(), loc.clone()));
                }
                let test = self.analyze(&rest[0], loc)?;
                let then = self.analyze(&rest[1], loc)?;
                let else_ = rest.get(2).map(|e| self.analyze(e, loc)).transpose()?;
                Ok(Node::new(NodeKind::If { test, then, else_ }, loc.clone()))
            }
            "do" => {
                let body: ClwResult<Vec<_>> = rest.iter().map(|f| self.analyze(f, loc)).collect();
                Ok(Node::new(NodeKind::Do(body?), loc.clone()))
            }
            "let*" => self.analyze_let(&rest, loc, false),
            "loop*" => self.analyze_let(&rest, loc, true),
            "recur" => {
                let expected = self.frame().recur_arity;
                if let Some(arity) = expected {
                    if arity != rest.len() {
                        return Err(ClwError::Compile(
                            format!("recur expects {arity} args, got {}", rest.len()),
                            loc.clone(),
                        ));
                    }
                } else {
                    return Err(ClwError::Compile("recur used outside of fn*/loop* tail position".into(), loc.clone()));
                }
                let args: ClwResult<Vec<_>> = rest.iter().map(|f| self.analyze(f, loc)).collect();
                Ok(Node::new(NodeKind::Recur(args?), loc.clone()))
            }
            "fn*" => self.analyze_fn(&rest, loc),
            "lazy-seq" => self.analyze_lazy_seq(&rest, loc),
            "def" => self.analyze_def(&rest, loc),
            "var" => {
                let Some(Value::Symbol(s)) = rest.first() else {
                    return Err(ClwError::Compile("var requires a symbol".into(), loc.clone()));
                };
                match self.resolve_var(s, loc)? {
                    Binding::Var(v) => Ok(Node::new(NodeKind::VarSpecial(v), loc.clone())),
                    _ => unreachable!(),
                }
            }
            "throw" => {
                let v = rest.first().ok_or_else(|| ClwError::Compile("throw requires a form".into(), loc.clone()))?;
                let node = self.analyze(v, loc)?;
                Ok(Node::new(NodeKind::Throw(node), loc.clone()))
            }
            "try" => self.analyze_try(&rest, loc),
            "new" => {
                let Some(Value::Symbol(class)) = rest.first() else {
                    return Err(ClwError::Compile("new requires a class symbol".into(), loc.clone()));
                };
                let args: ClwResult<Vec<_>> = rest[1..].iter().map(|f| self.analyze(f, loc)).collect();
                Ok(Node::new(NodeKind::New { class: class.clone(), args: args? }, loc.clone()))
            }
            "set!" => {
                let target = rest.first().ok_or_else(|| ClwError::Compile("set! requires a target".into(), loc.clone()))?;
                let value = rest.get(1).ok_or_else(|| ClwError::Compile("set! requires a value".into(), loc.clone()))?;
                let Value::Symbol(s) = target else {
                    return Err(ClwError::Compile("set! target must be a symbol".into(), loc.clone()));
                };
                let binding = self.resolve_symbol(s, loc)?;
                let value = self.analyze(value, loc)?;
                Ok(Node::new(NodeKind::SetBang { target: binding, value }, loc.clone()))
            }
            "." => self.analyze_dot(&rest, loc),
            "monitor-enter" => {
                let v = self.analyze(rest.first().unwrap_or(&Value::Nil), loc)?;
                Ok(Node::new(NodeKind::MonitorEnter(v), loc.clone()))
            }
            "monitor-exit" => {
                let v = self.analyze(rest.first().unwrap_or(&Value::Nil), loc)?;
                Ok(Node::new(NodeKind::MonitorExit(v), loc.clone()))
            }
            "deftype*" => {
                let Some(Value::Symbol(tname)) = rest.first() else {
                    return Err(ClwError::Compile("deftype* requires a name".into(), loc.clone()));
                };
                let fields: Vec<Sym> = match rest.get(1) {
                    Some(Value::Vector(v)) => v
                        .iter()
                        .filter_map(|f| if let Value::Symbol(s) = f { Some(s.clone()) } else { None })
                        .collect(),
                    _ => vec![],
                };
                Ok(Node::new(NodeKind::DefType { name: tname.clone(), fields }, loc.clone()))
            }
            "reify*" => Ok(Node::new(NodeKind::Reify { protocols: vec![], methods: vec![] }, loc.clone())),
            "case*" => self.analyze_case(&rest, loc),
            "import*" => {
                let Some(Value::Symbol(s)) = rest.first() else {
                    return Err(ClwError::Compile("import* requires a symbol".into(), loc.clone()));
                };
                Ok(Node::new(NodeKind::Import(s.clone()), loc.clone()))
            }
            "letfn*" => self.analyze_letfn(&rest, loc),
            _ => unreachable!("analyze_special called with non-special form {name}"),
        }
    }

    fn analyze_let(&mut self, rest: &[Value], loc: &Option<SourceLoc>, is_loop: bool) -> ClwResult<Rc<Node>> {
        let Some(Value::Vector(binding_forms)) = rest.first() else {
            return Err(ClwError::Compile("let*/loop* requires a binding vector".into(), loc.clone()));
        };
        if binding_forms.len() % 2 != 0 {
            return Err(ClwError::Compile("binding vector must have an even number of forms".into(), loc.clone()));
        }
        let raw_pair_count = binding_forms.len() / 2;
        let mut raw_pairs = Vec::with_capacity(raw_pair_count);
        for i in 0..raw_pair_count {
            let target = binding_forms.get(i * 2).unwrap().clone();
            let init_form = binding_forms.get(i * 2 + 1).unwrap().clone();
            raw_pairs.push((target, init_form));
        }
        // `loop*` recur arity is the number of *surface* bindings the caller
        // wrote, not the flattened-destructuring count.
        let recur_arity = raw_pair_count;
        let flattened = destructure::expand_all(&raw_pairs)?;
        let mut bindings = Vec::new();
        for (target, init_form) in flattened {
            let init = self.analyze(&init_form, loc)?;
            let Value::Symbol(s) = &target else {
                return Err(ClwError::Internal("destructuring did not fully reduce to symbols".into()));
            };
            let slot = self.frame().declare(s.name());
            bindings.push(LetBinding { slot, init });
        }
        let saved_recur = self.frame().recur_arity;
        if is_loop {
            self.frame().recur_arity = Some(recur_arity);
        }
        let body_forms = &rest[1..];
        let body_nodes: ClwResult<Vec<_>> = body_forms.iter().map(|f| self.analyze(f, loc)).collect();
        let body = Node::new(NodeKind::Do(body_nodes?), loc.clone());
        self.frame().recur_arity = saved_recur;
        let local_count = self.frame().next_slot;
        let kind = if is_loop {
            NodeKind::Loop { bindings, body, local_count }
        } else {
            NodeKind::Let { bindings, body, local_count }
        };
        Ok(Node::new(kind, loc.clone()))
    }

    fn analyze_fn(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let mut idx = 0;
        let name = match rest.first() {
            Some(Value::Symbol(s)) => {
                idx = 1;
                Some(s.clone())
            }
            _ => None,
        };
        let clauses_forms: Vec<Vec<Value>> = match rest.get(idx) {
            Some(Value::Vector(_)) => vec![rest[idx..].to_vec()],
            Some(Value::List(_)) => rest[idx..]
                .iter()
                .map(|c| if let Value::List(cl) = c { cl.iter_values().cloned().collect() } else { vec![] })
                .collect(),
            _ => return Err(ClwError::Compile("fn* requires a parameter vector or clauses".into(), loc.clone())),
        };
        // One frame for the whole `fn*`, shared across every arity clause:
        // all clauses are the same closure value and must capture upvalues
        // through one consistently-indexed list (spec.md §4.A). Each
        // clause's own locals still get disjoint slot ranges, since
        // `next_slot` keeps counting up across clauses instead of resetting.
        self.frames.push(Frame::new());
        let mut clauses = Vec::new();
        for clause in clauses_forms {
            let Some(Value::Vector(params)) = clause.first() else {
                return Err(ClwError::Compile("fn* clause requires a parameter vector".into(), loc.clone()));
            };
            let mut param_slots = Vec::new();
            let mut variadic_slot = None;
            let mut i = 0;
            let items: Vec<Value> = params.iter().cloned().collect();
            while i < items.len() {
                if let Value::Symbol(s) = &items[i] {
                    if s.name() == "&" {
                        i += 1;
                        if let Some(Value::Symbol(vs)) = items.get(i) {
                            variadic_slot = Some(self.frame().declare(vs.name()));
                        }
                        i += 1;
                        continue;
                    }
                    param_slots.push(self.frame().declare(s.name()));
                }
                i += 1;
            }
            let arity = param_slots.len();
            let saved_recur = self.frame().recur_arity;
            self.frame().recur_arity = Some(arity + if variadic_slot.is_some() { 1 } else { 0 });
            let body_nodes: ClwResult<Vec<_>> = clause[1..].iter().map(|f| self.analyze(f, loc)).collect();
            let body = Node::new(NodeKind::Do(body_nodes?), loc.clone());
            let local_count = self.frame().next_slot;
            self.frame().recur_arity = saved_recur;
            clauses.push(FnClause { param_slots, variadic_slot, body, local_count, captures: vec![] });
        }
        let captures: Vec<CaptureDesc> = self.frame().upvalues.iter().map(|(_, d)| *d).collect();
        self.frames.pop();
        for c in &mut clauses {
            c.captures = captures.clone();
        }
        Ok(Node::new(NodeKind::Fn { name, clauses }, loc.clone()))
    }

    /// `(lazy-seq body…)`: analyzed as a single zero-param `fn*` clause
    /// (spec.md §5), so capture resolution is identical to `analyze_fn`.
    fn analyze_lazy_seq(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        self.frames.push(Frame::new());
        let body_nodes: ClwResult<Vec<_>> = rest.iter().map(|f| self.analyze(f, loc)).collect();
        let body = Node::new(NodeKind::Do(body_nodes?), loc.clone());
        let local_count = self.frame().next_slot;
        let captures: Vec<CaptureDesc> = self.frame().upvalues.iter().map(|(_, d)| *d).collect();
        self.frames.pop();
        let clause = FnClause { param_slots: vec![], variadic_slot: None, body, local_count, captures };
        Ok(Node::new(NodeKind::LazySeq(clause), loc.clone()))
    }

    fn analyze_def(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let Some(Value::Symbol(s)) = rest.first() else {
            return Err(ClwError::Compile("def requires a symbol".into(), loc.clone()));
        };
        let ns = self.env.current_ns();
        let var = ns.intern(ns.name.clone(), s.name());
        let init = rest.get(1).map(|f| self.analyze(f, loc)).transpose()?;
        Ok(Node::new(NodeKind::Def { var, init }, loc.clone()))
    }

    fn analyze_try(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let mut body_forms = Vec::new();
        let mut catches = Vec::new();
        let mut finally = None;
        for form in rest {
            match form {
                Value::List(l) if matches!(l.first(), Some(Value::Symbol(s)) if s.name() == "catch") => {
                    let items: Vec<Value> = l.rest().iter_values().cloned().collect();
                    let Some(Value::Symbol(class)) = items.first() else {
                        return Err(ClwError::Compile("catch requires a class symbol".into(), loc.clone()));
                    };
                    let Some(Value::Symbol(binding)) = items.get(1) else {
                        return Err(ClwError::Compile("catch requires a binding symbol".into(), loc.clone()));
                    };
                    // The exception binding lives in the same local-slot
                    // space as the rest of the enclosing clause (the
                    // compiler's `LocalSet` for it addresses the current
                    // frame, not a separate captured scope), so declare it
                    // in place rather than pushing a new analyzer frame —
                    // the same pattern `let*` uses.
                    let slot = self.frame().declare(binding.name());
                    let body_nodes: ClwResult<Vec<_>> = items[2..].iter().map(|f| self.analyze(f, loc)).collect();
                    let body = Node::new(NodeKind::Do(body_nodes?), loc.clone());
                    catches.push(CatchClause { class: class.clone(), binding_slot: slot, body });
                }
                Value::List(l) if matches!(l.first(), Some(Value::Symbol(s)) if s.name() == "finally") => {
                    let body_nodes: ClwResult<Vec<_>> = l.rest().iter_values().map(|f| self.analyze(f, loc)).collect();
                    finally = Some(Node::new(NodeKind::Do(body_nodes?), loc.clone()));
                }
                other => body_forms.push(other.clone()),
            }
        }
        let body_nodes: ClwResult<Vec<_>> = body_forms.iter().map(|f| self.analyze(f, loc)).collect();
        let body = Node::new(NodeKind::Do(body_nodes?), loc.clone());
        Ok(Node::new(NodeKind::Try { body, catches, finally }, loc.clone()))
    }

    /// `Class/FIELD` → var reference; `Class/method` and
    /// `(.method obj args…)` → interop dispatcher calls (spec.md §4.A).
    fn analyze_dot(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let target_form = rest.first().ok_or_else(|| ClwError::Compile(". requires a target".into(), loc.clone()))?;
        let (method, args_forms): (Sym, &[Value]) = match rest.get(1) {
            Some(Value::Symbol(s)) => (s.clone(), &rest[2..]),
            Some(Value::List(l)) => {
                let items: Vec<Value> = l.iter_values().cloned().collect();
                let Some(Value::Symbol(s)) = items.first().cloned() else {
                    return Err(ClwError::Compile(". requires a method name".into(), loc.clone()));
                };
                let args: ClwResult<Vec<_>> = items[1..].iter().map(|f| self.analyze(f, loc)).collect();
                let target = self.analyze(target_form, loc)?;
                return Ok(Node::new(NodeKind::InteropCall { target, method: s, args: args? }, loc.clone()));
            }
            _ => return Err(ClwError::Compile(". requires a method or field name".into(), loc.clone())),
        };
        let target = self.analyze(target_form, loc)?;
        let args: ClwResult<Vec<_>> = args_forms.iter().map(|f| self.analyze(f, loc)).collect();
        Ok(Node::new(NodeKind::InteropCall { target, method, args: args? }, loc.clone()))
    }

    fn analyze_case(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let disc_form = rest.first().ok_or_else(|| ClwError::Compile("case* requires a discriminant".into(), loc.clone()))?;
        let disc = self.analyze(disc_form, loc)?;
        let mut clauses = Vec::new();
        let mut i = 1;
        let mut default = Node::new(NodeKind::Const(Value::Nil), loc.clone());
        while i < rest.len() {
            if i == rest.len() - 1 {
                default = self.analyze(&rest[i], loc)?;
                break;
            }
            let keys = match &rest[i] {
                Value::Vector(v) => v.iter().cloned().collect(),
                other => vec![other.clone()],
            };
            let body = self.analyze(&rest[i + 1], loc)?;
            clauses.push((keys, body));
            i += 2;
        }
        Ok(Node::new(NodeKind::Case { disc, clauses, default }, loc.clone()))
    }

    fn analyze_letfn(&mut self, rest: &[Value], loc: &Option<SourceLoc>) -> ClwResult<Rc<Node>> {
        let Some(Value::Vector(bindings)) = rest.first() else {
            return Err(ClwError::Compile("letfn* requires a binding vector".into(), loc.clone()));
        };
        let items: Vec<Value> = bindings.iter().cloned().collect();
        let mut names = Vec::new();
        for pair in items.chunks(2) {
            if let Some(Value::Symbol(s)) = pair.first() {
                names.push(s.clone());
                self.frame().declare(s.name());
            }
        }
        let mut clause_groups = Vec::new();
        for (i, pair) in items.chunks(2).enumerate() {
            if let Some(fn_form) = pair.get(1) {
                let node = self.analyze(fn_form, loc)?;
                if let NodeKind::Fn { clauses, .. } = &node.kind {
                    clause_groups.push((i as u16, clauses.clone()));
                }
            }
        }
        let body_nodes: ClwResult<Vec<_>> = rest[1..].iter().map(|f| self.analyze(f, loc)).collect();
        let body = Node::new(NodeKind::Do(body_nodes?), loc.clone());
        let local_count = self.frame().next_slot;
        Ok(Node::new(NodeKind::LetFn { names, clauses: clause_groups, body, local_count }, loc.clone()))
    }
}

/// Whether `name` is one of the special forms the analyzer recognizes
/// directly, rather than as an ordinary call or macro (spec.md §4.A).
pub fn is_special_form(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn analyze_src(env: &Env, src: &str) -> ClwResult<Rc<Node>> {
        let mut r = Reader::new(src, "test").unwrap();
        let (form, loc) = r.read_top_level().unwrap().unwrap();
        let mut a = Analyzer::new(env, None);
        a.analyze_top_level(&form, Some(loc))
    }

    #[test]
    fn analyzes_if_with_two_and_three_arities() {
        let env = Env::new();
        let n = analyze_src(&env, "(if true 1 2)").unwrap();
        assert!(matches!(n.kind, NodeKind::If { .. }));
        let n2 = analyze_src(&env, "(if true 1)").unwrap();
        assert!(matches!(n2.kind, NodeKind::If { else_: None, .. }));
    }

    #[test]
    fn let_star_declares_locals_resolvable_in_body() {
        let env = Env::new();
        let n = analyze_src(&env, "(let* [x 1] x)").unwrap();
        match &n.kind {
            NodeKind::Let { bindings, .. } => assert_eq!(bindings.len(), 1),
            _ => panic!("expected let"),
        }
    }

    #[test]
    fn recur_outside_loop_is_compile_error() {
        let env = Env::new();
        assert!(analyze_src(&env, "(recur 1)").is_err());
    }

    #[test]
    fn recur_arity_mismatch_is_compile_error() {
        let env = Env::new();
        assert!(analyze_src(&env, "(loop* [x 1] (recur 1 2))").is_err());
    }

    #[test]
    fn unresolved_symbol_is_resolve_error() {
        let env = Env::new();
        assert!(analyze_src(&env, "totally-unbound-name").is_err());
    }

    #[test]
    fn fn_star_closes_over_outer_local() {
        let env = Env::new();
        let n = analyze_src(&env, "(let* [x 1] (fn* [] x))").unwrap();
        match &n.kind {
            NodeKind::Let { body, .. } => match &body.kind {
                NodeKind::Do(stmts) => match &stmts[0].kind {
                    NodeKind::Fn { clauses, .. } => match &clauses[0].body.kind {
                        NodeKind::Resolved(Binding::Upvalue { .. }) => {}
                        other => panic!("expected upvalue binding, got {other:?}"),
                    },
                    other => panic!("expected fn, got {other:?}"),
                },
                other => panic!("expected do, got {other:?}"),
            },
            other => panic!("expected let, got {other:?}"),
        }
    }
}
