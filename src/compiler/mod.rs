//! Single-pass `Node` → bytecode emitter (spec.md §4.C). Mirrors the shape
//! of the tree-walk evaluator so E1 and E2 stay observably equivalent
//! (spec.md §8 invariant 1): same symbol resolution from the analyzer, same
//! arity/tail-call structure, just a different execution strategy.

pub mod chunk;
pub mod opcodes;

use std::rc::Rc;

use crate::analyzer::node::{Binding, CatchClause, FnClause, LetBinding, Node, NodeKind};
use crate::env::VarHandle;
use crate::error::{ClwError, ClwResult};
use crate::symbol::{intern_symbol, Sym};
use crate::value::Value;
use chunk::{Proto, ProtoBuilder};
use opcodes::Opcode;

struct LoopCtx {
    start: usize,
    slots: Vec<u16>,
}

/// Compiles one `fn*`/`letfn*` clause's `Node` body at a time into a
/// `Proto`. Stateless beyond the in-progress loop stack; var references
/// resolve through the analyzer's `Binding::Var` handles directly rather
/// than needing an `Env` of its own.
pub struct Compiler {
    loop_stack: Vec<LoopCtx>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { loop_stack: Vec::new() }
    }

    /// Compile every clause of a `Fn` node into parallel `Proto`s (one per
    /// arity), in the same order as the clauses themselves.
    pub fn compile_fn_clauses(&mut self, name: &str, clauses: &[FnClause]) -> ClwResult<Vec<Rc<Proto>>> {
        clauses.iter().map(|c| self.compile_clause(name, c)).collect()
    }

    fn compile_clause(&mut self, name: &str, clause: &FnClause) -> ClwResult<Rc<Proto>> {
        let mut b = Proto::builder(name);
        b.set_local_count(clause.local_count);
        let arity_min = clause.param_slots.len() as u16;
        b.set_arity(arity_min, arity_min, clause.variadic_slot.is_some());
        for cap in &clause.captures {
            b.add_upvalue(chunk::UpvalDesc { index: cap.index, from_parent_local: cap.from_parent_local });
        }
        let mut slots = clause.param_slots.clone();
        if let Some(v) = clause.variadic_slot {
            slots.push(v);
        }
        let start = b.here();
        self.loop_stack.push(LoopCtx { start, slots });
        self.compile_node(&mut b, &clause.body)?;
        self.loop_stack.pop();
        b.emit_op(Opcode::Ret);
        Ok(Rc::new(b.build()))
    }

    fn slot_u8(&self, slot: u16) -> ClwResult<u8> {
        u8::try_from(slot).map_err(|_| ClwError::Compile("more than 256 locals/upvalues in one frame".into(), None))
    }

    fn compile_node(&mut self, b: &mut ProtoBuilder, node: &Node) -> ClwResult<()> {
        if let Some(loc) = &node.loc {
            b.set_line(loc.line, loc.column);
        }
        match &node.kind {
            NodeKind::Const(v) => self.compile_const(b, v),
            NodeKind::Quote(v) => self.compile_const(b, v),
            NodeKind::Resolved(binding) => self.compile_resolved(b, binding),
            NodeKind::If { test, then, else_ } => self.compile_if(b, test, then, else_.as_deref()),
            NodeKind::Do(stmts) => self.compile_do(b, stmts),
            NodeKind::Let { bindings, body, .. } => self.compile_let(b, bindings, body),
            NodeKind::Loop { bindings, body, .. } => self.compile_loop(b, bindings, body),
            NodeKind::Recur(args) => self.compile_recur(b, args),
            NodeKind::Def { var, init } => {
                if let Some(init) = init {
                    self.compile_node(b, init)?;
                } else {
                    b.emit_op(Opcode::PushNil);
                }
                let sym_idx = self.var_symbol_constant(b, var);
                b.emit_op_u16(Opcode::Def, sym_idx);
                Ok(())
            }
            NodeKind::VarSpecial(var) => {
                let sym_idx = self.var_symbol_constant(b, var);
                b.emit_op_u16(Opcode::VarGet, sym_idx);
                Ok(())
            }
            NodeKind::Throw(v) => {
                self.compile_node(b, v)?;
                b.emit_op(Opcode::Throw);
                Ok(())
            }
            NodeKind::Try { body, catches, finally } => self.compile_try(b, body, catches, finally.as_deref()),
            NodeKind::SetBang { target, value } => self.compile_set_bang(b, target, value),
            NodeKind::Call { callee, args } => self.compile_call(b, callee, args),
            NodeKind::Fn { name, clauses } => self.compile_fn_literal(b, name.as_ref().map(|s| s.name()).unwrap_or("fn"), clauses),
            NodeKind::LazySeq(clause) => self.compile_lazy_seq(b, clause),
            NodeKind::VectorLit(items) => self.compile_aggregate(b, items, Opcode::MakeVector),
            NodeKind::SetLit(items) => self.compile_aggregate(b, items, Opcode::MakeSet),
            NodeKind::MapLit(pairs) => self.compile_map_lit(b, pairs),
            NodeKind::MonitorEnter(v) | NodeKind::MonitorExit(v) => {
                self.compile_node(b, v)?;
                b.emit_op(Opcode::Pop);
                b.emit_op(Opcode::PushNil);
                Ok(())
            }
            // Host interop (`new`, `.method`), type definitions, and
            // `import` have no runtime surface yet; both engines no-op to
            // nil rather than guess at a host reflection bridge.
            NodeKind::New { .. }
            | NodeKind::InteropCall { .. }
            | NodeKind::DefType { .. }
            | NodeKind::Reify { .. }
            | NodeKind::Import(_) => {
                b.emit_op(Opcode::PushNil);
                Ok(())
            }
            NodeKind::Case { disc, clauses, default } => self.compile_case(b, disc, clauses, default),
            NodeKind::LetFn { names, clauses, body, .. } => self.compile_letfn(b, names, clauses, body),
        }
    }

    fn compile_const(&mut self, b: &mut ProtoBuilder, v: &Value) -> ClwResult<()> {
        match v {
            Value::Nil => {
                b.emit_op(Opcode::PushNil);
            }
            Value::Bool(true) => {
                b.emit_op(Opcode::PushTrue);
            }
            Value::Bool(false) => {
                b.emit_op(Opcode::PushFalse);
            }
            Value::Int(i) if *i >= i8::MIN as i64 && *i <= i8::MAX as i64 => {
                b.emit_op_u8(Opcode::PushIntSmall, *i as u8);
            }
            other => {
                let idx = b.add_constant(other.clone());
                b.emit_op_u16(Opcode::PushConst, idx);
            }
        }
        Ok(())
    }

    fn compile_resolved(&mut self, b: &mut ProtoBuilder, binding: &Binding) -> ClwResult<()> {
        match binding {
            Binding::Local { slot, .. } => {
                b.emit_op_u8(Opcode::LocalGet, self.slot_u8(*slot)?);
            }
            Binding::Upvalue { index, .. } => {
                b.emit_op_u8(Opcode::UpvalGet, self.slot_u8(*index)?);
            }
            Binding::Var(var) => {
                let idx = self.var_symbol_constant(b, var);
                b.emit_op_u16(Opcode::VarGet, idx);
            }
        }
        Ok(())
    }

    /// A var reference compiles to a constant-pool symbol rather than a raw
    /// pointer, so compiled `Proto`s stay portable across a fresh `Env`
    /// (module binary format, spec.md §6.1); the VM re-resolves it through
    /// the current namespace at call time.
    fn var_symbol_constant(&self, b: &mut ProtoBuilder, var: &VarHandle) -> u16 {
        let ns = var.ns_name();
        let name = var.name();
        b.add_constant(Value::Symbol(intern_symbol(Some(ns.name()), name.name())))
    }

    fn compile_if(&mut self, b: &mut ProtoBuilder, test: &Node, then: &Node, else_: Option<&Node>) -> ClwResult<()> {
        self.compile_node(b, test)?;
        let j_false = b.emit_jump(Opcode::JumpIfFalse);
        self.compile_node(b, then)?;
        let j_end = b.emit_jump(Opcode::Jump);
        b.patch_jump(j_false);
        match else_ {
            Some(e) => self.compile_node(b, e)?,
            None => {
                b.emit_op(Opcode::PushNil);
            }
        }
        b.patch_jump(j_end);
        Ok(())
    }

    fn compile_do(&mut self, b: &mut ProtoBuilder, stmts: &[Rc<Node>]) -> ClwResult<()> {
        if stmts.is_empty() {
            b.emit_op(Opcode::PushNil);
            return Ok(());
        }
        for stmt in &stmts[..stmts.len() - 1] {
            self.compile_node(b, stmt)?;
            b.emit_op(Opcode::Pop);
        }
        self.compile_node(b, stmts.last().unwrap())
    }

    fn compile_let(&mut self, b: &mut ProtoBuilder, bindings: &[LetBinding], body: &Node) -> ClwResult<()> {
        for binding in bindings {
            self.compile_node(b, &binding.init)?;
            b.emit_op_u8(Opcode::LocalSet, self.slot_u8(binding.slot)?);
        }
        self.compile_node(b, body)
    }

    fn compile_loop(&mut self, b: &mut ProtoBuilder, bindings: &[LetBinding], body: &Node) -> ClwResult<()> {
        for binding in bindings {
            self.compile_node(b, &binding.init)?;
            b.emit_op_u8(Opcode::LocalSet, self.slot_u8(binding.slot)?);
        }
        let start = b.here();
        let slots = bindings.iter().map(|lb| lb.slot).collect();
        self.loop_stack.push(LoopCtx { start, slots });
        let result = self.compile_node(b, body);
        self.loop_stack.pop();
        result
    }

    fn compile_recur(&mut self, b: &mut ProtoBuilder, args: &[Rc<Node>]) -> ClwResult<()> {
        let (start, slots) = {
            let ctx = self
                .loop_stack
                .last()
                .ok_or_else(|| ClwError::Compile("recur used outside of fn*/loop* tail position".into(), None))?;
            (ctx.start, ctx.slots.clone())
        };
        for arg in args {
            self.compile_node(b, arg)?;
        }
        for slot in slots.iter().rev() {
            b.emit_op_u8(Opcode::LocalSet, self.slot_u8(*slot)?);
        }
        self.emit_backward_jump(b, start);
        Ok(())
    }

    /// Emit an unconditional jump to an already-known (past) code offset;
    /// `ProtoBuilder::patch_jump` only patches forward to the *current*
    /// position, so a backward jump computes its offset directly instead.
    fn emit_backward_jump(&self, b: &mut ProtoBuilder, target: usize) {
        let at = b.emit_op(Opcode::Jump);
        let operand_at = at + 1;
        let offset = (target as isize - (operand_at as isize + 2)) as i16;
        b.emit_u16(offset as u16);
    }

    fn compile_set_bang(&mut self, b: &mut ProtoBuilder, target: &Binding, value: &Node) -> ClwResult<()> {
        self.compile_node(b, value)?;
        match target {
            Binding::Local { slot, .. } => {
                b.emit_op(Opcode::Dup);
                b.emit_op_u8(Opcode::LocalSet, self.slot_u8(*slot)?);
            }
            Binding::Upvalue { index, .. } => {
                b.emit_op(Opcode::Dup);
                b.emit_op_u8(Opcode::UpvalSet, self.slot_u8(*index)?);
            }
            Binding::Var(var) => {
                let idx = self.var_symbol_constant(b, var);
                b.emit_op(Opcode::Dup);
                b.emit_op_u16(Opcode::VarSet, idx);
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, b: &mut ProtoBuilder, callee: &Node, args: &[Rc<Node>]) -> ClwResult<()> {
        self.compile_node(b, callee)?;
        for arg in args {
            self.compile_node(b, arg)?;
        }
        let argc = u8::try_from(args.len())
            .map_err(|_| ClwError::Compile("more than 255 arguments in a single call".into(), None))?;
        b.emit_op_u8(Opcode::Call, argc);
        Ok(())
    }

    fn compile_fn_literal(&mut self, b: &mut ProtoBuilder, name: &str, clauses: &[FnClause]) -> ClwResult<()> {
        let protos = self.compile_fn_clauses(name, clauses)?;
        let (first_idx, count) = self.add_clause_protos(b, protos)?;
        b.emit_op(Opcode::MakeClosure);
        b.emit_u8(first_idx);
        b.emit_u8(count);
        Ok(())
    }

    /// `(lazy-seq body…)`: a single zero-arg clause wrapped in `MakeClosure`
    /// then `MakeLazySeq`, which pops that closure and holds it unevaluated
    /// in a `lazy-seq` cell (spec.md §5).
    fn compile_lazy_seq(&mut self, b: &mut ProtoBuilder, clause: &FnClause) -> ClwResult<()> {
        let proto = self.compile_clause("lazy-seq", clause)?;
        let (first_idx, count) = self.add_clause_protos(b, vec![proto])?;
        b.emit_op(Opcode::MakeClosure);
        b.emit_u8(first_idx);
        b.emit_u8(count);
        b.emit_op(Opcode::MakeLazySeq);
        Ok(())
    }

    /// Appends a contiguous run of per-clause `Proto`s as children and
    /// returns `(first_child_index, clause_count)` for `MakeClosure`'s
    /// 2-byte immediate.
    fn add_clause_protos(&self, b: &mut ProtoBuilder, protos: Vec<Rc<Proto>>) -> ClwResult<(u8, u8)> {
        let count = protos.len();
        let mut first_idx = 0u16;
        for (i, p) in protos.into_iter().enumerate() {
            let idx = b.add_child(p);
            if i == 0 {
                first_idx = idx;
            }
        }
        let first_byte = u8::try_from(first_idx).map_err(|_| ClwError::Compile("more than 256 child protos in one frame".into(), None))?;
        let count_byte = u8::try_from(count).map_err(|_| ClwError::Compile("fn* has more than 255 arity clauses".into(), None))?;
        Ok((first_byte, count_byte))
    }

    fn compile_aggregate(&mut self, b: &mut ProtoBuilder, items: &[Rc<Node>], op: Opcode) -> ClwResult<()> {
        for item in items {
            self.compile_node(b, item)?;
        }
        let n = u8::try_from(items.len()).map_err(|_| ClwError::Compile("literal has more than 255 elements".into(), None))?;
        b.emit_op_u8(op, n);
        Ok(())
    }

    fn compile_map_lit(&mut self, b: &mut ProtoBuilder, pairs: &[(Rc<Node>, Rc<Node>)]) -> ClwResult<()> {
        for (k, v) in pairs {
            self.compile_node(b, k)?;
            self.compile_node(b, v)?;
        }
        let n = u8::try_from(pairs.len()).map_err(|_| ClwError::Compile("map literal has more than 255 entries".into(), None))?;
        b.emit_op_u8(Opcode::MakeMap, n);
        Ok(())
    }

    /// `try`/`catch`/`finally` compile to plain sequential code plus entries
    /// in the proto's exception table (`chunk::CatchEntry`); the VM matches
    /// a thrown value's class against the table at the throwing offset and
    /// jumps to the handler, so no dedicated try/catch opcodes are emitted.
    fn compile_try(
        &mut self,
        b: &mut ProtoBuilder,
        body: &Node,
        catches: &[CatchClause],
        finally: Option<&Node>,
    ) -> ClwResult<()> {
        let body_start = b.here();
        self.compile_node(b, body)?;
        let to_after = b.emit_jump(Opcode::Jump);

        let mut handler_ends = Vec::new();
        for catch in catches {
            let handler_pc = b.here();
            b.emit_op_u8(Opcode::LocalSet, self.slot_u8(catch.binding_slot)?);
            self.compile_node(b, &catch.body)?;
            handler_ends.push(b.emit_jump(Opcode::Jump));
            b.add_catch(chunk::CatchEntry {
                start: body_start as u32,
                end: to_after as u32,
                handler: handler_pc as u32,
                class: Some(Value::Symbol(catch.class.clone())),
                binding_slot: catch.binding_slot,
            });
        }

        let after_handlers = b.here();
        b.patch_jump(to_after);
        for j in handler_ends {
            b.patch_jump(j);
        }

        match finally {
            Some(f) => {
                self.compile_node(b, f)?;
                b.emit_op(Opcode::Pop);
                let skip_rethrow = b.emit_jump(Opcode::Jump);

                let reentry_handler = b.here();
                self.compile_node(b, f)?;
                b.emit_op(Opcode::Pop);
                b.emit_op(Opcode::Throw);
                b.patch_jump(skip_rethrow);

                b.add_catch(chunk::CatchEntry {
                    start: body_start as u32,
                    end: after_handlers as u32,
                    handler: reentry_handler as u32,
                    class: None,
                    binding_slot: 0,
                });
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// `case*` tests the discriminant against every constant of every clause
    /// (a clause may list several, e.g. `(case x 2 3 :two-or-three ...)`);
    /// the first match short-circuits into that clause's body.
    fn compile_case(
        &mut self,
        b: &mut ProtoBuilder,
        disc: &Node,
        clauses: &[(Vec<Value>, Rc<Node>)],
        default: &Node,
    ) -> ClwResult<()> {
        self.compile_node(b, disc)?;
        let mut end_jumps = Vec::new();
        for (keys, body) in clauses {
            let mut match_jumps = Vec::new();
            for key in keys {
                b.emit_op(Opcode::Dup);
                let const_idx = b.add_constant(key.clone());
                b.emit_op_u16(Opcode::PushConst, const_idx);
                b.emit_op(Opcode::Eq);
                match_jumps.push(b.emit_jump(Opcode::JumpIfTrue));
            }
            let skip = b.emit_jump(Opcode::Jump);
            for j in match_jumps {
                b.patch_jump(j);
            }
            b.emit_op(Opcode::Pop);
            self.compile_node(b, body)?;
            end_jumps.push(b.emit_jump(Opcode::Jump));
            b.patch_jump(skip);
        }
        b.emit_op(Opcode::Pop);
        self.compile_node(b, default)?;
        for j in end_jumps {
            b.patch_jump(j);
        }
        Ok(())
    }

    fn compile_letfn(
        &mut self,
        b: &mut ProtoBuilder,
        names: &[Sym],
        clauses: &[(u16, Vec<FnClause>)],
        body: &Node,
    ) -> ClwResult<()> {
        for (i, (slot, clause_set)) in clauses.iter().enumerate() {
            let name = names.get(i).map(|s| s.name()).unwrap_or("letfn");
            let protos = self.compile_fn_clauses(name, clause_set)?;
            let (first_idx, count) = self.add_clause_protos(b, protos)?;
            b.emit_op(Opcode::MakeClosure);
            b.emit_u8(first_idx);
            b.emit_u8(count);
            b.emit_op_u8(Opcode::LocalSet, self.slot_u8(*slot)?);
        }
        self.compile_node(b, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::env::Env;
    use crate::reader::Reader;

    fn compile_src(env: &Env, src: &str) -> Rc<Proto> {
        let mut r = Reader::new(src, "test").unwrap();
        let (form, loc) = r.read_top_level().unwrap().unwrap();
        let mut a = Analyzer::new(env, None);
        let node = a.analyze_top_level(&form, Some(loc)).unwrap();
        let mut c = Compiler::new();
        let clause = FnClause { param_slots: vec![], variadic_slot: None, body: node, local_count: 8, captures: vec![] };
        c.compile_clause("top-level", &clause).unwrap()
    }

    #[test]
    fn compiles_if_with_both_branches() {
        let env = Env::new();
        let proto = compile_src(&env, "(if true 1 2)");
        assert!(proto.code().contains(&(Opcode::JumpIfFalse as u8)));
        assert!(proto.code().contains(&(Opcode::Ret as u8)));
    }

    #[test]
    fn compiles_loop_recur_as_backward_jump() {
        let env = Env::new();
        let proto = compile_src(&env, "(loop* [x 0] (if x x (recur 1)))");
        assert!(proto.code().contains(&(Opcode::Jump as u8)));
        assert!(proto.code().contains(&(Opcode::LocalSet as u8)));
    }

    #[test]
    fn recur_outside_loop_is_compile_error() {
        // The analyzer already rejects this; this exercises the compiler's
        // own defensive check on a hand-built node directly.
        let node = Node::new(NodeKind::Recur(vec![]), None);
        let mut c = Compiler::new();
        let mut b = Proto::builder("x");
        assert!(c.compile_node(&mut b, &node).is_err());
    }
}
