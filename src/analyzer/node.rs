//! Typed analyzer IR (spec.md §4.A). The analyzer turns a reader `Form`
//! (itself a `Value` with source metadata) into a `Node` tree: every special
//! form gets its own variant so the compiler and tree-walk evaluator can
//! match exhaustively instead of re-dispatching on symbol names at runtime.

use std::rc::Rc;

use crate::env::VarHandle;
use crate::error::SourceLoc;
use crate::symbol::Sym;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: Option<SourceLoc>,
}

impl Node {
    pub fn new(kind: NodeKind, loc: Option<SourceLoc>) -> Rc<Node> {
        Rc::new(Node { kind, loc })
    }
}

/// How a local was resolved by the analyzer (spec.md §4.A: "local slot,
/// var, class, or unresolved error").
#[derive(Debug, Clone)]
pub enum Binding {
    Local { slot: u16, name: Sym },
    Upvalue { index: u16, name: Sym },
    Var(VarHandle),
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub class: Sym,
    pub binding_slot: u16,
    pub body: Rc<Node>,
}

#[derive(Debug, Clone)]
pub struct LetBinding {
    pub slot: u16,
    pub init: Rc<Node>,
}

/// One captured value a closure pulls in from its defining scope: either a
/// slot in that scope's own locals, or (for a closure nested inside another
/// closure) an entry already present in that scope's own upvalue list.
/// Shared shape with the compiler's `chunk::UpvalDesc` — kept independent
/// here so the analyzer has no dependency on the compiler module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDesc {
    pub index: u16,
    pub from_parent_local: bool,
}

#[derive(Debug, Clone)]
pub struct FnClause {
    pub param_slots: Vec<u16>,
    pub variadic_slot: Option<u16>,
    pub body: Rc<Node>,
    pub local_count: u16,
    /// Every arity clause of one `fn*`/`letfn*` binding closes over the same
    /// lexical scope, so this list is identical across sibling clauses.
    pub captures: Vec<CaptureDesc>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Const(Value),
    /// Resolved symbol reference: local slot, captured upvalue, or var.
    Resolved(Binding),
    If { test: Rc<Node>, then: Rc<Node>, else_: Option<Rc<Node>> },
    Do(Vec<Rc<Node>>),
    Let { bindings: Vec<LetBinding>, body: Rc<Node>, local_count: u16 },
    /// `loop*`: like `let*` but establishes a `recur` target.
    Loop { bindings: Vec<LetBinding>, body: Rc<Node>, local_count: u16 },
    Recur(Vec<Rc<Node>>),
    Fn { name: Option<Sym>, clauses: Vec<FnClause> },
    /// `(lazy-seq body…)`: a single zero-arg clause whose body is evaluated
    /// at most once, on first realization (spec.md §5).
    LazySeq(FnClause),
    Def { var: VarHandle, init: Option<Rc<Node>> },
    Quote(Value),
    VarSpecial(VarHandle),
    Throw(Rc<Node>),
    Try { body: Rc<Node>, catches: Vec<CatchClause>, finally: Option<Rc<Node>> },
    New { class: Sym, args: Vec<Rc<Node>> },
    SetBang { target: Binding, value: Rc<Node> },
    /// `(.method obj args…)` or `Class/method` rewritten by the analyzer.
    InteropCall { target: Rc<Node>, method: Sym, args: Vec<Rc<Node>> },
    MonitorEnter(Rc<Node>),
    MonitorExit(Rc<Node>),
    DefType { name: Sym, fields: Vec<Sym> },
    Reify { protocols: Vec<Sym>, methods: Vec<(Sym, FnClause)> },
    Case { disc: Rc<Node>, clauses: Vec<(Vec<Value>, Rc<Node>)>, default: Rc<Node> },
    Import(Sym),
    LetFn { names: Vec<Sym>, clauses: Vec<(u16, Vec<FnClause>)>, body: Rc<Node>, local_count: u16 },
    Call { callee: Rc<Node>, args: Vec<Rc<Node>> },
    VectorLit(Vec<Rc<Node>>),
    MapLit(Vec<(Rc<Node>, Rc<Node>)>),
    SetLit(Vec<Rc<Node>>),
}
