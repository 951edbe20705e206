//! `Env`, `Namespace`, `Var` (spec.md §3.4).
//!
//! Namespaces materialize on `find_or_create`; vars intern on first `def`.
//! Mutation happens only via `def`, `alter_var_root`, or dynamic push/pop;
//! destruction only on full `Env` teardown — so, unlike the GC arena, vars
//! and namespaces are simple `Rc`-shared, never swept (spec.md §3.6).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{ClwError, ClwResult};
use crate::gc::Gc;
use crate::symbol::Sym;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct VarMeta {
    pub doc: Option<String>,
    pub arglists: Option<Value>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub added: Option<String>,
}

#[derive(Debug)]
pub struct VarData {
    pub ns_name: Sym,
    pub name: Sym,
    pub root: Option<Value>,
    pub dynamic: bool,
    pub is_macro: bool,
    pub meta: VarMeta,
    /// Per-thread dynamic binding stack. The runtime is single-threaded
    /// (spec.md §5), so one stack suffices; `get` returns the topmost bound
    /// value or falls back to `root`.
    bindings: Vec<Value>,
}

/// A cheap, `Rc`-shared handle to a `Var`. Compares and hashes by pointer
/// identity: two handles are the same var iff they share the same cell.
#[derive(Debug, Clone)]
pub struct VarHandle(Rc<RefCell<VarData>>);

impl VarHandle {
    fn new(ns_name: Sym, name: Sym) -> Self {
        VarHandle(Rc::new(RefCell::new(VarData {
            ns_name,
            name,
            root: None,
            dynamic: false,
            is_macro: false,
            meta: VarMeta::default(),
            bindings: Vec::new(),
        })))
    }

    pub fn name(&self) -> Sym {
        self.0.borrow().name.clone()
    }

    pub fn ns_name(&self) -> Sym {
        self.0.borrow().ns_name.clone()
    }

    pub fn is_dynamic(&self) -> bool {
        self.0.borrow().dynamic
    }

    pub fn set_dynamic(&self, dynamic: bool) {
        self.0.borrow_mut().dynamic = dynamic;
    }

    pub fn is_macro(&self) -> bool {
        self.0.borrow().is_macro
    }

    pub fn set_macro(&self, is_macro: bool) {
        self.0.borrow_mut().is_macro = is_macro;
    }

    pub fn set_meta(&self, meta: VarMeta) {
        self.0.borrow_mut().meta = meta;
    }

    pub fn meta(&self) -> VarMeta {
        self.0.borrow().meta.clone()
    }

    pub fn is_bound(&self) -> bool {
        let v = self.0.borrow();
        v.root.is_some() || !v.bindings.is_empty()
    }

    /// Topmost dynamic binding, or the root value.
    pub fn get(&self) -> ClwResult<Value> {
        let v = self.0.borrow();
        if let Some(top) = v.bindings.last() {
            return Ok(top.clone());
        }
        v.root
            .clone()
            .ok_or_else(|| ClwError::State(format!("var {}/{} is unbound", v.ns_name, v.name)))
    }

    pub fn def_root(&self, value: Value) {
        self.0.borrow_mut().root = Some(value);
    }

    pub fn alter_root(&self, f: impl FnOnce(Value) -> Value) -> ClwResult<()> {
        let mut v = self.0.borrow_mut();
        let current = v
            .root
            .clone()
            .ok_or_else(|| ClwError::State(format!("var {}/{} is unbound", v.ns_name, v.name)))?;
        v.root = Some(f(current));
        Ok(())
    }

    pub fn push_binding(&self, value: Value) -> ClwResult<()> {
        let mut v = self.0.borrow_mut();
        if !v.dynamic {
            return Err(ClwError::State(format!("var {}/{} is not dynamic", v.ns_name, v.name)));
        }
        v.bindings.push(value);
        Ok(())
    }

    pub fn pop_binding(&self) -> ClwResult<()> {
        let mut v = self.0.borrow_mut();
        if v.bindings.pop().is_none() {
            return Err(ClwError::State(format!("no binding to pop for var {}/{}", v.ns_name, v.name)));
        }
        Ok(())
    }
}

impl PartialEq for VarHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for VarHandle {}

pub struct Namespace {
    pub name: Sym,
    mappings: RefCell<HashMap<String, VarHandle>>,
    aliases: RefCell<HashMap<String, Rc<Namespace>>>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace").field("name", &self.name).finish()
    }
}

impl Namespace {
    fn new(name: Sym) -> Self {
        Namespace {
            name,
            mappings: RefCell::new(HashMap::new()),
            aliases: RefCell::new(HashMap::new()),
        }
    }

    /// Intern a var by local name, creating it on first reference.
    pub fn intern(&self, ns_name: Sym, name: &str) -> VarHandle {
        let mut mappings = self.mappings.borrow_mut();
        if let Some(existing) = mappings.get(name) {
            return existing.clone();
        }
        let name_sym = crate::symbol::intern_symbol(None, name);
        let handle = VarHandle::new(ns_name, name_sym);
        mappings.insert(name.to_string(), handle.clone());
        handle
    }

    /// Refer an already-interned var from another namespace under a local
    /// name (used by `require`/`refer`).
    pub fn refer(&self, local_name: &str, var: VarHandle) {
        self.mappings.borrow_mut().insert(local_name.to_string(), var);
    }

    pub fn resolve(&self, name: &str) -> Option<VarHandle> {
        self.mappings.borrow().get(name).cloned()
    }

    pub fn add_alias(&self, alias: &str, target: Rc<Namespace>) {
        self.aliases.borrow_mut().insert(alias.to_string(), target);
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<Rc<Namespace>> {
        self.aliases.borrow().get(alias).cloned()
    }

    pub fn mappings(&self) -> Vec<(String, VarHandle)> {
        self.mappings.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Owns namespaces, the current-namespace pointer, the GC arena, and (being
/// single-threaded) the one dynamic-binding context (spec.md §3.4).
pub struct Env {
    namespaces: RefCell<HashMap<String, Rc<Namespace>>>,
    current_ns: RefCell<String>,
    pub gc: Gc,
}

impl Env {
    pub fn new() -> Self {
        Env::with_gc(Gc::new())
    }

    /// Same as `new`, but with a `Gc` already tuned to a non-default
    /// collection threshold (`bootstrap::init` builds one from `Config`).
    pub fn with_gc(gc: Gc) -> Self {
        let env = Env {
            namespaces: RefCell::new(HashMap::new()),
            current_ns: RefCell::new("user".to_string()),
            gc,
        };
        env.find_or_create_ns("clojure.core");
        env.find_or_create_ns("user");
        env
    }

    pub fn find_or_create_ns(&self, name: &str) -> Rc<Namespace> {
        let mut namespaces = self.namespaces.borrow_mut();
        if let Some(ns) = namespaces.get(name) {
            return ns.clone();
        }
        let sym = crate::symbol::intern_symbol(None, name);
        let ns = Rc::new(Namespace::new(sym));
        namespaces.insert(name.to_string(), ns.clone());
        ns
    }

    pub fn find_ns(&self, name: &str) -> Option<Rc<Namespace>> {
        self.namespaces.borrow().get(name).cloned()
    }

    pub fn current_ns_name(&self) -> String {
        self.current_ns.borrow().clone()
    }

    pub fn set_current_ns(&self, name: &str) {
        *self.current_ns.borrow_mut() = name.to_string();
    }

    pub fn current_ns(&self) -> Rc<Namespace> {
        let name = self.current_ns_name();
        self.find_or_create_ns(&name)
    }

    pub fn def(&self, name: &str, value: Value) -> VarHandle {
        let ns = self.current_ns();
        let handle = ns.intern(ns.name.clone(), name);
        handle.def_root(value);
        handle
    }

    /// Roots for GC purposes: every var's current value across every
    /// namespace, plus every dynamic binding (spec.md §4.R.2).
    pub fn gc_roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for ns in self.namespaces.borrow().values() {
            for (_, var) in ns.mappings() {
                if let Ok(v) = var.get() {
                    roots.push(v);
                }
            }
        }
        roots
    }

    pub fn collect_garbage_if_needed(&mut self) {
        if self.gc.should_collect() {
            let roots = self.gc_roots();
            self.gc.mark_and_sweep(&roots);
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn def_and_resolve_round_trip() {
        let env = Env::new();
        env.set_current_ns("user");
        env.def("x", Value::Int(42));
        let ns = env.current_ns();
        let v = ns.resolve("x").unwrap();
        assert_eq!(v.get().unwrap(), Value::Int(42));
    }

    #[test]
    fn dynamic_binding_shadows_root_until_popped() {
        let env = Env::new();
        let handle = env.def("y", Value::Int(1));
        handle.set_dynamic(true);
        handle.push_binding(Value::Int(2)).unwrap();
        assert_eq!(handle.get().unwrap(), Value::Int(2));
        handle.pop_binding().unwrap();
        assert_eq!(handle.get().unwrap(), Value::Int(1));
    }

    #[test]
    fn pushing_binding_on_non_dynamic_var_is_state_error() {
        let env = Env::new();
        let handle = env.def("z", Value::Int(1));
        assert!(handle.push_binding(Value::Int(2)).is_err());
    }

    #[test]
    fn namespaces_materialize_on_find_or_create() {
        let env = Env::new();
        assert!(env.find_ns("foo.bar").is_none());
        env.find_or_create_ns("foo.bar");
        assert!(env.find_ns("foo.bar").is_some());
    }
}
