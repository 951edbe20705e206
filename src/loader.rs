//! Namespace graph / `require`/`ns` (spec.md §4.L). Resolution order:
//! already-loaded, then filesystem search path (namespace `a.b-c` maps to
//! `a/b_c.clj`, per spec.md §4.L). There is no embedded library table in
//! this build — the representative `clojure.core` subset is entirely
//! native (`src/builtins/`), so nothing ships as loadable source yet; the
//! search path exists for user namespaces.
//!
//! State lives in thread-locals rather than on `Env`, the same seam
//! `bootstrap.rs` uses for the dispatch vtable: `require`/`ns` are
//! builtins/macros with only `(&mut Env, &[Value])` to work with, and
//! adding a field to `Env` would ripple through every existing
//! constructor call site.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::dispatch::DispatchVTable;
use crate::env::Env;
use crate::error::ClwError;
use crate::error::ClwResult;
use crate::reader::Reader;

thread_local! {
    static SEARCH_PATHS: RefCell<Vec<PathBuf>> = const { RefCell::new(Vec::new()) };
    static LOADED: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
    static LOADING: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Sets the filesystem search path `require` walks for namespaces not
/// already loaded. Called once from `main.rs`/test setup; empty by
/// default (bootstrap's own namespaces are all native).
pub fn set_search_paths(paths: Vec<PathBuf>) {
    SEARCH_PATHS.with(|p| *p.borrow_mut() = paths);
}

/// `a.b-c` -> `a/b_c.clj` (spec.md §4.L).
fn namespace_to_relative_path(ns: &str) -> PathBuf {
    let mut path = String::new();
    for ch in ns.chars() {
        match ch {
            '.' => path.push('/'),
            '-' => path.push('_'),
            other => path.push(other),
        }
    }
    path.push_str(".clj");
    PathBuf::from(path)
}

fn find_source(ns: &str) -> Option<PathBuf> {
    let rel = namespace_to_relative_path(ns);
    SEARCH_PATHS.with(|paths| paths.borrow().iter().map(|root| root.join(&rel)).find(|p| p.exists()))
}

/// Loads `ns` and everything it in turn requires, unless already loaded.
/// A namespace still marked `LOADING` when re-requested is a cycle
/// (spec.md §4.L: "broken by a loaded-during-loading set").
pub fn require(env: &mut Env, vtable: &DispatchVTable, ns: &str) -> ClwResult<()> {
    if LOADED.with(|l| l.borrow().contains(ns)) {
        return Ok(());
    }
    if LOADING.with(|l| !l.borrow_mut().insert(ns.to_string())) {
        return Err(ClwError::State(format!("circular require detected loading {ns}")));
    }
    let result = load_namespace(env, vtable, ns);
    LOADING.with(|l| {
        l.borrow_mut().remove(ns);
    });
    result?;
    LOADED.with(|l| {
        l.borrow_mut().insert(ns.to_string());
    });
    Ok(())
}

fn load_namespace(env: &mut Env, vtable: &DispatchVTable, ns: &str) -> ClwResult<()> {
    let Some(path) = find_source(ns) else {
        return Err(ClwError::Io(format!("no source found for namespace {ns} on the search path")));
    };
    let src = std::fs::read_to_string(&path).map_err(|e| ClwError::Io(format!("reading {}: {e}", path.display())))?;
    let file = path.to_string_lossy().into_owned();
    let saved_ns = env.current_ns_name();
    env.find_or_create_ns(ns);
    env.set_current_ns(ns);
    let mut reader = Reader::new(&src, &file)?;
    let outcome = (|| -> ClwResult<()> {
        while let Some((form, _loc)) = reader.read_top_level()? {
            crate::bootstrap::eval_form(env, vtable, &form)?;
        }
        Ok(())
    })();
    env.set_current_ns(&saved_ns);
    outcome
}

/// Handles `(:require [ns.name :as alias] [ns.name :refer [a b]] ns.name)`
/// clauses as they appear inside `ns`/a standalone `require` call.
pub fn process_require_clauses(env: &mut Env, vtable: &DispatchVTable, into_ns: &str, clauses: &[crate::value::Value]) -> ClwResult<()> {
    use crate::value::Value;
    for clause in clauses {
        let (target, alias, refers) = match clause {
            Value::Symbol(s) => (s.qualified(), None, Vec::new()),
            Value::Vector(v) => {
                let items: Vec<Value> = v.iter().cloned().collect();
                let Some(Value::Symbol(target)) = items.first() else {
                    return Err(ClwError::Type("require clause must start with a namespace symbol".into()));
                };
                let mut alias = None;
                let mut refers = Vec::new();
                let mut i = 1;
                while i < items.len() {
                    match &items[i] {
                        Value::Keyword(k) if k.name() == "as" => {
                            if let Some(Value::Symbol(a)) = items.get(i + 1) {
                                alias = Some(a.name().to_string());
                            }
                            i += 2;
                        }
                        Value::Keyword(k) if k.name() == "refer" => {
                            if let Some(Value::Vector(names)) = items.get(i + 1) {
                                for n in names.iter() {
                                    if let Value::Symbol(s) = n {
                                        refers.push(s.name().to_string());
                                    }
                                }
                            }
                            i += 2;
                        }
                        _ => i += 1,
                    }
                }
                (target.qualified(), alias, refers)
            }
            other => return Err(ClwError::Type(format!("require clause must be a symbol or vector, got {}", other.type_tag()))),
        };
        require(env, vtable, &target)?;
        let target_ns = env.find_or_create_ns(&target);
        let dest_ns = env.find_or_create_ns(into_ns);
        if let Some(alias) = alias {
            dest_ns.add_alias(&alias, target_ns.clone());
        }
        for name in refers {
            if let Some(var) = target_ns.resolve(&name) {
                dest_ns.refer(&name, var);
            }
        }
    }
    Ok(())
}

/// Installs `ns`/`require`/`in-ns` as macros, the same pattern
/// `builtins/protocols.rs` uses for forms `analyzer/mod.rs`'s
/// `SPECIAL_FORMS` doesn't recognize: perform the effect directly during
/// macro expansion and hand back `(quote name)`.
pub fn install(env: &mut Env, vtable: &DispatchVTable) {
    use crate::fn_val::{Arity, Builtin, FnVal};
    use crate::gc::HeapObj;
    use crate::value::Value;

    fn quote(name: &str) -> Value {
        Value::List(crate::collections::PList::from_vec(vec![
            Value::Symbol(crate::symbol::intern_symbol(None, "quote")),
            Value::Symbol(crate::symbol::intern_symbol(None, name)),
        ]))
    }

    let mut def = |env: &mut Env, name: &str, arity: Arity, f: crate::builtins::Native| {
        let sym = crate::symbol::intern_symbol(None, name);
        let r = env.gc.alloc(HeapObj::Closure(FnVal::Builtin(Builtin { name: sym, arity, func: f, captured: vec![] })));
        let core = env.find_or_create_ns("clojure.core");
        core.intern(core.name.clone(), name).def_root(Value::Fn(r));
        core.resolve(name).unwrap().set_macro(true);
    };

    let vt = vtable.clone();
    def(
        env,
        "in-ns",
        Arity::exact(1),
        std::rc::Rc::new(move |env: &mut Env, args: &[Value]| {
            let Value::Symbol(s) = &args[0] else {
                return Err(ClwError::Type("in-ns expects a namespace symbol".into()));
            };
            env.find_or_create_ns(s.name());
            env.set_current_ns(s.name());
            Ok(quote(s.name()))
        }),
    );

    let vt2 = vtable.clone();
    def(
        env,
        "require",
        Arity::variadic(1),
        std::rc::Rc::new(move |env: &mut Env, args: &[Value]| {
            let cur = env.current_ns_name();
            process_require_clauses(env, &vt2, &cur, args)?;
            Ok(Value::Nil)
        }),
    );

    let vt3 = vt.clone();
    def(
        env,
        "ns",
        Arity::variadic(1),
        std::rc::Rc::new(move |env: &mut Env, args: &[Value]| {
            let Value::Symbol(name) = &args[0] else {
                return Err(ClwError::Type("ns expects a namespace symbol".into()));
            };
            env.find_or_create_ns(name.name());
            env.set_current_ns(name.name());
            let core = env.find_or_create_ns("clojure.core");
            let dest = env.find_or_create_ns(name.name());
            for (n, var) in core.mappings() {
                dest.refer(&n, var);
            }
            for clause in &args[1..] {
                if let Value::List(l) = clause {
                    if let Some(Value::Keyword(k)) = l.first() {
                        if k.name() == "require" {
                            let rest: Vec<Value> = l.rest().iter_values().cloned().collect();
                            process_require_clauses(env, &vt3, name.name(), &rest)?;
                        }
                    }
                }
            }
            Ok(quote(name.name()))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_to_relative_path_munges_dots_and_dashes() {
        assert_eq!(namespace_to_relative_path("a.b-c"), PathBuf::from("a/b_c.clj"));
    }

    #[test]
    fn requiring_a_namespace_with_no_source_on_the_path_is_an_io_error() {
        let mut env = Env::new();
        let vtable = crate::bootstrap::init(&crate::config::Config::default()).unwrap().1;
        let err = require(&mut env, &vtable, "does.not.exist").unwrap_err();
        assert_eq!(err.kind(), "io_error");
    }
}
