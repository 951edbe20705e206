//! Symbol and keyword interning (spec.md §4.R.1).
//!
//! Symbols and keywords intern on `(ns, name)`. Two interned symbols with
//! equal ns/name compare pointer-identical and hash from the interned
//! pointer, so equality and hashing are O(1) regardless of string length.
//! The intern table lives outside the GC arena (spec.md §3.6): it is never
//! swept, only ever grows for the lifetime of the process.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Mutex;

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
struct Interned {
    ns: Option<Rc<str>>,
    name: Rc<str>,
}

/// An interned symbol or keyword. Cheap to `Clone` (pointer copy), `Eq` by
/// pointer, `Hash` by pointer address.
#[derive(Clone)]
pub struct Sym(Rc<Interned>);

impl Sym {
    pub fn ns(&self) -> Option<&str> {
        self.0.ns.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Render as `ns/name` or just `name` if unqualified.
    pub fn qualified(&self) -> String {
        match &self.0.ns {
            Some(ns) => format!("{ns}/{}", self.0.name),
            None => self.0.name.to_string(),
        }
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Sym {}

impl Hash for Sym {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

struct InternTable {
    symbols: HashMap<Interned, Rc<Interned>>,
    keywords: HashMap<Interned, Rc<Interned>>,
}

impl InternTable {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            keywords: HashMap::new(),
        }
    }
}

// Interning is a process-global, append-only table; a Mutex is sufficient
// since the core runtime itself is single-threaded (spec.md §5) and this
// just guards against the REPL/host embedding touching it from another OS
// thread during startup.
static TABLE: Mutex<Option<InternTable>> = Mutex::new(None);

fn with_table<R>(f: impl FnOnce(&mut InternTable) -> R) -> R {
    let mut guard = TABLE.lock().unwrap();
    let table = guard.get_or_insert_with(InternTable::new);
    f(table)
}

/// Intern a symbol by `(ns, name)`. Repeated calls with equal ns/name return
/// the same interned pointer (spec.md invariant #5).
pub fn intern_symbol(ns: Option<&str>, name: &str) -> Sym {
    with_table(|t| {
        let key = Interned {
            ns: ns.map(Rc::from),
            name: Rc::from(name),
        };
        if let Some(existing) = t.symbols.get(&key) {
            return Sym(existing.clone());
        }
        let rc = Rc::new(key.clone());
        t.symbols.insert(key, rc.clone());
        Sym(rc)
    })
}

pub fn intern_keyword(ns: Option<&str>, name: &str) -> Sym {
    with_table(|t| {
        let key = Interned {
            ns: ns.map(Rc::from),
            name: Rc::from(name),
        };
        if let Some(existing) = t.keywords.get(&key) {
            return Sym(existing.clone());
        }
        let rc = Rc::new(key.clone());
        t.keywords.insert(key, rc.clone());
        Sym(rc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_intern_pointer_identical() {
        let a = intern_symbol(Some("a"), "b");
        let b = intern_symbol(Some("a"), "b");
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn symbols_and_keywords_are_distinct_tables() {
        let s = intern_symbol(None, "foo");
        let k = intern_keyword(None, "foo");
        assert_eq!(s.name(), k.name());
        assert!(!Rc::ptr_eq(&s.0, &k.0));
    }

    #[test]
    fn qualified_name_formats_ns_slash_name() {
        let s = intern_symbol(Some("clojure.core"), "map");
        assert_eq!(s.qualified(), "clojure.core/map");
    }
}
