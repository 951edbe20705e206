//! Destructuring expansion (spec.md §4.A): vector and map binding patterns
//! are macro-expanded into a flat sequence of plain symbol bindings against
//! gensym'd temporaries, the same way `clojure.core/destructure` works, so
//! the rest of the analyzer only ever has to resolve symbols.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::collections::PVector;
use crate::error::ClwResult;
use crate::symbol::intern_symbol;
use crate::value::Value;

static DESTRUCTURE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn gensym(base: &str) -> Value {
    let n = DESTRUCTURE_COUNTER.fetch_add(1, Ordering::Relaxed);
    Value::Symbol(intern_symbol(None, &format!("{base}__{n}__destructure__")))
}

fn sym_name(v: &Value) -> Option<&str> {
    match v {
        Value::Symbol(s) => Some(s.name()),
        _ => None,
    }
}

/// Expand one `[pattern init]` binding pair into a flat list of
/// `[symbol form]` pairs. `pattern` may itself be a plain symbol, in which
/// case the result is just `[(pattern, init)]`.
pub fn expand_pair(pattern: &Value, init: Value) -> ClwResult<Vec<(Value, Value)>> {
    match pattern {
        Value::Symbol(_) => Ok(vec![(pattern.clone(), init)]),
        Value::Vector(items) => expand_vector(items, init),
        Value::Map(_) => expand_map(pattern, init),
        other => Ok(vec![(other.clone(), init)]),
    }
}

fn nth_form(coll: Value, index: usize) -> Value {
    Value::List(crate::collections::PList::from_vec(vec![
        Value::Symbol(intern_symbol(Some("clojure.core"), "nth")),
        coll,
        Value::Int(index as i64),
        Value::Nil,
    ]))
}

fn nthrest_form(coll: Value, index: usize) -> Value {
    Value::List(crate::collections::PList::from_vec(vec![
        Value::Symbol(intern_symbol(Some("clojure.core"), "nthrest")),
        coll,
        Value::Int(index as i64),
    ]))
}

fn get_form(coll: Value, key: Value) -> Value {
    Value::List(crate::collections::PList::from_vec(vec![
        Value::Symbol(intern_symbol(Some("clojure.core"), "get")),
        coll,
        key,
    ]))
}

fn get_default_form(coll: Value, key: Value, default: Value) -> Value {
    Value::List(crate::collections::PList::from_vec(vec![
        Value::Symbol(intern_symbol(Some("clojure.core"), "get")),
        coll,
        key,
        default,
    ]))
}

/// `[a b & rest :as whole]`
fn expand_vector(items: &PVector, init: Value) -> ClwResult<Vec<(Value, Value)>> {
    let temp = gensym("vec");
    let mut out = vec![(temp.clone(), init)];
    let len = items.len();
    let mut i = 0usize;
    let mut positional = 0usize;
    while i < len {
        let item = items.get(i).unwrap().clone();
        if sym_name(&item) == Some("&") {
            i += 1;
            if let Some(rest_pat) = items.get(i).cloned() {
                let rest_form = nthrest_form(temp.clone(), positional);
                out.extend(expand_pair(&rest_pat, rest_form)?);
            }
            i += 1;
            continue;
        }
        if sym_name(&item) == Some(":as") {
            i += 1;
            if let Some(as_pat) = items.get(i).cloned() {
                out.extend(expand_pair(&as_pat, temp.clone())?);
            }
            i += 1;
            continue;
        }
        let accessor = nth_form(temp.clone(), positional);
        out.extend(expand_pair(&item, accessor)?);
        positional += 1;
        i += 1;
    }
    Ok(out)
}

/// `{:keys [a b] :strs [c] :syms [d] :or {a 1} :as m}`, or an arbitrary map
/// of `{pattern key}` pairs.
fn expand_map(pattern: &Value, init: Value) -> ClwResult<Vec<(Value, Value)>> {
    let Value::Map(m) = pattern else { unreachable!() };
    let temp = gensym("map");
    let mut out = vec![(temp.clone(), init)];
    let mut defaults: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
    if let Some(Value::Map(or_map)) = m.get(&Value::Keyword(intern_symbol(None, "or"))) {
        for (k, v) in or_map.iter() {
            if let Some(name) = sym_name(k) {
                defaults.insert(name.to_string(), v.clone());
            }
        }
    }
    let mut as_binding = None;
    for (k, v) in m.iter() {
        match k {
            Value::Keyword(kw) if kw.name() == "keys" => {
                if let Value::Vector(names) = v {
                    for n in names.iter() {
                        if let Some(name) = sym_name(n) {
                            out.push(map_key_binding(&temp, name, name, &defaults)?);
                        }
                    }
                }
            }
            Value::Keyword(kw) if kw.name() == "strs" => {
                if let Value::Vector(names) = v {
                    for n in names.iter() {
                        if let Some(name) = sym_name(n) {
                            let key = Value::str(name);
                            out.push(map_key_binding_with_key(&temp, name, key, &defaults)?);
                        }
                    }
                }
            }
            Value::Keyword(kw) if kw.name() == "syms" => {
                if let Value::Vector(names) = v {
                    for n in names.iter() {
                        if let Some(name) = sym_name(n) {
                            let key = Value::List(crate::collections::PList::from_vec(vec![
                                Value::Symbol(intern_symbol(None, "quote")),
                                Value::Symbol(intern_symbol(None, name)),
                            ]));
                            out.push(map_key_binding_with_key(&temp, name, key, &defaults)?);
                        }
                    }
                }
            }
            Value::Keyword(kw) if kw.name() == "as" => {
                as_binding = Some(v.clone());
            }
            Value::Keyword(kw) if kw.name() == "or" => {}
            _ => {
                // arbitrary `{pattern key}` entry
                let accessor = get_form(temp.clone(), k.clone());
                out.extend(expand_pair(v, accessor)?);
            }
        }
    }
    if let Some(as_pat) = as_binding {
        out.extend(expand_pair(&as_pat, temp.clone())?);
    }
    Ok(out)
}

fn map_key_binding(
    temp: &Value,
    name: &str,
    key_name: &str,
    defaults: &std::collections::HashMap<String, Value>,
) -> ClwResult<(Value, Value)> {
    let key = Value::Keyword(intern_symbol(None, key_name));
    map_key_binding_with_key(temp, name, key, defaults)
}

fn map_key_binding_with_key(
    temp: &Value,
    name: &str,
    key: Value,
    defaults: &std::collections::HashMap<String, Value>,
) -> ClwResult<(Value, Value)> {
    let accessor = match defaults.get(name) {
        Some(default) => get_default_form(temp.clone(), key, default.clone()),
        None => get_form(temp.clone(), key),
    };
    Ok((Value::Symbol(intern_symbol(None, name)), accessor))
}

/// Expand an entire `let*`/`loop*`/`fn*` binding-pair list (`[pat init pat
/// init ...]`, already split into pairs) into a flat list with every
/// pattern reduced to a plain symbol.
pub fn expand_all(pairs: &[(Value, Value)]) -> ClwResult<Vec<(Value, Value)>> {
    let mut out = Vec::new();
    for (pattern, init) in pairs {
        out.extend(expand_pair(pattern, init.clone())?);
    }
    Ok(out)
}

/// Back-compat single-pair shim used by callers that destructure one
/// binding at a time; returns the first expanded pair only, for callers
/// that bind a single gensym'd temporary ahead of iterating the rest
/// themselves.
pub fn expand(pattern: &Value, init: Value) -> ClwResult<(Value, Value)> {
    let all = expand_pair(pattern, init)?;
    Ok(all.into_iter().next().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::PList;

    #[test]
    fn vector_pattern_expands_positional_and_rest() {
        let pat = Value::Vector(PVector::from_iter([
            Value::Symbol(intern_symbol(None, "a")),
            Value::Symbol(intern_symbol(None, "b")),
            Value::Symbol(intern_symbol(None, "&")),
            Value::Symbol(intern_symbol(None, "more")),
        ]));
        let init = Value::Symbol(intern_symbol(None, "coll"));
        let expanded = expand_pair(&pat, init).unwrap();
        // temp, a, b, more
        assert_eq!(expanded.len(), 4);
        assert_eq!(sym_name(&expanded[1].0), Some("a"));
        assert_eq!(sym_name(&expanded[2].0), Some("b"));
        assert_eq!(sym_name(&expanded[3].0), Some("more"));
    }

    #[test]
    fn map_keys_pattern_expands_with_defaults() {
        use crate::collections::PMap;
        let mut m = PMap::new();
        m = m.assoc(
            Value::Keyword(intern_symbol(None, "keys")),
            Value::Vector(PVector::from_iter([Value::Symbol(intern_symbol(None, "x"))])),
        );
        m = m.assoc(
            Value::Keyword(intern_symbol(None, "or")),
            Value::Map({
                let mut o = PMap::new();
                o = o.assoc(Value::Symbol(intern_symbol(None, "x")), Value::Int(42));
                o
            }),
        );
        let pat = Value::Map(m);
        let init = Value::Symbol(intern_symbol(None, "opts"));
        let expanded = expand_pair(&pat, init).unwrap();
        assert_eq!(expanded.len(), 2);
        assert_eq!(sym_name(&expanded[1].0), Some("x"));
        let _ = PList::empty();
    }
}
