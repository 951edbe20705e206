//! Dispatch vtable (spec.md §4.R.3): the only mechanism by which lower
//! layers (reader, GC, analyzer) invoke upper ones (the two engines, the
//! loader) without creating an upward compile-time dependency. Populated
//! once during `bootstrap::init` and never mutated afterward (spec.md §9:
//! "the vtable is initialized once at registerBuiltins and never mutated
//! afterward").

use std::rc::Rc;

use crate::error::ClwResult;
use crate::fn_val::FnVal;
use crate::value::Value;

/// Bridges a call into whichever engine currently owns macro expansion and
/// ordinary function application (spec.md §9: "use the tree-walk engine
/// exclusively for macro expansion until bootstrap completes, then swap to
/// bytecode via the vtable").
pub type CallBridge = Rc<dyn Fn(&FnVal, &[Value]) -> ClwResult<Value>>;

/// `seq`/`first`/`rest` over any seqable `Value`, shared by both engines and
/// by builtins so collection-kind dispatch lives in exactly one place.
pub type SeqFirstRest = Rc<dyn Fn(&Value) -> ClwResult<(Option<Value>, Value)>>;

#[derive(Clone)]
pub struct DispatchVTable {
    pub treewalk_call_bridge: CallBridge,
    pub bytecode_call_bridge: CallBridge,
    pub seq_first_rest: SeqFirstRest,
}

impl DispatchVTable {
    pub fn type_key_of(v: &Value) -> &'static str {
        v.type_tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_key_of_matches_value_tag() {
        assert_eq!(DispatchVTable::type_key_of(&Value::Int(1)), "integer");
        assert_eq!(DispatchVTable::type_key_of(&Value::Nil), "nil");
    }
}
