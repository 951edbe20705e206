//! Mark-and-sweep GC arena (spec.md §4.R.2).
//!
//! Only values that can form genuine reference cycles live here: atoms
//! (mutable cells that can be reset to hold a closure which itself closes
//! over the same atom), closures (captured upvalues can include an atom that
//! points back at the closure), and lazy seqs (a memoized realization cell
//! that can capture a closure referencing the same lazy seq). Every other
//! `Value` kind — persistent collections, strings, interned symbols — is
//! either acyclic by construction or lives outside the arena entirely
//! (spec.md §3.6), so plain `Rc` reference counting reclaims it without the
//! collector's help.
//!
//! Allocations are recorded in a side table keyed by slot index rather than
//! by address, since Rust does not let us hang a GC header off an arbitrary
//! pointer the way a C runtime would.

use std::cell::RefCell;
use std::fmt;

use crate::fn_val::FnVal;
use crate::value::Value;

/// A handle into the GC arena. Cheap to `Copy`; stable for the lifetime of
/// the allocation (slots are never reused while `generation` still matches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    fn new(index: u32, generation: u32) -> Self {
        GcRef { index, generation }
    }
}

#[derive(Debug)]
pub enum HeapObj {
    Atom(RefCell<Value>),
    Closure(FnVal),
    LazySeq(RefCell<LazySeqState>),
}

#[derive(Debug)]
pub struct LazySeqState {
    pub thunk: Option<Value>,
    pub realized: Option<Value>,
    pub realizing: bool,
}

impl LazySeqState {
    pub fn new(thunk: Value) -> Self {
        LazySeqState {
            thunk: Some(thunk),
            realized: None,
            realizing: false,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Occupied { obj: HeapObj, generation: u32, marked: bool },
    /// Debug-build poison: distinguishable from a free slot so a double-free
    /// raises `internal_error` instead of silently succeeding (§4.R.2).
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    Poisoned { generation: u32 },
    Free,
}

const INITIAL_THRESHOLD: usize = 1 << 20;
const ESTIMATED_OBJECT_SIZE: usize = 64;

/// Mark-and-sweep arena with a free-pool cache and ratcheting byte-threshold
/// trigger (spec.md §4.R.2).
pub struct Gc {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    bytes_live: usize,
    threshold: usize,
    collections: u64,
}

impl Gc {
    pub fn new() -> Self {
        Gc::with_threshold(INITIAL_THRESHOLD)
    }

    /// Same as `new`, but with an initial collection trigger other than
    /// `INITIAL_THRESHOLD` (`config.rs`'s `gc_initial_threshold`, sourced
    /// from `CLJW_GC_THRESHOLD` or left at the default).
    pub fn with_threshold(threshold: usize) -> Self {
        Gc {
            slots: Vec::new(),
            free_list: Vec::new(),
            bytes_live: 0,
            threshold,
            collections: 0,
        }
    }

    pub fn alloc(&mut self, obj: HeapObj) -> GcRef {
        self.bytes_live += ESTIMATED_OBJECT_SIZE;
        if let Some(index) = self.free_list.pop() {
            let generation = match &self.slots[index as usize] {
                Slot::Poisoned { generation } => generation + 1,
                Slot::Occupied { generation, .. } => generation + 1,
                Slot::Free => 0,
            };
            self.slots[index as usize] = Slot::Occupied { obj, generation, marked: false };
            return GcRef::new(index, generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied { obj, generation: 0, marked: false });
        GcRef::new(index, 0)
    }

    pub fn get(&self, r: GcRef) -> Option<&HeapObj> {
        match self.slots.get(r.index as usize) {
            Some(Slot::Occupied { obj, generation, .. }) if *generation == r.generation => Some(obj),
            _ => None,
        }
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_live >= self.threshold
    }

    pub fn live_bytes(&self) -> usize {
        self.bytes_live
    }

    /// Mark every object transitively reachable from `roots`, then sweep
    /// unmarked slots to the free list (poisoning them in debug builds),
    /// and ratchet the next collection's trigger threshold upward with the
    /// surviving live-byte count.
    pub fn mark_and_sweep(&mut self, roots: &[Value]) {
        let mut worklist: Vec<Value> = roots.to_vec();
        let mut seen: Vec<GcRef> = Vec::new();
        while let Some(v) = worklist.pop() {
            self.collect_refs(&v, &mut seen, &mut worklist);
        }
        for r in &seen {
            if let Some(Slot::Occupied { marked, .. }) = self.slots.get_mut(r.index as usize) {
                *marked = true;
            }
        }
        let mut freed = 0usize;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Slot::Occupied { marked, .. } if *marked => {
                    *marked = false;
                }
                Slot::Occupied { generation, .. } => {
                    let generation = *generation;
                    *slot = if cfg!(debug_assertions) {
                        Slot::Poisoned { generation: generation + 1 }
                    } else {
                        Slot::Free
                    };
                    self.free_list.push(i as u32);
                    freed += 1;
                }
                _ => {}
            }
        }
        self.bytes_live = self.bytes_live.saturating_sub(freed * ESTIMATED_OBJECT_SIZE);
        self.collections += 1;
        self.threshold = (self.bytes_live * 2).max(INITIAL_THRESHOLD);
        tracing::info!(
            collections = self.collections,
            freed,
            live_bytes = self.bytes_live,
            next_threshold = self.threshold,
            "gc cycle complete"
        );
    }

    fn collect_refs(&self, v: &Value, seen: &mut Vec<GcRef>, worklist: &mut Vec<Value>) {
        match v {
            Value::Atom(r) | Value::LazySeq(r) | Value::Fn(r) => {
                if seen.contains(r) {
                    return;
                }
                seen.push(*r);
                if let Some(obj) = self.get(*r) {
                    match obj {
                        HeapObj::Atom(cell) => worklist.push(cell.borrow().clone()),
                        HeapObj::Closure(f) => worklist.extend(f.captured_values()),
                        HeapObj::LazySeq(cell) => {
                            let state = cell.borrow();
                            if let Some(t) = &state.thunk {
                                worklist.push(t.clone());
                            }
                            if let Some(r) = &state.realized {
                                worklist.push(r.clone());
                            }
                        }
                    }
                }
            }
            Value::List(l) => worklist.extend(l.iter_values().cloned()),
            Value::Vector(vec) => worklist.extend(vec.iter().cloned()),
            Value::Map(m) => {
                for (k, val) in m.iter() {
                    worklist.push(k.clone());
                    worklist.push(val.clone());
                }
            }
            Value::Set(s) => worklist.extend(s.iter().cloned()),
            Value::ExceptionMap(e) => {
                if let Some(d) = &e.data {
                    worklist.push(d.clone());
                }
                if let Some(c) = &e.cause {
                    worklist.push(c.clone());
                }
            }
            Value::ClassInstance(c) => worklist.extend(c.fields.iter().map(|(_, v)| v.clone())),
            _ => {}
        }
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gc")
            .field("slots", &self.slots.len())
            .field("free", &self.free_list.len())
            .field("bytes_live", &self.bytes_live)
            .field("collections", &self.collections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_get_round_trip() {
        let mut gc = Gc::new();
        let r = gc.alloc(HeapObj::Atom(RefCell::new(Value::Int(42))));
        match gc.get(r) {
            Some(HeapObj::Atom(cell)) => assert_eq!(*cell.borrow(), Value::Int(42)),
            _ => panic!("expected atom"),
        }
    }

    #[test]
    fn unreachable_atom_is_swept() {
        let mut gc = Gc::new();
        let r = gc.alloc(HeapObj::Atom(RefCell::new(Value::Int(1))));
        assert!(gc.get(r).is_some());
        gc.mark_and_sweep(&[]);
        assert!(gc.get(r).is_none());
    }

    #[test]
    fn reachable_atom_survives_collection() {
        let mut gc = Gc::new();
        let r = gc.alloc(HeapObj::Atom(RefCell::new(Value::Int(7))));
        gc.mark_and_sweep(&[Value::Atom(r)]);
        assert!(gc.get(r).is_some());
    }

    #[test]
    fn freed_slot_is_reused_with_bumped_generation() {
        let mut gc = Gc::new();
        let r1 = gc.alloc(HeapObj::Atom(RefCell::new(Value::Int(1))));
        gc.mark_and_sweep(&[]);
        let r2 = gc.alloc(HeapObj::Atom(RefCell::new(Value::Int(2))));
        assert!(gc.get(r1).is_none());
        assert!(gc.get(r2).is_some());
    }
}
