//! ClojureWasm: a from-scratch Clojure implementation with two interchangeable
//! execution engines — a tree-walk evaluator (E1, `eval/`) and a bytecode VM
//! (E2, `vm/`) — sharing one GC-managed, persistent-collection value model
//! (`value.rs`, `collections/`, `gc.rs`). The two engines are required to
//! agree on every observable result (spec.md §8 invariant 1); `bootstrap.rs`
//! wires them together behind a single dispatch vtable (`dispatch.rs`) so
//! builtins and macros never need to know which one is currently driving.
//!
//! Crate layout mirrors the pipeline a form travels through: `reader/` turns
//! source text into `Value` forms, `analyzer/` turns forms into a resolved
//! `Node` tree (macroexpanding and binding-resolving along the way),
//! `compiler/` turns a `Node` tree into a `Proto` for E2, and `eval/`/`vm/`
//! execute a `Node`/`Proto` respectively. `env.rs` and `gc.rs` are the shared
//! runtime state both engines read and mutate; `builtins/` is the native
//! `clojure.core` surface; `module.rs` persists compiled `Proto`s to disk.

pub mod analyzer;
pub mod bootstrap;
pub mod builtins;
pub mod collections;
pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod eval;
pub mod fn_val;
pub mod gc;
pub mod hashing;
pub mod loader;
pub mod module;
pub mod printer;
pub mod reader;
pub mod symbol;
pub mod value;
pub mod vm;

use std::path::Path;
use std::rc::Rc;

use dispatch::DispatchVTable;
use env::Env;
use error::ClwResult;
use value::Value;

/// A ready runtime: an `Env` plus the vtable that lets builtins call back
/// into whichever engine is active (spec.md §4.B/§6.2).
pub struct Session {
    pub env: Env,
    pub vtable: DispatchVTable,
}

impl Session {
    /// Runs the full startup sequence (`bootstrap::init`) from `config`.
    pub fn new(config: &config::Config) -> ClwResult<Self> {
        let (env, vtable) = bootstrap::init(config)?;
        Ok(Session { env, vtable })
    }

    /// Parses and evaluates every top-level form in `text` through the
    /// tree-walk engine, returning the last form's value (spec.md §6.2:
    /// `eval_string`). An empty or all-comment `text` evaluates to `nil`.
    pub fn eval_string(&mut self, text: &str) -> ClwResult<Value> {
        let mut reader = reader::Reader::new(text, "<eval>")?;
        let mut result = Value::Nil;
        while let Some((form, _loc)) = reader.read_top_level()? {
            result = bootstrap::eval_form(&mut self.env, &self.vtable, &form)?;
        }
        Ok(result)
    }

    /// Same as `eval_string`, but through the bytecode engine (E2).
    pub fn eval_string_bytecode(&mut self, text: &str) -> ClwResult<Value> {
        let mut reader = reader::Reader::new(text, "<eval>")?;
        let mut result = Value::Nil;
        while let Some((form, _loc)) = reader.read_top_level()? {
            result = bootstrap::eval_form_bytecode(&mut self.env, &self.vtable, &form)?;
        }
        Ok(result)
    }

    /// Reads and evaluates every top-level form in the file at `path`
    /// (spec.md §6.2: `eval_file`).
    pub fn eval_file(&mut self, path: &Path) -> ClwResult<Value> {
        let text = std::fs::read_to_string(path).map_err(|e| error::ClwError::Io(format!("reading {}: {e}", path.display())))?;
        let file = path.to_string_lossy().into_owned();
        let mut reader = reader::Reader::new(&text, &file)?;
        let mut result = Value::Nil;
        while let Some((form, _loc)) = reader.read_top_level()? {
            result = bootstrap::eval_form(&mut self.env, &self.vtable, &form)?;
        }
        Ok(result)
    }

    /// Analyzes and compiles a single top-level form to a bytecode `Proto`
    /// without running it, then serializes that `Proto` to the module
    /// binary format (spec.md §6.1/§6.2: `compile_to_module`). Only the
    /// first top-level form in `text` is compiled; callers wanting a whole
    /// file compiled as one module should wrap it in a single `do`.
    pub fn compile_to_module(&mut self, text: &str) -> ClwResult<Vec<u8>> {
        let mut reader = reader::Reader::new(text, "<compile>")?;
        let (form, _loc) = reader
            .read_top_level()?
            .ok_or_else(|| error::ClwError::Compile("nothing to compile: input has no top-level form".into(), None))?;
        let (node, local_count) = {
            let mut a = analyzer::Analyzer::new(&self.env, Some(self.vtable.clone()));
            let node = a.analyze_top_level(&form, None)?;
            (node, a.top_level_local_count())
        };
        let clause = analyzer::node::FnClause {
            param_slots: Vec::new(),
            variadic_slot: None,
            body: node,
            local_count,
            captures: Vec::new(),
        };
        let mut c = compiler::Compiler::new();
        let proto = c.compile_fn_clauses("top-level", std::slice::from_ref(&clause))?.remove(0);
        module::encode(&proto)
    }

    /// Loads a module binary produced by `compile_to_module` and runs it
    /// through the bytecode engine (spec.md §6.2: `run_module`).
    pub fn run_module(&mut self, bytes: &[u8]) -> ClwResult<Value> {
        let proto: Rc<compiler::chunk::Proto> = module::decode(bytes)?;
        let mut vm = vm::Vm::new(&mut self.env, self.vtable.clone());
        vm.run_top_level(proto)
    }

    /// Drives an interactive read-eval-print loop over `input`/`output`,
    /// one top-level form at a time, printing results with `pr-str` and
    /// reporting uncaught errors without ending the session (spec.md §6.2:
    /// `start_repl_session`). Returns once `input` reaches EOF.
    pub fn start_repl_session(&mut self, input: &mut dyn std::io::BufRead, output: &mut dyn std::io::Write) -> ClwResult<()> {
        let print_opts = printer::PrintOpts { readable: true, ..Default::default() };
        let mut buffer = String::new();
        loop {
            write!(output, "{}=> ", self.env.current_ns_name()).ok();
            output.flush().ok();
            buffer.clear();
            let bytes_read = input.read_line(&mut buffer).map_err(|e| error::ClwError::Io(e.to_string()))?;
            if bytes_read == 0 {
                return Ok(());
            }
            if buffer.trim().is_empty() {
                continue;
            }
            match self.eval_string(&buffer) {
                Ok(v) => {
                    writeln!(output, "{}", printer::pr_str_opts(&v, &print_opts)).ok();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "uncaught error in repl form");
                    writeln!(output, "{}", e).ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_string_returns_the_last_forms_value() {
        let mut session = Session::new(&config::Config::default()).unwrap();
        let v = session.eval_string("(+ 1 2) (* 3 4)").unwrap();
        assert_eq!(v, Value::Int(12));
    }

    #[test]
    fn compile_to_module_then_run_module_matches_direct_eval() {
        let mut session = Session::new(&config::Config::default()).unwrap();
        let bytes = session.compile_to_module("(+ 1 41)").unwrap();
        let compiled = session.run_module(&bytes).unwrap();
        let direct = session.eval_string("(+ 1 41)").unwrap();
        assert_eq!(compiled, direct);
    }

    #[test]
    fn eval_string_and_eval_string_bytecode_agree() {
        let mut session = Session::new(&config::Config::default()).unwrap();
        let tree_walk = session.eval_string("(if (< 1 2) :yes :no)").unwrap();
        let bytecode = session.eval_string_bytecode("(if (< 1 2) :yes :no)").unwrap();
        assert_eq!(tree_walk, bytecode);
    }
}
