//! End-to-end coverage of the compiled module cache (spec.md §6.1/§6.2):
//! a module produced by `compile_to_module` runs through the bytecode
//! engine to the same value as evaluating the source directly, and the
//! encoded bytes are stable and self-describing.

use clojurewasm::config::Config;
use clojurewasm::{module, Session};

fn assert_module_matches_direct_eval(source: &str) {
    let mut session = Session::new(&Config::default()).unwrap();
    let bytes = session.compile_to_module(source).unwrap();
    let from_module = session.run_module(&bytes).unwrap();
    let direct = session.eval_string(source).unwrap();
    assert_eq!(from_module, direct, "module result diverged for: {source}");
}

#[test]
fn arithmetic_module_round_trips() {
    assert_module_matches_direct_eval("(+ 1 2 3)");
}

#[test]
fn conditional_module_round_trips() {
    assert_module_matches_direct_eval("(if (< 1 2) :yes :no)");
}

#[test]
fn let_binding_module_round_trips() {
    assert_module_matches_direct_eval("(let [x 10 y 20] (* x y))");
}

#[test]
fn collection_literal_module_round_trips() {
    assert_module_matches_direct_eval("(count {:a 1 :b [2 3] :c #{4 5}})");
}

#[test]
fn compiling_empty_input_is_an_error() {
    let mut session = Session::new(&Config::default()).unwrap();
    assert!(session.compile_to_module("").is_err());
}

#[test]
fn encoding_the_same_module_twice_is_byte_for_byte_identical() {
    let mut session = Session::new(&Config::default()).unwrap();
    let a = session.compile_to_module("(+ 1 2 3 4 5)").unwrap();
    let b = session.compile_to_module("(+ 1 2 3 4 5)").unwrap();
    assert_eq!(a, b);
}

#[test]
fn decode_rejects_garbage_bytes() {
    let garbage = vec![0u8, 1, 2, 3, 4, 5, 6, 7];
    assert!(module::decode(&garbage).is_err());
}

#[test]
fn decode_rejects_truncated_valid_module() {
    let mut session = Session::new(&Config::default()).unwrap();
    let bytes = session.compile_to_module("(+ 1 2)").unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    assert!(module::decode(truncated).is_err());
}
