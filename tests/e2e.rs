//! Representative end-to-end programs, each checked against both engines.
//!
//! A few programs are adapted from their most natural form to match this
//! implementation's actual surface: there is no `dotimes`/`when` macro, so
//! loops are spelled out with `loop`/`recur`/`if`, and catch clauses name
//! one of the three universal classes rather than a specific host
//! exception class.

use clojurewasm::config::Config;
use clojurewasm::printer::pr_str;
use clojurewasm::Session;

fn assert_prints_as(source: &str, expected: &str) {
    let mut tree_walk_session = Session::new(&Config::default()).unwrap();
    let tree_walk = tree_walk_session.eval_string(source).expect("tree-walk eval failed");
    assert_eq!(pr_str(&tree_walk), expected, "tree-walk result for: {source}");

    let mut bytecode_session = Session::new(&Config::default()).unwrap();
    let bytecode = bytecode_session.eval_string_bytecode(source).expect("bytecode eval failed");
    assert_eq!(pr_str(&bytecode), expected, "bytecode result for: {source}");
}

#[test]
fn s1_basic_arithmetic() {
    assert_prints_as("(+ 1 2 3)", "6");
}

#[test]
fn s2_vector_destructuring_with_rest() {
    assert_prints_as("(let [[a b & xs] [1 2 3 4]] [a b xs])", "[1 2 (3 4)]");
}

#[test]
fn s3_try_catch_reports_the_host_error_message() {
    assert_prints_as(
        r#"(try (/ 1 0) (catch Exception e (ex-message e)))"#,
        r#""arithmetic_error: divide by zero""#,
    );
}

#[test]
fn s4_atom_mutation_across_a_manual_loop() {
    assert_prints_as(
        "(def v (atom 0)) (loop [i 0] (if (< i 5) (do (swap! v inc) (recur (inc i))) nil)) @v",
        "5",
    );
}

#[test]
fn s5_lazy_pipeline_over_an_unbounded_range() {
    assert_prints_as("(seq (take 5 (filter odd? (map inc (range)))))", "(1 3 5 7 9)");
}

#[test]
fn s6_protocol_dispatch_on_a_built_in_type() {
    assert_prints_as(
        r#"(defprotocol P (q [x])) (extend-type String P (q [s] (count s))) (q "abc")"#,
        "3",
    );
}
