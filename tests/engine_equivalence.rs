//! The tree-walk evaluator and the bytecode VM must agree on every
//! observable result for a representative spread of programs (spec.md §8
//! invariant 1).

use clojurewasm::config::Config;
use clojurewasm::Session;

fn assert_same_result(source: &str) {
    let mut session = Session::new(&Config::default()).unwrap();
    let tree_walk = session.eval_string(source).expect("tree-walk eval failed");
    let bytecode = session.eval_string_bytecode(source).expect("bytecode eval failed");
    assert_eq!(tree_walk, bytecode, "engines disagree on: {source}");
}

#[test]
fn arithmetic_agrees_across_engines() {
    assert_same_result("(+ 1 2 3 4 5)");
    assert_same_result("(* 2 3 4)");
    assert_same_result("(/ 7 2)");
    assert_same_result("(- 10 (* 2 3))");
}

#[test]
fn conditionals_and_comparisons_agree() {
    assert_same_result("(if (< 1 2) :yes :no)");
    assert_same_result("(if (> 1 2) :yes :no)");
    assert_same_result("(= 1 1.0)");
}

#[test]
fn let_and_local_shadowing_agree() {
    assert_same_result("(let [x 1 y (+ x 1)] (+ x y))");
    assert_same_result("(let [x 10] (let [x 20] x))");
}

#[test]
fn recursive_def_bound_fn_agrees() {
    assert_same_result(
        "(def fact (fn* [n] (if (<= n 1) 1 (* n (fact (- n 1)))))) (fact 6)",
    );
}

#[test]
fn loop_recur_agrees() {
    assert_same_result("(loop [i 0 acc 0] (if (= i 5) acc (recur (inc i) (+ acc i))))");
}

#[test]
fn collection_builtins_agree() {
    assert_same_result("(count [1 2 3 4])");
    assert_same_result("(conj [1 2] 3)");
    assert_same_result("(assoc {:a 1} :b 2)");
    assert_same_result("(first (rest '(1 2 3)))");
    assert_same_result("(reduce + 0 (map inc (range 10)))");
}

#[test]
fn try_catch_agrees() {
    assert_same_result(r#"(try (throw (ex-info "boom" {:x 1})) (catch Exception e (get (ex-data e) :x)))"#);
}

#[test]
fn protocol_dispatch_agrees() {
    assert_same_result(
        r#"(defprotocol Sized (my-count [x]))
           (extend-type String Sized (my-count [s] (count s)))
           (my-count "abcde")"#,
    );
}
