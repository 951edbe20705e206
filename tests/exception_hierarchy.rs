//! Exception construction, catch-class matching, and catchability (spec.md
//! §4.E/§7), checked against both engines.

use clojurewasm::config::Config;
use clojurewasm::Session;

fn eval_both(source: &str) -> Vec<String> {
    let mut session = Session::new(&Config::default()).unwrap();
    let tree_walk = session.eval_string(source).expect("tree-walk eval failed");
    let bytecode = session.eval_string_bytecode(source).expect("bytecode eval failed");
    vec![
        clojurewasm::printer::pr_str(&tree_walk),
        clojurewasm::printer::pr_str(&bytecode),
    ]
}

#[test]
fn ex_info_carries_message_and_data() {
    let results = eval_both(r#"(ex-message (ex-info "boom" {:x 1}))"#);
    assert!(results.iter().all(|r| r == r#""boom""#));
}

#[test]
fn ex_data_returns_the_payload_map() {
    let results = eval_both(r#"(get (ex-data (ex-info "boom" {:x 1})) :x)"#);
    assert!(results.iter().all(|r| r == "1"));
}

#[test]
fn ex_data_on_a_non_ex_info_exception_is_nil() {
    let results = eval_both(r#"(try (/ 1 0) (catch Exception e (ex-data e)))"#);
    assert!(results.iter().all(|r| r == "nil"));
}

#[test]
fn ex_cause_round_trips_when_supplied() {
    let results = eval_both(r#"(ex-message (ex-cause (ex-info "outer" {} (ex-info "inner" {}))))"#);
    assert!(results.iter().all(|r| r == r#""inner""#));
}

#[test]
fn catch_exception_matches_any_thrown_value() {
    let results = eval_both(r#"(try (throw (ex-info "boom" {})) (catch Exception e :caught))"#);
    assert!(results.iter().all(|r| r == ":caught"));
}

#[test]
fn catch_throwable_matches_runtime_errors_too() {
    let results = eval_both(r#"(try (/ 1 0) (catch Throwable e :caught))"#);
    assert!(results.iter().all(|r| r == ":caught"));
}

#[test]
fn catch_object_is_a_universal_catch_class() {
    let results = eval_both(r#"(try (throw :boom) (catch Object e e))"#);
    assert!(results.iter().all(|r| r == ":boom"));
}

#[test]
fn uncaught_thrown_value_propagates_as_an_error() {
    let mut session = Session::new(&Config::default()).unwrap();
    let err = session.eval_string(r#"(throw (ex-info "boom" {}))"#).unwrap_err();
    assert!(err.is_catchable());
}

#[test]
fn arbitrary_values_can_be_thrown_and_caught() {
    let results = eval_both(r#"(try (throw 42) (catch Exception e e))"#);
    assert!(results.iter().all(|r| r == "42"));
}

#[test]
fn catch_names_the_concrete_host_exception_class() {
    let results = eval_both(r#"(try (/ 1 0) (catch ArithmeticException e :caught))"#);
    assert!(results.iter().all(|r| r == ":caught"));
}

#[test]
fn catch_matches_via_the_runtime_exception_ancestor() {
    let results = eval_both(r#"(try (/ 1 0) (catch RuntimeException e :caught))"#);
    assert!(results.iter().all(|r| r == ":caught"));

    let results = eval_both(r#"(try (throw (ex-info "boom" {})) (catch RuntimeException e :caught))"#);
    assert!(results.iter().all(|r| r == ":caught"));
}

#[test]
fn catch_clause_for_an_unrelated_class_falls_through_to_the_next() {
    let results = eval_both(r#"(try (/ 1 0) (catch IndexOutOfBoundsException e :wrong) (catch ArithmeticException e :right))"#);
    assert!(results.iter().all(|r| r == ":right"));
}

#[test]
fn try_without_a_matching_catch_still_runs_finally() {
    let results = eval_both(
        r#"(let [log (atom [])]
             (try
               (/ 1 1)
               (finally (swap! log conj :ran)))
             @log)"#,
    );
    assert!(results.iter().all(|r| r == "[:ran]"));
}
