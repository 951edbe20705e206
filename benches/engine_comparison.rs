use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use clojurewasm::config::Config;
use clojurewasm::Session;

criterion_main!(benches);
criterion_group!(benches, compare_engines);

const PROGRAMS: &[(&str, &str)] = &[
    ("arithmetic", "(reduce + 0 (range 1000))"),
    ("fib20", "(def fib (fn* [n] (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))) (fib 20)"),
    ("seq-walk", "(count (filter odd? (map inc (range 500))))"),
];

fn compare_engines(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_comparison");
    for (name, source) in PROGRAMS {
        group.bench_with_input(BenchmarkId::new("treewalk", name), source, |b, source| {
            let mut session = Session::new(&Config::default()).unwrap();
            b.iter(|| session.eval_string(source).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("bytecode", name), source, |b, source| {
            let mut session = Session::new(&Config::default()).unwrap();
            b.iter(|| session.eval_string_bytecode(source).unwrap());
        });
    }
    group.finish();
}
