//! Command-line entry point (spec.md §6.2): run a file, evaluate an
//! inline expression, compile/run a cached module, or drop into an
//! interactive REPL. Exit codes: `0` success, `1` an uncaught Clojure
//! exception escaped the user's program, `2` a CLI usage error, `3` an
//! internal error (a bug in this implementation, not the user's program).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clojurewasm::config::Config;
use clojurewasm::error::ClwError;
use clojurewasm::{module, printer, Session};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Parser)]
#[command(name = "clojurewasm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A Clojure implementation with a tree-walk evaluator and a bytecode VM", long_about = None)]
struct Args {
    /// Clojure source file to run. Omit to start a REPL.
    file: Option<PathBuf>,

    /// Evaluate this expression instead of (or alongside) a file.
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Run `file` as a compiled module binary instead of source text.
    #[arg(long = "module")]
    module: bool,

    /// Directory for cached compiled modules (overrides `CLJW_CACHE`).
    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// `*print-length*` bound for REPL/eval output (overrides `CLJW_PRINT_LENGTH`).
    #[arg(long = "print-length")]
    print_length: Option<usize>,

    /// `*print-level*` bound for REPL/eval output (overrides `CLJW_PRINT_LEVEL`).
    #[arg(long = "print-level")]
    print_level: Option<usize>,

    /// Disable the compiled-module cache entirely, ignoring `--cache-dir`.
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Increase log verbosity (stacks; repeat for more: -v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn build_config(args: &Args) -> Config {
    let mut cfg = Config::from_env();
    if args.no_cache {
        cfg.cache_dir = None;
    } else if let Some(dir) = &args.cache_dir {
        cfg.cache_dir = Some(dir.clone());
    }
    if let Some(n) = args.print_length {
        cfg.print_length = Some(n);
    }
    if let Some(n) = args.print_level {
        cfg.print_level = Some(n);
    }
    cfg
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let default_directive = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Exit code for an error surfaced at the top level (spec.md §6.2): a
/// `Thrown`/otherwise-catchable value escaping to the top is the user
/// program's fault (`1`); anything else is this implementation's (`3`).
fn exit_code_for(err: &ClwError) -> ExitCode {
    if err.is_catchable() {
        ExitCode::from(1)
    } else {
        ExitCode::from(3)
    }
}

fn report_error(err: &ClwError) {
    eprintln!("{}: {}", err.kind(), printer::pr_str(&err.to_value()));
}

fn run_repl(session: &mut Session) -> ExitCode {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("failed to start line editor: {e}");
            return ExitCode::from(3);
        }
    };
    let history_path = dirs::cache_dir().map(|d| d.join("clojurewasm").join("history.txt"));
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = format!("{}=> ", session.env.current_ns_name());
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str()).ok();
                match session.eval_string(&line) {
                    Ok(v) => println!("{}", printer::pr_str_opts(&v, &session_print_opts(session))),
                    Err(e) => report_error(&e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    if let Some(path) = &history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }
    ExitCode::SUCCESS
}

fn session_print_opts(_session: &Session) -> printer::PrintOpts {
    printer::PrintOpts { readable: true, ..Default::default() }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = build_config(&args);
    let mut session = match Session::new(&config) {
        Ok(s) => s,
        Err(e) => {
            report_error(&e);
            return exit_code_for(&e);
        }
    };

    if let Some(expr) = &args.eval {
        return match session.eval_string(expr) {
            Ok(v) => {
                println!("{}", printer::pr_str_opts(&v, &session_print_opts(&session)));
                ExitCode::SUCCESS
            }
            Err(e) => {
                report_error(&e);
                exit_code_for(&e)
            }
        };
    }

    let Some(path) = &args.file else {
        return run_repl(&mut session);
    };

    if args.module {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("io_error: reading {}: {e}", path.display());
                return ExitCode::from(2);
            }
        };
        return match module::decode(&bytes).and_then(|proto| {
            let mut vm = clojurewasm::vm::Vm::new(&mut session.env, session.vtable.clone());
            vm.run_top_level(proto)
        }) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                report_error(&e);
                exit_code_for(&e)
            }
        };
    }

    match session.eval_file(path) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            exit_code_for(&e)
        }
    }
}

