//! Host-level error kinds (spec.md §7).
//!
//! `ClwError` covers the closed set of error kinds the core raises outside of
//! catchable Clojure exceptions. Reader/analyzer/compiler errors abort the
//! enclosing top-level form; `StackOverflow` and `InternalError` are fatal.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClwError {
    #[error("arity_error: {0}")]
    Arity(String),
    #[error("type_error: {0}")]
    Type(String),
    #[error("value_error: {0}")]
    Value(String),
    #[error("arithmetic_error: {0}")]
    Arithmetic(String),
    #[error("index_error: {0}")]
    Index(String),
    #[error("key_error: {0}")]
    Key(String),
    #[error("state_error: {0}")]
    State(String),
    #[error("io_error: {0}")]
    Io(String),
    #[error("reader_error: {0}{}", loc_suffix(.1))]
    Reader(String, Option<SourceLoc>),
    #[error("compile_error: {0}{}", loc_suffix(.1))]
    Compile(String, Option<SourceLoc>),
    #[error("resolve_error: {0}{}", loc_suffix(.1))]
    Resolve(String, Option<SourceLoc>),
    #[error("stack_overflow: {0}")]
    StackOverflow(String),
    #[error("internal_error: {0}")]
    Internal(String),
    /// `(throw v)` where `v` can be any value, not just a host error string
    /// (spec.md §4.E: Clojure `throw`/`catch` operate on arbitrary values).
    #[error("thrown: {0}")]
    Thrown(Value),
}

fn loc_suffix(loc: &Option<SourceLoc>) -> String {
    match loc {
        Some(l) => format!(" (at {l})"),
        None => String::new(),
    }
}

impl ClwError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClwError::Arity(_) => "arity_error",
            ClwError::Type(_) => "type_error",
            ClwError::Value(_) => "value_error",
            ClwError::Arithmetic(_) => "arithmetic_error",
            ClwError::Index(_) => "index_error",
            ClwError::Key(_) => "key_error",
            ClwError::State(_) => "state_error",
            ClwError::Io(_) => "io_error",
            ClwError::Reader(..) => "reader_error",
            ClwError::Compile(..) => "compile_error",
            ClwError::Resolve(..) => "resolve_error",
            ClwError::StackOverflow(_) => "stack_overflow",
            ClwError::Internal(_) => "internal_error",
            ClwError::Thrown(_) => "thrown",
        }
    }

    /// Build a `ClwError` from an arbitrary thrown Clojure value, unwrapping
    /// the common `ex-info`/string cases other parts of the crate construct
    /// errors from directly (spec.md §4.E).
    pub fn thrown(value: Value) -> Self {
        ClwError::Thrown(value)
    }

    /// The catchable class name this error kind presents to a `catch`
    /// clause (spec.md §4.E) — distinct from `kind()`'s snake_case tag,
    /// which is only ever used for host-facing error messages and logging.
    /// Named after the `java.lang`/`clojure.lang` class a real Clojure
    /// runtime would raise for the same condition, so `(catch
    /// ArithmeticException e ...)` or `(catch RuntimeException e ...)`
    /// matches the way it would against real Clojure code
    /// (`builtins::exception_isa`'s ancestor table supplies the
    /// `RuntimeException` superclass match).
    pub fn class_name(&self) -> &'static str {
        match self {
            ClwError::Arity(_) => "ArityException",
            ClwError::Type(_) => "ClassCastException",
            ClwError::Value(_) => "IllegalArgumentException",
            ClwError::Arithmetic(_) => "ArithmeticException",
            ClwError::Index(_) => "IndexOutOfBoundsException",
            ClwError::Key(_) => "IllegalArgumentException",
            ClwError::State(_) => "IllegalStateException",
            ClwError::Io(_) => "IOException",
            ClwError::Reader(..) => "ReaderException",
            ClwError::Compile(..) => "CompilerException",
            ClwError::Resolve(..) => "CompilerException",
            ClwError::StackOverflow(_) => "StackOverflowError",
            ClwError::Internal(_) => "Error",
            ClwError::Thrown(_) => "RuntimeException",
        }
    }

    /// The value a `catch` clause binds, for any error kind — host errors
    /// synthesize an `ExceptionMap`-shaped value on the fly so `catch
    /// Exception e` can bind something from *every* `ClwError`, not only
    /// `Thrown`.
    pub fn to_value(&self) -> Value {
        match self {
            ClwError::Thrown(v) => v.clone(),
            other => Value::ExceptionMap(std::rc::Rc::new(crate::value::ExceptionMapData {
                ex_type: crate::symbol::intern_symbol(None, other.class_name()),
                is_ex_info: false,
                message: Some(std::rc::Rc::new(other.to_string())),
                data: None,
                cause: None,
            })),
        }
    }

    /// Whether this error kind is catchable by Clojure `try`/`catch`.
    ///
    /// Reader/analyzer/compiler errors and the two fatal kinds are not:
    /// they abort the enclosing top-level form or the process (spec.md §7).
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            ClwError::Reader(..)
                | ClwError::Compile(..)
                | ClwError::Resolve(..)
                | ClwError::StackOverflow(_)
                | ClwError::Internal(_)
        )
    }
}

pub type ClwResult<T> = Result<T, ClwError>;
