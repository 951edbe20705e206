//! Reader: consumes tokens, emits `Value`s (spec.md §4.D). Reader macros
//! (`'`, `` ` ``, `~`, `~@`, `@`, `^`, `#'`, `#_`, `#(...)`, `#{...}`,
//! `#"..."`, `#?`/`#?@`, `#:ns{...}`, tagged literals) are expanded here,
//! before the analyzer ever sees a `Form`.
//!
//! Simplification (recorded in DESIGN.md): source location is attached per
//! top-level form rather than per sub-node; every top-level form gets an
//! exact `(file, line, column)`, and the analyzer propagates that same
//! location to every `Node` it builds from that form. This is sufficient for
//! the spec's actual uses of location (aborting the enclosing top-level form
//! on error, and stack traces keyed off the *compiled* chunk's line/column
//! arrays, which are tracked independently per bytecode offset).

pub mod tokenizer;

use std::cell::Cell;
use std::rc::Rc;

use crate::collections::{PList, PMap, PSet, PVector};
use crate::error::{ClwError, ClwResult, SourceLoc};
use crate::symbol::{intern_keyword, intern_symbol};
use crate::value::Value;
use tokenizer::{Token, TokenKind, Tokenizer};

pub struct Reader<'a> {
    tok: Tokenizer<'a>,
    cur: Token,
    file: String,
    gensym_counter: Cell<u64>,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str, file: impl Into<String>) -> ClwResult<Self> {
        let file = file.into();
        let mut tok = Tokenizer::new(src, file.clone());
        let cur = tok.next_token()?;
        Ok(Reader { tok, cur, file, gensym_counter: Cell::new(0) })
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc { file: self.file.clone(), line: self.cur.line, column: self.cur.column }
    }

    fn bump(&mut self) -> ClwResult<Token> {
        let prev = self.cur;
        self.cur = self.tok.next_token()?;
        Ok(prev)
    }

    fn text(&self, t: Token) -> &str {
        self.tok.text(t)
    }

    pub fn read_all(&mut self) -> ClwResult<Vec<(Value, SourceLoc)>> {
        let mut forms = Vec::new();
        while let Some((v, loc)) = self.read_top_level()? {
            forms.push((v, loc));
        }
        Ok(forms)
    }

    pub fn read_top_level(&mut self) -> ClwResult<Option<(Value, SourceLoc)>> {
        if self.cur.kind == TokenKind::Eof {
            return Ok(None);
        }
        let loc = self.loc();
        let form = self.read_form()?.ok_or_else(|| ClwError::Reader("unexpected eof".into(), Some(loc.clone())))?;
        Ok(Some((form, loc)))
    }

    fn read_form(&mut self) -> ClwResult<Option<Value>> {
        match self.cur.kind {
            TokenKind::Eof => Ok(None),
            TokenKind::LParen => Ok(Some(self.read_seq_until(TokenKind::RParen, |items| {
                Value::List(PList::from_vec(items))
            })?)),
            TokenKind::LBracket => Ok(Some(self.read_seq_until(TokenKind::RBracket, |items| {
                Value::Vector(PVector::from_iter(items))
            })?)),
            TokenKind::LBrace => Ok(Some(self.read_map()?)),
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                Err(ClwError::Reader("unexpected closing delimiter".into(), Some(self.loc())))
            }
            TokenKind::Quote => {
                self.bump()?;
                let inner = self.require_form()?;
                Ok(Some(wrap(sym_unqualified("quote"), inner)))
            }
            TokenKind::Deref => {
                self.bump()?;
                let inner = self.require_form()?;
                Ok(Some(wrap(sym_unqualified("deref"), inner)))
            }
            TokenKind::VarQuote => {
                self.bump()?;
                let inner = self.require_form()?;
                Ok(Some(wrap(sym_unqualified("var"), inner)))
            }
            TokenKind::SyntaxQuote => {
                self.bump()?;
                let inner = self.require_form()?;
                Ok(Some(self.syntax_quote(&inner)))
            }
            TokenKind::Unquote => {
                self.bump()?;
                let inner = self.require_form()?;
                Ok(Some(wrap(sym_unqualified("clojure.core/unquote"), inner)))
            }
            TokenKind::UnquoteSplicing => {
                self.bump()?;
                let inner = self.require_form()?;
                Ok(Some(wrap(sym_unqualified("clojure.core/unquote-splicing"), inner)))
            }
            TokenKind::Meta => {
                self.bump()?;
                let _meta = self.require_form()?; // metadata attachment is advisory; not modeled on Value
                let inner = self.require_form()?;
                Ok(Some(inner))
            }
            TokenKind::Discard => {
                self.bump()?;
                self.require_form()?; // read and drop
                self.read_form()
            }
            TokenKind::FnLit => Ok(Some(self.read_fn_lit()?)),
            TokenKind::SetLit => Ok(Some(self.read_set_lit()?)),
            TokenKind::Regex => {
                let t = self.bump()?;
                let raw = self.text(t);
                let pattern = unescape_string(&raw[2..raw.len() - 1]);
                let re = regex::Regex::new(&pattern)
                    .map_err(|e| ClwError::Reader(format!("invalid regex: {e}"), Some(self.loc())))?;
                Ok(Some(Value::Regex(Rc::new(re))))
            }
            TokenKind::ReaderCond | TokenKind::ReaderCondSplicing => {
                self.bump()?;
                self.read_reader_conditional()
            }
            TokenKind::NsMap => Ok(Some(self.read_ns_map()?)),
            TokenKind::Tag => {
                let t = self.bump()?;
                let tag = self.text(t).trim_start_matches('#').to_string();
                let inner = self.require_form()?;
                self.read_tagged(&tag, inner)
            }
            TokenKind::Symbolic => {
                self.bump()?;
                Ok(Some(Value::Float(f64::NAN)))
            }
            TokenKind::Invalid => Err(ClwError::Reader("invalid token".into(), Some(self.loc()))),
            _ => {
                let t = self.bump()?;
                Ok(Some(self.parse_atom(t)?))
            }
        }
    }

    fn require_form(&mut self) -> ClwResult<Value> {
        self.read_form()?.ok_or_else(|| ClwError::Reader("unexpected eof".into(), Some(self.loc())))
    }

    fn read_seq_until(&mut self, close: TokenKind, build: impl FnOnce(Vec<Value>) -> Value) -> ClwResult<Value> {
        self.bump()?; // opening delimiter
        let mut items = Vec::new();
        loop {
            if self.cur.kind == close {
                self.bump()?;
                break;
            }
            if self.cur.kind == TokenKind::Eof {
                return Err(ClwError::Reader("unexpected eof in collection".into(), Some(self.loc())));
            }
            match self.read_form()? {
                Some(v) => items.push(v),
                None => return Err(ClwError::Reader("unexpected eof in collection".into(), Some(self.loc()))),
            }
        }
        Ok(build(items))
    }

    fn read_map(&mut self) -> ClwResult<Value> {
        let items = self.read_flat_seq(TokenKind::LBrace, TokenKind::RBrace)?;
        if items.len() % 2 != 0 {
            return Err(ClwError::Reader("map literal must have an even number of forms".into(), Some(self.loc())));
        }
        let mut map = PMap::new();
        for pair in items.chunks(2) {
            map = map.assoc(pair[0].clone(), pair[1].clone());
        }
        Ok(Value::Map(map))
    }

    fn read_set_lit(&mut self) -> ClwResult<Value> {
        let items = self.read_flat_seq(TokenKind::LBrace, TokenKind::RBrace)?;
        Ok(Value::Set(PSet::from_iter(items)))
    }

    fn read_flat_seq(&mut self, open: TokenKind, close: TokenKind) -> ClwResult<Vec<Value>> {
        debug_assert_eq!(self.cur.kind, open);
        self.bump()?;
        let mut items = Vec::new();
        loop {
            if self.cur.kind == close {
                self.bump()?;
                break;
            }
            if self.cur.kind == TokenKind::Eof {
                return Err(ClwError::Reader("unexpected eof in collection".into(), Some(self.loc())));
            }
            items.push(self.require_form()?);
        }
        Ok(items)
    }

    /// `#(...)` rewrites to `(fn* [%1 %2 ... & %&] (...))` (spec.md §4.D).
    fn read_fn_lit(&mut self) -> ClwResult<Value> {
        self.bump()?; // '#('
        let mut body = Vec::new();
        loop {
            if self.cur.kind == TokenKind::RParen {
                self.bump()?;
                break;
            }
            if self.cur.kind == TokenKind::Eof {
                return Err(ClwError::Reader("unexpected eof in fn literal".into(), Some(self.loc())));
            }
            body.push(self.require_form()?);
        }
        let max_pct = max_percent_param(&body);
        let mut params: Vec<Value> = (1..=max_pct).map(|i| Value::Symbol(intern_symbol(None, &format!("%{i}")))).collect();
        if has_percent_rest(&body) {
            params.push(Value::Symbol(intern_symbol(None, "&")));
            params.push(Value::Symbol(intern_symbol(None, "%&")));
        }
        let param_vec = Value::Vector(PVector::from_iter(params));
        let mut list_items = vec![Value::Symbol(intern_symbol(None, "fn*")), param_vec];
        list_items.extend(body);
        Ok(Value::List(PList::from_vec(list_items)))
    }

    fn read_reader_conditional(&mut self) -> ClwResult<Option<Value>> {
        // `#?(:clj a :cljs b :default c)` — we only ever target one platform
        // key, `:clwasm`, falling back to `:default`; unmatched clauses are
        // read and discarded like `#_`.
        let items = self.read_flat_seq(TokenKind::LParen, TokenKind::RParen)?;
        let mut chosen = None;
        let mut default = None;
        for pair in items.chunks(2) {
            if pair.len() < 2 {
                continue;
            }
            if let Value::Keyword(k) = &pair[0] {
                if k.name() == "clwasm" {
                    chosen = Some(pair[1].clone());
                } else if k.name() == "default" {
                    default = Some(pair[1].clone());
                }
            }
        }
        Ok(chosen.or(default))
    }

    fn read_ns_map(&mut self) -> ClwResult<Value> {
        let t = self.cur;
        let text = self.text(t).to_string();
        self.bump()?;
        let ns = text.trim_start_matches("#:").to_string();
        let pairs = self.read_flat_seq(TokenKind::LBrace, TokenKind::RBrace)?;
        let mut map = PMap::new();
        for chunk in pairs.chunks(2) {
            let key = match &chunk[0] {
                Value::Keyword(k) if k.ns().is_none() => Value::Keyword(intern_keyword(Some(&ns), k.name())),
                other => other.clone(),
            };
            map = map.assoc(key, chunk[1].clone());
        }
        Ok(Value::Map(map))
    }

    fn read_tagged(&mut self, tag: &str, inner: Value) -> ClwResult<Option<Value>> {
        match tag {
            "inst" => {
                let Value::Str(s) = inner else {
                    return Err(ClwError::Reader("#inst requires a string literal".into(), Some(self.loc())));
                };
                let millis = parse_iso8601_millis(&s)
                    .ok_or_else(|| ClwError::Reader(format!("invalid #inst literal: {s}"), Some(self.loc())))?;
                Ok(Some(Value::Date(millis)))
            }
            "uuid" => {
                let Value::Str(s) = inner else {
                    return Err(ClwError::Reader("#uuid requires a string literal".into(), Some(self.loc())));
                };
                let u = parse_uuid(&s).ok_or_else(|| ClwError::Reader(format!("invalid #uuid literal: {s}"), Some(self.loc())))?;
                Ok(Some(Value::Uuid(u)))
            }
            _ => Err(ClwError::Reader(format!("no reader function registered for tag #{tag}"), Some(self.loc()))),
        }
    }

    fn parse_atom(&mut self, t: Token) -> ClwResult<Value> {
        let text = self.text(t);
        match t.kind {
            TokenKind::Integer => parse_integer(text)
                .map(Value::Int)
                .ok_or_else(|| ClwError::Reader(format!("invalid integer literal: {text}"), Some(self.loc()))),
            TokenKind::Float => text
                .trim_end_matches('M')
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ClwError::Reader(format!("invalid float literal: {text}"), Some(self.loc()))),
            TokenKind::Ratio => {
                let (n, d) = text.split_once('/').unwrap();
                let (n, d) = (n.parse::<f64>().unwrap_or(f64::NAN), d.parse::<f64>().unwrap_or(f64::NAN));
                // No bigint/ratio Value variant is in the closed set (spec.md
                // §3.1); ratio literals normalize to float (documented in
                // DESIGN.md as the numeric-promotion open-question resolution).
                Ok(Value::Float(n / d))
            }
            TokenKind::String => Ok(Value::str(unescape_string(&text[1..text.len() - 1]))),
            TokenKind::Character => Ok(Value::Char(parse_char_literal(&text[1..]))),
            TokenKind::Keyword => {
                let body = text.trim_start_matches(':');
                let (body, auto_resolve) = if let Some(rest) = body.strip_prefix(':') {
                    (rest, true)
                } else {
                    (body, false)
                };
                let _ = auto_resolve; // `::kw` auto-resolve requires current-ns context; left to the analyzer.
                match body.split_once('/') {
                    Some((ns, name)) if !ns.is_empty() => Ok(Value::Keyword(intern_keyword(Some(ns), name))),
                    _ => Ok(Value::Keyword(intern_keyword(None, body))),
                }
            }
            TokenKind::Symbol => match text {
                "nil" => Ok(Value::Nil),
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => match text.split_once('/') {
                    Some((ns, name)) if !ns.is_empty() && name != "" => Ok(Value::Symbol(intern_symbol(Some(ns), name))),
                    _ => Ok(Value::Symbol(intern_symbol(None, text))),
                },
            },
            _ => Err(ClwError::Reader(format!("unexpected token: {text}"), Some(self.loc()))),
        }
    }

    /// `` `form `` : syntax-quote. Bare symbols are namespace-qualified to
    /// the current read context's best-effort guess (left fully qualified
    /// resolution to the analyzer, which has the real current-ns); `foo#`
    /// auto-gensyms consistently within one syntax-quote expansion.
    fn syntax_quote(&self, form: &Value) -> Value {
        let mut gensyms = std::collections::HashMap::new();
        self.syntax_quote_inner(form, &mut gensyms)
    }

    fn syntax_quote_inner(&self, form: &Value, gensyms: &mut std::collections::HashMap<String, Value>) -> Value {
        match form {
            Value::Symbol(s) if s.name().ends_with('#') && s.ns().is_none() => {
                gensyms
                    .entry(s.name().to_string())
                    .or_insert_with(|| {
                        let n = self.gensym_counter.get();
                        self.gensym_counter.set(n + 1);
                        let base = &s.name()[..s.name().len() - 1];
                        Value::Symbol(intern_symbol(None, &format!("{base}__{n}__auto__")))
                    })
                    .clone()
            }
            Value::Symbol(s) => Value::Symbol(s.clone()),
            Value::List(l) => {
                let items: Vec<Value> = l.iter_values().map(|v| self.syntax_quote_inner(v, gensyms)).collect();
                Value::List(PList::from_vec(items))
            }
            Value::Vector(v) => {
                let items: Vec<Value> = v.iter().map(|x| self.syntax_quote_inner(x, gensyms)).collect();
                Value::Vector(PVector::from_iter(items))
            }
            Value::Map(m) => {
                let mut out = PMap::new();
                for (k, v) in m.iter() {
                    out = out.assoc(self.syntax_quote_inner(k, gensyms), self.syntax_quote_inner(v, gensyms));
                }
                Value::Map(out)
            }
            Value::Set(s) => Value::Set(PSet::from_iter(s.iter().map(|v| self.syntax_quote_inner(v, gensyms)))),
            other => other.clone(),
        }
    }
}

fn sym_unqualified(name: &str) -> Value {
    Value::Symbol(intern_symbol(None, name))
}

fn wrap(head: Value, arg: Value) -> Value {
    Value::List(PList::from_vec(vec![head, arg]))
}

fn max_percent_param(body: &[Value]) -> u32 {
    fn walk(v: &Value, max: &mut u32) {
        match v {
            Value::Symbol(s) if s.ns().is_none() && s.name().starts_with('%') && s.name() != "%&" => {
                if let Ok(n) = s.name()[1..].parse::<u32>() {
                    *max = (*max).max(n);
                } else if s.name() == "%" {
                    *max = (*max).max(1);
                }
            }
            Value::List(l) => l.iter_values().for_each(|x| walk(x, max)),
            Value::Vector(vec) => vec.iter().for_each(|x| walk(x, max)),
            Value::Map(m) => m.iter().for_each(|(k, val)| {
                walk(k, max);
                walk(val, max);
            }),
            Value::Set(s) => s.iter().for_each(|x| walk(x, max)),
            _ => {}
        }
    }
    let mut max = 0;
    body.iter().for_each(|v| walk(v, &mut max));
    max
}

fn has_percent_rest(body: &[Value]) -> bool {
    fn walk(v: &Value) -> bool {
        match v {
            Value::Symbol(s) => s.ns().is_none() && s.name() == "%&",
            Value::List(l) => l.iter_values().any(walk),
            Value::Vector(vec) => vec.iter().any(walk),
            Value::Map(m) => m.iter().any(|(k, val)| walk(k) || walk(val)),
            Value::Set(s) => s.iter().any(walk),
            _ => false,
        }
    }
    body.iter().any(walk)
}

fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim_end_matches('N');
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(neg_hex) = text.strip_prefix("-0x") {
        return i64::from_str_radix(neg_hex, 16).ok().map(|v: i64| -v);
    }
    if let Some(idx) = text.find('r') {
        let (radix_str, digits) = text.split_at(idx);
        let radix: u32 = radix_str.parse().ok()?;
        return i64::from_str_radix(&digits[1..], radix).ok();
    }
    text.parse::<i64>().ok()
}

fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn parse_char_literal(body: &str) -> char {
    match body {
        "newline" => '\n',
        "space" => ' ',
        "tab" => '\t',
        "return" => '\r',
        "backspace" => '\u{8}',
        "formfeed" => '\u{c}',
        _ if body.starts_with('u') && body.len() > 1 => {
            u32::from_str_radix(&body[1..], 16).ok().and_then(char::from_u32).unwrap_or('\u{fffd}')
        }
        _ => body.chars().next().unwrap_or('\u{fffd}'),
    }
}

fn parse_uuid(s: &str) -> Option<u128> {
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }
    u128::from_str_radix(&hex, 16).ok()
}

fn parse_iso8601_millis(s: &str) -> Option<i64> {
    // Minimal `YYYY-MM-DDTHH:MM:SS(.sss)?Z` parser; good enough for literal
    // round-tripping without pulling in a date/time crate the teacher stack
    // doesn't already carry.
    let bytes = s.as_bytes();
    if bytes.len() < 19 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: i64 = s.get(5..7)?.parse().ok()?;
    let day: i64 = s.get(8..10)?.parse().ok()?;
    let hour: i64 = s.get(11..13)?.parse().ok()?;
    let min: i64 = s.get(14..16)?.parse().ok()?;
    let sec: i64 = s.get(17..19)?.parse().ok()?;
    let days = days_from_civil(year, month, day);
    Some((days * 86400 + hour * 3600 + min * 60 + sec) * 1000)
}

fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one(src: &str) -> Value {
        let mut r = Reader::new(src, "test").unwrap();
        r.read_top_level().unwrap().unwrap().0
    }

    #[test]
    fn reads_list_of_symbols_and_numbers() {
        let v = read_one("(+ 1 2.5)");
        match v {
            Value::List(l) => assert_eq!(l.len(), 3),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn reads_vector_and_map() {
        let v = read_one("[1 2 3]");
        assert!(matches!(v, Value::Vector(_)));
        let m = read_one("{:a 1 :b 2}");
        match m {
            Value::Map(m) => assert_eq!(m.len(), 2),
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn quote_reader_macro_rewrites_to_quote_call() {
        let v = read_one("'foo");
        match v {
            Value::List(l) => {
                assert_eq!(l.len(), 2);
                assert_eq!(l.first(), Some(&Value::Symbol(intern_symbol(None, "quote"))));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn fn_literal_rewrites_percent_params() {
        let v = read_one("#(+ % %2)");
        match v {
            Value::List(l) => {
                let items: Vec<_> = l.iter_values().collect();
                assert_eq!(items[0], &Value::Symbol(intern_symbol(None, "fn*")));
                match items[1] {
                    Value::Vector(v) => assert_eq!(v.len(), 2),
                    _ => panic!("expected param vector"),
                }
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn namespaced_keyword_interns_with_ns() {
        let v = read_one(":foo/bar");
        match v {
            Value::Keyword(k) => {
                assert_eq!(k.ns(), Some("foo"));
                assert_eq!(k.name(), "bar");
            }
            _ => panic!("expected keyword"),
        }
    }

    #[test]
    fn discard_macro_drops_the_next_form() {
        let v = read_one("[1 #_2 3]");
        match v {
            Value::Vector(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected vector"),
        }
    }

    #[test]
    fn eof_inside_list_is_a_reader_error() {
        let mut r = Reader::new("(1 2", "test").unwrap();
        assert!(r.read_top_level().is_err());
    }
}
