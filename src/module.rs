//! Module binary format (spec.md §6.1): a compiled `Proto` tree serialized
//! to bytes and back, byte-for-byte stable so a cached module produced by
//! one run loads identically in the next (spec.md §8 invariant 7).
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header:   magic(4="CLJW") version(u16) flags(u16)
//! strings:  count(u32) (len(u32) utf8-bytes)*
//! protos:   count(u32) proto*
//! proto:    name_idx(u32) arity_min(u16) arity_max_or_variadic(u16)
//!           upval_count(u8) (index(u16) from_parent_local(u8))*
//!           code_len(u32) code_bytes
//!           const_count(u32) const*
//!           child_count(u32) child_idx(u32)*
//!           line_count(u32) (offset(u32) line(u32) col(u32))*
//!           catch_count(u32) (start(u32) end(u32) handler(u32)
//!             has_class(u8) class_const?) (binding_slot(u16))*
//!           local_count(u16) is_variadic(u8)
//! const:    tag(u8) payload
//! root_idx: u32
//! ```
//!
//! Protos serialize into a flat table, children before parents, so the
//! decoder rebuilds the `Rc<Proto>` tree bottom-up with no forward
//! references; `root_idx` at the end of the file names the entry point.

use std::collections::HashMap;
use std::rc::Rc;

use crate::collections::{PList, PMap, PSet, PVector};
use crate::compiler::chunk::{CatchEntry, Proto, UpvalDesc};
use crate::error::{ClwError, ClwResult};
use crate::symbol::intern_symbol;
use crate::value::Value;

const MAGIC: [u8; 4] = *b"CLJW";
const VERSION: u16 = 1;

/// Shared string table threaded through the whole encode pass so the same
/// proto name or symbol text is never written twice.
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringTable {
    fn new() -> Self {
        StringTable { strings: Vec::new(), index: HashMap::new() }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }
}

fn w_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}
fn w_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn w_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn w_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn w_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn w_u128(buf: &mut Vec<u8>, v: u128) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn w_str_ref(buf: &mut Vec<u8>, strings: &mut StringTable, s: &str) {
    w_u32(buf, strings.intern(s));
}

/// Constant tags. Only values that can appear as a compile-time literal are
/// representable; a closure, atom, or other GC-backed value reaching here
/// means the compiler emitted something it shouldn't have, not a format gap.
mod tag {
    pub const NIL: u8 = 0;
    pub const BOOL_FALSE: u8 = 1;
    pub const BOOL_TRUE: u8 = 2;
    pub const CHAR: u8 = 3;
    pub const INT: u8 = 4;
    pub const FLOAT: u8 = 5;
    pub const STR: u8 = 6;
    pub const SYMBOL: u8 = 7;
    pub const KEYWORD: u8 = 8;
    pub const LIST: u8 = 9;
    pub const VECTOR: u8 = 10;
    pub const MAP: u8 = 11;
    pub const SET: u8 = 12;
    pub const UUID: u8 = 13;
    pub const DATE: u8 = 14;
}

fn write_const(buf: &mut Vec<u8>, strings: &mut StringTable, v: &Value) -> ClwResult<()> {
    match v {
        Value::Nil => w_u8(buf, tag::NIL),
        Value::Bool(false) => w_u8(buf, tag::BOOL_FALSE),
        Value::Bool(true) => w_u8(buf, tag::BOOL_TRUE),
        Value::Char(c) => {
            w_u8(buf, tag::CHAR);
            w_u32(buf, *c as u32);
        }
        Value::Int(i) => {
            w_u8(buf, tag::INT);
            w_i64(buf, *i);
        }
        Value::Float(f) => {
            w_u8(buf, tag::FLOAT);
            w_f64(buf, *f);
        }
        Value::Str(s) => {
            w_u8(buf, tag::STR);
            w_str_ref(buf, strings, s);
        }
        Value::Symbol(s) => {
            w_u8(buf, tag::SYMBOL);
            w_str_ref(buf, strings, s.ns().unwrap_or(""));
            w_str_ref(buf, strings, s.name());
        }
        Value::Keyword(s) => {
            w_u8(buf, tag::KEYWORD);
            w_str_ref(buf, strings, s.ns().unwrap_or(""));
            w_str_ref(buf, strings, s.name());
        }
        Value::List(l) => {
            w_u8(buf, tag::LIST);
            w_u32(buf, l.len() as u32);
            for item in l.iter_values() {
                write_const(buf, strings, item)?;
            }
        }
        Value::Vector(vec) => {
            w_u8(buf, tag::VECTOR);
            w_u32(buf, vec.len() as u32);
            for item in vec.iter() {
                write_const(buf, strings, item)?;
            }
        }
        Value::Map(m) => {
            w_u8(buf, tag::MAP);
            w_u32(buf, m.len() as u32);
            for (k, val) in m.iter() {
                write_const(buf, strings, k)?;
                write_const(buf, strings, val)?;
            }
        }
        Value::Set(s) => {
            w_u8(buf, tag::SET);
            w_u32(buf, s.len() as u32);
            for item in s.iter() {
                write_const(buf, strings, item)?;
            }
        }
        Value::Uuid(u) => {
            w_u8(buf, tag::UUID);
            w_u128(buf, *u);
        }
        Value::Date(d) => {
            w_u8(buf, tag::DATE);
            w_i64(buf, *d);
        }
        other => return Err(ClwError::Internal(format!("module format cannot serialize a {} constant", other.type_tag()))),
    }
    Ok(())
}

/// Appends `p`'s (and all its not-yet-seen children's) encoded entries to
/// `entries`, returning `p`'s own index in that table. Children are visited
/// first so their indices already exist when `p`'s entry references them.
fn encode_proto(p: &Rc<Proto>, strings: &mut StringTable, seen: &mut HashMap<*const Proto, u32>, entries: &mut Vec<Vec<u8>>) -> ClwResult<u32> {
    let key = Rc::as_ptr(p);
    if let Some(&idx) = seen.get(&key) {
        return Ok(idx);
    }
    let mut child_indices = Vec::with_capacity(p.children().len());
    for child in p.children() {
        child_indices.push(encode_proto(child, strings, seen, entries)?);
    }

    let mut buf = Vec::new();
    w_str_ref(&mut buf, strings, p.name());
    w_u16(&mut buf, p.arity_min());
    w_u16(&mut buf, p.arity_max_or_variadic());
    w_u8(&mut buf, p.upvalues().len() as u8);
    for up in p.upvalues() {
        w_u16(&mut buf, up.index);
        w_u8(&mut buf, up.from_parent_local as u8);
    }
    w_u32(&mut buf, p.code().len() as u32);
    buf.extend_from_slice(p.code());
    w_u32(&mut buf, p.constants().len() as u32);
    for c in p.constants() {
        write_const(&mut buf, strings, c)?;
    }
    w_u32(&mut buf, child_indices.len() as u32);
    for idx in &child_indices {
        w_u32(&mut buf, *idx);
    }
    w_u32(&mut buf, p.line_info().len() as u32);
    for (offset, line, col) in p.line_info() {
        w_u32(&mut buf, *offset);
        w_u32(&mut buf, *line);
        w_u32(&mut buf, *col);
    }
    w_u32(&mut buf, p.catch_table().len() as u32);
    for entry in p.catch_table() {
        w_u32(&mut buf, entry.start);
        w_u32(&mut buf, entry.end);
        w_u32(&mut buf, entry.handler);
        match &entry.class {
            Some(v) => {
                w_u8(&mut buf, 1);
                write_const(&mut buf, strings, v)?;
            }
            None => w_u8(&mut buf, 0),
        }
        w_u16(&mut buf, entry.binding_slot);
    }
    w_u16(&mut buf, p.local_count());
    w_u8(&mut buf, p.is_variadic() as u8);

    let idx = entries.len() as u32;
    entries.push(buf);
    seen.insert(key, idx);
    Ok(idx)
}

/// Serializes a compiled top-level `Proto` (and everything it transitively
/// closes over) to the module binary format.
pub fn encode(root: &Rc<Proto>) -> ClwResult<Vec<u8>> {
    let mut strings = StringTable::new();
    let mut seen = HashMap::new();
    let mut entries = Vec::new();
    let root_idx = encode_proto(root, &mut strings, &mut seen, &mut entries)?;

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    w_u16(&mut out, VERSION);
    w_u16(&mut out, 0); // flags, reserved
    w_u32(&mut out, strings.strings.len() as u32);
    for s in &strings.strings {
        w_u32(&mut out, s.len() as u32);
        out.extend_from_slice(s.as_bytes());
    }
    w_u32(&mut out, entries.len() as u32);
    for e in &entries {
        out.extend_from_slice(e);
    }
    w_u32(&mut out, root_idx);
    Ok(out)
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    strings: Vec<String>,
}

impl<'a> ByteReader<'a> {
    fn u8(&mut self) -> ClwResult<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(Self::eof)?;
        self.pos += 1;
        Ok(b)
    }
    fn u16(&mut self) -> ClwResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
    fn u32(&mut self) -> ClwResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn i64(&mut self) -> ClwResult<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }
    fn f64(&mut self) -> ClwResult<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }
    fn u128_le(&mut self) -> ClwResult<u128> {
        let b = self.take(16)?;
        Ok(u128::from_le_bytes(b.try_into().unwrap()))
    }
    fn take(&mut self, n: usize) -> ClwResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Self::eof());
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
    fn eof() -> ClwError {
        ClwError::Compile("module file truncated".into(), None)
    }
    fn str_ref(&mut self) -> ClwResult<String> {
        let idx = self.u32()? as usize;
        self.strings.get(idx).cloned().ok_or_else(|| ClwError::Compile(format!("module string index {idx} out of range"), None))
    }
}

fn read_const(r: &mut ByteReader) -> ClwResult<Value> {
    let t = r.u8()?;
    Ok(match t {
        tag::NIL => Value::Nil,
        tag::BOOL_FALSE => Value::Bool(false),
        tag::BOOL_TRUE => Value::Bool(true),
        tag::CHAR => {
            let code = r.u32()?;
            Value::Char(char::from_u32(code).ok_or_else(|| ClwError::Compile("invalid char constant".into(), None))?)
        }
        tag::INT => Value::Int(r.i64()?),
        tag::FLOAT => Value::Float(r.f64()?),
        tag::STR => Value::str(r.str_ref()?),
        tag::SYMBOL => {
            let ns = r.str_ref()?;
            let name = r.str_ref()?;
            Value::Symbol(intern_symbol(if ns.is_empty() { None } else { Some(&ns) }, &name))
        }
        tag::KEYWORD => {
            let ns = r.str_ref()?;
            let name = r.str_ref()?;
            Value::Keyword(crate::symbol::intern_keyword(if ns.is_empty() { None } else { Some(&ns) }, &name))
        }
        tag::LIST => {
            let n = r.u32()?;
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                items.push(read_const(r)?);
            }
            Value::List(PList::from_vec(items))
        }
        tag::VECTOR => {
            let n = r.u32()?;
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                items.push(read_const(r)?);
            }
            Value::Vector(PVector::from_iter(items))
        }
        tag::MAP => {
            let n = r.u32()?;
            let mut m = PMap::new();
            for _ in 0..n {
                let k = read_const(r)?;
                let v = read_const(r)?;
                m = m.assoc(k, v);
            }
            Value::Map(m)
        }
        tag::SET => {
            let n = r.u32()?;
            let mut s = PSet::new();
            for _ in 0..n {
                s = s.conj(read_const(r)?);
            }
            Value::Set(s)
        }
        tag::UUID => Value::Uuid(r.u128_le()?),
        tag::DATE => Value::Date(r.i64()?),
        other => return Err(ClwError::Compile(format!("unknown module constant tag {other}"), None)),
    })
}

/// Deserializes a module binary produced by `encode` back into a `Proto`
/// tree, failing closed on anything that doesn't match the expected layout
/// (truncation, bad magic, unsupported version, unknown constant tag).
pub fn decode(bytes: &[u8]) -> ClwResult<Rc<Proto>> {
    let mut r = ByteReader { buf: bytes, pos: 0, strings: Vec::new() };
    if r.take(4)? != MAGIC {
        return Err(ClwError::Compile("not a module file (bad magic)".into(), None));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(ClwError::Compile(format!("unsupported module version {version}"), None));
    }
    let _flags = r.u16()?;

    let str_count = r.u32()?;
    for _ in 0..str_count {
        let len = r.u32()? as usize;
        let bytes = r.take(len)?.to_vec();
        let s = String::from_utf8(bytes).map_err(|e| ClwError::Compile(format!("module string is not utf-8: {e}"), None))?;
        r.strings.push(s);
    }

    let proto_count = r.u32()?;
    let mut built: Vec<Rc<Proto>> = Vec::with_capacity(proto_count as usize);
    for _ in 0..proto_count {
        let name = r.str_ref()?;
        let arity_min = r.u16()?;
        let arity_max_or_variadic = r.u16()?;
        let upval_count = r.u8()?;
        let mut upvalues = Vec::with_capacity(upval_count as usize);
        for _ in 0..upval_count {
            let index = r.u16()?;
            let from_parent_local = r.u8()? != 0;
            upvalues.push(UpvalDesc { index, from_parent_local });
        }
        let code_len = r.u32()? as usize;
        let code = r.take(code_len)?.to_vec();
        let const_count = r.u32()?;
        let mut constants = Vec::with_capacity(const_count as usize);
        for _ in 0..const_count {
            constants.push(read_const(&mut r)?);
        }
        let child_count = r.u32()?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            let idx = r.u32()? as usize;
            let child = built.get(idx).ok_or_else(|| ClwError::Compile(format!("module child proto index {idx} out of range"), None))?;
            children.push(child.clone());
        }
        let line_count = r.u32()?;
        let mut line_info = Vec::with_capacity(line_count as usize);
        for _ in 0..line_count {
            let offset = r.u32()?;
            let line = r.u32()?;
            let col = r.u32()?;
            line_info.push((offset, line, col));
        }
        let catch_count = r.u32()?;
        let mut catch_table = Vec::with_capacity(catch_count as usize);
        for _ in 0..catch_count {
            let start = r.u32()?;
            let end = r.u32()?;
            let handler = r.u32()?;
            let has_class = r.u8()? != 0;
            let class = if has_class { Some(read_const(&mut r)?) } else { None };
            let binding_slot = r.u16()?;
            catch_table.push(CatchEntry { start, end, handler, class, binding_slot });
        }
        let local_count = r.u16()?;
        let is_variadic = r.u8()? != 0;

        built.push(Rc::new(Proto::from_raw_parts(
            name,
            code,
            constants,
            children,
            line_info,
            upvalues,
            local_count,
            arity_min,
            arity_max_or_variadic,
            is_variadic,
            catch_table,
        )));
    }

    let root_idx = r.u32()? as usize;
    built.get(root_idx).cloned().ok_or_else(|| ClwError::Compile(format!("module root proto index {root_idx} out of range"), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::opcodes::Opcode;

    fn sample_proto() -> Rc<Proto> {
        let mut b = Proto::builder("sample");
        b.set_local_count(2);
        b.set_arity(1, 1, false);
        let idx = b.add_constant(Value::str("hello"));
        b.emit_op_u16(Opcode::PushConst, idx);
        b.emit_op(Opcode::Ret);
        Rc::new(b.build())
    }

    #[test]
    fn encode_decode_round_trips_code_and_constants() {
        let proto = sample_proto();
        let bytes = encode(&proto).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.name(), "sample");
        assert_eq!(decoded.code(), proto.code());
        assert_eq!(decoded.constants(), proto.constants());
        assert_eq!(decoded.local_count(), 2);
        assert_eq!(decoded.arity_min(), 1);
    }

    #[test]
    fn encoding_is_deterministic_byte_for_byte() {
        let proto = sample_proto();
        let a = encode(&proto).unwrap();
        let b = encode(&proto).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let proto = sample_proto();
        let mut bytes = encode(&proto).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let bytes = vec![0u8; 16];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), "compile_error");
    }
}
