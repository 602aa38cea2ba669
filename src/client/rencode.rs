//! The rencode serialization used by the Deluge daemon protocol.
//!
//! rencode is a compact relative of bencode. Small integers, short strings,
//! short lists and small dictionaries carry their size in the type byte;
//! everything else uses a type byte followed by a terminated body.
use std::io;

use bytes::{Buf, BufMut, BytesMut};

const CHR_LIST: u8 = 59;
const CHR_DICT: u8 = 60;
const CHR_INT: u8 = 61;
const CHR_INT1: u8 = 62;
const CHR_INT2: u8 = 63;
const CHR_INT4: u8 = 64;
const CHR_INT8: u8 = 65;
const CHR_FLOAT32: u8 = 66;
const CHR_FLOAT64: u8 = 44;
const CHR_TRUE: u8 = 67;
const CHR_FALSE: u8 = 68;
const CHR_NONE: u8 = 69;
const CHR_TERM: u8 = 127;

const INT_POS_FIXED_START: u8 = 0;
const INT_POS_FIXED_COUNT: u8 = 44;
const INT_NEG_FIXED_START: u8 = 70;
const INT_NEG_FIXED_COUNT: u8 = 32;
const DICT_FIXED_START: u8 = 102;
const DICT_FIXED_COUNT: u8 = 25;
const STR_FIXED_START: u8 = 128;
const STR_FIXED_COUNT: u8 = 64;
const LIST_FIXED_START: u8 = STR_FIXED_START + STR_FIXED_COUNT;
const LIST_FIXED_COUNT: u8 = 64;

/// Nesting limit for decoding, a hostile peer could otherwise exhaust the
/// stack.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Entries in insertion order.
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Value::str(k), v))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

pub fn encode(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::None => buf.put_u8(CHR_NONE),
        Value::Bool(true) => buf.put_u8(CHR_TRUE),
        Value::Bool(false) => buf.put_u8(CHR_FALSE),
        Value::Int(n) => encode_int(*n, buf),
        Value::Float(f) => {
            buf.put_u8(CHR_FLOAT64);
            buf.put_f64(*f);
        }
        Value::Bytes(b) => {
            if b.len() < STR_FIXED_COUNT as usize {
                buf.put_u8(STR_FIXED_START + b.len() as u8);
            } else {
                buf.extend_from_slice(b.len().to_string().as_bytes());
                buf.put_u8(b':');
            }
            buf.extend_from_slice(b);
        }
        Value::List(items) => {
            let fixed = items.len() < LIST_FIXED_COUNT as usize;
            if fixed {
                buf.put_u8(LIST_FIXED_START + items.len() as u8);
            } else {
                buf.put_u8(CHR_LIST);
            }
            for item in items {
                encode(item, buf);
            }
            if !fixed {
                buf.put_u8(CHR_TERM);
            }
        }
        Value::Dict(entries) => {
            let fixed = entries.len() < DICT_FIXED_COUNT as usize;
            if fixed {
                buf.put_u8(DICT_FIXED_START + entries.len() as u8);
            } else {
                buf.put_u8(CHR_DICT);
            }
            for (k, v) in entries {
                encode(k, buf);
                encode(v, buf);
            }
            if !fixed {
                buf.put_u8(CHR_TERM);
            }
        }
    }
}

fn encode_int(n: i64, buf: &mut BytesMut) {
    if (0..INT_POS_FIXED_COUNT as i64).contains(&n) {
        buf.put_u8(INT_POS_FIXED_START + n as u8);
    } else if (-(INT_NEG_FIXED_COUNT as i64)..0).contains(&n) {
        buf.put_u8((INT_NEG_FIXED_START as i64 - 1 - n) as u8);
    } else if let Ok(n) = i8::try_from(n) {
        buf.put_u8(CHR_INT1);
        buf.put_i8(n);
    } else if let Ok(n) = i16::try_from(n) {
        buf.put_u8(CHR_INT2);
        buf.put_i16(n);
    } else if let Ok(n) = i32::try_from(n) {
        buf.put_u8(CHR_INT4);
        buf.put_i32(n);
    } else {
        buf.put_u8(CHR_INT8);
        buf.put_i64(n);
    }
}

/// Decodes a single value that must span all of `bytes`.
pub fn decode(mut bytes: &[u8]) -> io::Result<Value> {
    let value = decode_value(&mut bytes, 0)?;
    if !bytes.is_empty() {
        return Err(invalid("trailing bytes after value"));
    }
    Ok(value)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn need(buf: &[u8], n: usize) -> io::Result<()> {
    if buf.len() < n {
        Err(invalid("truncated rencode value"))
    } else {
        Ok(())
    }
}

fn take(buf: &mut &[u8], n: usize) -> io::Result<Vec<u8>> {
    need(buf, n)?;
    let slice: &[u8] = *buf;
    let (head, rest) = slice.split_at(n);
    *buf = rest;
    Ok(head.to_vec())
}

/// Reads bytes up to, and consumes, `end`.
fn take_until(buf: &mut &[u8], end: u8) -> io::Result<Vec<u8>> {
    let slice: &[u8] = *buf;
    let pos = slice
        .iter()
        .position(|b| *b == end)
        .ok_or_else(|| invalid("unterminated rencode value"))?;
    *buf = &slice[pos + 1..];
    Ok(slice[..pos].to_vec())
}

fn parse_decimal<T: std::str::FromStr>(digits: &[u8]) -> io::Result<T> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("invalid decimal in rencode value"))
}

fn decode_value(buf: &mut &[u8], depth: usize) -> io::Result<Value> {
    if depth > MAX_DEPTH {
        return Err(invalid("rencode value nested too deeply"));
    }
    need(buf, 1)?;
    let t = buf.get_u8();
    let value = match t {
        CHR_NONE => Value::None,
        CHR_TRUE => Value::Bool(true),
        CHR_FALSE => Value::Bool(false),
        CHR_INT1 => {
            need(buf, 1)?;
            Value::Int(buf.get_i8() as i64)
        }
        CHR_INT2 => {
            need(buf, 2)?;
            Value::Int(buf.get_i16() as i64)
        }
        CHR_INT4 => {
            need(buf, 4)?;
            Value::Int(buf.get_i32() as i64)
        }
        CHR_INT8 => {
            need(buf, 8)?;
            Value::Int(buf.get_i64())
        }
        CHR_INT => Value::Int(parse_decimal(&take_until(buf, CHR_TERM)?)?),
        CHR_FLOAT32 => {
            need(buf, 4)?;
            Value::Float(buf.get_f32() as f64)
        }
        CHR_FLOAT64 => {
            need(buf, 8)?;
            Value::Float(buf.get_f64())
        }
        b'0'..=b'9' => {
            let mut digits = vec![t];
            digits.extend(take_until(buf, b':')?);
            let len: usize = parse_decimal(&digits)?;
            Value::Bytes(take(buf, len)?)
        }
        CHR_LIST => {
            let mut items = Vec::new();
            while !at_term(buf)? {
                items.push(decode_value(buf, depth + 1)?);
            }
            Value::List(items)
        }
        CHR_DICT => {
            let mut entries = Vec::new();
            while !at_term(buf)? {
                let k = decode_value(buf, depth + 1)?;
                let v = decode_value(buf, depth + 1)?;
                entries.push((k, v));
            }
            Value::Dict(entries)
        }
        t if t < INT_POS_FIXED_START + INT_POS_FIXED_COUNT => Value::Int(t as i64),
        t if (INT_NEG_FIXED_START..INT_NEG_FIXED_START + INT_NEG_FIXED_COUNT).contains(&t) => {
            Value::Int(INT_NEG_FIXED_START as i64 - 1 - t as i64)
        }
        t if (DICT_FIXED_START..DICT_FIXED_START + DICT_FIXED_COUNT).contains(&t) => {
            let len = (t - DICT_FIXED_START) as usize;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let k = decode_value(buf, depth + 1)?;
                let v = decode_value(buf, depth + 1)?;
                entries.push((k, v));
            }
            Value::Dict(entries)
        }
        t if (STR_FIXED_START..STR_FIXED_START + STR_FIXED_COUNT).contains(&t) => {
            Value::Bytes(take(buf, (t - STR_FIXED_START) as usize)?)
        }
        t if t >= LIST_FIXED_START && t - LIST_FIXED_START < LIST_FIXED_COUNT => {
            let len = (t - LIST_FIXED_START) as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(buf, depth + 1)?);
            }
            Value::List(items)
        }
        _ => return Err(invalid("unknown rencode type byte")),
    };
    Ok(value)
}

/// Consumes the terminator if it is next.
fn at_term(buf: &mut &[u8]) -> io::Result<bool> {
    need(buf, 1)?;
    if buf[0] == CHR_TERM {
        buf.advance(1);
        Ok(true)
    } else {
        Ok(false)
    }
}
