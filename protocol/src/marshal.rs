//! Value encoding.
//!
//! All integers are big-endian. Signed integers are stored with the sign
//! bit flipped and floats with an order-preserving bit transform, so that
//! `memcmp` on two marshaled values of the same tag orders them
//! numerically.

use crate::tag::Tag;
use crate::value::Value;

/// Marshal a value into a fresh buffer.
pub fn marshal(v: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    marshal_into(v, &mut buf);
    buf
}

pub(crate) fn marshal_into(v: &Value, buf: &mut Vec<u8>) {
    buf.push(v.tag() as u8);
    match v {
        Value::Null | Value::Bool(_) => {}
        Value::Byte(n) => buf.push(*n),
        Value::SByte(n) => buf.push(enc_i8(*n)),
        Value::UShort(n) => buf.extend_from_slice(&n.to_be_bytes()),
        Value::Short(n) => buf.extend_from_slice(&enc_i16(*n).to_be_bytes()),
        Value::UInt(n) => buf.extend_from_slice(&n.to_be_bytes()),
        Value::Int(n) => buf.extend_from_slice(&enc_i32(*n).to_be_bytes()),
        Value::ULong(n) => buf.extend_from_slice(&n.to_be_bytes()),
        Value::Long(n) => buf.extend_from_slice(&enc_i64(*n).to_be_bytes()),
        Value::Float(n) => buf.extend_from_slice(&enc_f32(*n).to_be_bytes()),
        Value::Double(n) => buf.extend_from_slice(&enc_f64(*n).to_be_bytes()),
        Value::Str8(s) => {
            let s = clamp_str(s, u8::MAX as usize);
            buf.push(s.len() as u8);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Str16(s) => {
            let s = clamp_str(s, u16::MAX as usize);
            buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Obj(o) => {
            buf.push(o.class_id);
            buf.extend_from_slice(&(o.body.len().min(u16::MAX as usize) as u16).to_be_bytes());
            buf.extend_from_slice(&o.body[..o.body.len().min(u16::MAX as usize)]);
        }
        Value::List(elems) => {
            let n = elems.len().min(u16::MAX as usize);
            buf.extend_from_slice(&(n as u16).to_be_bytes());
            for e in &elems[..n] {
                let len = e.len().min(u16::MAX as usize);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
                buf.extend_from_slice(&e[..len]);
            }
        }
        Value::Dict(d) => {
            let n = d.len().min(u8::MAX as usize);
            buf.push(n as u8);
            for (key, val) in d.iter().take(n) {
                let key = clamp_str(key, u8::MAX as usize);
                buf.push(key.len() as u8);
                buf.extend_from_slice(key.as_bytes());
                let len = val.len().min(u16::MAX as usize);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
                buf.extend_from_slice(&val[..len]);
            }
        }
        Value::Bools(xs) => pack(buf, xs, |buf, x| buf.push(*x as u8)),
        Value::Bytes(xs) => pack(buf, xs, |buf, x| buf.push(*x)),
        Value::SBytes(xs) => pack(buf, xs, |buf, x| buf.push(enc_i8(*x))),
        Value::UShorts(xs) => pack(buf, xs, |buf, x| buf.extend_from_slice(&x.to_be_bytes())),
        Value::Shorts(xs) => pack(buf, xs, |buf, x| {
            buf.extend_from_slice(&enc_i16(*x).to_be_bytes())
        }),
        Value::UInts(xs) => pack(buf, xs, |buf, x| buf.extend_from_slice(&x.to_be_bytes())),
        Value::Ints(xs) => pack(buf, xs, |buf, x| {
            buf.extend_from_slice(&enc_i32(*x).to_be_bytes())
        }),
        Value::ULongs(xs) => pack(buf, xs, |buf, x| buf.extend_from_slice(&x.to_be_bytes())),
        Value::Longs(xs) => pack(buf, xs, |buf, x| {
            buf.extend_from_slice(&enc_i64(*x).to_be_bytes())
        }),
        Value::Floats(xs) => pack(buf, xs, |buf, x| {
            buf.extend_from_slice(&enc_f32(*x).to_be_bytes())
        }),
        Value::Doubles(xs) => pack(buf, xs, |buf, x| {
            buf.extend_from_slice(&enc_f64(*x).to_be_bytes())
        }),
    }
}

fn pack<T>(buf: &mut Vec<u8>, xs: &[T], put: impl Fn(&mut Vec<u8>, &T)) {
    let n = xs.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(n as u16).to_be_bytes());
    for x in &xs[..n] {
        put(buf, x);
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
fn clamp_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub(crate) fn enc_i8(v: i8) -> u8 {
    (v as u8) ^ 0x80
}

pub(crate) fn enc_i16(v: i16) -> u16 {
    (v as u16) ^ 0x8000
}

pub(crate) fn enc_i32(v: i32) -> u32 {
    (v as u32) ^ 0x8000_0000
}

pub(crate) fn enc_i64(v: i64) -> u64 {
    (v as u64) ^ 0x8000_0000_0000_0000
}

pub(crate) fn enc_f32(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & 0x8000_0000 == 0 {
        bits | 0x8000_0000
    } else {
        !bits
    }
}

pub(crate) fn enc_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & 0x8000_0000_0000_0000 == 0 {
        bits | 0x8000_0000_0000_0000
    } else {
        !bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dict;

    /// Scalar payload without the tag byte, exactly as packed numeric
    /// lists store their elements.
    fn scalar_payload(v: &Value) -> Option<Vec<u8>> {
        let bytes = marshal(v);
        v.tag().data_size().map(|_| bytes[1..].to_vec())
    }

    #[test]
    fn test_marshal_scalars() {
        assert_eq!(marshal(&Value::Null), vec![Tag::Null as u8]);
        assert_eq!(marshal(&Value::Bool(true)), vec![Tag::True as u8]);
        assert_eq!(marshal(&Value::Byte(7)), vec![Tag::Byte as u8, 7]);
        assert_eq!(
            marshal(&Value::UInt(0x01020304)),
            vec![Tag::UInt as u8, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_signed_encoding_orders_lexicographically() {
        let pairs = [(-5i32, 3i32), (i32::MIN, i32::MAX), (-1, 0), (100, 101)];
        for (lo, hi) in pairs {
            let a = marshal(&Value::Int(lo));
            let b = marshal(&Value::Int(hi));
            assert!(a < b, "{lo} should order below {hi}");
        }
    }

    #[test]
    fn test_float_encoding_orders_lexicographically() {
        let pairs = [(-2.5f64, -1.0f64), (-1.0, 0.0), (0.0, 0.25), (1.5, 100.0)];
        for (lo, hi) in pairs {
            let a = marshal(&Value::Double(lo));
            let b = marshal(&Value::Double(hi));
            assert!(a < b, "{lo} should order below {hi}");
        }
    }

    #[test]
    fn test_marshal_str8() {
        let b = marshal(&Value::Str8("ab".into()));
        assert_eq!(b, vec![Tag::Str8 as u8, 2, b'a', b'b']);
    }

    #[test]
    fn test_marshal_dict_layout() {
        let mut d = Dict::new();
        d.insert("k", marshal(&Value::Byte(9)));
        let b = marshal(&Value::Dict(d));
        assert_eq!(
            b,
            vec![Tag::Dict as u8, 1, 1, b'k', 0, 2, Tag::Byte as u8, 9]
        );
    }

    #[test]
    fn test_scalar_payload_matches_packed_list_element() {
        let list = marshal(&Value::Ints(vec![42]));
        let payload = scalar_payload(&Value::Int(42)).unwrap();
        // tag + u16 count, then the packed element
        assert_eq!(&list[3..], payload.as_slice());
    }
}
