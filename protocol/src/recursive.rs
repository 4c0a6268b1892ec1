//! Recursive decoding into plain nested values.
//!
//! Containers keep raw element bytes in [`Value`]; this module walks them
//! all the way down, producing primitives, maps, and lists only. Useful for
//! logging, dashboards, and tests that do not care about exact tags.

use crate::unmarshal::{unmarshal, CodecError};
use crate::value::Value;

/// A fully-decoded value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
    Obj {
        class_id: u8,
        body: Option<Box<RawValue>>,
    },
    List(Vec<RawValue>),
    Map(Vec<(String, RawValue)>),
}

/// Decode every value in `src` recursively. A single top-level value
/// decodes to itself; several concatenated values decode to a list.
pub fn unmarshal_recursive(src: &[u8]) -> Result<RawValue, CodecError> {
    if src.is_empty() {
        return Err(CodecError::Empty);
    }
    let (first, n) = decode_one(src)?;
    if n >= src.len() {
        return Ok(first);
    }

    let mut items = vec![first];
    let mut rest = &src[n..];
    while !rest.is_empty() {
        let (v, n) = decode_one(rest)?;
        items.push(v);
        rest = &rest[n..];
    }
    Ok(RawValue::List(items))
}

fn decode_one(src: &[u8]) -> Result<(RawValue, usize), CodecError> {
    let (v, n) = unmarshal(src)?;
    let raw = match v {
        Value::Null => RawValue::Null,
        Value::Bool(b) => RawValue::Bool(b),
        Value::Byte(x) => RawValue::U64(x as u64),
        Value::UShort(x) => RawValue::U64(x as u64),
        Value::UInt(x) => RawValue::U64(x as u64),
        Value::ULong(x) => RawValue::U64(x),
        Value::SByte(x) => RawValue::I64(x as i64),
        Value::Short(x) => RawValue::I64(x as i64),
        Value::Int(x) => RawValue::I64(x as i64),
        Value::Long(x) => RawValue::I64(x),
        Value::Float(x) => RawValue::F64(x as f64),
        Value::Double(x) => RawValue::F64(x),
        Value::Str8(s) | Value::Str16(s) => RawValue::Str(s),
        Value::Obj(o) => RawValue::Obj {
            class_id: o.class_id,
            body: if o.body.is_empty() {
                None
            } else {
                Some(Box::new(unmarshal_recursive(&o.body)?))
            },
        },
        Value::List(elems) => {
            let mut items = Vec::with_capacity(elems.len());
            for e in &elems {
                items.push(unmarshal_recursive(e)?);
            }
            RawValue::List(items)
        }
        Value::Dict(d) => {
            let mut entries = Vec::with_capacity(d.len());
            for (k, bytes) in d.iter() {
                entries.push((k.to_string(), unmarshal_recursive(bytes)?));
            }
            RawValue::Map(entries)
        }
        Value::Bools(xs) => RawValue::List(xs.into_iter().map(RawValue::Bool).collect()),
        Value::Bytes(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::U64(x as u64)).collect()),
        Value::SBytes(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::I64(x as i64)).collect()),
        Value::UShorts(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::U64(x as u64)).collect()),
        Value::Shorts(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::I64(x as i64)).collect()),
        Value::UInts(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::U64(x as u64)).collect()),
        Value::Ints(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::I64(x as i64)).collect()),
        Value::ULongs(xs) => RawValue::List(xs.into_iter().map(RawValue::U64).collect()),
        Value::Longs(xs) => RawValue::List(xs.into_iter().map(RawValue::I64).collect()),
        Value::Floats(xs) => RawValue::List(xs.into_iter().map(|x| RawValue::F64(x as f64)).collect()),
        Value::Doubles(xs) => RawValue::List(xs.into_iter().map(RawValue::F64).collect()),
    };
    Ok((raw, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::marshal;
    use crate::value::{Dict, Obj};

    #[test]
    fn test_recursive_nested_dict() {
        let mut inner = Dict::new();
        inner.insert("n", marshal(&Value::Int(-3)));
        let mut outer = Dict::new();
        outer.insert("inner", marshal(&Value::Dict(inner)));
        outer.insert("name", marshal(&Value::Str8("r".into())));

        let raw = unmarshal_recursive(&marshal(&Value::Dict(outer))).unwrap();
        let RawValue::Map(entries) = raw else {
            panic!("expected map");
        };
        assert_eq!(
            entries[0],
            (
                "inner".to_string(),
                RawValue::Map(vec![("n".to_string(), RawValue::I64(-3))])
            )
        );
        assert_eq!(entries[1], ("name".to_string(), RawValue::Str("r".into())));
    }

    #[test]
    fn test_recursive_obj_body() {
        let mut body = marshal(&Value::Byte(1));
        body.extend_from_slice(&marshal(&Value::Byte(2)));
        let b = marshal(&Value::Obj(Obj { class_id: 9, body }));
        let raw = unmarshal_recursive(&b).unwrap();
        assert_eq!(
            raw,
            RawValue::Obj {
                class_id: 9,
                body: Some(Box::new(RawValue::List(vec![
                    RawValue::U64(1),
                    RawValue::U64(2)
                ]))),
            }
        );
    }

    #[test]
    fn test_recursive_concatenated_top_level() {
        let mut b = marshal(&Value::Bool(true));
        b.extend_from_slice(&marshal(&Value::Str8("x".into())));
        let raw = unmarshal_recursive(&b).unwrap();
        assert_eq!(
            raw,
            RawValue::List(vec![RawValue::Bool(true), RawValue::Str("x".into())])
        );
    }
}
