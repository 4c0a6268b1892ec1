//! Value decoding.

use thiserror::Error;

use crate::tag::Tag;
use crate::value::{Dict, Obj, Value};

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("unmarshal error: empty input")]
    Empty,
    #[error("unmarshal error: truncated input")]
    Truncated,
    #[error("unmarshal error: unknown tag {0}")]
    UnknownTag(u8),
    #[error("unmarshal error: unexpected type {got:?}, want one of {want:?}")]
    TypeMismatch { want: Vec<Tag>, got: Tag },
    #[error("unmarshal error: invalid utf-8 in string")]
    InvalidString,
}

/// Decode the first value in `src`, returning it and the number of bytes
/// consumed.
pub fn unmarshal(src: &[u8]) -> Result<(Value, usize), CodecError> {
    if src.is_empty() {
        return Err(CodecError::Empty);
    }
    let tag = Tag::from_u8(src[0]).ok_or(CodecError::UnknownTag(src[0]))?;
    let mut r = Reader {
        buf: src,
        pos: 1,
    };
    let v = decode_body(tag, &mut r)?;
    Ok((v, r.pos))
}

/// Like [`unmarshal`] but rejecting any tag outside `allowed`.
pub fn unmarshal_as(src: &[u8], allowed: &[Tag]) -> Result<(Value, usize), CodecError> {
    if src.is_empty() {
        return Err(CodecError::Empty);
    }
    let tag = Tag::from_u8(src[0]).ok_or(CodecError::UnknownTag(src[0]))?;
    if !allowed.contains(&tag) {
        return Err(CodecError::TypeMismatch {
            want: allowed.to_vec(),
            got: tag,
        });
    }
    unmarshal(src)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < n {
            return Err(CodecError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn string(&mut self, len: usize) -> Result<String, CodecError> {
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| CodecError::InvalidString)
    }
}

fn decode_body(tag: Tag, r: &mut Reader) -> Result<Value, CodecError> {
    Ok(match tag {
        Tag::Null => Value::Null,
        Tag::False => Value::Bool(false),
        Tag::True => Value::Bool(true),
        Tag::Byte => Value::Byte(r.u8()?),
        Tag::SByte => Value::SByte(dec_i8(r.u8()?)),
        Tag::UShort => Value::UShort(r.u16()?),
        Tag::Short => Value::Short(dec_i16(r.u16()?)),
        Tag::UInt => Value::UInt(r.u32()?),
        Tag::Int => Value::Int(dec_i32(r.u32()?)),
        Tag::ULong => Value::ULong(r.u64()?),
        Tag::Long => Value::Long(dec_i64(r.u64()?)),
        Tag::Float => Value::Float(dec_f32(r.u32()?)),
        Tag::Double => Value::Double(dec_f64(r.u64()?)),
        Tag::Str8 => {
            let len = r.u8()? as usize;
            Value::Str8(r.string(len)?)
        }
        Tag::Str16 => {
            let len = r.u16()? as usize;
            Value::Str16(r.string(len)?)
        }
        Tag::Obj => {
            let class_id = r.u8()?;
            let len = r.u16()? as usize;
            Value::Obj(Obj {
                class_id,
                body: r.take(len)?.to_vec(),
            })
        }
        Tag::List => {
            let count = r.u16()? as usize;
            let mut elems = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let len = r.u16()? as usize;
                elems.push(r.take(len)?.to_vec());
            }
            Value::List(elems)
        }
        Tag::Dict => {
            let count = r.u8()? as usize;
            let mut dict = Dict::new();
            for _ in 0..count {
                let klen = r.u8()? as usize;
                let key = r.string(klen)?;
                let vlen = r.u16()? as usize;
                dict.insert(key, r.take(vlen)?.to_vec());
            }
            Value::Dict(dict)
        }
        Tag::Bools => {
            let count = r.u16()? as usize;
            let mut xs = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                xs.push(r.u8()? != 0);
            }
            Value::Bools(xs)
        }
        Tag::Bytes => Value::Bytes(unpack(r, |r| r.u8())?),
        Tag::SBytes => Value::SBytes(unpack(r, |r| Ok(dec_i8(r.u8()?)))?),
        Tag::UShorts => Value::UShorts(unpack(r, |r| r.u16())?),
        Tag::Shorts => Value::Shorts(unpack(r, |r| Ok(dec_i16(r.u16()?)))?),
        Tag::UInts => Value::UInts(unpack(r, |r| r.u32())?),
        Tag::Ints => Value::Ints(unpack(r, |r| Ok(dec_i32(r.u32()?)))?),
        Tag::ULongs => Value::ULongs(unpack(r, |r| r.u64())?),
        Tag::Longs => Value::Longs(unpack(r, |r| Ok(dec_i64(r.u64()?)))?),
        Tag::Floats => Value::Floats(unpack(r, |r| Ok(dec_f32(r.u32()?)))?),
        Tag::Doubles => Value::Doubles(unpack(r, |r| Ok(dec_f64(r.u64()?)))?),
    })
}

fn unpack<T>(
    r: &mut Reader,
    get: impl Fn(&mut Reader) -> Result<T, CodecError>,
) -> Result<Vec<T>, CodecError> {
    let count = r.u16()? as usize;
    let mut xs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        xs.push(get(r)?);
    }
    Ok(xs)
}

fn dec_i8(b: u8) -> i8 {
    (b ^ 0x80) as i8
}

fn dec_i16(b: u16) -> i16 {
    (b ^ 0x8000) as i16
}

fn dec_i32(b: u32) -> i32 {
    (b ^ 0x8000_0000) as i32
}

fn dec_i64(b: u64) -> i64 {
    (b ^ 0x8000_0000_0000_0000) as i64
}

fn dec_f32(enc: u32) -> f32 {
    if enc & 0x8000_0000 != 0 {
        f32::from_bits(enc ^ 0x8000_0000)
    } else {
        f32::from_bits(!enc)
    }
}

fn dec_f64(enc: u64) -> f64 {
    if enc & 0x8000_0000_0000_0000 != 0 {
        f64::from_bits(enc ^ 0x8000_0000_0000_0000)
    } else {
        f64::from_bits(!enc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::marshal;

    #[test]
    fn test_unmarshal_empty() {
        assert_eq!(unmarshal(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn test_unmarshal_unknown_tag() {
        assert_eq!(unmarshal(&[200]), Err(CodecError::UnknownTag(200)));
    }

    #[test]
    fn test_unmarshal_truncated() {
        let mut b = marshal(&Value::UInt(77));
        b.pop();
        assert_eq!(unmarshal(&b), Err(CodecError::Truncated));
    }

    #[test]
    fn test_unmarshal_consumes_exactly_one_value() {
        let mut b = marshal(&Value::Byte(1));
        let tail = marshal(&Value::Byte(2));
        let first_len = b.len();
        b.extend_from_slice(&tail);
        let (v, n) = unmarshal(&b).unwrap();
        assert_eq!(v, Value::Byte(1));
        assert_eq!(n, first_len);
    }

    #[test]
    fn test_unmarshal_as_rejects_other_tags() {
        let b = marshal(&Value::Int(5));
        let err = unmarshal_as(&b, &[Tag::UInt, Tag::ULong]).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch {
                want: vec![Tag::UInt, Tag::ULong],
                got: Tag::Int,
            }
        );
        assert!(unmarshal_as(&b, &[Tag::Int]).is_ok());
    }
}
