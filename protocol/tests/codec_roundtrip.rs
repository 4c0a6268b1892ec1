//! Round-trip coverage: every tag survives marshal → unmarshal unchanged
//! and reports the exact number of bytes consumed.

use roomnet_protocol::{marshal, unmarshal, Dict, Obj, Value};

fn sample_values() -> Vec<Value> {
    let mut dict = Dict::new();
    dict.insert("score", marshal(&Value::Int(5)));
    dict.insert("name", marshal(&Value::Str8("arena".into())));

    vec![
        Value::Null,
        Value::Bool(false),
        Value::Bool(true),
        Value::Byte(0),
        Value::Byte(255),
        Value::SByte(-128),
        Value::SByte(127),
        Value::UShort(65535),
        Value::Short(-32768),
        Value::UInt(4_000_000_000),
        Value::Int(-2_000_000_000),
        Value::ULong(u64::MAX),
        Value::Long(i64::MIN),
        Value::Float(-1.5),
        Value::Double(std::f64::consts::PI),
        Value::Str8(String::new()),
        Value::Str8("hello".into()),
        Value::Str16("a".repeat(300)),
        Value::Obj(Obj {
            class_id: 3,
            body: marshal(&Value::Byte(1)),
        }),
        Value::List(vec![
            marshal(&Value::Int(1)),
            marshal(&Value::Str8("x".into())),
        ]),
        Value::Dict(dict),
        Value::Bools(vec![true, false, true]),
        Value::Bytes(vec![1, 2, 3]),
        Value::SBytes(vec![-1, 0, 1]),
        Value::UShorts(vec![0, 65535]),
        Value::Shorts(vec![-5, 5]),
        Value::UInts(vec![7, 8]),
        Value::Ints(vec![-7, 7]),
        Value::ULongs(vec![u64::MAX, 0]),
        Value::Longs(vec![i64::MIN, i64::MAX]),
        Value::Floats(vec![-0.5, 0.5]),
        Value::Doubles(vec![-2.25, 2.25]),
    ]
}

#[test]
fn test_every_tag_roundtrips() {
    for v in sample_values() {
        let bytes = marshal(&v);
        let (back, n) = unmarshal(&bytes).unwrap_or_else(|e| panic!("{v:?}: {e}"));
        assert_eq!(back, v);
        assert_eq!(n, bytes.len(), "consumed length for {v:?}");
    }
}

#[test]
fn test_remarshal_is_identical() {
    for v in sample_values() {
        let bytes = marshal(&v);
        let (back, _) = unmarshal(&bytes).unwrap();
        assert_eq!(marshal(&back), bytes, "re-marshal of {v:?}");
    }
}

#[test]
fn test_empty_containers() {
    for v in [
        Value::List(vec![]),
        Value::Dict(Dict::new()),
        Value::Bools(vec![]),
        Value::Ints(vec![]),
        Value::Obj(Obj {
            class_id: 0,
            body: vec![],
        }),
    ] {
        let bytes = marshal(&v);
        let (back, n) = unmarshal(&bytes).unwrap();
        assert_eq!(back, v);
        assert_eq!(n, bytes.len());
    }
}
