//! Property queries: typed predicates over a room's public props dict.
//!
//! Comparison operators work on the raw marshaled bytes. The codec stores
//! numbers big-endian with order-preserving sign handling, so lexicographic
//! comparison equals numeric comparison — but only between values of the
//! same tag. A tag mismatch therefore never satisfies `Equal`, and always
//! satisfies `Not`; the same polarity rule applies to containment.

use serde::{Deserialize, Serialize};

use roomnet_protocol::{unmarshal_as, Dict, Tag, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    Equal,
    Not,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Contain,
    NotContain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropQuery {
    pub key: String,
    pub op: OpType,
    /// Marshaled query value, tag byte included.
    pub val: Vec<u8>,
}

impl PropQuery {
    /// Evaluate against the stored value for `self.key`. A missing key
    /// compares as empty bytes.
    pub fn matches(&self, stored: Option<&[u8]>) -> bool {
        let stored = stored.unwrap_or(&[]);

        if matches!(self.op, OpType::Contain | OpType::NotContain) {
            return self.contain(stored);
        }

        let ord = stored.cmp(self.val.as_slice());
        match self.op {
            OpType::Equal => ord.is_eq(),
            OpType::Not => ord.is_ne(),
            OpType::LessThan => ord.is_lt(),
            OpType::LessThanOrEqual => ord.is_le(),
            OpType::GreaterThan => ord.is_gt(),
            OpType::GreaterThanOrEqual => ord.is_ge(),
            OpType::Contain | OpType::NotContain => unreachable!(),
        }
    }

    fn contain(&self, stored: &[u8]) -> bool {
        let Some(&tag_byte) = stored.first() else {
            return self.op == OpType::NotContain;
        };
        let Some(tag) = Tag::from_u8(tag_byte) else {
            return self.op == OpType::NotContain;
        };

        match tag {
            Tag::Null => self.op == OpType::NotContain,
            Tag::List => {
                let Ok((Value::List(elems), _)) = unmarshal_as(stored, &[Tag::List]) else {
                    return self.op == OpType::NotContain;
                };
                for elem in &elems {
                    if elem.as_slice() == self.val.as_slice() {
                        return self.op == OpType::Contain;
                    }
                }
                self.op == OpType::NotContain
            }
            Tag::Bools => self.contain_bool(stored),
            _ => {
                if let Some(elem_tag) = tag.num_list_element() {
                    return self.contain_num(stored, elem_tag);
                }
                tracing::error!(key = %self.key, ?tag, "contain query on a non-list property");
                false
            }
        }
    }

    fn contain_bool(&self, stored: &[u8]) -> bool {
        let Ok((Value::Bool(want), _)) = unmarshal_as(&self.val, &[Tag::True, Tag::False]) else {
            return self.op == OpType::NotContain;
        };
        let Ok((Value::Bools(xs), _)) = unmarshal_as(stored, &[Tag::Bools]) else {
            return self.op == OpType::NotContain;
        };
        if xs.contains(&want) {
            self.op == OpType::Contain
        } else {
            self.op == OpType::NotContain
        }
    }

    fn contain_num(&self, stored: &[u8], elem_tag: Tag) -> bool {
        let query_tag = self.val.first().and_then(|b| Tag::from_u8(*b));
        if query_tag != Some(elem_tag) {
            tracing::debug!(
                key = %self.key,
                ?query_tag,
                ?elem_tag,
                "contain query tag mismatch"
            );
            return self.op == OpType::NotContain;
        }
        let elem_size = elem_tag.data_size().expect("numeric element tag");
        let hdr = 3; // tag byte + u16 count
        let needle = &self.val[1..];
        if needle.len() != elem_size {
            return self.op == OpType::NotContain;
        }
        let mut i = hdr;
        while i + elem_size <= stored.len() {
            if &stored[i..i + elem_size] == needle {
                return self.op == OpType::Contain;
            }
            i += elem_size;
        }
        self.op == OpType::NotContain
    }
}

/// One AND group: matches iff every query matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropQueries(pub Vec<PropQuery>);

impl PropQueries {
    pub fn matches(&self, props: &Dict) -> bool {
        self.0.iter().all(|q| q.matches(props.get(&q.key)))
    }
}

/// Disjunction over AND groups; an empty list matches everything.
pub fn match_any(groups: &[PropQueries], props: &Dict) -> bool {
    groups.is_empty() || groups.iter().any(|g| g.matches(props))
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomnet_protocol::marshal;

    fn props_with(key: &str, v: &Value) -> Dict {
        let mut d = Dict::new();
        d.insert(key, marshal(v));
        d
    }

    fn query(key: &str, op: OpType, v: &Value) -> PropQuery {
        PropQuery {
            key: key.into(),
            op,
            val: marshal(v),
        }
    }

    #[test]
    fn test_comparison_ops() {
        let props = props_with("score", &Value::Int(5));
        let stored = props.get("score");

        assert!(query("score", OpType::Equal, &Value::Int(5)).matches(stored));
        assert!(!query("score", OpType::Equal, &Value::Int(6)).matches(stored));
        assert!(query("score", OpType::Not, &Value::Int(6)).matches(stored));
        assert!(query("score", OpType::LessThan, &Value::Int(6)).matches(stored));
        assert!(query("score", OpType::LessThanOrEqual, &Value::Int(5)).matches(stored));
        assert!(query("score", OpType::GreaterThan, &Value::Int(-10)).matches(stored));
        assert!(query("score", OpType::GreaterThanOrEqual, &Value::Int(5)).matches(stored));
        assert!(!query("score", OpType::GreaterThan, &Value::Int(5)).matches(stored));
    }

    #[test]
    fn test_negative_numbers_compare_numerically() {
        let props = props_with("delta", &Value::Int(-3));
        let stored = props.get("delta");
        assert!(query("delta", OpType::LessThan, &Value::Int(0)).matches(stored));
        assert!(query("delta", OpType::GreaterThan, &Value::Int(-10)).matches(stored));
    }

    #[test]
    fn test_tag_mismatch_polarity() {
        // Stored Int(5), queried ULong(5): never equal, always not-equal.
        let props = props_with("score", &Value::Int(5));
        let stored = props.get("score");
        assert!(!query("score", OpType::Equal, &Value::ULong(5)).matches(stored));
        assert!(query("score", OpType::Not, &Value::ULong(5)).matches(stored));

        let list = props_with("scores", &Value::Ints(vec![5]));
        let stored = list.get("scores");
        assert!(!query("scores", OpType::Contain, &Value::ULong(5)).matches(stored));
        assert!(query("scores", OpType::NotContain, &Value::ULong(5)).matches(stored));
    }

    #[test]
    fn test_missing_key_compares_as_empty() {
        let props = Dict::new();
        assert!(!query("missing", OpType::Equal, &Value::Int(1)).matches(props.get("missing")));
        assert!(query("missing", OpType::Not, &Value::Int(1)).matches(props.get("missing")));
        assert!(query("missing", OpType::NotContain, &Value::Int(1)).matches(props.get("missing")));
    }

    #[test]
    fn test_contain_on_generic_list() {
        let props = props_with(
            "tags",
            &Value::List(vec![
                marshal(&Value::Str8("pvp".into())),
                marshal(&Value::Str8("ranked".into())),
            ]),
        );
        let stored = props.get("tags");
        assert!(query("tags", OpType::Contain, &Value::Str8("pvp".into())).matches(stored));
        assert!(!query("tags", OpType::Contain, &Value::Str8("coop".into())).matches(stored));
        assert!(query("tags", OpType::NotContain, &Value::Str8("coop".into())).matches(stored));
    }

    #[test]
    fn test_contain_on_numeric_list() {
        let props = props_with("levels", &Value::Ints(vec![1, 2, 3]));
        let stored = props.get("levels");
        assert!(query("levels", OpType::Contain, &Value::Int(2)).matches(stored));
        assert!(!query("levels", OpType::Contain, &Value::Int(9)).matches(stored));
        assert!(query("levels", OpType::NotContain, &Value::Int(9)).matches(stored));
    }

    #[test]
    fn test_contain_on_bools_and_null() {
        let props = props_with("flags", &Value::Bools(vec![false, true]));
        let stored = props.get("flags");
        assert!(query("flags", OpType::Contain, &Value::Bool(true)).matches(stored));

        let null_props = props_with("flags", &Value::Null);
        let stored = null_props.get("flags");
        assert!(!query("flags", OpType::Contain, &Value::Bool(true)).matches(stored));
        assert!(query("flags", OpType::NotContain, &Value::Bool(true)).matches(stored));
    }

    #[test]
    fn test_contain_on_non_list_is_false_both_ways() {
        let props = props_with("n", &Value::Int(1));
        let stored = props.get("n");
        assert!(!query("n", OpType::Contain, &Value::Int(1)).matches(stored));
    }

    #[test]
    fn test_and_group_and_disjunction() {
        let mut props = Dict::new();
        props.insert("tag", marshal(&Value::Str8("A".into())));
        props.insert("level", marshal(&Value::Int(2)));

        let tag_a = PropQueries(vec![query("tag", OpType::Equal, &Value::Str8("A".into()))]);
        let level_9 = PropQueries(vec![query("level", OpType::Equal, &Value::Int(9))]);
        let both = PropQueries(vec![
            query("tag", OpType::Equal, &Value::Str8("A".into())),
            query("level", OpType::Equal, &Value::Int(9)),
        ]);

        assert!(tag_a.matches(&props));
        assert!(!both.matches(&props));
        assert!(match_any(&[level_9.clone(), tag_a.clone()], &props));
        assert!(!match_any(&[level_9, both], &props));
        assert!(match_any(&[], &props));
    }
}
