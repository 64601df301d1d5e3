//! # Index Keys
//!
//! The value domain `K` of the balanced index tree. Keys form a closed enum
//! over the three index kinds rather than a type parameter, because the page
//! codec is a closed tag table and every key must serialize through it.
//!
//! ## Ordering
//!
//! The three key kinds never interleave: every `Cas` key sorts below every
//! `Path` key, and every `Path` key below every `Name` key. Within `Cas`,
//! keys order by path node first, then by value. Int and Float values merge
//! into one numeric order (so `Int(3) < Float(3.5) < Int(4)`), with every
//! number below every `Str`; strings and names order lexicographically.
//!
//! Float ordering uses the sign-split bit trick: negative floats invert all
//! bits, positive floats flip the sign bit. The mapped u64 orders exactly
//! like the IEEE-754 total order, which also makes `Ord` consistent with the
//! bit-exact `Eq` the aggregation rules require (equal-key aggregation is by
//! exact equality, never ordering proximity). An integer and a float of the
//! same magnitude are never equal; the integer sorts first, which keeps the
//! order total.
//!
//! ## Encoding
//!
//! Keys serialize as `[type prefix][fields]` with varint/zigzag integers and
//! length-prefixed UTF-8, shared by the AVL page codec.

use std::cmp::Ordering;

use eyre::{bail, ensure, Result};

use crate::encoding::{get_varint, get_zigzag, put_varint, put_zigzag};

mod type_prefix {
    pub const CAS_INT: u8 = 0x01;
    pub const CAS_FLOAT: u8 = 0x02;
    pub const CAS_STR: u8 = 0x03;
    pub const PATH: u8 = 0x10;
    pub const NAME: u8 = 0x20;
}

/// A typed atomic value inside a content-and-structure key.
#[derive(Debug, Clone)]
pub enum KeyValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl KeyValue {
    fn prefix(&self) -> u8 {
        match self {
            KeyValue::Int(_) => type_prefix::CAS_INT,
            KeyValue::Float(_) => type_prefix::CAS_FLOAT,
            KeyValue::Str(_) => type_prefix::CAS_STR,
        }
    }
}

/// Maps a float to a u64 that orders like the IEEE-754 total order.
fn sortable_float_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a == b,
            (KeyValue::Float(a), KeyValue::Float(b)) => a.to_bits() == b.to_bits(),
            (KeyValue::Str(a), KeyValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyValue {}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use KeyValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => sortable_float_bits(*a).cmp(&sortable_float_bits(*b)),
            (Str(a), Str(b)) => a.cmp(b),
            (Str(_), _) => Ordering::Greater,
            (_, Str(_)) => Ordering::Less,
            // Mixed numerics merge by magnitude. On an exact magnitude tie
            // the integer sorts first, so the order stays total even though
            // equality never holds across variants.
            (Int(a), Float(b)) => sortable_float_bits(*a as f64)
                .cmp(&sortable_float_bits(*b))
                .then(Ordering::Less),
            (Float(a), Int(b)) => sortable_float_bits(*a)
                .cmp(&sortable_float_bits(*b as f64))
                .then(Ordering::Greater),
        }
    }
}

/// An index key: the ordering domain of one index tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    /// Content-and-structure: a typed value at a path.
    Cas { path_node: u64, value: KeyValue },
    /// Structure only: a path-summary node.
    Path { path_node: u64 },
    /// A tag or attribute name.
    Name { name: String },
}

impl IndexKey {
    fn prefix(&self) -> u8 {
        match self {
            IndexKey::Cas { value, .. } => value.prefix(),
            IndexKey::Path { .. } => type_prefix::PATH,
            IndexKey::Name { .. } => type_prefix::NAME,
        }
    }

    /// Appends the serialized form to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.prefix());
        match self {
            IndexKey::Cas { path_node, value } => {
                put_varint(buf, *path_node);
                match value {
                    KeyValue::Int(v) => put_zigzag(buf, *v),
                    KeyValue::Float(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
                    KeyValue::Str(v) => {
                        put_varint(buf, v.len() as u64);
                        buf.extend_from_slice(v.as_bytes());
                    }
                }
            }
            IndexKey::Path { path_node } => put_varint(buf, *path_node),
            IndexKey::Name { name } => {
                put_varint(buf, name.len() as u64);
                buf.extend_from_slice(name.as_bytes());
            }
        }
    }

    /// Decodes a key from the front of `buf`, returning `(key, bytes_read)`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure!(!buf.is_empty(), "empty buffer for index key decode");
        let prefix = buf[0];
        let mut pos = 1;

        let key = match prefix {
            type_prefix::CAS_INT => {
                let (path_node, n) = get_varint(&buf[pos..])?;
                pos += n;
                let (v, n) = get_zigzag(&buf[pos..])?;
                pos += n;
                IndexKey::Cas {
                    path_node,
                    value: KeyValue::Int(v),
                }
            }
            type_prefix::CAS_FLOAT => {
                let (path_node, n) = get_varint(&buf[pos..])?;
                pos += n;
                ensure!(buf.len() >= pos + 8, "truncated float key");
                let bits = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap()); // INVARIANT: length validated above
                pos += 8;
                IndexKey::Cas {
                    path_node,
                    value: KeyValue::Float(f64::from_bits(bits)),
                }
            }
            type_prefix::CAS_STR => {
                let (path_node, n) = get_varint(&buf[pos..])?;
                pos += n;
                let (len, n) = get_varint(&buf[pos..])?;
                pos += n;
                // Untrusted length; compare against the remaining bytes
                // without forming pos + len, which can overflow.
                ensure!(len <= (buf.len() - pos) as u64, "truncated string key");
                let len = len as usize;
                let value = std::str::from_utf8(&buf[pos..pos + len])?.to_owned();
                pos += len;
                IndexKey::Cas {
                    path_node,
                    value: KeyValue::Str(value),
                }
            }
            type_prefix::PATH => {
                let (path_node, n) = get_varint(&buf[pos..])?;
                pos += n;
                IndexKey::Path { path_node }
            }
            type_prefix::NAME => {
                let (len, n) = get_varint(&buf[pos..])?;
                pos += n;
                ensure!(len <= (buf.len() - pos) as u64, "truncated name key");
                let len = len as usize;
                let name = std::str::from_utf8(&buf[pos..pos + len])?.to_owned();
                pos += len;
                IndexKey::Name { name }
            }
            other => bail!("invalid index key prefix: {:#04x}", other),
        };

        Ok((key, pos))
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                IndexKey::Cas {
                    path_node: pa,
                    value: va,
                },
                IndexKey::Cas {
                    path_node: pb,
                    value: vb,
                },
            ) => pa.cmp(pb).then_with(|| va.cmp(vb)),
            (IndexKey::Path { path_node: a }, IndexKey::Path { path_node: b }) => a.cmp(b),
            (IndexKey::Name { name: a }, IndexKey::Name { name: b }) => a.cmp(b),
            _ => self.prefix().cmp(&other.prefix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(key: IndexKey) {
        let mut buf = Vec::new();
        key.encode(&mut buf);
        let (decoded, read) = IndexKey::decode(&buf).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(read, buf.len());
    }

    #[test]
    fn round_trips_every_kind() {
        round_trip(IndexKey::Cas {
            path_node: 3,
            value: KeyValue::Int(-42),
        });
        round_trip(IndexKey::Cas {
            path_node: 9,
            value: KeyValue::Float(-0.5),
        });
        round_trip(IndexKey::Cas {
            path_node: 0,
            value: KeyValue::Str("hello".into()),
        });
        round_trip(IndexKey::Path { path_node: 17 });
        round_trip(IndexKey::Name {
            name: "article".into(),
        });
    }

    #[test]
    fn string_keys_order_lexicographically() {
        let a = IndexKey::Name { name: "abc".into() };
        let b = IndexKey::Name { name: "abd".into() };
        let c = IndexKey::Name { name: "b".into() };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn int_keys_order_numerically() {
        let make = |v| IndexKey::Cas {
            path_node: 1,
            value: KeyValue::Int(v),
        };
        assert!(make(-10) < make(-1));
        assert!(make(-1) < make(0));
        assert!(make(0) < make(100));
    }

    #[test]
    fn float_keys_follow_total_order() {
        let make = |v| IndexKey::Cas {
            path_node: 1,
            value: KeyValue::Float(v),
        };
        assert!(make(f64::NEG_INFINITY) < make(-1.5));
        assert!(make(-1.5) < make(-0.0));
        assert!(make(-0.0) < make(0.0));
        assert!(make(0.0) < make(1.5));
        assert!(make(1.5) < make(f64::INFINITY));
        assert!(make(f64::INFINITY) < make(f64::NAN));
    }

    #[test]
    fn ints_and_floats_merge_numerically() {
        let make = |v| IndexKey::Cas {
            path_node: 1,
            value: v,
        };
        assert!(make(KeyValue::Float(-5.0)) < make(KeyValue::Int(100)));
        assert!(make(KeyValue::Int(3)) < make(KeyValue::Float(3.5)));
        assert!(make(KeyValue::Float(3.5)) < make(KeyValue::Int(4)));
        assert!(make(KeyValue::Int(7)) < make(KeyValue::Str("0".into())));
        assert!(make(KeyValue::Float(f64::INFINITY)) < make(KeyValue::Str("".into())));
    }

    #[test]
    fn numeric_ties_put_the_integer_first() {
        let int = KeyValue::Int(3);
        let float = KeyValue::Float(3.0);
        assert_ne!(int, float);
        assert_eq!(int.cmp(&float), Ordering::Less);
        assert_eq!(float.cmp(&int), Ordering::Greater);
    }

    #[test]
    fn path_component_orders_before_value() {
        let a = IndexKey::Cas {
            path_node: 1,
            value: KeyValue::Str("zzz".into()),
        };
        let b = IndexKey::Cas {
            path_node: 2,
            value: KeyValue::Str("aaa".into()),
        };
        assert!(a < b);
    }

    #[test]
    fn kinds_never_interleave() {
        let cas = IndexKey::Cas {
            path_node: u64::MAX,
            value: KeyValue::Str("zzz".into()),
        };
        let path = IndexKey::Path { path_node: 0 };
        let name = IndexKey::Name { name: "".into() };
        assert!(cas < path);
        assert!(path < name);
    }

    #[test]
    fn float_equality_is_bit_exact() {
        let a = KeyValue::Float(0.0);
        let b = KeyValue::Float(-0.0);
        assert_ne!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Greater);
    }

    #[test]
    fn decode_rejects_unknown_prefix() {
        assert!(IndexKey::decode(&[0x7F, 0, 0]).is_err());
    }

    #[test]
    fn huge_string_lengths_are_errors_not_panics() {
        // A claimed length of u64::MAX must not wrap the cursor around.
        let mut cas = vec![type_prefix::CAS_STR];
        put_varint(&mut cas, 1);
        put_varint(&mut cas, u64::MAX);
        assert!(IndexKey::decode(&cas).is_err());

        let mut name = vec![type_prefix::NAME];
        put_varint(&mut name, u64::MAX);
        assert!(IndexKey::decode(&name).is_err());
    }
}
