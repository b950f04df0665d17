//! # Bencode Codec
//!
//! Bencode is the serialization format used by `.torrent` files and tracker
//! responses. It has four kinds of values:
//!
//! | Kind        | Format              | Example                          |
//! |-------------|---------------------|----------------------------------|
//! | Byte string | `<length>:<bytes>`  | `5:hello` → `hello`              |
//! | Integer     | `i<decimal>e`       | `i52e` → `52`                    |
//! | List        | `l<items>e`         | `l5:helloi52ee` → `[hello, 52]`  |
//! | Dictionary  | `d<key><value>...e` | `d3:foo3:bare` → `{foo: bar}`    |
//!
//! ## Byte Strings
//!
//! The length prefix counts raw bytes. Piece hashes and compact peer lists
//! are binary, so strings are kept as `Vec<u8>` and only interpreted as text
//! on request.
//!
//! ## Decoding
//!
//! The decoder is lenient where real-world files are sloppy: integers with
//! leading zeros are accepted and dictionary keys may arrive in any order.
//! Structural violations (bad length prefix, missing terminator, unknown tag)
//! are reported as [`Error::MalformedInput`] with the offending offset.
//!
//! ## Canonical Encoding
//!
//! Dictionaries are stored in a `BTreeMap`, so encoding always emits keys in
//! raw byte order. This makes re-encoding deterministic, which the info hash
//! depends on.

use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::io::Write;

// Deepest list/dictionary nesting accepted by the decoder
const MAX_DEPTH: usize = 64;

pub type Dictionary = BTreeMap<Vec<u8>, Value>;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw byte string, not necessarily UTF-8.
    Bytes(Vec<u8>),
    /// Signed integer.
    Integer(i64),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Dictionary keyed by byte strings.
    Dict(Dictionary),
}

impl Value {
    /// Build a byte string value from text.
    pub fn string(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as text if it is a valid UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_dict(self) -> Option<Dictionary> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key if this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<Dictionary> for Value {
    fn from(d: Dictionary) -> Self {
        Value::Dict(d)
    }
}

/// Decode a complete bencoded buffer.
///
/// The whole input must be consumed by exactly one value; anything left over
/// is reported as malformed.
pub fn decode(input: &[u8]) -> Result<Value> {
    let (value, consumed) = decode_prefix(input, 0)?;

    if consumed != input.len() {
        return Err(Error::malformed(consumed, "trailing data after value"));
    }

    Ok(value)
}

/// Decode one value starting at `offset`.
///
/// # Returns
///
/// The decoded value and the number of bytes it occupied, so callers can keep
/// reading a stream of concatenated values.
pub fn decode_prefix(input: &[u8], offset: usize) -> Result<(Value, usize)> {
    let mut pos = offset;
    let value = decode_value(input, &mut pos, 0)?;

    Ok((value, pos - offset))
}

fn decode_value(input: &[u8], pos: &mut usize, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::malformed(*pos, "nesting too deep"));
    }

    match input.get(*pos) {
        None => Err(Error::malformed(*pos, "unexpected end of input")),
        Some(b'0'..=b'9') => decode_bytes(input, pos).map(Value::Bytes),
        Some(b'i') => decode_integer(input, pos),
        Some(b'l') => decode_list(input, pos, depth),
        Some(b'd') => decode_dict(input, pos, depth),
        Some(&c) => Err(Error::malformed(
            *pos,
            format!("unexpected tag byte 0x{:02x}", c),
        )),
    }
}

fn decode_bytes(input: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let start = *pos;
    let colon = match input[start..].iter().position(|&b| b == b':') {
        Some(i) => start + i,
        None => return Err(Error::malformed(start, "byte string has no ':' separator")),
    };

    let len_digits = &input[start..colon];
    if len_digits.is_empty() || !len_digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::malformed(start, "non-numeric byte string length"));
    }

    // Digits only, so the slice is ASCII
    let len: usize = std::str::from_utf8(len_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::malformed(start, "byte string length out of range"))?;

    let data_start = colon + 1;
    let data_end = match data_start.checked_add(len) {
        Some(end) if end <= input.len() => end,
        _ => {
            return Err(Error::malformed(
                start,
                format!("byte string length {} overruns input", len),
            ))
        }
    };

    *pos = data_end;
    Ok(input[data_start..data_end].to_vec())
}

fn decode_integer(input: &[u8], pos: &mut usize) -> Result<Value> {
    let start = *pos;
    let body_start = start + 1;
    let end = match input[body_start..].iter().position(|&b| b == b'e') {
        Some(i) => body_start + i,
        None => return Err(Error::malformed(start, "integer has no terminating 'e'")),
    };

    let body = &input[body_start..end];
    let digits = body.strip_prefix(b"-").unwrap_or(body);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::malformed(start, "non-numeric integer body"));
    }

    let value: i64 = std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::malformed(start, "integer out of 64-bit range"))?;

    *pos = end + 1;
    Ok(Value::Integer(value))
}

fn decode_list(input: &[u8], pos: &mut usize, depth: usize) -> Result<Value> {
    let start = *pos;
    *pos += 1;
    let mut list = Vec::new();

    loop {
        match input.get(*pos) {
            None => return Err(Error::malformed(start, "list is never closed")),
            Some(b'e') => break,
            Some(_) => list.push(decode_value(input, pos, depth + 1)?),
        }
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(input: &[u8], pos: &mut usize, depth: usize) -> Result<Value> {
    let start = *pos;
    *pos += 1;
    let mut dict = Dictionary::new();

    loop {
        match input.get(*pos) {
            None => return Err(Error::malformed(start, "dictionary is never closed")),
            Some(b'e') => break,
            Some(b'0'..=b'9') => {
                let key = decode_bytes(input, pos)?;
                let value = decode_value(input, pos, depth + 1)?;
                // Last occurrence of a duplicated key wins
                dict.insert(key, value);
            }
            Some(_) => {
                return Err(Error::malformed(
                    *pos,
                    "dictionary key is not a byte string",
                ))
            }
        }
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}

/// Encode any value.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value(value, &mut buf);
    buf
}

/// Canonically encode a dictionary: keys in raw byte order, no whitespace.
///
/// This is the exact byte sequence the info hash is computed over, so it must
/// match any standards-conformant encoder byte for byte.
pub fn encode_dictionary_canonical(dict: &Dictionary) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_dict(dict, &mut buf);
    buf
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::Integer(i) => {
            // Writing into a Vec cannot fail
            let _ = write!(buf, "i{}e", i);
        }
        Value::List(l) => {
            buf.push(b'l');
            for item in l {
                encode_value(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(d) => encode_dict(d, buf),
    }
}

fn encode_dict(dict: &Dictionary, buf: &mut Vec<u8>) {
    buf.push(b'd');
    // BTreeMap iterates keys in byte-wise lexicographic order
    for (key, value) in dict {
        encode_bytes(key, buf);
        encode_value(value, buf);
    }
    buf.push(b'e');
}

fn encode_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    let _ = write!(buf, "{}:", bytes.len());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: Vec<(&str, Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v))
                .collect(),
        )
    }

    #[test]
    fn test_decode_known_vectors() {
        assert_eq!(decode(b"5:hello").unwrap(), Value::string("hello"));
        assert_eq!(decode(b"i52e").unwrap(), Value::Integer(52));
        assert_eq!(
            decode(b"l5:helloi52ee").unwrap(),
            Value::List(vec![Value::string("hello"), Value::Integer(52)])
        );
        assert_eq!(
            decode(b"d3:foo3:bar5:helloi52ee").unwrap(),
            dict(vec![
                ("foo", Value::string("bar")),
                ("hello", Value::Integer(52))
            ])
        );
    }

    #[test]
    fn test_value_accessors() {
        let value = decode(b"d4:listl5:helloi-7ee3:raw2:\xff\x00e").unwrap();

        let list = value.get(b"list").and_then(Value::as_list).unwrap();
        assert_eq!(list[0].as_str(), Some("hello"));
        assert_eq!(list[1].as_integer(), Some(-7));
        assert_eq!(list[0].as_integer(), None);

        assert_eq!(value.get(b"raw").and_then(Value::as_str), None);
        assert_eq!(value.get(b"raw").and_then(Value::as_bytes), Some(&[0xff, 0x00][..]));
        assert!(value.as_list().is_none());

        let dict = value.into_dict().unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(Value::Integer(1).into_dict(), None);
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
        assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
        // Leading zeros are tolerated
        assert_eq!(decode(b"i007e").unwrap(), Value::Integer(7));
        assert_eq!(
            decode(b"i9223372036854775807e").unwrap(),
            Value::Integer(i64::MAX)
        );
    }

    #[test]
    fn test_decode_binary_string() {
        let mut input = b"4:".to_vec();
        input.extend_from_slice(&[0x00, 0xff, 0x3a, 0x65]);
        assert_eq!(
            decode(&input).unwrap(),
            Value::Bytes(vec![0x00, 0xff, 0x3a, 0x65])
        );
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(vec![]));
    }

    #[test]
    fn test_decode_prefix_reports_consumed() {
        let (value, consumed) = decode_prefix(b"xxi52e5:hello", 2).unwrap();
        assert_eq!(value, Value::Integer(52));
        assert_eq!(consumed, 4);

        let (value, consumed) = decode_prefix(b"l1:ae3:foo", 0).unwrap();
        assert_eq!(value, Value::List(vec![Value::string("a")]));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_decode_unsorted_keys() {
        let value = decode(b"d5:helloi52e3:foo3:bare").unwrap();
        assert_eq!(value.get(b"foo"), Some(&Value::string("bar")));
        assert_eq!(value.get(b"hello"), Some(&Value::Integer(52)));
    }

    #[test]
    fn test_decode_malformed() {
        let cases: &[&[u8]] = &[
            b"",
            b"5:hi",
            b"x:abc",
            b"5hello",
            b"i52",
            b"ie",
            b"i-e",
            b"i5x2e",
            b"i99999999999999999999e",
            b"l5:hello",
            b"d3:foo3:bar",
            b"d3:foo",
            b"di1ei2ee",
            b"x",
            b"i52eextra",
        ];
        for case in cases {
            match decode(case) {
                Err(Error::MalformedInput { .. }) => {}
                other => panic!("{:?} decoded to {:?}", String::from_utf8_lossy(case), other),
            }
        }
    }

    #[test]
    fn test_decode_nesting_limit() {
        let mut input = vec![b'l'; MAX_DEPTH + 2];
        input.extend(vec![b'e'; MAX_DEPTH + 2]);
        assert!(matches!(decode(&input), Err(Error::MalformedInput { .. })));
    }

    #[test]
    fn test_canonical_encoding_sorts_keys() {
        let a = decode(b"d5:helloi52e3:foo3:bar1:Al1:xee").unwrap();
        let b = decode(b"d1:Al1:xe3:foo3:bar5:helloi52ee").unwrap();

        let encoded_a = encode_dictionary_canonical(a.as_dict().unwrap());
        let encoded_b = encode_dictionary_canonical(b.as_dict().unwrap());

        assert_eq!(encoded_a, encoded_b);
        assert_eq!(encoded_a, b"d1:Al1:xe3:foo3:bar5:helloi52ee".to_vec());
    }

    #[test]
    fn test_canonical_encoding_byte_order() {
        // 0xff sorts after every ASCII key
        let mut d = Dictionary::new();
        d.insert(vec![0xff], Value::Integer(1));
        d.insert(b"z".to_vec(), Value::Integer(2));
        d.insert(b"a".to_vec(), Value::Integer(3));

        let mut expected = b"d1:ai3e1:zi2e1:".to_vec();
        expected.extend_from_slice(&[0xff]);
        expected.extend_from_slice(b"i1ee");

        assert_eq!(encode_dictionary_canonical(&d), expected);
    }

    #[test]
    fn test_roundtrip_nested() {
        let value = dict(vec![
            ("announce", Value::string("http://tracker.example/announce")),
            (
                "info",
                dict(vec![
                    ("length", Value::Integer(-1)),
                    ("files", Value::List(vec![Value::List(vec![]), Value::Bytes(vec![0, 1, 2])])),
                ]),
            ),
        ]);

        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_shapes() {
        let mut binary_keys = Dictionary::new();
        binary_keys.insert(vec![0x00], Value::Integer(0));
        binary_keys.insert(vec![0xff, 0xfe], Value::Bytes(vec![]));
        binary_keys.insert(vec![], Value::Integer(i64::MIN));

        let mut deep = Value::Integer(i64::MAX);
        for depth in 0..MAX_DEPTH - 1 {
            deep = if depth % 2 == 0 {
                Value::List(vec![deep])
            } else {
                dict(vec![("k", deep)])
            };
        }

        let values = [
            Value::Dict(Dictionary::new()),
            Value::List(vec![]),
            Value::Integer(0),
            Value::Integer(-1),
            Value::Bytes(vec![]),
            Value::Bytes((0..=255).collect()),
            Value::Dict(binary_keys),
            Value::List(vec![Value::Dict(Dictionary::new()), Value::List(vec![])]),
            deep,
        ];
        for value in values {
            let encoded = encode(&value);
            assert_eq!(decode(&encoded).unwrap(), value);
            assert_eq!(encode(&decode(&encoded).unwrap()), encoded);
        }
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let value = decode(b"d1:ai1e1:ai2ee").unwrap();
        assert_eq!(value.get(b"a"), Some(&Value::Integer(2)));
        assert_eq!(value.as_dict().map(|d| d.len()), Some(1));
    }
}
