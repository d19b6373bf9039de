use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest integer an `f64` holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A record key.
///
/// Keys are totally ordered: every number sorts before every string, and
/// every string before every array. Arrays compare element by element, then
/// by length. `-0.0` and `0.0` are the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Convert a JSON value into a key.
    ///
    /// Returns `None` for values that are not valid keys (objects, booleans,
    /// null, non-finite numbers, or arrays containing any of those).
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Convert the key back into a JSON value. Integral numbers come out as
    /// JSON integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                Value::from(*n as i64)
            }
            Key::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => unsigned_zero(*a).total_cmp(&unsigned_zero(*b)),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn unsigned_zero(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::String(s) => write!(f, "{s:?}"),
            Key::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Number(n as f64)
    }
}

/// Where a record's key (or an index's key) lives inside the record.
///
/// A single path is a dot-separated property chain; the empty string means
/// "the record itself". A compound path produces an array key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// `true` for the empty-string path.
    pub fn is_empty_string(&self) -> bool {
        matches!(self, KeyPath::Single(s) if s.is_empty())
    }

    /// `true` for a sequence of paths.
    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(_))
    }

    /// Evaluate the path against a record.
    pub fn extract(&self, record: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => lookup(record, path).and_then(Key::from_value),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| lookup(record, p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Write a generated key into the record at this path, creating
    /// intermediate objects as needed. Only single, non-empty paths accept
    /// injection.
    pub fn inject(&self, record: &mut Value, key: &Key) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        if path.is_empty() {
            return false;
        }
        let mut parts = path.split('.').peekable();
        let mut cursor = record;
        while let Some(part) = parts.next() {
            let Value::Object(map) = cursor else {
                return false;
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), key.to_value());
                return true;
            }
            cursor = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        false
    }
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.').try_fold(record, |value, part| value.get(part))
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // The empty path selects the record itself.
            KeyPath::Single(s) if s.is_empty() => f.write_str("\"\""),
            KeyPath::Single(s) => f.write_str(s),
            KeyPath::Compound(parts) => write!(f, "[{}]", parts.join(", ")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        KeyPath::Single(s.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(s: String) -> Self {
        KeyPath::Single(s)
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(parts: Vec<String>) -> Self {
        KeyPath::Compound(parts)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(parts: Vec<&str>) -> Self {
        KeyPath::Compound(parts.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(parts: [&str; N]) -> Self {
        KeyPath::Compound(parts.iter().map(|p| p.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ordering_across_types() {
        let mut keys = vec![
            Key::Array(vec![Key::from(1i64)]),
            Key::from("b"),
            Key::from(10i64),
            Key::from("a"),
            Key::from(-3i64),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::from(-3i64),
                Key::from(10i64),
                Key::from("a"),
                Key::from("b"),
                Key::Array(vec![Key::from(1i64)]),
            ]
        );
    }

    #[test]
    fn array_keys_compare_elementwise_then_by_length() {
        let short = Key::Array(vec![Key::from(1i64)]);
        let long = Key::Array(vec![Key::from(1i64), Key::from(0i64)]);
        let bigger = Key::Array(vec![Key::from(2i64)]);
        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn invalid_values_are_not_keys() {
        assert!(Key::from_value(&json!(null)).is_none());
        assert!(Key::from_value(&json!(true)).is_none());
        assert!(Key::from_value(&json!({"a": 1})).is_none());
        assert!(Key::from_value(&json!([1, {}])).is_none());
    }

    #[test]
    fn extract_nested_and_compound_paths() {
        let record = json!({"isbn": "123", "meta": {"year": 1999}, "stars": 4});
        assert_eq!(KeyPath::from("isbn").extract(&record), Some(Key::from("123")));
        assert_eq!(
            KeyPath::from("meta.year").extract(&record),
            Some(Key::from(1999i64))
        );
        assert_eq!(
            KeyPath::from(["stars", "meta.year"]).extract(&record),
            Some(Key::Array(vec![Key::from(4i64), Key::from(1999i64)]))
        );
        assert_eq!(KeyPath::from("missing").extract(&record), None);
    }

    #[test]
    fn inject_creates_intermediate_objects() {
        let mut record = json!({"name": "Fred"});
        assert!(KeyPath::from("ids.local").inject(&mut record, &Key::from(7i64)));
        assert_eq!(record, json!({"name": "Fred", "ids": {"local": 7}}));
        assert!(!KeyPath::from(["a", "b"]).inject(&mut record, &Key::from(1i64)));
    }

    #[test]
    fn signed_zeros_are_one_key() {
        assert_eq!(Key::from(-0.0), Key::from(0.0));
        assert!(Key::from(-0.0) > Key::from(-1e-300));
        let mut keys = std::collections::BTreeMap::new();
        keys.insert(Key::from(0.0), "positive");
        keys.insert(Key::from(-0.0), "negative");
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn integral_numbers_convert_to_json_integers() {
        assert_eq!(Key::from(7i64).to_value(), json!(7));
        assert_eq!(Key::from(-0.0).to_value(), json!(0));
        assert_eq!(Key::from(2.5).to_value(), json!(2.5));
        assert_eq!(
            Key::Array(vec![Key::from(1i64), Key::from("a")]).to_value(),
            json!([1, "a"])
        );
    }

    #[test]
    fn key_path_display() {
        assert_eq!(KeyPath::from("isbn").to_string(), "isbn");
        assert_eq!(KeyPath::from("meta.year").to_string(), "meta.year");
        assert_eq!(KeyPath::from("").to_string(), "\"\"");
        assert_eq!(KeyPath::from(["a", "b"]).to_string(), "[a, b]");
    }

    #[test]
    fn key_path_deserializes_untagged() {
        let single: KeyPath = serde_json::from_str("\"isbn\"").unwrap();
        let compound: KeyPath = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(single, KeyPath::from("isbn"));
        assert_eq!(compound, KeyPath::from(["a", "b"]));
    }
}
