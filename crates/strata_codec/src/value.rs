//! Dynamic field value type.

use std::cmp::Ordering;
use std::fmt;

/// A dynamic field value.
///
/// Every store backend exchanges entity fields as `Value`s. The set of
/// variants is the intersection of what relational, object and search
/// backends can round-trip; floats are intentionally not supported so that
/// key comparison and hashing stay exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs (keys are sorted for canonical encoding).
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with sorted keys.
    ///
    /// Keys are sorted by their canonical CBOR encoding (length first, then
    /// bytewise).
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Create a map value from text keys.
    pub fn text_map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::map(
            pairs
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    /// Compare two values by their canonical CBOR encoding.
    ///
    /// Used for map key ordering only; use [`Value::compare_natural`] for
    /// predicate evaluation.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let a = crate::encoder::encode_value(self);
        let b = crate::encoder::encode_value(other);
        a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
    }

    /// Compares two values of the same kind in their natural order.
    ///
    /// Returns `None` when the values are of different kinds (or either is
    /// null), which predicate evaluation treats as "does not match".
    pub fn compare_natural(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            // Relational drivers hand booleans back as 0/1
            (Value::Bool(a), Value::Integer(b)) => Some(i64::from(*a).cmp(b)),
            (Value::Integer(a), Value::Bool(b)) => Some(a.cmp(&i64::from(*b))),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => {
                for (av, bv) in a.iter().zip(b.iter()) {
                    match av.compare_natural(bv)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Returns true when both values denote the same datum.
    ///
    /// Unlike `==`, this treats `Bool(true)` and `Integer(1)` as equal.
    pub fn loosely_equals(&self, other: &Self) -> bool {
        self == other || self.compare_natural(other) == Some(Ordering::Equal)
    }

    /// The form under which loosely equal values are `==`, for use as a
    /// hash key: booleans become `0`/`1`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        match self {
            Value::Bool(b) => Value::Integer(i64::from(*b)),
            Value::Array(items) => Value::Array(items.iter().map(Self::normalized).collect()),
            other => other.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Array(_) => 5,
            Value::Map(_) => 6,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean.
    ///
    /// Integers `0` and `1` are accepted as well.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a text key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Walks a dotted path (`address.city`) through nested maps.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |current, segment| current.get(segment))
    }

    /// Renders the value as one segment of an object key.
    ///
    /// `/` and `%` are percent-escaped so that segments never collide
    /// with the key separator.
    pub fn key_segment(&self) -> String {
        let raw = match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        };
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '%' => out.push_str("%25"),
                '/' => out.push_str("%2F"),
                c => out.push(c),
            }
        }
        out
    }

    /// Converts this value to JSON.
    ///
    /// Bytes are rendered as an array of numbers; map keys that are not
    /// text are rendered with their display form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(pairs) => {
                let mut object = serde_json::Map::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => other.to_string(),
                    };
                    object.insert(key, v.to_json());
                }
                serde_json::Value::Object(object)
            }
        }
    }

    /// Converts JSON into a value.
    ///
    /// Returns `None` for non-integral numbers, which have no `Value`
    /// representation.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        Some(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Integer(n.as_i64()?),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            serde_json::Value::Object(object) => {
                let mut pairs = Vec::with_capacity(object.len());
                for (k, v) in object {
                    pairs.push((Value::Text(k.clone()), Value::from_json(v)?));
                }
                Value::map(pairs)
            }
        })
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: kind first, then natural order within a kind.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (a, b) if a.rank() == b.rank() => a.compare_natural(b).unwrap_or(Ordering::Equal),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => {
                write!(f, "h'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "'")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_key_length_ordering() {
        // Shorter keys come first in canonical CBOR
        let map = Value::map(vec![
            (Value::Text("abc".to_string()), Value::Integer(1)),
            (Value::Text("a".to_string()), Value::Integer(2)),
            (Value::Text("ab".to_string()), Value::Integer(3)),
        ]);

        let keys: Vec<_> = map
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_text().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "ab", "abc"]);
    }

    #[test]
    fn natural_comparison_is_numeric() {
        let a = Value::Integer(-2);
        let b = Value::Integer(10);
        assert_eq!(a.compare_natural(&b), Some(Ordering::Less));
        assert_eq!(a.compare_natural(&Value::Text("x".into())), None);
        assert_eq!(Value::Null.compare_natural(&Value::Null), None);
    }

    #[test]
    fn booleans_match_integers_loosely() {
        assert!(Value::Bool(true).loosely_equals(&Value::Integer(1)));
        assert!(!Value::Bool(false).loosely_equals(&Value::Integer(1)));
        assert_eq!(Value::Integer(0).as_bool(), Some(false));
    }

    #[test]
    fn loosely_equal_values_normalize_alike() {
        let flag = Value::Array(vec![Value::Bool(true), Value::from("a")]);
        let stored = Value::Array(vec![Value::Integer(1), Value::from("a")]);
        assert!(flag.loosely_equals(&stored));
        assert_eq!(flag.normalized(), stored.normalized());
        assert_ne!(Value::Bool(false).normalized(), Value::Integer(1));
    }

    #[test]
    fn total_order_groups_by_kind() {
        let mut values = vec![
            Value::Text("b".into()),
            Value::Integer(3),
            Value::Null,
            Value::Text("a".into()),
            Value::Integer(-1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Integer(-1),
                Value::Integer(3),
                Value::Text("a".into()),
                Value::Text("b".into()),
            ]
        );
    }

    #[test]
    fn get_path_walks_nested_maps() {
        let value = Value::text_map([(
            "address",
            Value::text_map([("city", Value::from("Lyon"))]),
        )]);
        assert_eq!(value.get_path("address.city"), Some(&Value::from("Lyon")));
        assert_eq!(value.get_path("address.zip"), None);
    }

    #[test]
    fn key_segment_escapes_separator() {
        assert_eq!(Value::from("a/b%c").key_segment(), "a%2Fb%25c");
        assert_eq!(Value::Integer(42).key_segment(), "42");
    }

    #[test]
    fn json_conversion() {
        let value = Value::text_map([
            ("name", Value::from("Alice")),
            ("tags", Value::Array(vec![Value::from("x")])),
        ]);
        let json = value.to_json();
        assert_eq!(json["name"], "Alice");
        assert_eq!(Value::from_json(&json), Some(value));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), None);
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(vec![1u8, 2, 3]), Value::Bytes(vec![1, 2, 3]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(()), Value::Null);
    }
}
