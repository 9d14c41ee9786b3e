use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::StoreError;

/// One stored attribute. Numbers keep their integer/float split so sort keys
/// such as millisecond timestamps compare exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

/// A stored record: attribute name → value, key attributes included.
pub type Item = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Ordering used for sort keys. Only numbers and strings are ordered;
    /// anything else is incomparable.
    pub fn sort_cmp(&self, other: &AttrValue) -> Option<Ordering> {
        match (self, other) {
            (AttrValue::Int(a), AttrValue::Int(b)) => Some(a.cmp(b)),
            (AttrValue::Float(a), AttrValue::Float(b)) => a.partial_cmp(b),
            (AttrValue::Int(a), AttrValue::Float(b)) => (*a as f64).partial_cmp(b),
            (AttrValue::Float(a), AttrValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (AttrValue::Str(a), AttrValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => AttrValue::Null,
            Value::Bool(b) => AttrValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => AttrValue::Str(s),
            Value::Array(items) => AttrValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                AttrValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<AttrValue> for serde_json::Value {
    fn from(value: AttrValue) -> Self {
        use serde_json::Value;
        match value {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(b),
            AttrValue::Int(i) => Value::from(i),
            AttrValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttrValue::Str(s) => Value::String(s),
            AttrValue::List(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            AttrValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Convert a record into a store item. The record must serialize to a map.
pub fn to_item<T: Serialize>(record: &T) -> Result<Item, StoreError> {
    match serde_json::to_value(record).map_err(|e| StoreError::Codec(e.to_string()))? {
        serde_json::Value::Object(map) => {
            Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect())
        }
        other => Err(StoreError::Codec(format!("expected a map, got {other}"))),
    }
}

pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T, StoreError> {
    let map = item.into_iter().map(|(k, v)| (k, v.into())).collect();
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| StoreError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_keep_integer_precision() {
        let ts: i64 = 1_735_689_600_000;
        let v: AttrValue = serde_json::json!(ts).into();
        assert_eq!(v, AttrValue::Int(ts));
        let f: AttrValue = serde_json::json!(1.5).into();
        assert_eq!(f, AttrValue::Float(1.5));
    }

    #[test]
    fn sort_cmp_orders_numbers_and_strings_only() {
        assert_eq!(AttrValue::Int(1).sort_cmp(&AttrValue::Int(2)), Some(Ordering::Less));
        assert_eq!(AttrValue::Int(2).sort_cmp(&AttrValue::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(AttrValue::from("a").sort_cmp(&AttrValue::from("b")), Some(Ordering::Less));
        assert_eq!(AttrValue::Int(1).sort_cmp(&AttrValue::from("1")), None);
        assert_eq!(AttrValue::Null.sort_cmp(&AttrValue::Null), None);
    }

    #[test]
    fn item_conversion_preserves_nested_records() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Inner {
            x: f64,
            tags: Vec<String>,
        }
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Outer {
            id: String,
            start: i64,
            inner: Inner,
            note: Option<String>,
        }
        let record = Outer {
            id: "a".into(),
            start: 900_000,
            inner: Inner { x: 0.25, tags: vec!["desk".into()] },
            note: None,
        };
        let item = to_item(&record).unwrap();
        assert_eq!(item.get("start"), Some(&AttrValue::Int(900_000)));
        assert_eq!(item.get("note"), Some(&AttrValue::Null));
        let back: Outer = from_item(item).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn to_item_rejects_non_map_records() {
        assert!(matches!(to_item(&42), Err(StoreError::Codec(_))));
    }

    #[test]
    fn attr_values_survive_bincode() {
        let mut item = Item::new();
        item.insert("pk".into(), "USER#1".into());
        item.insert("n".into(), AttrValue::Int(-3));
        item.insert("f".into(), AttrValue::Float(2.5));
        let bytes = bincode::serialize(&item).unwrap();
        let back: Item = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, item);
    }
}
