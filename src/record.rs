//! Record-level data model: [`Record`], [`Item`] and [`Payload`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DataSet, Value};

/// Name of the synthetic field holding a record's source row index.
pub const INDEX_FIELD: &str = "index_record";

/// One logical row: a dynamically keyed, insertion-ordered field container.
///
/// Records have no fixed schema. [`Record::update`] overlays new key/value pairs onto existing
/// ones; the last write for a key wins and the key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single field, overwriting any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Merge `pairs` onto this record (last write wins per key).
    pub fn update<K, V, I>(&mut self, pairs: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in pairs {
            self.set(k, v);
        }
        self
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(pos).1)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        record.update(iter);
        record
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Written pair by pair: serde_json::Map would reorder keys.
        f.write_str("{")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let key = serde_json::to_string(k).map_err(|_| fmt::Error)?;
            let value = serde_json::to_string(v).map_err(|_| fmt::Error)?;
            write!(f, "{key}:{value}")?;
        }
        f.write_str("}")
    }
}

/// One slot of a [`crate::Collection`].
///
/// Usually a [`Record`]; lists passed through normalization without coercion may also hold bare
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    Record(Record),
    Value(Value),
}

impl Item {
    /// The record, if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Item::Record(r) => Some(r),
            Item::Value(_) => None,
        }
    }

    /// The bare value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Item::Value(v) => Some(v),
            Item::Record(_) => None,
        }
    }

    /// Field lookup; always `None` for bare values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|r| r.get(key))
    }
}

impl From<Record> for Item {
    fn from(r: Record) -> Self {
        Item::Record(r)
    }
}

impl From<Value> for Item {
    fn from(v: Value) -> Self {
        Item::Value(v)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Record(r) => r.fmt(f),
            Item::Value(v) => match serde_json::to_string(v) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{v:?}"),
            },
        }
    }
}

/// The five shapes data can take when it enters a collection or leaves an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    Table,
    Record,
    RecordList,
    List,
    Scalar,
}

/// Data flowing into a collection or between operations.
///
/// Normalization (see [`crate::orm::normalize`]) turns any payload into a sequence of [`Item`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Table(DataSet),
    Record(Record),
    Records(Vec<Record>),
    List(Vec<Item>),
    Scalar(Value),
}

impl Payload {
    /// Shape discriminant. A `List` whose first element is a record reports
    /// [`InputShape::RecordList`].
    pub fn shape(&self) -> InputShape {
        match self {
            Payload::Table(_) => InputShape::Table,
            Payload::Record(_) => InputShape::Record,
            Payload::Records(_) => InputShape::RecordList,
            Payload::List(items) => match items.first() {
                Some(Item::Record(_)) => InputShape::RecordList,
                _ => InputShape::List,
            },
            Payload::Scalar(_) => InputShape::Scalar,
        }
    }

    /// Truthiness: records are always truthy, lists are truthy when non-empty, tables when they
    /// have at least one row and one column.
    pub fn is_truthy(&self) -> bool {
        match self {
            Payload::Table(ds) => !ds.is_empty(),
            Payload::Record(_) => true,
            Payload::Records(rs) => !rs.is_empty(),
            Payload::List(items) => !items.is_empty(),
            Payload::Scalar(v) => v.is_truthy(),
        }
    }

    /// The record, if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Payload::Record(r) => Some(r),
            _ => None,
        }
    }

    /// The scalar, if this is one.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Payload::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Field lookup on a record payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|r| r.get(key))
    }

    /// A scalar payload, or a record's named field.
    pub fn value_or_field(&self, key: &str) -> Option<&Value> {
        match self {
            Payload::Scalar(v) => Some(v),
            _ => self.get(key),
        }
    }
}

impl From<DataSet> for Payload {
    fn from(ds: DataSet) -> Self {
        Payload::Table(ds)
    }
}

impl From<Record> for Payload {
    fn from(r: Record) -> Self {
        Payload::Record(r)
    }
}

impl From<Vec<Record>> for Payload {
    fn from(rs: Vec<Record>) -> Self {
        Payload::Records(rs)
    }
}

impl From<Vec<Item>> for Payload {
    fn from(items: Vec<Item>) -> Self {
        Payload::List(items)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Scalar(v)
    }
}

impl From<Item> for Payload {
    fn from(item: Item) -> Self {
        match item {
            Item::Record(r) => Payload::Record(r),
            Item::Value(v) => Payload::Scalar(v),
        }
    }
}
