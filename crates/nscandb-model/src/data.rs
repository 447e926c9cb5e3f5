//! Provenance-tagged values.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::projection::Projection;
use crate::Node;

// ============================================================================
// Data
// ============================================================================

/// A value together with the table or source that produced it.
///
/// Two `Data` compare equal when their values are equal, whatever their origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    #[serde(rename = "v")]
    pub value: Value,
    #[serde(rename = "o")]
    pub origin: String,
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Data {
    pub fn new(value: impl Into<Value>, origin: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            origin: origin.into(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Value as text, for string-valued observations (addresses, names).
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Single-entry datalist holding this observation.
    pub fn into_list(self) -> DataList {
        DataList::from_data(self)
    }
}

/// Derived key of a value: scalars as text, containers as their children's
/// keys joined by `|`.
pub fn auto_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(auto_key).collect::<Vec<_>>().join("|"),
        Value::Object(fields) => fields.values().map(auto_key).collect::<Vec<_>>().join("|"),
    }
}

// ============================================================================
// DataList
// ============================================================================

/// Multi-valued, provenance-tagged accumulator for one logical fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataList {
    entries: IndexMap<String, Data>,
}

impl DataList {
    pub fn new() -> Self {
        Self::default()
    }

    /// One observation keyed `origin|auto_key(value)`.
    pub fn single(value: impl Into<Value>, origin: impl Into<String>) -> Self {
        Self::from_data(Data::new(value, origin))
    }

    /// One observation with an explicit derived key.
    pub fn single_keyed(value: impl Into<Value>, origin: impl Into<String>, key: &str) -> Self {
        let data = Data::new(value, origin);
        let mut entries = IndexMap::with_capacity(1);
        entries.insert(format!("{}|{}", data.origin, key), data);
        Self { entries }
    }

    pub fn from_data(data: Data) -> Self {
        let key = format!("{}|{}", data.origin, auto_key(&data.value));
        let mut entries = IndexMap::with_capacity(1);
        entries.insert(key, data);
        Self { entries }
    }

    /// Key-union merge; on a shared key the incoming entry wins.
    pub fn append(&mut self, other: DataList) {
        for (key, data) in other.entries {
            self.entries.insert(key, data);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Data> {
        self.entries.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Data)> {
        self.entries.iter().map(|(k, d)| (k.as_str(), d))
    }

    /// First observation in insertion order.
    pub fn first(&self) -> Option<&Data> {
        self.entries.values().next()
    }

    /// All values in insertion order, duplicates across origins included.
    pub fn values(&self) -> Vec<&Value> {
        self.entries.values().map(|d| &d.value).collect()
    }

    /// String values in insertion order; non-string values are skipped.
    pub fn str_values(&self) -> Vec<&str> {
        self.entries.values().filter_map(|d| d.value.as_str()).collect()
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        self.entries.values().any(|d| &d.value == value)
    }

    pub fn has_origin(&self, origin: &str) -> bool {
        self.entries.values().any(|d| d.origin == origin)
    }

    /// Run the projection pipeline over the entries.
    pub fn project(&self, projection: &Projection) -> Option<Node> {
        projection.apply(self)
    }
}

impl FromIterator<Data> for DataList {
    fn from_iter<I: IntoIterator<Item = Data>>(iter: I) -> Self {
        let mut list = DataList::new();
        for data in iter {
            list.append(DataList::from_data(data));
        }
        list
    }
}
