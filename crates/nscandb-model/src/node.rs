//! Nested tree stored in every database table.

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::{Data, DataList};

/// A node of a database table.
///
/// Maps are the only nodes a path may traverse; lists and data are leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Map(IndexMap<String, Node>),
    Array(Vec<Node>),
    Data(Data),
    List(DataList),
    Value(Value),
}

impl Default for Node {
    fn default() -> Self {
        Node::Map(IndexMap::new())
    }
}

impl Node {
    pub fn map() -> Self {
        Node::Map(IndexMap::new())
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<String, Node>> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&DataList> {
        match self {
            Node::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Node::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Plain string leaf.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Walk `path` through nested maps.
    pub fn get_path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    pub fn get_path_mut(&mut self, path: &[&str]) -> Option<&mut Node> {
        let mut node = self;
        for key in path {
            node = node.as_map_mut()?.get_mut(*key)?;
        }
        Some(node)
    }

    /// Keys of a map node, empty for other nodes.
    pub fn keys(&self) -> Vec<&str> {
        self.as_map()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Node::Map(m) => m.is_empty(),
            Node::Array(a) => a.is_empty(),
            Node::List(l) => l.is_empty(),
            Node::Data(_) => false,
            Node::Value(v) => v.is_null(),
        }
    }

    /// Plain JSON rendering: data collapse to their value, datalists to the
    /// array of their values.
    pub fn to_plain(&self) -> Value {
        match self {
            Node::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain()))
                    .collect(),
            ),
            Node::Array(a) => Value::Array(a.iter().map(Node::to_plain).collect()),
            Node::Data(d) => d.value.clone(),
            Node::List(l) => Value::Array(l.values().into_iter().cloned().collect()),
            Node::Value(v) => v.clone(),
        }
    }

    /// Rebuild a tree from its serialized form, recognizing `_data` and
    /// `_datalist` wrappers.
    pub fn from_json(value: Value) -> Node {
        match value {
            Value::Object(mut fields) => {
                if fields.len() == 1 {
                    if let Some(inner) = fields.remove("_data") {
                        if let Ok(data) = serde_json::from_value::<Data>(inner.clone()) {
                            return Node::Data(data);
                        }
                        fields.insert("_data".to_string(), inner);
                    } else if let Some(inner) = fields.remove("_datalist") {
                        if let Ok(list) = serde_json::from_value::<DataList>(inner.clone()) {
                            return Node::List(list);
                        }
                        fields.insert("_datalist".to_string(), inner);
                    }
                }
                Node::Map(
                    fields
                        .into_iter()
                        .map(|(k, v)| (k, Node::from_json(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Node::Array(items.into_iter().map(Node::from_json).collect()),
            other => Node::Value(other),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Value(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Value(Value::String(value))
    }
}

impl From<Data> for Node {
    fn from(value: Data) -> Self {
        Node::Data(value)
    }
}

impl From<DataList> for Node {
    fn from(value: DataList) -> Self {
        Node::List(value)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Map(m) => m.serialize(serializer),
            Node::Array(a) => a.serialize(serializer),
            Node::Value(v) => v.serialize(serializer),
            Node::Data(d) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("_data", d)?;
                map.end()
            }
            Node::List(l) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("_datalist", l)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Node::from_json)
    }
}

/// Text form of a scalar used as a key: strings as-is, numbers and booleans
/// formatted, anything else rejected.
pub fn value_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer view of a number or numeric string.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
