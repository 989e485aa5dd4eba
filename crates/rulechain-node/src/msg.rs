use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Encoding of a message payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
  #[default]
  Json,
  Text,
  Binary,
}

impl fmt::Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DataType::Json => f.write_str("JSON"),
      DataType::Text => f.write_str("TEXT"),
      DataType::Binary => f.write_str("BINARY"),
    }
  }
}

/// String key/value pairs carried alongside a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn remove(&mut self, key: &str) -> Option<String> {
    self.0.remove(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  /// Copy every entry of `other` into this map, overwriting existing keys.
  pub fn merge(&mut self, other: &Metadata) {
    for (k, v) in &other.0 {
      self.0.insert(k.clone(), v.clone());
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

/// A message flowing through a rule chain.
///
/// Cloning yields an independent copy with the same id, which is what the
/// engine hands to each branch when a message fans out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMsg {
  /// Creation time in milliseconds since the Unix epoch.
  pub ts: i64,
  pub id: String,
  pub data_type: DataType,
  #[serde(rename = "type")]
  pub msg_type: String,
  pub data: String,
  pub metadata: Metadata,
}

impl RuleMsg {
  /// Create a message with a fresh id and the current timestamp.
  pub fn new(
    msg_type: impl Into<String>,
    data_type: DataType,
    metadata: Metadata,
    data: impl Into<String>,
  ) -> Self {
    Self {
      ts: chrono::Utc::now().timestamp_millis(),
      id: uuid::Uuid::new_v4().to_string(),
      data_type,
      msg_type: msg_type.into(),
      data: data.into(),
      metadata,
    }
  }

  /// Create a JSON message from a value.
  pub fn json(msg_type: impl Into<String>, metadata: Metadata, data: &serde_json::Value) -> Self {
    Self::new(msg_type, DataType::Json, metadata, data.to_string())
  }

  /// Parse the payload as JSON.
  pub fn json_data(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(&self.data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_clone_is_independent() {
    let metadata: Metadata = [("productType", "test01")].into_iter().collect();
    let original = RuleMsg::json("TEST_MSG_TYPE", metadata, &json!({"temperature": 35}));

    let mut copy = original.clone();
    copy.metadata.insert("productType", "changed");
    copy.data = "{}".to_string();

    assert_eq!(copy.id, original.id);
    assert_eq!(original.metadata.get("productType"), Some("test01"));
    assert_eq!(original.json_data().unwrap()["temperature"], 35);
  }

  #[test]
  fn test_wire_format() {
    let msg = RuleMsg::new("T", DataType::Text, Metadata::new(), "hello");
    let value = serde_json::to_value(&msg).unwrap();

    assert_eq!(value["type"], "T");
    assert_eq!(value["dataType"], "TEXT");
    assert_eq!(value["data"], "hello");
    assert!(value["metadata"].as_object().unwrap().is_empty());
  }

  #[test]
  fn test_metadata_merge_overwrites() {
    let mut a: Metadata = [("x", "1"), ("y", "1")].into_iter().collect();
    let b: Metadata = [("y", "2"), ("z", "2")].into_iter().collect();
    a.merge(&b);

    assert_eq!(a.get("x"), Some("1"));
    assert_eq!(a.get("y"), Some("2"));
    assert_eq!(a.get("z"), Some("2"));
    assert_eq!(a.len(), 3);
  }
}
